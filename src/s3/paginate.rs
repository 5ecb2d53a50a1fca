//! Paginated listing
//!
//! A [`Lister`] drives one fresh server-side enumeration as a lazy pull
//! sequence. Each concrete listing is a [`ListingProtocol`] that fetches one
//! page for a cursor; iteration stops exactly when a page reports it is not
//! truncated, so empty pages that are still truncated keep the sequence going.

use crate::s3::client::S3Client;
use crate::s3::error::{Result, S3Error};
use crate::s3::types::{IncompleteUpload, Part};
use async_trait::async_trait;
use futures::stream::{self, Stream};
use hyper::StatusCode;
use std::collections::VecDeque;
use std::fmt::Debug;
use tracing::debug;

/// One decoded page: entries in server order plus the continuation state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<E, C> {
    pub entries: Vec<E>,
    /// Cursor for the following request; only meaningful when truncated
    pub next: C,
    pub is_truncated: bool,
}

/// A listing API that can be fetched one page at a time
#[async_trait]
pub trait ListingProtocol: Send + Sync {
    type Entry: Send;
    /// Opaque continuation markers. `Default` is the start of the listing.
    type Cursor: Clone + Default + PartialEq + Debug + Send + Sync;

    /// Short name used in log events
    fn name(&self) -> &'static str;

    async fn fetch_page(&self, cursor: &Self::Cursor) -> Result<Page<Self::Entry, Self::Cursor>>;
}

/// Lazy, finite, non-restartable sequence over a listing
pub struct Lister<P: ListingProtocol> {
    protocol: P,
    cursor: P::Cursor,
    buffer: VecDeque<P::Entry>,
    finished: bool,
    failed: bool,
    pages: u32,
}

impl<P: ListingProtocol> Lister<P> {
    pub fn new(protocol: P) -> Self {
        Self {
            protocol,
            cursor: P::Cursor::default(),
            buffer: VecDeque::new(),
            finished: false,
            failed: false,
            pages: 0,
        }
    }

    /// Number of pages fetched so far
    pub fn pages_fetched(&self) -> u32 {
        self.pages
    }

    /// Whether the listing stopped on an error rather than at its end
    pub fn failed(&self) -> bool {
        self.failed
    }

    /// Next entry, fetching pages as needed. `Ok(None)` once the server
    /// reports the listing is not truncated and every entry was yielded.
    ///
    /// An error is returned once and ends the listing: later calls return
    /// `Ok(None)` and [`Lister::failed`] reports `true`, so a partial listing
    /// can be told apart from a complete one.
    pub async fn next(&mut self) -> Result<Option<P::Entry>> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Ok(Some(entry));
            }
            if self.finished {
                return Ok(None);
            }
            self.fetch_next_page().await?;
        }
    }

    async fn fetch_next_page(&mut self) -> Result<()> {
        let page = match self.protocol.fetch_page(&self.cursor).await {
            Ok(page) => page,
            Err(e) => {
                self.finished = true;
                self.failed = true;
                return Err(e);
            }
        };
        self.pages += 1;

        debug!(
            listing = self.protocol.name(),
            page = self.pages,
            entries = page.entries.len(),
            truncated = page.is_truncated,
            "list_page_fetched"
        );

        self.buffer.extend(page.entries);

        if !page.is_truncated {
            self.finished = true;
            return Ok(());
        }

        if page.next == self.cursor {
            self.finished = true;
            self.failed = true;
            return Err(S3Error::malformed(
                StatusCode::OK,
                format!(
                    "{} listing truncated but cursor did not advance past {:?}",
                    self.protocol.name(),
                    self.cursor
                ),
                b"",
            ));
        }

        self.cursor = page.next;
        Ok(())
    }

    /// Drain the whole listing
    pub async fn collect(mut self) -> Result<Vec<P::Entry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    /// The same sequence as a `Stream`
    pub fn into_stream(self) -> impl Stream<Item = Result<P::Entry>> {
        stream::try_unfold(self, |mut lister| async move {
            let entry = lister.next().await?;
            Ok::<_, S3Error>(entry.map(|entry| (entry, lister)))
        })
    }
}

/// Continuation markers for ListMultipartUploads
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadsCursor {
    pub key_marker: Option<String>,
    pub upload_id_marker: Option<String>,
}

/// Incomplete multipart uploads in a bucket, filtered by prefix
#[derive(Clone)]
pub struct IncompleteUploadsListing {
    client: S3Client,
    bucket: String,
    prefix: String,
    delimiter: Option<String>,
}

impl IncompleteUploadsListing {
    pub fn new(
        client: S3Client,
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        delimiter: Option<String>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into(),
            delimiter,
        }
    }
}

#[async_trait]
impl ListingProtocol for IncompleteUploadsListing {
    type Entry = IncompleteUpload;
    type Cursor = UploadsCursor;

    fn name(&self) -> &'static str {
        "incomplete_uploads"
    }

    async fn fetch_page(&self, cursor: &UploadsCursor) -> Result<Page<IncompleteUpload, UploadsCursor>> {
        let page = self
            .client
            .list_multipart_uploads_page(&self.bucket, &self.prefix, self.delimiter.as_deref(), cursor)
            .await?;

        // Some servers omit the next markers; continue after the last entry
        let next = match (page.next_key_marker, page.uploads.last()) {
            (Some(key_marker), _) => UploadsCursor {
                key_marker: Some(key_marker),
                upload_id_marker: page.next_upload_id_marker,
            },
            (None, Some(last)) => UploadsCursor {
                key_marker: Some(last.key.clone()),
                upload_id_marker: Some(last.upload_id.clone()),
            },
            (None, None) => cursor.clone(),
        };

        Ok(Page {
            entries: page.uploads,
            next,
            is_truncated: page.is_truncated,
        })
    }
}

/// Continuation marker for ListParts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartsCursor {
    pub part_number_marker: Option<u32>,
}

/// Stored parts of one multipart upload, ascending by part number
#[derive(Clone)]
pub struct PartsListing {
    client: S3Client,
    bucket: String,
    object: String,
    upload_id: String,
}

impl PartsListing {
    pub fn new(
        client: S3Client,
        bucket: impl Into<String>,
        object: impl Into<String>,
        upload_id: impl Into<String>,
    ) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            object: object.into(),
            upload_id: upload_id.into(),
        }
    }
}

#[async_trait]
impl ListingProtocol for PartsListing {
    type Entry = Part;
    type Cursor = PartsCursor;

    fn name(&self) -> &'static str {
        "parts"
    }

    async fn fetch_page(&self, cursor: &PartsCursor) -> Result<Page<Part, PartsCursor>> {
        let page = self
            .client
            .list_parts_page(&self.bucket, &self.object, &self.upload_id, cursor)
            .await?;

        let next = PartsCursor {
            part_number_marker: page
                .next_part_number_marker
                .or_else(|| page.parts.last().map(|p| p.part_number))
                .or(cursor.part_number_marker),
        };

        Ok(Page {
            entries: page.parts,
            next,
            is_truncated: page.is_truncated,
        })
    }
}
