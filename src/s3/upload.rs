//! Upload engine
//!
//! Drives one upload through
//! `Idle -> Planning -> Discovering -> (Initiating | Resuming) -> TransferringParts -> Completing -> Done`,
//! with `Failed` reachable from every non-terminal state.
//!
//! Parts are read and sent sequentially in increasing part number order, so the
//! byte range behind each part number is the same on every attempt and a
//! resumed part can be skipped when its MD5 matches the stored ETag.
//!
//! Two concurrent uploads to the same key may discover and resume the same
//! incomplete session. The resulting object is undefined; callers must not
//! upload the same key from two places at once.

use crate::s3::client::{
    content_type_or_default, validate_bucket_name, validate_object_name, S3Client,
};
use crate::s3::error::{Result, S3Error};
use crate::s3::paginate::{IncompleteUploadsListing, Lister, PartsListing};
use crate::s3::planner::{TransferMode, TransferPlan, TransferPlanner};
use crate::s3::types::CompletedPart;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Idle,
    Planning,
    Discovering,
    Initiating,
    Resuming,
    TransferringParts,
    Completing,
    Done,
    Failed,
}

impl UploadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Done | UploadState::Failed)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UploadState::Idle => "idle",
            UploadState::Planning => "planning",
            UploadState::Discovering => "discovering",
            UploadState::Initiating => "initiating",
            UploadState::Resuming => "resuming",
            UploadState::TransferringParts => "transferring_parts",
            UploadState::Completing => "completing",
            UploadState::Done => "done",
            UploadState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// In-memory state of one multipart transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub bucket: String,
    pub object: String,
    pub upload_id: String,
    /// Content type the session was initiated with. `None` for a resumed
    /// session: the service keeps the type from its initiation, which the
    /// listing does not report.
    pub content_type: Option<String>,
    pub part_size: u64,
    /// Part number to unquoted ETag, for the current upload ID only
    pub parts: BTreeMap<u32, String>,
    /// Whether the session was discovered rather than initiated
    pub resumed: bool,
}

/// Summary of a finished upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub mode: TransferMode,
    /// Set for multipart uploads
    pub upload_id: Option<String>,
    /// ETag of the stored object, unquoted
    pub etag: String,
    pub parts_uploaded: u32,
    /// Resumed parts whose content already matched
    pub parts_skipped: u32,
    pub total_bytes: u64,
}

/// Read until `len` bytes are buffered or the source stops.
///
/// The source stops by reporting end of data or by failing. Either way the
/// bytes read so far are returned; a failure is handed back alongside them so
/// callers decide whether the shortfall is acceptable.
pub async fn read_full<R>(source: &mut R, len: usize) -> (Vec<u8>, Option<std::io::Error>)
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    let mut cause = None;
    while filled < len {
        match source.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                cause = Some(e);
                break;
            }
        }
    }
    buf.truncate(filled);
    (buf, cause)
}

/// Read exactly `len` bytes or fail with `UnexpectedShortRead`, whether the
/// source ran dry or raised
async fn read_exact_part<R>(source: &mut R, len: u64) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let want = usize::try_from(len).map_err(|_| {
        S3Error::InvalidArgument(format!("part of {} bytes does not fit in memory", len))
    })?;
    let (buf, cause) = read_full(source, want).await;
    if buf.len() < want {
        if let Some(cause) = cause {
            warn!(expected = len, actual = buf.len(), error = %cause, "source_read_failed");
        }
        return Err(S3Error::UnexpectedShortRead {
            expected: len,
            actual: buf.len() as u64,
        });
    }
    Ok(buf)
}

/// Runs one upload. Owns its session exclusively for the duration of `run`.
pub struct UploadEngine {
    client: S3Client,
    planner: TransferPlanner,
    state: UploadState,
    session: Option<UploadSession>,
}

impl UploadEngine {
    pub fn new(client: S3Client) -> Self {
        Self {
            client,
            planner: TransferPlanner::default(),
            state: UploadState::Idle,
            session: None,
        }
    }

    pub fn with_planner(mut self, planner: TransferPlanner) -> Self {
        self.planner = planner;
        self
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Multipart session of the last run, if one was started or resumed
    pub fn session(&self) -> Option<&UploadSession> {
        self.session.as_ref()
    }

    fn transition(&mut self, next: UploadState) {
        debug!(from = %self.state, to = %next, "upload_state");
        self.state = next;
    }

    /// Upload `size` bytes read from `source` to `bucket/object`
    pub async fn run<R>(
        &mut self,
        bucket: &str,
        object: &str,
        source: &mut R,
        size: u64,
        content_type: &str,
    ) -> Result<UploadOutcome>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        self.state = UploadState::Idle;
        self.session = None;
        info!(bucket, object, size, "upload_started");

        match self.drive(bucket, object, source, size, content_type).await {
            Ok(outcome) => {
                self.transition(UploadState::Done);
                info!(
                    bucket,
                    object,
                    etag = %outcome.etag,
                    parts_uploaded = outcome.parts_uploaded,
                    parts_skipped = outcome.parts_skipped,
                    "upload_completed"
                );
                Ok(outcome)
            }
            Err(e) => {
                let failed_in = self.state;
                self.transition(UploadState::Failed);
                if let Some(ref session) = self.session {
                    warn!(
                        bucket,
                        object,
                        upload_id = %session.upload_id,
                        state = %failed_in,
                        error = %e,
                        "upload_failed_session_left_incomplete"
                    );
                } else {
                    warn!(bucket, object, state = %failed_in, error = %e, "upload_failed");
                }
                Err(e)
            }
        }
    }

    async fn drive<R>(
        &mut self,
        bucket: &str,
        object: &str,
        source: &mut R,
        size: u64,
        content_type: &str,
    ) -> Result<UploadOutcome>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        self.transition(UploadState::Planning);
        validate_bucket_name(bucket)?;
        validate_object_name(object)?;
        let plan = self.planner.plan(size)?;
        debug!(mode = ?plan.mode, part_size = plan.part_size, part_count = plan.part_count, "upload_planned");

        match plan.mode {
            TransferMode::SingleShot => {
                self.single_shot(bucket, object, source, size, content_type)
                    .await
            }
            TransferMode::Multipart => {
                self.multipart(bucket, object, source, size, content_type, plan)
                    .await
            }
        }
    }

    async fn single_shot<R>(
        &mut self,
        bucket: &str,
        object: &str,
        source: &mut R,
        size: u64,
        content_type: &str,
    ) -> Result<UploadOutcome>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let data = read_exact_part(source, size).await?;
        let etag = self
            .client
            .put_object_single(bucket, object, Bytes::from(data), content_type)
            .await?;

        Ok(UploadOutcome {
            mode: TransferMode::SingleShot,
            upload_id: None,
            etag,
            parts_uploaded: 0,
            parts_skipped: 0,
            total_bytes: size,
        })
    }

    async fn multipart<R>(
        &mut self,
        bucket: &str,
        object: &str,
        source: &mut R,
        size: u64,
        content_type: &str,
        plan: TransferPlan,
    ) -> Result<UploadOutcome>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        self.transition(UploadState::Discovering);
        let existing = self.discover(bucket, object).await?;

        let session = match existing {
            Some(upload_id) => {
                self.transition(UploadState::Resuming);
                let mut parts = BTreeMap::new();
                let mut listing = Lister::new(PartsListing::new(
                    self.client.clone(),
                    bucket,
                    object,
                    upload_id.as_str(),
                ));
                while let Some(part) = listing.next().await? {
                    parts.insert(part.part_number, part.etag);
                }
                // The resumed session keeps the content type it was initiated with
                debug!(
                    upload_id = %upload_id,
                    stored_parts = parts.len(),
                    requested_content_type = content_type_or_default(content_type),
                    "multipart_resuming"
                );
                UploadSession {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                    upload_id,
                    content_type: None,
                    part_size: plan.part_size,
                    parts,
                    resumed: true,
                }
            }
            None => {
                self.transition(UploadState::Initiating);
                let upload_id = self
                    .client
                    .create_multipart_upload(bucket, object, content_type)
                    .await?;
                UploadSession {
                    bucket: bucket.to_string(),
                    object: object.to_string(),
                    upload_id,
                    content_type: Some(content_type_or_default(content_type).to_string()),
                    part_size: plan.part_size,
                    parts: BTreeMap::new(),
                    resumed: false,
                }
            }
        };
        let upload_id = session.upload_id.clone();
        self.session = Some(session);

        self.transition(UploadState::TransferringParts);
        let (last_part, uploaded, skipped) = self
            .transfer_parts(bucket, object, &upload_id, source, size, plan.part_size, content_type)
            .await?;

        self.transition(UploadState::Completing);
        let completed = self.reconcile(last_part);
        let result = self
            .client
            .complete_multipart_upload(bucket, object, &upload_id, &completed)
            .await?;

        Ok(UploadOutcome {
            mode: TransferMode::Multipart,
            upload_id: Some(upload_id),
            etag: result.etag,
            parts_uploaded: uploaded,
            parts_skipped: skipped,
            total_bytes: size,
        })
    }

    /// Newest incomplete upload for exactly this key, by listing order
    async fn discover(&self, bucket: &str, object: &str) -> Result<Option<String>> {
        let mut listing = Lister::new(IncompleteUploadsListing::new(
            self.client.clone(),
            bucket,
            object,
            None,
        ));
        let mut found = None;
        while let Some(upload) = listing.next().await? {
            if upload.key == object {
                found = Some(upload.upload_id);
            }
        }
        debug!(bucket, object, found = found.is_some(), pages = listing.pages_fetched(), "multipart_discovery");
        Ok(found)
    }

    /// Send every part in order. Returns (last part number, uploaded, skipped).
    #[allow(clippy::too_many_arguments)]
    async fn transfer_parts<R>(
        &mut self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        source: &mut R,
        size: u64,
        part_size: u64,
        content_type: &str,
    ) -> Result<(u32, u32, u32)>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let mut part_number = 0u32;
        let mut remaining = size;
        let mut uploaded = 0u32;
        let mut skipped = 0u32;

        while remaining > 0 {
            part_number += 1;
            let len = part_size.min(remaining);
            let data = read_exact_part(source, len).await?;
            remaining -= len;

            let digest = md5::compute(&data);
            let hash = format!("{:x}", digest);

            let stored = self
                .session
                .as_ref()
                .and_then(|s| s.parts.get(&part_number));
            if stored == Some(&hash) {
                debug!(part_number, etag = %hash, "multipart_part_skipped");
                skipped += 1;
                continue;
            }

            let etag = self
                .client
                .upload_part_with_digest(
                    bucket,
                    object,
                    upload_id,
                    part_number,
                    Bytes::from(data),
                    digest,
                    content_type,
                )
                .await?;
            debug!(part_number, size = len, etag = %etag, "multipart_part_uploaded");
            if let Some(ref mut session) = self.session {
                session.parts.insert(part_number, etag);
            }
            uploaded += 1;
        }

        Ok((part_number, uploaded, skipped))
    }

    /// Drop stale parts above `last_part` and build the ordered completion list
    fn reconcile(&mut self, last_part: u32) -> Vec<CompletedPart> {
        let Some(ref mut session) = self.session else {
            return Vec::new();
        };
        let stale = session.parts.split_off(&(last_part + 1));
        if !stale.is_empty() {
            debug!(
                upload_id = %session.upload_id,
                stale_parts = ?stale.keys().collect::<Vec<_>>(),
                "multipart_stale_parts_dropped"
            );
        }
        session
            .parts
            .iter()
            .map(|(number, etag)| CompletedPart::new(*number, etag.clone()))
            .collect()
    }
}
