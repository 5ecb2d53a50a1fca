//! S3 client implementation of the multipart wire operations
//!
//! Every operation follows the same path:
//! - build an [`HttpRequest`] (encoded path, decoded query pairs, lowercase headers)
//! - add `host` and `user-agent`, sign with the current time
//! - hand the signed request to the [`HttpExecutor`]
//! - map non-success statuses to errors and decode the body
//!
//! Part bodies and single PUTs go out with UNSIGNED-PAYLOAD plus Content-MD5;
//! the small XML bodies are signed with their SHA-256.

use crate::s3::error::{Result, S3Error};
use crate::s3::paginate::{
    IncompleteUploadsListing, Lister, PartsCursor, PartsListing, UploadsCursor,
};
use crate::s3::planner::MAX_PARTS;
use crate::s3::signer::{Credentials, S3SignerV4};
use crate::s3::transport::{HttpExecutor, HttpRequest, HttpResponse, HyperExecutor};
use crate::s3::types::{CompleteMultipartUploadResult, CompletedPart};
use crate::s3::upload::{UploadEngine, UploadOutcome};
use crate::s3::xml::{self, ListPartsPage, ListUploadsPage};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use chrono::Utc;
use hyper::{Method, Uri};
use std::borrow::Cow;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tracing::{debug, info};

/// Hex lookup table for zero-allocation percent encoding
static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Page size requested from both listing APIs
const MAX_LIST_ENTRIES: &str = "1000";
const MAX_OBJECT_NAME_LEN: usize = 1024;

/// Immutable client configuration, fixed at construction
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// `scheme://host[:port]`
    pub endpoint: String,
    /// Value of the `host` header
    pub host: String,
    pub region: Option<String>,
    pub credentials: Arc<Credentials>,
    pub user_agent: String,
    pub timeout: Duration,
}

impl ClientOptions {
    /// Validate the endpoint and build options with default region, timeout
    /// and user agent
    pub fn new(endpoint: &str, credentials: Credentials) -> Result<Self> {
        let (endpoint, host) = validate_endpoint(endpoint)?;
        Ok(Self {
            endpoint,
            host,
            region: None,
            credentials: Arc::new(credentials),
            user_agent: user_agent(None),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Append `name/version` to the user agent
    pub fn with_app_info(mut self, name: &str, version: &str) -> Self {
        self.user_agent = user_agent(Some((name, version)));
        self
    }
}

/// `s3push/<version> (<os>; <arch>)`, optionally followed by `app/version`
pub fn user_agent(app: Option<(&str, &str)>) -> String {
    let mut agent = format!(
        "s3push/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    if let Some((name, version)) = app {
        let name = name.trim();
        let version = version.trim();
        if !name.is_empty() && !version.is_empty() {
            agent.push(' ');
            agent.push_str(name);
            agent.push('/');
            agent.push_str(version);
        }
    }
    agent
}

/// Check an endpoint URL and split it into (`scheme://authority`, authority)
pub fn validate_endpoint(endpoint: &str) -> Result<(String, String)> {
    let invalid = |reason: &str| S3Error::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        reason: reason.to_string(),
    };

    if endpoint.trim().is_empty() {
        return Err(invalid("endpoint is empty"));
    }
    let uri: Uri = endpoint
        .parse()
        .map_err(|e| invalid(&format!("not a valid URL: {}", e)))?;

    let scheme = match uri.scheme_str() {
        Some(scheme @ ("http" | "https")) => scheme,
        Some(_) => return Err(invalid("scheme must be http or https")),
        None => return Err(invalid("missing scheme")),
    };
    if !matches!(uri.path(), "" | "/") {
        return Err(invalid("endpoint must not contain a path"));
    }
    if uri.query().is_some() {
        return Err(invalid("endpoint must not contain a query"));
    }
    let authority = uri
        .authority()
        .ok_or_else(|| invalid("missing host"))?
        .as_str()
        .to_string();
    let host = uri.host().ok_or_else(|| invalid("missing host"))?;

    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<IpAddr>().is_err() {
        validate_host_name(host).map_err(|reason| invalid(&reason))?;
    }

    Ok((format!("{}://{}", scheme, authority), authority))
}

fn validate_host_name(host: &str) -> std::result::Result<(), String> {
    if host.is_empty() || host.len() > 253 {
        return Err("host name must be 1 to 253 characters".to_string());
    }
    for label in host.split('.') {
        if label.is_empty() || label.len() > 63 {
            return Err(format!("host label {:?} must be 1 to 63 characters", label));
        }
        if !label.as_bytes()[0].is_ascii_alphanumeric() {
            return Err(format!("host label {:?} must start with a letter or digit", label));
        }
        if !label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-') {
            return Err(format!("host label {:?} contains invalid characters", label));
        }
    }
    let lower = host.to_ascii_lowercase();
    if lower.ends_with(".amazonaws.com") && lower != "s3.amazonaws.com" {
        return Err("Amazon S3 endpoint must be 's3.amazonaws.com'".to_string());
    }
    Ok(())
}

/// Bucket names: 3-63 lowercase letters, digits, '.' or '-', alphanumeric at both ends
pub fn validate_bucket_name(bucket: &str) -> Result<()> {
    let invalid = |reason: &str| {
        S3Error::InvalidArgument(format!("bucket name {:?} {}", bucket, reason))
    };
    if bucket.len() < 3 || bucket.len() > 63 {
        return Err(invalid("must be 3 to 63 characters long"));
    }
    if !bucket
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'.' || b == b'-')
    {
        return Err(invalid("may only contain lowercase letters, digits, '.' and '-'"));
    }
    let bytes = bucket.as_bytes();
    if !bytes[0].is_ascii_alphanumeric() || !bytes[bytes.len() - 1].is_ascii_alphanumeric() {
        return Err(invalid("must start and end with a letter or digit"));
    }
    Ok(())
}

pub fn validate_object_name(object: &str) -> Result<()> {
    if object.is_empty() {
        return Err(S3Error::InvalidArgument("object name is empty".to_string()));
    }
    if object.len() > MAX_OBJECT_NAME_LEN {
        return Err(S3Error::InvalidArgument(format!(
            "object name is {} bytes, limit is {}",
            object.len(),
            MAX_OBJECT_NAME_LEN
        )));
    }
    Ok(())
}

pub(crate) fn content_type_or_default(content_type: &str) -> &str {
    if content_type.trim().is_empty() {
        DEFAULT_CONTENT_TYPE
    } else {
        content_type
    }
}

/// S3 client for resumable uploads
///
/// Clone is cheap: the executor and signer are shared.
#[derive(Clone)]
pub struct S3Client {
    executor: Arc<dyn HttpExecutor>,
    /// AWS SigV4 signer (with signing key cache)
    signer: Arc<S3SignerV4>,
    host: String,
    user_agent: String,
}

impl fmt::Debug for S3Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Client")
            .field("host", &self.host)
            .field("region", &self.signer.region())
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl S3Client {
    /// Create a client backed by the hyper executor
    pub fn new(options: ClientOptions) -> Result<Self> {
        let executor = HyperExecutor::new(&options.endpoint, options.timeout)?;
        Ok(Self::with_executor(options, Arc::new(executor)))
    }

    /// Create a client that sends through the given executor
    pub fn with_executor(options: ClientOptions, executor: Arc<dyn HttpExecutor>) -> Self {
        let signer = S3SignerV4::new(options.credentials, options.region);
        Self {
            executor,
            signer: Arc::new(signer),
            host: options.host,
            user_agent: options.user_agent,
        }
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Sign and send. Each call derives a fresh signature from the current time.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let request = request
            .header("host", self.host.as_str())
            .header("user-agent", self.user_agent.as_str());
        let signed = self.signer.sign(&request, Utc::now())?;
        self.executor.execute(signed).await
    }

    /// Encode an S3 key, preserving forward slashes
    /// Returns Cow::Borrowed when no encoding is needed (common case = zero allocation)
    fn encode_s3_key(key: &str) -> Cow<'_, str> {
        let needs_encoding = key
            .bytes()
            .any(|b| !matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/'));

        if !needs_encoding {
            return Cow::Borrowed(key);
        }

        let mut result = String::with_capacity(key.len() + 32);
        for byte in key.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' => {
                    result.push(byte as char);
                }
                _ => {
                    result.push('%');
                    result.push(HEX_UPPER[(byte >> 4) as usize] as char);
                    result.push(HEX_UPPER[(byte & 0xf) as usize] as char);
                }
            }
        }
        Cow::Owned(result)
    }

    /// `/{bucket}/{encoded key}`
    fn object_path(bucket: &str, object: &str) -> String {
        let encoded_key = Self::encode_s3_key(object);
        let mut path = String::with_capacity(2 + bucket.len() + encoded_key.len());
        path.push('/');
        path.push_str(bucket);
        path.push('/');
        path.push_str(&encoded_key);
        path
    }

    fn bucket_path(bucket: &str) -> String {
        let mut path = String::with_capacity(1 + bucket.len());
        path.push('/');
        path.push_str(bucket);
        path
    }

    fn check_status(response: HttpResponse) -> Result<HttpResponse> {
        if !response.status.is_success() {
            return Err(xml::service_error(response.status, &response.body));
        }
        Ok(response)
    }

    fn listing_failed(response: &HttpResponse) -> S3Error {
        S3Error::ListingFailed {
            status: response.status,
            body: String::from_utf8_lossy(&response.body).into_owned(),
        }
    }

    /// An `<Error>` document in a successful listing response is a listing
    /// failure; other decode errors pass through
    fn listing_error(error: S3Error, response: &HttpResponse) -> S3Error {
        match error {
            S3Error::Service { .. } => Self::listing_failed(response),
            other => other,
        }
    }

    // =========================================================================
    // Upload entry point
    // =========================================================================

    /// Upload `size` bytes from `source` to `bucket/object`.
    ///
    /// Payloads below the multipart threshold go out as one PUT. Larger ones
    /// resume the newest incomplete upload for the key when one exists,
    /// skipping parts whose content already matches.
    pub async fn put_object<R>(
        &self,
        bucket: &str,
        object: &str,
        source: &mut R,
        size: u64,
        content_type: &str,
    ) -> Result<UploadOutcome>
    where
        R: AsyncRead + Unpin + Send,
    {
        UploadEngine::new(self.clone())
            .run(bucket, object, source, size, content_type)
            .await
    }

    /// Single PUT of an in-memory body. Returns the unquoted ETag.
    pub async fn put_object_single(
        &self,
        bucket: &str,
        object: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String> {
        validate_bucket_name(bucket)?;
        validate_object_name(object)?;

        let content_md5 = BASE64.encode(md5::compute(&data).0);
        let request = HttpRequest::new(Method::PUT, Self::object_path(bucket, object))
            .header("content-type", content_type_or_default(content_type))
            .header("content-md5", content_md5)
            .body(data)
            .unsigned_payload();

        let response = Self::check_status(self.send(request).await?)?;
        Ok(response
            .header_str("etag")
            .map(xml::unquote_etag)
            .unwrap_or_default())
    }

    // =========================================================================
    // Multipart Upload Operations
    // =========================================================================

    /// Initiate a multipart upload (CreateMultipartUpload). Returns the upload ID.
    pub async fn create_multipart_upload(
        &self,
        bucket: &str,
        object: &str,
        content_type: &str,
    ) -> Result<String> {
        validate_bucket_name(bucket)?;
        validate_object_name(object)?;

        let request = HttpRequest::new(Method::POST, Self::object_path(bucket, object))
            .query("uploads", "")
            .header("content-type", content_type_or_default(content_type));

        let response = Self::check_status(self.send(request).await?)?;
        let result = xml::decode_initiate(response.status, &response.body)?;
        debug!(bucket, object, upload_id = %result.upload_id, "multipart_initiated");
        Ok(result.upload_id)
    }

    /// Upload one part (UploadPart). Returns the unquoted ETag.
    pub async fn upload_part(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
        content_type: &str,
    ) -> Result<String> {
        let digest = md5::compute(&data);
        self.upload_part_with_digest(bucket, object, upload_id, part_number, data, digest, content_type)
            .await
    }

    /// Upload one part whose MD5 the caller already computed
    #[allow(clippy::too_many_arguments)]
    pub(crate) async fn upload_part_with_digest(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
        digest: md5::Digest,
        content_type: &str,
    ) -> Result<String> {
        validate_bucket_name(bucket)?;
        validate_object_name(object)?;
        if part_number == 0 || part_number > MAX_PARTS {
            return Err(S3Error::InvalidArgument(format!(
                "part number {} outside 1..={}",
                part_number, MAX_PARTS
            )));
        }

        let request = HttpRequest::new(Method::PUT, Self::object_path(bucket, object))
            .query("partNumber", part_number.to_string())
            .query("uploadId", upload_id)
            .header("content-type", content_type_or_default(content_type))
            .header("content-md5", BASE64.encode(digest.0))
            .body(data)
            .unsigned_payload();

        let response = Self::check_status(self.send(request).await?)?;
        match response.header_str("etag") {
            Some(etag) if !xml::unquote_etag(etag).is_empty() => Ok(xml::unquote_etag(etag)),
            _ => Err(S3Error::malformed(
                response.status,
                format!("part {} response has no ETag header", part_number),
                &response.body,
            )),
        }
    }

    /// Complete a multipart upload (CompleteMultipartUpload).
    ///
    /// Parts are sent in the order given. A 200 response that carries an
    /// `<Error>` document is still a failure.
    pub async fn complete_multipart_upload(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompleteMultipartUploadResult> {
        validate_bucket_name(bucket)?;
        validate_object_name(object)?;

        let body = xml::encode_complete_multipart_upload(parts);
        let request = HttpRequest::new(Method::POST, Self::object_path(bucket, object))
            .query("uploadId", upload_id)
            .header("content-type", "application/xml")
            .body(Bytes::from(body));

        let response = Self::check_status(self.send(request).await?)?;
        xml::decode_complete(response.status, &response.body)
    }

    /// Abort a multipart upload (AbortMultipartUpload), discarding its parts
    pub async fn abort_multipart_upload(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
    ) -> Result<()> {
        validate_bucket_name(bucket)?;
        validate_object_name(object)?;

        let request = HttpRequest::new(Method::DELETE, Self::object_path(bucket, object))
            .query("uploadId", upload_id);

        Self::check_status(self.send(request).await?)?;
        debug!(bucket, object, upload_id, "multipart_aborted");
        Ok(())
    }

    // =========================================================================
    // Listings
    // =========================================================================

    /// Fetch one ListMultipartUploads page
    pub async fn list_multipart_uploads_page(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        cursor: &UploadsCursor,
    ) -> Result<ListUploadsPage> {
        let mut request = HttpRequest::new(Method::GET, Self::bucket_path(bucket))
            .query("uploads", "")
            .query("prefix", prefix)
            .query("max-uploads", MAX_LIST_ENTRIES);
        if let Some(delimiter) = delimiter {
            request = request.query("delimiter", delimiter);
        }
        if let Some(ref key_marker) = cursor.key_marker {
            request = request.query("key-marker", key_marker.as_str());
        }
        if let Some(ref upload_id_marker) = cursor.upload_id_marker {
            request = request.query("upload-id-marker", upload_id_marker.as_str());
        }

        let response = self.send(request).await?;
        if !response.status.is_success() {
            return Err(Self::listing_failed(&response));
        }
        xml::decode_list_uploads(response.status, &response.body)
            .map_err(|e| Self::listing_error(e, &response))
    }

    /// Fetch one ListParts page
    pub async fn list_parts_page(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
        cursor: &PartsCursor,
    ) -> Result<ListPartsPage> {
        let mut request = HttpRequest::new(Method::GET, Self::object_path(bucket, object))
            .query("uploadId", upload_id)
            .query("max-parts", MAX_LIST_ENTRIES);
        if let Some(marker) = cursor.part_number_marker {
            request = request.query("part-number-marker", marker.to_string());
        }

        let response = self.send(request).await?;
        if !response.status.is_success() {
            return Err(Self::listing_failed(&response));
        }
        xml::decode_list_parts(response.status, &response.body)
            .map_err(|e| Self::listing_error(e, &response))
    }

    /// Incomplete uploads whose keys start with `prefix`.
    ///
    /// A non-recursive listing groups keys at `/`, so only the top level under
    /// the prefix is enumerated.
    pub fn list_incomplete_uploads(
        &self,
        bucket: &str,
        prefix: &str,
        recursive: bool,
    ) -> Result<Lister<IncompleteUploadsListing>> {
        validate_bucket_name(bucket)?;
        let delimiter = if recursive { None } else { Some("/".to_string()) };
        Ok(Lister::new(IncompleteUploadsListing::new(
            self.clone(),
            bucket,
            prefix,
            delimiter,
        )))
    }

    /// Stored parts of one multipart upload, ascending by part number
    pub fn list_parts(
        &self,
        bucket: &str,
        object: &str,
        upload_id: &str,
    ) -> Result<Lister<PartsListing>> {
        validate_bucket_name(bucket)?;
        validate_object_name(object)?;
        Ok(Lister::new(PartsListing::new(
            self.clone(),
            bucket,
            object,
            upload_id,
        )))
    }

    /// Abort every incomplete upload for exactly this object name.
    /// Returns how many sessions were aborted.
    pub async fn remove_incomplete_upload(&self, bucket: &str, object: &str) -> Result<usize> {
        validate_object_name(object)?;
        let mut uploads = self.list_incomplete_uploads(bucket, object, true)?;

        // Collect first so aborts do not shift the listing underneath us
        let mut upload_ids = Vec::new();
        while let Some(upload) = uploads.next().await? {
            if upload.key == object {
                upload_ids.push(upload.upload_id);
            }
        }

        for upload_id in &upload_ids {
            self.abort_multipart_upload(bucket, object, upload_id).await?;
        }
        info!(bucket, object, removed = upload_ids.len(), "incomplete_uploads_removed");
        Ok(upload_ids.len())
    }
}
