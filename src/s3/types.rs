//! S3 types and response structures

use serde::{Deserialize, Serialize};

/// A stored part of a multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    /// Part number (1-10000)
    pub part_number: u32,
    /// ETag without surrounding quotes
    pub etag: String,
    /// Part size in bytes
    pub size: u64,
    /// Last modified timestamp (optional)
    pub last_modified: Option<String>,
}

impl Part {
    pub fn new(part_number: u32, etag: impl Into<String>, size: u64) -> Self {
        Self {
            part_number,
            etag: etag.into(),
            size,
            last_modified: None,
        }
    }
}

/// A multipart session that was initiated but neither completed nor aborted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompleteUpload {
    /// Object key
    pub key: String,
    pub upload_id: String,
    /// Initiation timestamp as reported by the service
    pub initiated: String,
    pub storage_class: Option<String>,
}

impl IncompleteUpload {
    pub fn new(key: impl Into<String>, upload_id: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            upload_id: upload_id.into(),
            initiated: String::new(),
            storage_class: None,
        }
    }
}

/// Part information for CompleteMultipartUpload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    /// Part number (1-10000)
    pub part_number: u32,
    /// ETag returned from UploadPart
    pub etag: String,
}

impl CompletedPart {
    pub fn new(part_number: u32, etag: impl Into<String>) -> Self {
        Self {
            part_number,
            etag: etag.into(),
        }
    }
}

/// Response from CreateMultipartUpload operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateMultipartUploadResult {
    pub bucket: String,
    pub key: String,
    /// Upload ID for subsequent UploadPart and CompleteMultipartUpload requests
    pub upload_id: String,
}

/// Response from CompleteMultipartUpload operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteMultipartUploadResult {
    /// Location URL of the completed object
    pub location: Option<String>,
    pub bucket: String,
    pub key: String,
    /// ETag of the completed object, unquoted
    pub etag: String,
}

/// Decoded `<Error>` document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub resource: Option<String>,
    pub request_id: Option<String>,
    pub host_id: Option<String>,
    pub bucket_name: Option<String>,
    pub key: Option<String>,
}
