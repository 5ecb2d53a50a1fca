//! S3 upload engine with AWS SigV4 signing
//!
//! This module provides:
//! - AWS Signature Version 4 signing for S3 requests
//! - Lazy pagination over incomplete uploads and stored parts
//! - Transfer planning and a resumable multipart upload engine
//! - The XML wire codec and a pluggable HTTP executor

pub mod client;
pub mod error;
pub mod paginate;
pub mod planner;
pub mod signer;
pub mod transport;
pub mod types;
pub mod upload;
pub mod xml;

// Re-export main types for convenience
pub use client::{ClientOptions, S3Client};
pub use error::{Result, S3Error};
pub use paginate::{Lister, ListingProtocol, Page};
pub use planner::{TransferLimits, TransferMode, TransferPlan, TransferPlanner};
pub use signer::{Credentials, S3SignerV4, SignedRequest};
pub use transport::{HttpExecutor, HttpRequest, HttpResponse, HyperExecutor};
pub use types::{CompletedPart, IncompleteUpload, Part};
pub use upload::{UploadEngine, UploadOutcome, UploadSession, UploadState};
