//! s3push - resumable S3 uploads
//!
//! SigV4 signing, lazy listing of incomplete uploads and parts, transfer
//! planning and a multipart upload engine that resumes earlier attempts.

pub mod cli;
pub mod config;
pub mod s3;

pub use config::Config;
pub use s3::{ClientOptions, S3Client, S3Error};
