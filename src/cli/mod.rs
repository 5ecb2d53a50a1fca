//! Thin command-line callers of the upload engine
//!
//! ```bash
//! # Upload a file (multipart above 5 MiB, resuming an earlier attempt)
//! s3push put ./backup.tar s3://bucket/backups/backup.tar
//!
//! # Incomplete uploads under a prefix
//! s3push ls-incomplete s3://bucket/backups/ --recursive
//!
//! # Parts stored for one upload
//! s3push parts s3://bucket/backups/backup.tar --upload-id <ID>
//!
//! # Abort every incomplete upload for a key
//! s3push rm-incomplete s3://bucket/backups/backup.tar
//! ```

pub mod args;
pub mod commands;
