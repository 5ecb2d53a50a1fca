//! Command implementations

use crate::cli::args::{format_bytes, parse_s3_object, parse_s3_path};
use crate::s3::{S3Client, TransferMode};
use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Upload a local file, resuming an incomplete multipart upload when one exists
pub async fn cmd_put(
    client: &S3Client,
    source: &Path,
    dest: &str,
    content_type: Option<&str>,
) -> Result<()> {
    let (bucket, key) = parse_s3_object(dest)?;

    let mut file = tokio::fs::File::open(source)
        .await
        .with_context(|| format!("Failed to open {}", source.display()))?;
    let size = file
        .metadata()
        .await
        .with_context(|| format!("Failed to stat {}", source.display()))?
        .len();

    println!("{} -> s3://{}/{}", source.display(), bucket, key);

    let outcome = client
        .put_object(&bucket, &key, &mut file, size, content_type.unwrap_or_default())
        .await
        .with_context(|| format!("Upload to s3://{}/{} failed", bucket, key))?;

    match outcome.mode {
        TransferMode::SingleShot => {
            println!("  {} uploaded", format_bytes(outcome.total_bytes));
        }
        TransferMode::Multipart => {
            println!(
                "  {} uploaded in {} parts ({} already stored)",
                format_bytes(outcome.total_bytes),
                outcome.parts_uploaded + outcome.parts_skipped,
                outcome.parts_skipped
            );
        }
    }
    if !outcome.etag.is_empty() {
        println!("  etag {}", outcome.etag);
    }
    Ok(())
}

/// List incomplete multipart uploads under a prefix
pub async fn cmd_ls_incomplete(client: &S3Client, path: &str, recursive: bool) -> Result<()> {
    let (bucket, prefix) = parse_s3_path(path)?;
    let prefix = prefix.unwrap_or_default();

    let mut uploads = client.list_incomplete_uploads(&bucket, &prefix, recursive)?;
    let stdout = std::io::stdout();
    let mut out = std::io::BufWriter::new(stdout.lock());
    let mut total = 0usize;

    while let Some(upload) = uploads.next().await? {
        writeln!(out, "[{}] {}  {}", upload.initiated, upload.key, upload.upload_id)?;
        total += 1;
    }
    out.flush()?;
    debug!(pages = uploads.pages_fetched(), total, "ls_incomplete_done");

    if total == 0 {
        println!("No incomplete uploads found");
    }
    Ok(())
}

/// List the parts stored for one upload
pub async fn cmd_parts(client: &S3Client, path: &str, upload_id: &str) -> Result<()> {
    let (bucket, key) = parse_s3_object(path)?;

    let mut parts = client.list_parts(&bucket, &key, upload_id)?;
    let mut total_bytes = 0u64;
    let mut count = 0u32;
    while let Some(part) = parts.next().await? {
        println!("{:>5}  {:>12}  {}", part.part_number, format_bytes(part.size), part.etag);
        total_bytes += part.size;
        count += 1;
    }
    println!("{} parts, {} stored", count, format_bytes(total_bytes));
    Ok(())
}

/// Abort every incomplete upload for an object
pub async fn cmd_rm_incomplete(client: &S3Client, path: &str) -> Result<()> {
    let (bucket, key) = parse_s3_object(path)?;
    let removed = client.remove_incomplete_upload(&bucket, &key).await?;
    println!("Removed {} incomplete upload(s) for s3://{}/{}", removed, bucket, key);
    Ok(())
}
