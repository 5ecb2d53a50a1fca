//! Command-line argument helpers

/// Split `s3://bucket/key` (or mc-style `s3/bucket/key`) into bucket and key
pub fn parse_s3_path(path: &str) -> anyhow::Result<(String, Option<String>)> {
    let path = path.trim();

    // Accept both "s3://bucket/key" (URI) and "s3/bucket/key" (mc-compatible)
    let stripped = if let Some(p) = path.strip_prefix("s3://") {
        p
    } else if let Some(p) = path.strip_prefix("s3/") {
        p
    } else {
        anyhow::bail!("Invalid S3 path format. Expected: s3://bucket/key");
    };

    let (bucket, key) = match stripped.split_once('/') {
        Some((bucket, key)) => (bucket, key),
        None => (stripped, ""),
    };

    if bucket.is_empty() {
        anyhow::bail!("Bucket name cannot be empty");
    }

    let key = if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    };

    Ok((bucket.to_string(), key))
}

/// Like [`parse_s3_path`], but the key is mandatory
pub fn parse_s3_object(path: &str) -> anyhow::Result<(String, String)> {
    match parse_s3_path(path)? {
        (bucket, Some(key)) => Ok((bucket, key)),
        (_, None) => anyhow::bail!("Object key required: {}", path),
    }
}

/// Human-readable size (1.50 MiB)
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB", "PiB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let bytes_f64 = bytes as f64;
    let exponent = (bytes_f64.ln() / 1024_f64.ln()).floor() as usize;
    let exponent = exponent.min(UNITS.len() - 1);

    let value = bytes_f64 / 1024_f64.powi(exponent as i32);

    if exponent == 0 {
        format!("{} {}", bytes, UNITS[exponent])
    } else {
        format!("{:.2} {}", value, UNITS[exponent])
    }
}
