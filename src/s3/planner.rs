//! Transfer planning
//!
//! Decides between a single PUT and a multipart upload and picks the part
//! size. Pure arithmetic over the declared payload size.

use crate::s3::error::{Result, S3Error};

/// Smallest part S3 accepts (except the final part)
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;
/// Largest part S3 accepts
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;
/// Largest object a multipart upload can assemble
pub const MAX_OBJECT_SIZE: u64 = 5 * 1024 * 1024 * 1024 * 1024;
pub const MAX_PARTS: u32 = 10_000;

/// Size limits the planner works against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLimits {
    /// Payloads below this go out as one PUT
    pub multipart_threshold: u64,
    pub min_part_size: u64,
    pub max_part_size: u64,
    pub max_object_size: u64,
    pub max_parts: u32,
}

impl Default for TransferLimits {
    fn default() -> Self {
        Self {
            multipart_threshold: MIN_PART_SIZE,
            min_part_size: MIN_PART_SIZE,
            max_part_size: MAX_PART_SIZE,
            max_object_size: MAX_OBJECT_SIZE,
            max_parts: MAX_PARTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    SingleShot,
    Multipart,
}

/// Result of planning one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferPlan {
    pub mode: TransferMode,
    /// Bytes per part; equals the payload size for single-shot transfers
    pub part_size: u64,
    pub part_count: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransferPlanner {
    limits: TransferLimits,
}

impl TransferPlanner {
    pub fn new(limits: TransferLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &TransferLimits {
        &self.limits
    }

    /// Plan a transfer of `size` bytes.
    ///
    /// Part size is `max(min_part_size, size / (max_parts - 1))` clamped to
    /// `max_part_size`, leaving room for an undersized final part.
    pub fn plan(&self, size: u64) -> Result<TransferPlan> {
        let limits = &self.limits;
        if size > limits.max_object_size {
            return Err(S3Error::PayloadTooLarge {
                size,
                max: limits.max_object_size,
            });
        }

        if size < limits.multipart_threshold {
            return Ok(TransferPlan {
                mode: TransferMode::SingleShot,
                part_size: size,
                part_count: 1,
            });
        }

        let divisor = u64::from(limits.max_parts.saturating_sub(1).max(1));
        let part_size = (size / divisor)
            .max(limits.min_part_size)
            .min(limits.max_part_size)
            .max(1);
        let part_count = size.div_ceil(part_size);

        if part_count > u64::from(limits.max_parts) {
            return Err(S3Error::PayloadTooLarge {
                size,
                max: part_size.saturating_mul(u64::from(limits.max_parts)),
            });
        }

        Ok(TransferPlan {
            mode: TransferMode::Multipart,
            part_size,
            // Bounded by max_parts above
            part_count: part_count as u32,
        })
    }
}
