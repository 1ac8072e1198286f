use crate::page_store::constants::{
    MAX_MAP_SIZE, MAX_MMAP_DOUBLING_SHIFT, MAX_MMAP_STEP, MIN_MMAP_SIZE_SHIFT,
};
use crate::StorageError;

// None if the result does not fit in a u64
pub(crate) fn round_up_to_multiple_of(value: u64, multiple: u64) -> Option<u64> {
    if value % multiple == 0 {
        Some(value)
    } else {
        value.checked_add(multiple - value % multiple)
    }
}

/// Bounds on how large the mapping may grow, and how fast
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StoreLimits {
    /// Largest mapping the store will ever request
    pub max_map_size: u64,
    /// Increment used once the mapping is larger than 1GiB
    pub mmap_step: u64,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_map_size: MAX_MAP_SIZE,
            mmap_step: MAX_MMAP_STEP,
        }
    }
}

/// Computes the length of the mapping needed to hold at least `size` bytes.
///
/// Sizes up to 1GiB are rounded up to a power of two, starting at 32KiB. Larger sizes are rounded
/// up to a multiple of `limits.mmap_step` and then of the page size.
pub(crate) fn mmap_size(
    size: u64,
    page_size: usize,
    limits: &StoreLimits,
) -> Result<u64, StorageError> {
    for shift in MIN_MMAP_SIZE_SHIFT..=MAX_MMAP_DOUBLING_SHIFT {
        if size <= 1 << shift {
            return Ok(1 << shift);
        }
    }

    let exceeded = StorageError::MapSizeExceeded {
        requested: size,
        max: limits.max_map_size,
    };
    if size > limits.max_map_size {
        return Err(exceeded);
    }

    let aligned = round_up_to_multiple_of(size, limits.mmap_step)
        .and_then(|stepped| round_up_to_multiple_of(stepped, page_size as u64))
        .ok_or(exceeded)?;

    Ok(aligned.min(limits.max_map_size))
}
