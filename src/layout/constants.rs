//! Constants of the persisted layout

/// Payload granularity of a size class in bytes
pub const SIZE_CLASS_GRANULE: usize = 8;

/// Number of free lists laid out by default; 8 * 128Ki = 1 MiB max payload
pub const DEFAULT_SIZE_CLASS_COUNT: usize = 128 * 1024;

/// Upper bound on the bucket array length
pub const MAX_BUCKET_COUNT: usize = 1 << 30;

/// Data file used when the caller does not name one
pub const DEFAULT_DATA_FILE: &str = "shm_map.dat";

/// Zero word written between header sections
pub const SECTION_PADDING: usize = 4;

/// Zero word written after every carved block
pub const BLOCK_TRAILER: usize = 4;

/// Payload bytes held by size class `class`
pub const fn class_payload_size(class: usize) -> usize {
    (class + 1) * SIZE_CLASS_GRANULE
}

/// Size class able to hold `len` bytes: exact multiples of the granule fit
/// their own class, anything else rounds up
pub const fn size_class_for(len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    if len % SIZE_CLASS_GRANULE == 0 {
        (len / SIZE_CLASS_GRANULE) - 1
    } else {
        len / SIZE_CLASS_GRANULE
    }
}
