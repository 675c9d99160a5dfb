//! Persisted layout of the backing file
//!
//! 1. Map header (bucket count, entry count)
//! 2. Bucket array
//! 3. Pool header and one free list per size class
//! 4. Arena carved by the bump pointer

pub mod constants;
pub mod headers;

pub use constants::*;
pub use headers::{
    bucket_position, carved_block_len, free_list_position, map_header_len, pool_header_len,
    BlockHeader, Bucket, Entry, FreeList, MapHeader, PoolHeader,
};
