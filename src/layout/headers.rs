//! Header structures of the backing file
//!
//! ```text
//! [0]   bucket_count            i32
//! [4]   padding                 i32
//! [8]   entry_count             i32
//! [12]  padding                 i32
//! [16]  bucket[bucket_count]    12 bytes each
//!       padding                 i32
//!       --- pool region, offsets below are relative to here ---
//!       size_class_count        i32
//!       padding                 i32
//!       bump_offset             pointer width (low word used)
//!       padding                 i32
//!       free_list[class_count]  16 bytes each
//!       padding                 i32
//!       arena ...
//! ```
//!
//! All fields are little-endian `i32` in native layout; every struct here is
//! copied through [`OffsetSpace`](crate::offset::OffsetSpace) rather than
//! referenced in place.

use std::mem::size_of;

use super::constants::{class_payload_size, BLOCK_TRAILER, SECTION_PADDING};
use crate::offset::{Offset, Plain};

/// Header at the very start of the backing file
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapHeader {
    /// Length of the bucket array (power of two)
    pub bucket_count: i32,
    _pad0: i32,
    /// Number of live keys
    pub entry_count: i32,
    _pad1: i32,
}

impl MapHeader {
    pub fn new(bucket_count: i32) -> Self {
        Self {
            bucket_count,
            _pad0: 0,
            entry_count: 0,
            _pad1: 0,
        }
    }
}

/// Head of one hash chain
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    pub head: Offset,
    pub tail: Offset,
    pub chain_length: i32,
}

impl Bucket {
    pub const EMPTY: Bucket = Bucket {
        head: Offset::NIL,
        tail: Offset::NIL,
        chain_length: 0,
    };

    pub fn is_empty(&self) -> bool {
        self.chain_length == 0
    }
}

/// Header at the start of the pool region
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolHeader {
    /// Number of free lists
    pub size_class_count: i32,
    _pad0: i32,
    /// Next never-used byte; only grows
    pub bump_offset: i32,
    _bump_high: i32,
    _pad1: i32,
}

impl PoolHeader {
    pub fn new(size_class_count: i32, bump_offset: i32) -> Self {
        Self {
            size_class_count,
            _pad0: 0,
            bump_offset,
            _bump_high: 0,
            _pad1: 0,
        }
    }
}

/// Doubly-linked list of free blocks of one size class
///
/// Allocation pops the head, release appends at the tail.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeList {
    pub head: Offset,
    pub tail: Offset,
    pub count: i32,
    pub idx: i32,
}

impl FreeList {
    pub fn empty(idx: i32) -> Self {
        Self {
            head: Offset::NIL,
            tail: Offset::NIL,
            count: 0,
            idx,
        }
    }
}

/// Precedes every payload handed out by the pool
///
/// `prev`/`next` only mean something while the block sits in a free list.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub size_class: i32,
    pub prev: Offset,
    pub next: Offset,
    pub payload_len: i32,
}

/// Chain node of the map; itself a pool payload
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub prev: Offset,
    pub next: Offset,
    /// Mixed hash of the key
    pub hash: i32,
    /// NUL-terminated key bytes
    pub key: Offset,
    /// NUL-terminated value bytes
    pub value: Offset,
}

unsafe impl Plain for MapHeader {}
unsafe impl Plain for Bucket {}
unsafe impl Plain for PoolHeader {}
unsafe impl Plain for FreeList {}
unsafe impl Plain for BlockHeader {}
unsafe impl Plain for Entry {}

const _: () = assert!(size_of::<MapHeader>() == 16);
const _: () = assert!(size_of::<Bucket>() == 12);
const _: () = assert!(size_of::<PoolHeader>() == 20);
const _: () = assert!(size_of::<FreeList>() == 16);
const _: () = assert!(size_of::<BlockHeader>() == 16);
const _: () = assert!(size_of::<Entry>() == 20);

/// Position of bucket `index` from the start of the file
pub const fn bucket_position(index: usize) -> usize {
    size_of::<MapHeader>() + index * size_of::<Bucket>()
}

/// Bytes in front of the pool region for a given bucket count
pub const fn map_header_len(bucket_count: usize) -> usize {
    bucket_position(bucket_count) + SECTION_PADDING
}

/// Position of free list `class` from the start of the pool region
pub const fn free_list_position(class: usize) -> usize {
    size_of::<PoolHeader>() + class * size_of::<FreeList>()
}

/// Bytes of pool header and free-list table; the arena starts here
pub const fn pool_header_len(size_class_count: usize) -> usize {
    free_list_position(size_class_count) + SECTION_PADDING
}

/// Bytes the bump pointer advances when carving a block of `class`
pub const fn carved_block_len(class: usize) -> usize {
    size_of::<BlockHeader>() + class_payload_size(class) + BLOCK_TRAILER
}
