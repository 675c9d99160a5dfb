//! Map configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{
    allocators::SizeClassPool,
    error::{Result, ShmMapError},
    layout::{map_header_len, DEFAULT_DATA_FILE, DEFAULT_SIZE_CLASS_COUNT, MAX_BUCKET_COUNT},
    memory::BackingType,
    sync::LockMode,
};

/// Configuration for opening a map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapConfig {
    /// Requested bucket count; rounded up to a power of two
    pub capacity: usize,
    /// Usable arena bytes behind the pool header
    pub arena_size: usize,
    /// Backing file
    pub path: PathBuf,
    /// Number of size classes (max payload is 8 times this)
    pub size_class_count: usize,
    /// Backing type for the region
    pub backing_type: BackingType,
    /// Cross-process lock taken around operations
    pub lock_mode: LockMode,
    /// Permissions for a newly created file
    pub permissions: u32,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            capacity: 16,
            arena_size: 1 << 20,
            path: PathBuf::from(DEFAULT_DATA_FILE),
            size_class_count: DEFAULT_SIZE_CLASS_COUNT,
            backing_type: BackingType::default(),
            lock_mode: LockMode::default(),
            permissions: 0o644,
        }
    }
}

impl MapConfig {
    /// Create a configuration for the given backing file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set requested capacity
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set arena size
    pub fn with_arena_size(mut self, arena_size: usize) -> Self {
        self.arena_size = arena_size;
        self
    }

    /// Set number of size classes
    pub fn with_size_class_count(mut self, count: usize) -> Self {
        self.size_class_count = count;
        self
    }

    /// Set backing type
    pub fn with_backing_type(mut self, backing_type: BackingType) -> Self {
        self.backing_type = backing_type;
        self
    }

    /// Set lock mode
    pub fn with_lock_mode(mut self, lock_mode: LockMode) -> Self {
        self.lock_mode = lock_mode;
        self
    }

    /// Set file permissions
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Bucket count laid out for this capacity
    pub fn bucket_count(&self) -> usize {
        self.capacity.clamp(1, MAX_BUCKET_COUNT).next_power_of_two()
    }

    /// Bytes of the pool region (header, free lists, arena)
    pub fn pool_len(&self) -> usize {
        SizeClassPool::required_len(self.size_class_count, self.arena_size)
    }

    /// Total bytes of the backing file
    pub fn region_len(&self) -> usize {
        map_header_len(self.bucket_count()) + self.pool_len()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(ShmMapError::invalid_parameter(
                "capacity",
                "The capacity of map must be greater than 0",
            ));
        }

        if self.arena_size == 0 {
            return Err(ShmMapError::invalid_parameter(
                "arena_size",
                "Arena size must be greater than 0",
            ));
        }

        if self.size_class_count == 0 || self.size_class_count > i32::MAX as usize / 16 {
            return Err(ShmMapError::invalid_parameter(
                "size_class_count",
                format!("Size class count {} is out of range", self.size_class_count),
            ));
        }

        let region_len = map_header_len(self.bucket_count())
            .checked_add(self.pool_len())
            .filter(|len| *len <= i32::MAX as usize);
        if region_len.is_none() {
            return Err(ShmMapError::invalid_parameter(
                "arena_size",
                "Buckets, headers and arena together must stay below 2 GiB",
            ));
        }

        if self.lock_mode == LockMode::AdvisoryFile && self.backing_type != BackingType::FileBacked
        {
            return Err(ShmMapError::invalid_parameter(
                "lock_mode",
                "Advisory file locking needs a file-backed region",
            ));
        }

        Ok(())
    }
}
