//! Configuration types for the shared region

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::layout::DEFAULT_DATA_FILE;

/// Types of shared memory backing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackingType {
    /// File-backed shared memory; survives restarts
    #[default]
    FileBacked,
    /// Anonymous memory file descriptor (Linux-specific); always fresh
    #[cfg(target_os = "linux")]
    MemFd,
}

impl BackingType {
    /// Check if this backing type is supported on the current platform
    pub fn is_supported(&self) -> bool {
        match self {
            BackingType::FileBacked => true,
            #[cfg(target_os = "linux")]
            BackingType::MemFd => true,
        }
    }

    /// Get a human-readable name for the backing type
    pub fn name(&self) -> &'static str {
        match self {
            BackingType::FileBacked => "file-backed",
            #[cfg(target_os = "linux")]
            BackingType::MemFd => "memfd",
        }
    }
}

/// Configuration for opening the shared region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionConfig {
    /// Label used for memfd regions and diagnostics
    pub name: String,
    /// Minimum size of the region in bytes; an existing larger file is mapped whole
    pub size: usize,
    /// Backing type for the shared memory
    pub backing_type: BackingType,
    /// Backing file for file-backed regions
    pub file_path: Option<PathBuf>,
    /// Permissions for a newly created file (Unix permissions)
    pub permissions: u32,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            name: "shmmap".to_string(),
            size: 0,
            backing_type: BackingType::default(),
            file_path: None,
            permissions: 0o644,
        }
    }
}

impl RegionConfig {
    /// Create a new region configuration
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
            ..Default::default()
        }
    }

    /// Set the backing type
    pub fn with_backing_type(mut self, backing_type: BackingType) -> Self {
        self.backing_type = backing_type;
        self
    }

    /// Set the file path for file-backed regions
    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    /// Set the permissions for a newly created file
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        use crate::error::ShmMapError;

        if self.name.is_empty() {
            return Err(ShmMapError::invalid_parameter(
                "name",
                "Region name cannot be empty",
            ));
        }

        if self.size == 0 {
            return Err(ShmMapError::invalid_parameter(
                "size",
                "Region size must be greater than 0",
            ));
        }

        if !self.backing_type.is_supported() {
            return Err(ShmMapError::invalid_parameter(
                "backing_type",
                format!(
                    "Backing type {} is not supported on this platform",
                    self.backing_type.name()
                ),
            ));
        }

        Ok(())
    }

    /// Backing file, falling back to the default data file
    pub fn file_path(&self) -> PathBuf {
        self.file_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_FILE))
    }
}
