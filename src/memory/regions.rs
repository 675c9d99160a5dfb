//! Shared region provider: open, size and map the backing file

use std::{
    ffi::CString,
    fmt,
    fs::{File, OpenOptions},
    os::fd::OwnedFd,
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
};

use memmap2::{MmapMut, MmapOptions};
#[cfg(target_os = "linux")]
use nix::{
    sys::memfd::{memfd_create, MemFdCreateFlag},
    unistd::ftruncate,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, ShmMapError},
    offset::OffsetSpace,
};

use super::config::{BackingType, RegionConfig};

/// How a region's layout is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitMode {
    /// The backing store was just created; lay out fresh headers
    Bootstrap,
    /// The backing store already held data; re-read the headers in place
    Attach,
}

impl fmt::Display for InitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitMode::Bootstrap => f.write_str("bootstrap"),
            InitMode::Attach => f.write_str("attach"),
        }
    }
}

/// A mapped shared region
///
/// An existing non-empty backing file means [`InitMode::Attach`]; a missing
/// or empty one means [`InitMode::Bootstrap`]. Files are grown to the
/// requested size but never shrunk.
pub struct SharedMemoryRegion {
    /// Configuration the region was opened with
    config: RegionConfig,
    /// Memory-mapped region
    mmap: MmapMut,
    /// Offset view over the whole mapping
    space: OffsetSpace,
    /// Bootstrap or attach
    mode: InitMode,
    /// Backing file for file-backed regions
    file: Option<File>,
    /// Owned file descriptor for memfd regions
    _owned_fd: Option<OwnedFd>,
}

impl SharedMemoryRegion {
    /// Open or create the backing store and map it read-write, shared
    pub fn open(config: RegionConfig) -> Result<Self> {
        config.validate()?;

        let (file, owned_fd, len, mode) = match config.backing_type {
            BackingType::FileBacked => {
                let (file, len, mode) = Self::open_file_backing(&config)?;
                (Some(file), None, len, mode)
            }
            #[cfg(target_os = "linux")]
            BackingType::MemFd => {
                let fd = Self::create_memfd_backing(&config)?;
                (None, Some(fd), config.size, InitMode::Bootstrap)
            }
        };

        let mut mmap = Self::create_mapping(file.as_ref(), owned_fd.as_ref(), len)?;
        let space = unsafe { OffsetSpace::from_raw(mmap.as_mut_ptr(), mmap.len())? };

        Ok(Self {
            config,
            mmap,
            space,
            mode,
            file,
            _owned_fd: owned_fd,
        })
    }

    /// Open (or create) the file and make sure it covers `config.size`
    fn open_file_backing(config: &RegionConfig) -> Result<(File, usize, InitMode)> {
        let path = config.file_path();
        let mode = if has_existing_layout(&path) {
            InitMode::Attach
        } else {
            InitMode::Bootstrap
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(config.permissions)
            .open(&path)
            .map_err(|e| {
                ShmMapError::from_io(e, &format!("Failed to open data file {}", path.display()))
            })?;

        let current_len = file
            .metadata()
            .map_err(|e| ShmMapError::from_io(e, "Failed to stat data file"))?
            .len();
        if current_len < config.size as u64 {
            file.set_len(config.size as u64)
                .map_err(|e| ShmMapError::from_io(e, "Failed to set file size"))?;
        }

        let len = usize::try_from(current_len.max(config.size as u64)).map_err(|_| {
            ShmMapError::invalid_parameter("size", "Data file is larger than the address space")
        })?;
        Ok((file, len, mode))
    }

    /// Create memfd-backed storage
    #[cfg(target_os = "linux")]
    fn create_memfd_backing(config: &RegionConfig) -> Result<OwnedFd> {
        let name_cstr = CString::new(config.name.clone())
            .map_err(|_| ShmMapError::invalid_parameter("name", "Name contains null bytes"))?;

        let owned_fd = memfd_create(&name_cstr, MemFdCreateFlag::MFD_CLOEXEC)
            .map_err(|e| ShmMapError::platform(format!("Failed to create memfd: {}", e)))?;

        ftruncate(&owned_fd, config.size as i64)
            .map_err(|e| ShmMapError::platform(format!("Failed to set memfd size: {}", e)))?;

        Ok(owned_fd)
    }

    /// Create memory mapping for the backing storage
    fn create_mapping(file: Option<&File>, owned_fd: Option<&OwnedFd>, len: usize) -> Result<MmapMut> {
        let mapped = match (file, owned_fd) {
            (Some(f), _) => unsafe { MmapOptions::new().len(len).map_mut(f) },
            (None, Some(fd)) => unsafe { MmapOptions::new().len(len).map_mut(fd) },
            (None, None) => {
                return Err(ShmMapError::platform("No file or owned fd available for mapping"))
            }
        };
        mapped.map_err(|e| ShmMapError::from_io(e, "Failed to create memory mapping"))
    }

    /// Whether the backing file already held data when it was opened
    ///
    /// Only a hint from the file size. Callers sharing the file decide the
    /// layout from their own header once they hold a lock.
    pub fn init_mode(&self) -> InitMode {
        self.mode
    }

    /// Offset view over the whole mapping
    pub fn space(&self) -> OffsetSpace {
        self.space
    }

    /// Get the raw memory slice (read-only)
    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    /// Mapped length; at least the configured size
    pub fn size(&self) -> usize {
        self.mmap.len()
    }

    /// Get the name of the region
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Backing file path, if file-backed
    pub fn path(&self) -> Option<PathBuf> {
        self.file.as_ref().map(|_| self.config.file_path())
    }

    /// Backing type of the region
    pub fn backing_type(&self) -> BackingType {
        self.config.backing_type
    }

    /// Check if the region is file-backed
    pub fn is_file_backed(&self) -> bool {
        matches!(self.config.backing_type, BackingType::FileBacked)
    }

    /// Flush changes to persistent storage (for file-backed regions)
    pub fn flush(&self) -> Result<()> {
        self.mmap
            .flush()
            .map_err(|e| ShmMapError::from_io(e, "Failed to flush memory mapping"))
    }

    /// Flush changes asynchronously
    pub fn flush_async(&self) -> Result<()> {
        self.mmap
            .flush_async()
            .map_err(|e| ShmMapError::from_io(e, "Failed to flush memory mapping asynchronously"))
    }
}

impl fmt::Debug for SharedMemoryRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMemoryRegion")
            .field("name", &self.config.name)
            .field("backing_type", &self.config.backing_type)
            .field("path", &self.path())
            .field("size", &self.mmap.len())
            .field("mode", &self.mode)
            .finish()
    }
}

unsafe impl Send for SharedMemoryRegion {}

/// Whether `path` holds data a region could attach to
pub fn has_existing_layout(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_new_file_is_bootstrap_then_attach() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("region.dat");
        let config = RegionConfig::new("test_region", 4096).with_file_path(&path);

        let region = SharedMemoryRegion::open(config.clone()).unwrap();
        assert_eq!(region.init_mode(), InitMode::Bootstrap);
        assert_eq!(region.size(), 4096);
        assert!(has_existing_layout(&path));
        drop(region);

        let region = SharedMemoryRegion::open(config).unwrap();
        assert_eq!(region.init_mode(), InitMode::Attach);
    }

    #[test]
    fn test_empty_existing_file_is_bootstrap() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.dat");
        File::create(&path).unwrap();

        let region =
            SharedMemoryRegion::open(RegionConfig::new("empty", 1024).with_file_path(&path))
                .unwrap();
        assert_eq!(region.init_mode(), InitMode::Bootstrap);
    }

    #[test]
    fn test_larger_existing_file_is_mapped_whole() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("big.dat");
        let file = File::create(&path).unwrap();
        file.set_len(8192).unwrap();

        let region =
            SharedMemoryRegion::open(RegionConfig::new("big", 4096).with_file_path(&path))
                .unwrap();
        assert_eq!(region.size(), 8192);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8192);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_memfd_region_is_always_bootstrap() {
        let config = RegionConfig::new("test_memfd", 4096).with_backing_type(BackingType::MemFd);
        let region = SharedMemoryRegion::open(config).unwrap();
        assert_eq!(region.init_mode(), InitMode::Bootstrap);
        assert!(region.path().is_none());
    }
}
