//! Integration tests for the shared region provider

use std::fs;

use shmmap::memory::{has_existing_layout, BackingType, InitMode, RegionConfig, SharedMemoryRegion};
use tempfile::TempDir;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_config_builder() {
        let config = RegionConfig::new("test", 4096)
            .with_backing_type(BackingType::FileBacked)
            .with_file_path("/tmp/test.dat")
            .with_permissions(0o600);

        assert_eq!(config.name, "test");
        assert_eq!(config.size, 4096);
        assert_eq!(config.backing_type, BackingType::FileBacked);
        assert_eq!(config.permissions, 0o600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_file_backed_region_writes_through() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("through.dat");
        assert!(!has_existing_layout(&path));

        {
            let region =
                SharedMemoryRegion::open(RegionConfig::new("through", 1024).with_file_path(&path))
                    .unwrap();
            assert_eq!(region.init_mode(), InitMode::Bootstrap);
            assert!(region.is_file_backed());
            assert_eq!(region.path(), Some(path.clone()));

            let space = region.space();
            space
                .copy_in(shmmap::Offset::new(100), b"mapped bytes")
                .unwrap();
            region.flush().unwrap();
        }

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 1024);
        assert_eq!(&bytes[100..112], b"mapped bytes");

        let region =
            SharedMemoryRegion::open(RegionConfig::new("through", 1024).with_file_path(&path))
                .unwrap();
        assert_eq!(region.init_mode(), InitMode::Attach);
        assert_eq!(&region.as_slice()[100..112], b"mapped bytes");
    }

    #[cfg(unix)]
    #[test]
    fn test_new_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("perm.dat");
        let _region = SharedMemoryRegion::open(
            RegionConfig::new("perm", 512)
                .with_file_path(&path)
                .with_permissions(0o600),
        )
        .unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
