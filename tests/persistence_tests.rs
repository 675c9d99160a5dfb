//! Integration tests for re-attaching to an existing data file

use std::{fs, path::Path};

use shmmap::{
    layout::{map_header_len, pool_header_len},
    InitMode, LockMode, LogSink, MapConfig, ShmMap, ShmMapError,
};
use tempfile::TempDir;

fn config(path: &Path, capacity: usize) -> MapConfig {
    MapConfig::new(path)
        .with_capacity(capacity)
        .with_size_class_count(64)
        .with_arena_size(4096)
}

fn read_i32(bytes: &[u8], at: usize) -> i32 {
    i32::from_ne_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reattach_keeps_entries() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("persist.dat");

        {
            let mut map = ShmMap::open_with_sink(config(&path, 16), LogSink::Facade).unwrap();
            assert_eq!(map.init_mode(), InitMode::Bootstrap);
            map.put("alpha", "1").unwrap();
            map.put("beta", "2").unwrap();
            map.put("alpha", "3").unwrap();
            map.flush().unwrap();
        }

        let map = ShmMap::open_with_sink(config(&path, 16), LogSink::Facade).unwrap();
        assert_eq!(map.init_mode(), InitMode::Attach);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("alpha").unwrap(), Some("3"));
        assert_eq!(map.get("beta").unwrap(), Some("2"));
        // the replaced value's block is still parked
        assert_eq!(map.stats().unwrap().free_size, 8);
    }

    #[test]
    fn test_persisted_bucket_count_wins() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("buckets.dat");

        {
            let mut map = ShmMap::open_with_sink(config(&path, 16), LogSink::Facade).unwrap();
            map.put("k", "v").unwrap();
        }

        let map = ShmMap::open_with_sink(
            config(&path, 64).with_size_class_count(8),
            LogSink::Facade,
        )
        .unwrap();
        assert_eq!(map.bucket_count(), 16);
        assert_eq!(map.info().unwrap().size_class_count, 64);
        assert_eq!(map.get("k").unwrap(), Some("v"));
    }

    #[test]
    fn test_two_handles_share_one_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("shared.dat");

        let mut writer = ShmMap::open_with_sink(config(&path, 8), LogSink::Facade).unwrap();
        writer.put("first", "1").unwrap();

        let reader = ShmMap::open_with_sink(config(&path, 8), LogSink::Facade).unwrap();
        assert_eq!(reader.init_mode(), InitMode::Attach);
        assert_eq!(reader.get("first").unwrap(), Some("1"));

        writer.put("second", "2").unwrap();
        assert_eq!(reader.len(), 2);
        assert_eq!(reader.get("second").unwrap(), Some("2"));
    }

    #[test]
    fn test_file_layout_bytes() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("wire.dat");

        {
            let mut map = ShmMap::open_with_sink(config(&path, 16), LogSink::Facade).unwrap();
            map.put("k", "v").unwrap();
            map.flush().unwrap();
        }

        let bytes = fs::read(&path).unwrap();
        let pool_start = map_header_len(16);
        assert_eq!(bytes.len(), pool_start + pool_header_len(64) + 4096);

        assert_eq!(read_i32(&bytes, 0), 16);
        assert_eq!(read_i32(&bytes, 8), 1);
        assert_eq!(read_i32(&bytes, pool_start), 64);

        // entry (24 byte class), key and value (8 byte class) carved in order
        let carved = (16 + 24 + 4) + 2 * (16 + 8 + 4);
        assert_eq!(read_i32(&bytes, pool_start + 8), (pool_header_len(64) + carved) as i32);

        // each free list starts empty, with its own index
        let list_at = pool_start + 20 + 16 * 5;
        assert_eq!(read_i32(&bytes, list_at), -1);
        assert_eq!(read_i32(&bytes, list_at + 4), -1);
        assert_eq!(read_i32(&bytes, list_at + 8), 0);
        assert_eq!(read_i32(&bytes, list_at + 12), 5);
    }

    #[test]
    fn test_empty_file_is_bootstrapped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("empty.dat");
        fs::File::create(&path).unwrap();

        let map = ShmMap::open_with_sink(config(&path, 4), LogSink::Facade).unwrap();
        assert_eq!(map.init_mode(), InitMode::Bootstrap);
        assert!(map.is_empty());
    }

    #[test]
    fn test_corrupt_header_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("corrupt.dat");
        let mut garbage = vec![0u8; 4096];
        garbage[..4].copy_from_slice(&3i32.to_ne_bytes());
        fs::write(&path, &garbage).unwrap();

        let err = ShmMap::open_with_sink(config(&path, 4), LogSink::Facade).unwrap_err();
        assert!(matches!(err, ShmMapError::CorruptLayout { .. }));
    }

    #[test]
    fn test_advisory_lock_mode() {
        use fs2::FileExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("locked.dat");
        let mut map = ShmMap::open_with_sink(
            config(&path, 4).with_lock_mode(LockMode::AdvisoryFile),
            LogSink::Facade,
        )
        .unwrap();
        map.put("k", "v").unwrap();

        let other = fs::File::open(&path).unwrap();
        {
            let _guard = map.read_lock().unwrap();
            assert_eq!(map.iter().count(), 1);
            assert!(FileExt::try_lock_exclusive(&other).is_err());
        }
        assert!(FileExt::try_lock_exclusive(&other).is_ok());
        FileExt::unlock(&other).unwrap();

        assert_eq!(map.get("k").unwrap(), Some("v"));
    }

    #[test]
    fn test_read_lock_survives_nested_reads() {
        use fs2::FileExt;

        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested.dat");
        let mut map = ShmMap::open_with_sink(
            config(&path, 4).with_lock_mode(LockMode::AdvisoryFile),
            LogSink::Facade,
        )
        .unwrap();
        map.put("k", "v").unwrap();

        let other = fs::File::open(&path).unwrap();
        {
            let _guard = map.read_lock().unwrap();
            assert_eq!(map.get("k").unwrap(), Some("v"));
            assert!(map.contains("k").unwrap());
            map.for_each(|key, _| {
                assert_eq!(map.get_owned(key).unwrap(), Some("v".to_string()));
            })
            .unwrap();
            // the inner guards released only their own holds
            assert!(FileExt::try_lock_exclusive(&other).is_err());
        }
        assert!(FileExt::try_lock_exclusive(&other).is_ok());
        FileExt::unlock(&other).unwrap();
    }

    #[test]
    fn test_uncommitted_layout_is_bootstrapped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("uncommitted.dat");
        // zero bucket count with leftovers behind it, as after a failed bootstrap
        let mut leftovers = vec![0xABu8; 8192];
        leftovers[..16].fill(0);
        fs::write(&path, &leftovers).unwrap();

        let mut map = ShmMap::open_with_sink(config(&path, 4), LogSink::Facade).unwrap();
        assert_eq!(map.init_mode(), InitMode::Bootstrap);
        assert!(map.is_empty());
        assert_eq!(map.iter().count(), 0);
        map.put("k", "v").unwrap();
        drop(map);

        let map = ShmMap::open_with_sink(config(&path, 4), LogSink::Facade).unwrap();
        assert_eq!(map.init_mode(), InitMode::Attach);
        assert_eq!(map.get("k").unwrap(), Some("v"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_memfd_maps_are_independent() {
        use shmmap::BackingType;

        let memfd = MapConfig::default()
            .with_backing_type(BackingType::MemFd)
            .with_size_class_count(16)
            .with_arena_size(4096);
        let mut first = ShmMap::open_with_sink(memfd.clone(), LogSink::Facade).unwrap();
        let second = ShmMap::open_with_sink(memfd, LogSink::Facade).unwrap();

        first.put("k", "v").unwrap();
        assert_eq!(first.init_mode(), InitMode::Bootstrap);
        assert_eq!(second.init_mode(), InitMode::Bootstrap);
        assert_eq!(second.get("k").unwrap(), None);
        assert!(first.path().is_none());
    }
}
