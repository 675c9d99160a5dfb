//! The persistent hash map

use std::{mem::size_of, path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};

use super::{
    config::MapConfig,
    hash::{bucket_index, key_hash},
    iter::Iter,
};
use crate::{
    allocators::{FreeListInfo, PoolStats, SizeClassPool},
    error::{Result, ShmMapError},
    layout::{
        bucket_position, map_header_len, pool_header_len, Bucket, Entry, MapHeader,
        MAX_BUCKET_COUNT, SECTION_PADDING,
    },
    logging::LogSink,
    memory::{InitMode, RegionConfig, SharedMemoryRegion},
    offset::{Offset, OffsetSpace},
    sync::{AdvisoryFileLock, LockGuard, LockMode, NoLock, RegionLock},
};

/// Snapshot of the map and its pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapInfo {
    pub bucket_count: usize,
    pub entry_count: usize,
    pub init_mode: InitMode,
    pub size_class_count: usize,
    pub path: Option<PathBuf>,
    pub pool: PoolStats,
}

/// String-to-string hash map living in a shared, file-backed region
///
/// Buckets hold doubly linked chains of entries; new keys are appended at the
/// tail of their chain. Keys, values and entries are blocks of the region's
/// [`SizeClassPool`], and every link is an [`Offset`], so any process mapping
/// the same file sees the same map.
///
/// A handle assumes it is the only writer unless the map was opened with
/// [`LockMode::AdvisoryFile`].
#[derive(Debug)]
pub struct ShmMap {
    region: SharedMemoryRegion,
    /// Whole region: map header, buckets, then the pool
    space: OffsetSpace,
    pool: SizeClassPool,
    bucket_count: usize,
    mode: InitMode,
    lock: Arc<dyn RegionLock>,
    log: LogSink,
}

impl ShmMap {
    /// Open (bootstrap or attach) with console logging
    pub fn open(config: MapConfig) -> Result<Self> {
        Self::open_with_sink(config, LogSink::default())
    }

    /// Open (bootstrap or attach), reporting through `log`
    ///
    /// The mode is decided from the map header once the exclusive lock is
    /// held: a zero bucket count (fresh, empty, or never committed file) is
    /// laid out from `config`, anything else is attached as is and its
    /// persisted bucket and size class counts win over the requested ones.
    pub fn open_with_sink(config: MapConfig, log: LogSink) -> Result<Self> {
        if let Err(err) = config.validate() {
            log.error(format_args!("[map init] {}", err));
            return Err(err);
        }

        let lock: Arc<dyn RegionLock> = match config.lock_mode {
            LockMode::None => Arc::new(NoLock),
            LockMode::AdvisoryFile => Arc::new(
                AdvisoryFileLock::open(&config.path, config.permissions).map_err(|err| {
                    log.error(format_args!("[map init] {}", err));
                    err
                })?,
            ),
        };
        // held from before the file is sized until the layout is committed
        let guard = LockGuard::exclusive(lock.as_ref())?;

        let region_config = RegionConfig::new("shmmap", config.region_len())
            .with_backing_type(config.backing_type)
            .with_file_path(&config.path)
            .with_permissions(config.permissions);
        let region = SharedMemoryRegion::open(region_config).map_err(|err| {
            log.error(format_args!("[map init] {}", err));
            err
        })?;

        let space = region.space();
        let mode = Self::detect_mode(space)?;
        let requested = config.bucket_count();

        let bucket_count = match mode {
            InitMode::Bootstrap => {
                Self::lay_out_buckets(space, requested)?;
                requested
            }
            InitMode::Attach => {
                let persisted = Self::attached_bucket_count(space, config.size_class_count)
                    .map_err(|err| {
                        log.error(format_args!("[map init] {}", err));
                        err
                    })?;
                if persisted != requested {
                    log.warn(format_args!(
                        "[map init] Requested {} buckets, data file was laid out with {}; using {}",
                        requested, persisted, persisted
                    ));
                }
                persisted
            }
        };

        let pool_start = map_header_len(bucket_count);
        let pool_space = space.subspace(Offset::from_usize(pool_start)?, space.len() - pool_start)?;
        let pool = SizeClassPool::init(pool_space, config.size_class_count, mode, log.clone())
            .map_err(|err| {
                log.error(format_args!("[map init] Memory pool init error: {}", err));
                err
            })?;

        if mode == InitMode::Bootstrap {
            // a non-zero bucket count marks the layout as complete
            space.write(Offset::new(0), MapHeader::new(bucket_count as i32))?;
        }

        drop(guard);
        let map = Self {
            region,
            space,
            pool,
            bucket_count,
            mode,
            lock,
            log,
        };

        map.log.info(format_args!(
            "[map init] {} map at {}, {} buckets, {} entries, {} bytes",
            mode,
            map.region
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| map.region.name().to_string()),
            map.bucket_count,
            map.len(),
            map.region.size()
        ));

        Ok(map)
    }

    /// Bootstrap unless the header records a committed layout
    fn detect_mode(space: OffsetSpace) -> Result<InitMode> {
        let header: MapHeader = space.read(Offset::new(0))?;
        Ok(if header.bucket_count == 0 {
            InitMode::Bootstrap
        } else {
            InitMode::Attach
        })
    }

    /// Write empty buckets and the section padding; the header comes last
    fn lay_out_buckets(space: OffsetSpace, bucket_count: usize) -> Result<()> {
        space.write(Offset::new(0), MapHeader::new(0))?;
        for index in 0..bucket_count {
            space.write(Offset::from_usize(bucket_position(index))?, Bucket::EMPTY)?;
        }
        let padding = Offset::from_usize(map_header_len(bucket_count) - SECTION_PADDING)?;
        space.write(padding, 0i32)
    }

    /// Bucket count of an existing layout, after sanity checks
    fn attached_bucket_count(space: OffsetSpace, size_class_count: usize) -> Result<usize> {
        let header: MapHeader = space.read(Offset::new(0))?;
        let bucket_count = usize::try_from(header.bucket_count)
            .ok()
            .filter(|count| count.is_power_of_two() && *count <= MAX_BUCKET_COUNT)
            .ok_or_else(|| {
                ShmMapError::corrupt_layout(format!(
                    "persisted bucket count {} is not a power of two",
                    header.bucket_count
                ))
            })?;
        if header.entry_count < 0 {
            return Err(ShmMapError::corrupt_layout(format!(
                "persisted entry count {} is negative",
                header.entry_count
            )));
        }
        if map_header_len(bucket_count) + pool_header_len(1) > space.len() {
            return Err(ShmMapError::corrupt_layout(format!(
                "data file of {} bytes is too short for {} buckets ({} classes requested)",
                space.len(),
                bucket_count,
                size_class_count
            )));
        }
        Ok(bucket_count)
    }

    /// Insert or replace; returns the previous value when the key existed
    ///
    /// Keys and values may be empty but may not contain NUL. A failed put
    /// leaves the map as it was.
    pub fn put(&mut self, key: &str, value: &str) -> Result<Option<String>> {
        self.check_text("key", key)?;
        self.check_text("value", value)?;

        let lock = Arc::clone(&self.lock);
        let _guard = LockGuard::exclusive(lock.as_ref())?;

        let hash = key_hash(key.as_bytes());
        let index = bucket_index(hash, self.bucket_count);
        match self.find_entry(index, hash, key.as_bytes())? {
            Some(entry_at) => self.replace_value(entry_at, value.as_bytes()).map(Some),
            None => {
                self.insert_entry(index, hash, key.as_bytes(), value.as_bytes())?;
                Ok(None)
            }
        }
    }

    /// Value stored under `key`, borrowed from the mapping
    ///
    /// The slice points into shared memory. It stays valid only while no
    /// other handle (in this or another process) replaces the value, which
    /// the single-writer precondition or a held [`read_lock`](Self::read_lock)
    /// guarantees. Use [`get_owned`](Self::get_owned) otherwise.
    pub fn get(&self, key: &str) -> Result<Option<&str>> {
        let _guard = LockGuard::shared(self.lock.as_ref())?;
        let hash = key_hash(key.as_bytes());
        match self.find_entry(bucket_index(hash, self.bucket_count), hash, key.as_bytes())? {
            Some(entry_at) => {
                let entry = self.read_entry(entry_at)?;
                Ok(Some(self.read_text(entry.value)?))
            }
            None => Ok(None),
        }
    }

    /// Value stored under `key`, copied out while the shared lock is held
    pub fn get_owned(&self, key: &str) -> Result<Option<String>> {
        let _guard = LockGuard::shared(self.lock.as_ref())?;
        Ok(self.get(key)?.map(str::to_owned))
    }

    /// Whether `key` is present
    pub fn contains(&self, key: &str) -> Result<bool> {
        let _guard = LockGuard::shared(self.lock.as_ref())?;
        let hash = key_hash(key.as_bytes());
        Ok(self
            .find_entry(bucket_index(hash, self.bucket_count), hash, key.as_bytes())?
            .is_some())
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.space
            .read::<MapHeader>(Offset::new(0))
            .map(|header| header.entry_count.max(0) as usize)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in bucket order, chain order within a bucket
    ///
    /// Takes no lock, and the yielded slices point into shared memory. A
    /// writer on another handle may relink chains or reuse value blocks
    /// under a live iterator; hold [`read_lock`](Self::read_lock) for the
    /// whole walk unless this handle is the only one using the file.
    pub fn iter(&self) -> Iter<'_> {
        Iter::new(self)
    }

    /// Call `f` for every entry under a shared lock
    ///
    /// Unlike [`iter`](Self::iter), a damaged chain is returned as an error.
    pub fn for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&str, &str),
    {
        let _guard = LockGuard::shared(self.lock.as_ref())?;
        for index in 0..self.bucket_count {
            let bucket = self.read_bucket(index)?;
            let mut at = bucket.head;
            let mut steps = 0;
            while !at.is_nil() {
                steps += 1;
                self.check_chain(index, steps, &bucket)?;
                let entry = self.read_entry(at)?;
                f(self.read_text(entry.key)?, self.read_text(entry.value)?);
                at = entry.next;
            }
        }
        Ok(())
    }

    /// Pool usage
    pub fn stats(&self) -> Result<PoolStats> {
        self.pool.stats()
    }

    /// Size classes with parked blocks
    pub fn free_list_info(&self) -> Result<Vec<FreeListInfo>> {
        self.pool.free_list_info()
    }

    /// Layout and usage summary
    pub fn info(&self) -> Result<MapInfo> {
        Ok(MapInfo {
            bucket_count: self.bucket_count,
            entry_count: self.len(),
            init_mode: self.init_mode(),
            size_class_count: self.pool.size_class_count(),
            path: self.region.path(),
            pool: self.pool.stats()?,
        })
    }

    /// Whether this handle created the layout or attached to it
    pub fn init_mode(&self) -> InitMode {
        self.mode
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Backing file, if file-backed
    pub fn path(&self) -> Option<PathBuf> {
        self.region.path()
    }

    /// Write dirty pages back to the backing file
    pub fn flush(&self) -> Result<()> {
        self.region.flush()
    }

    /// Hold the shared lock, e.g. across an [`iter`](Self::iter) walk
    pub fn read_lock(&self) -> Result<LockGuard<'_>> {
        LockGuard::shared(self.lock.as_ref())
    }

    pub(super) fn read_bucket(&self, index: usize) -> Result<Bucket> {
        self.space.read(Offset::from_usize(bucket_position(index))?)
    }

    fn write_bucket(&self, index: usize, bucket: Bucket) -> Result<()> {
        self.space
            .write(Offset::from_usize(bucket_position(index))?, bucket)
    }

    pub(super) fn read_entry(&self, entry_at: Offset) -> Result<Entry> {
        let bytes = self.pool.read_payload(entry_at)?;
        if bytes.len() < size_of::<Entry>() {
            return Err(ShmMapError::corrupt_layout(format!(
                "entry at {} holds {} bytes",
                entry_at,
                bytes.len()
            )));
        }
        self.pool_space().read(entry_at)
    }

    fn write_entry(&mut self, entry_at: Offset, entry: Entry) -> Result<()> {
        let bytes = entry_bytes(&entry);
        self.pool.write_payload(entry_at, &bytes)
    }

    /// Stored text without its terminating NUL
    pub(super) fn read_text(&self, payload: Offset) -> Result<&str> {
        let bytes = self.pool.read_payload(payload)?;
        let bytes = bytes.strip_suffix(b"\0").unwrap_or(bytes);
        std::str::from_utf8(bytes).map_err(|e| {
            let err = ShmMapError::corrupt_layout(format!("text at {} is not UTF-8: {}", payload, e));
            self.log.error(format_args!("[read] {}", err));
            err
        })
    }

    /// Allocate a block holding `bytes` plus a NUL terminator
    fn store_text(&mut self, bytes: &[u8]) -> Result<Offset> {
        let payload = self.pool.allocate(bytes.len() + 1)?;
        let mut terminated = Vec::with_capacity(bytes.len() + 1);
        terminated.extend_from_slice(bytes);
        terminated.push(0);
        if let Err(err) = self.pool.write_payload(payload, &terminated) {
            self.release(&[payload]);
            return Err(err);
        }
        Ok(payload)
    }

    /// Return blocks of an abandoned put to the pool
    fn release(&mut self, payloads: &[Offset]) {
        for payload in payloads {
            if let Err(err) = self.pool.deallocate(*payload) {
                self.log
                    .warn(format_args!("[put] Failed to release block {}: {}", payload, err));
            }
        }
    }

    fn pool_space(&self) -> OffsetSpace {
        use crate::allocators::OffsetAllocator;
        *self.pool.space()
    }

    /// Walk bucket `index` for `key`
    fn find_entry(&self, index: usize, hash: i32, key: &[u8]) -> Result<Option<Offset>> {
        let bucket = self.read_bucket(index)?;
        let mut at = bucket.head;
        let mut steps = 0;
        while !at.is_nil() {
            steps += 1;
            self.check_chain(index, steps, &bucket)?;
            let entry = self.read_entry(at)?;
            if entry.hash == hash {
                let stored = self.pool.read_payload(entry.key)?;
                if stored.strip_suffix(b"\0").unwrap_or(stored) == key {
                    return Ok(Some(at));
                }
            }
            at = entry.next;
        }
        Ok(None)
    }

    /// Reject a chain longer than its bucket claims (a cycle, usually)
    pub(super) fn check_chain(&self, index: usize, steps: i32, bucket: &Bucket) -> Result<()> {
        if steps > bucket.chain_length {
            let err = ShmMapError::corrupt_layout(format!(
                "bucket {} chain runs past its length {}",
                index, bucket.chain_length
            ));
            self.log.error(format_args!("[read] {}", err));
            return Err(err);
        }
        Ok(())
    }

    /// Point an entry at a new value; the old value is copied out then freed
    fn replace_value(&mut self, entry_at: Offset, value: &[u8]) -> Result<String> {
        let mut entry = self.read_entry(entry_at)?;
        let old_value = entry.value;
        let previous = self.read_text(old_value)?.to_owned();

        entry.value = self.store_text(value)?;
        let new_value = entry.value;
        if let Err(err) = self.write_entry(entry_at, entry) {
            self.release(&[new_value]);
            return Err(err);
        }
        // the put has taken effect; a block that cannot be freed only leaks
        if let Err(err) = self.pool.deallocate(old_value) {
            self.log.error(format_args!(
                "[put] Failed to free replaced value block {}: {}",
                old_value, err
            ));
        }
        Ok(previous)
    }

    /// Allocate entry, key and value, then link the entry at the chain tail
    fn insert_entry(&mut self, index: usize, hash: i32, key: &[u8], value: &[u8]) -> Result<()> {
        let entry_at = self.pool.allocate(size_of::<Entry>())?;
        let key_at = match self.store_text(key) {
            Ok(at) => at,
            Err(err) => {
                self.release(&[entry_at]);
                return Err(err);
            }
        };
        let value_at = match self.store_text(value) {
            Ok(at) => at,
            Err(err) => {
                self.release(&[key_at, entry_at]);
                return Err(err);
            }
        };

        let mut bucket = self.read_bucket(index)?;
        let entry = Entry {
            prev: bucket.tail,
            next: Offset::NIL,
            hash,
            key: key_at,
            value: value_at,
        };
        if let Err(err) = self.write_entry(entry_at, entry) {
            self.release(&[value_at, key_at, entry_at]);
            return Err(err);
        }

        // the entry is complete before anything links to it
        if bucket.is_empty() {
            bucket.head = entry_at;
        } else {
            let tail_at = bucket.tail;
            let mut tail = self.read_entry(tail_at)?;
            tail.next = entry_at;
            self.write_entry(tail_at, tail)?;
        }
        bucket.tail = entry_at;
        bucket.chain_length += 1;
        self.write_bucket(index, bucket)?;

        let mut header: MapHeader = self.space.read(Offset::new(0))?;
        header.entry_count += 1;
        self.space.write(Offset::new(0), header)
    }

    fn check_text(&self, parameter: &str, text: &str) -> Result<()> {
        if text.as_bytes().contains(&0) {
            let err = ShmMapError::invalid_parameter(parameter, "Text cannot contain NUL bytes");
            self.log.error(format_args!("[put] {}", err));
            return Err(err);
        }
        Ok(())
    }
}

/// Entry fields in persisted order
fn entry_bytes(entry: &Entry) -> [u8; size_of::<Entry>()] {
    let mut bytes = [0u8; size_of::<Entry>()];
    let fields = [
        entry.prev.raw(),
        entry.next.raw(),
        entry.hash,
        entry.key.raw(),
        entry.value.raw(),
    ];
    for (chunk, field) in bytes.chunks_exact_mut(4).zip(fields) {
        chunk.copy_from_slice(&field.to_ne_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_config(dir: &TempDir) -> MapConfig {
        MapConfig::new(dir.path().join("map.dat"))
            .with_capacity(4)
            .with_size_class_count(64)
            .with_arena_size(16 * 1024)
    }

    #[test]
    fn test_put_get_replace() {
        let temp_dir = TempDir::new().unwrap();
        let mut map = ShmMap::open_with_sink(small_config(&temp_dir), LogSink::Facade).unwrap();
        assert_eq!(map.init_mode(), InitMode::Bootstrap);
        assert!(map.is_empty());

        assert_eq!(map.put("a", "1").unwrap(), None);
        assert_eq!(map.get("a").unwrap(), Some("1"));
        assert_eq!(map.put("a", "22").unwrap(), Some("1".to_string()));
        assert_eq!(map.get("a").unwrap(), Some("22"));
        assert_eq!(map.len(), 1);
        assert!(map.contains("a").unwrap());
        assert!(!map.contains("b").unwrap());
    }

    #[test]
    fn test_empty_key_and_value() {
        let temp_dir = TempDir::new().unwrap();
        let mut map = ShmMap::open_with_sink(small_config(&temp_dir), LogSink::Facade).unwrap();
        map.put("", "").unwrap();
        assert_eq!(map.get("").unwrap(), Some(""));
    }

    #[test]
    fn test_nul_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let mut map = ShmMap::open_with_sink(small_config(&temp_dir), LogSink::Facade).unwrap();
        assert!(matches!(
            map.put("a\0b", "v"),
            Err(ShmMapError::InvalidParameter { .. })
        ));
        assert!(map.put("k", "v\0").is_err());
        assert!(map.is_empty());
    }

    #[test]
    fn test_replace_succeeds_when_old_block_cannot_be_freed() {
        let temp_dir = TempDir::new().unwrap();
        let mut map = ShmMap::open_with_sink(small_config(&temp_dir), LogSink::Facade).unwrap();
        map.put("k", "a").unwrap();

        let hash = key_hash(b"k");
        let entry_at = map
            .find_entry(bucket_index(hash, map.bucket_count), hash, b"k")
            .unwrap()
            .unwrap();
        let old_value = map.read_entry(entry_at).unwrap().value;
        // already parked, so the second free is refused
        map.pool.deallocate(old_value).unwrap();

        assert_eq!(
            map.put("k", "a longer value").unwrap(),
            Some("a".to_string())
        );
        assert_eq!(map.get("k").unwrap(), Some("a longer value"));
        assert_eq!(map.free_list_info().unwrap().len(), 1);
    }

    #[test]
    fn test_get_owned_copies_value() {
        let temp_dir = TempDir::new().unwrap();
        let mut map = ShmMap::open_with_sink(small_config(&temp_dir), LogSink::Facade).unwrap();
        map.put("k", "v1").unwrap();

        let owned = map.get_owned("k").unwrap();
        map.put("k", "v2").unwrap();
        assert_eq!(owned, Some("v1".to_string()));
        assert_eq!(map.get_owned("missing").unwrap(), None);
    }

    #[test]
    fn test_entry_bytes_match_layout() {
        let entry = Entry {
            prev: Offset::NIL,
            next: Offset::new(7),
            hash: -3,
            key: Offset::new(100),
            value: Offset::new(200),
        };
        let bytes = entry_bytes(&entry);
        let mut memory = bytes.to_vec();
        let space = unsafe { OffsetSpace::from_raw(memory.as_mut_ptr(), memory.len()).unwrap() };
        assert_eq!(space.read::<Entry>(Offset::new(0)).unwrap(), entry);
    }
}
