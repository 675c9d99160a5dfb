//! Cross-process locking hook around the shared region
//!
//! The region itself carries no lock word. Callers who run more than one
//! writer (or readers next to a writer) pick a [`LockMode`] when opening the
//! map; the default is no locking at all.

use std::{
    fmt,
    fs::{File, OpenOptions},
    os::unix::fs::OpenOptionsExt,
    path::Path,
    sync::{Mutex, MutexGuard},
};

use fs2::FileExt;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShmMapError};

/// Which lock guards the region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LockMode {
    /// No locking; the caller guarantees a single writer
    #[default]
    None,
    /// `flock(2)` on the backing file: exclusive for writers, shared for readers
    AdvisoryFile,
}

/// Lock hook invoked around map operations
pub trait RegionLock: Send + Sync + fmt::Debug {
    /// Block until no other holder (reader or writer) remains
    fn lock_exclusive(&self) -> Result<()>;

    /// Block until no writer holds the lock
    fn lock_shared(&self) -> Result<()>;

    /// Release whatever this handle holds
    fn unlock(&self) -> Result<()>;
}

/// Lock that never blocks
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLock;

impl RegionLock for NoLock {
    fn lock_exclusive(&self) -> Result<()> {
        Ok(())
    }

    fn lock_shared(&self) -> Result<()> {
        Ok(())
    }

    fn unlock(&self) -> Result<()> {
        Ok(())
    }
}

/// Advisory lock on the backing file
///
/// Every handle opens its own description of the file, so the kernel
/// arbitrates between handles and processes. `flock(2)` is not reentrant on
/// one description, so nested holds are counted here and the file lock is
/// only released when the outermost holder lets go. A shared request while
/// exclusive is held keeps the exclusive lock; an exclusive request while
/// shared is held upgrades it until the count drops to zero.
#[derive(Debug)]
pub struct AdvisoryFileLock {
    file: File,
    state: Mutex<HoldState>,
}

#[derive(Debug, Default)]
struct HoldState {
    depth: usize,
    exclusive: bool,
}

impl AdvisoryFileLock {
    pub fn new(file: File) -> Self {
        Self {
            file,
            state: Mutex::new(HoldState::default()),
        }
    }

    /// Open (creating if needed, never truncating) a lock handle on `path`
    pub fn open(path: &Path, permissions: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .mode(permissions)
            .open(path)
            .map_err(|e| {
                ShmMapError::from_io(e, &format!("Failed to open lock handle on {}", path.display()))
            })?;
        Ok(Self::new(file))
    }

    /// Number of guards currently held through this handle
    pub fn depth(&self) -> usize {
        self.hold_state().depth
    }

    fn hold_state(&self) -> MutexGuard<'_, HoldState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RegionLock for AdvisoryFileLock {
    fn lock_exclusive(&self) -> Result<()> {
        let mut state = self.hold_state();
        if !state.exclusive {
            FileExt::lock_exclusive(&self.file)
                .map_err(|e| ShmMapError::lock(e, "Failed to take exclusive lock on data file"))?;
            state.exclusive = true;
        }
        state.depth += 1;
        Ok(())
    }

    fn lock_shared(&self) -> Result<()> {
        let mut state = self.hold_state();
        if state.depth == 0 {
            FileExt::lock_shared(&self.file)
                .map_err(|e| ShmMapError::lock(e, "Failed to take shared lock on data file"))?;
        }
        state.depth += 1;
        Ok(())
    }

    fn unlock(&self) -> Result<()> {
        let mut state = self.hold_state();
        if state.depth == 0 {
            return Ok(());
        }
        state.depth -= 1;
        if state.depth == 0 {
            state.exclusive = false;
            FileExt::unlock(&self.file)
                .map_err(|e| ShmMapError::lock(e, "Failed to release lock on data file"))?;
        }
        Ok(())
    }
}

/// Holds a [`RegionLock`] until dropped
pub struct LockGuard<'a> {
    lock: &'a dyn RegionLock,
}

impl<'a> LockGuard<'a> {
    /// Take the lock for a writer
    pub fn exclusive(lock: &'a dyn RegionLock) -> Result<Self> {
        lock.lock_exclusive()?;
        Ok(Self { lock })
    }

    /// Take the lock for a reader
    pub fn shared(lock: &'a dyn RegionLock) -> Result<Self> {
        lock.lock_shared()?;
        Ok(Self { lock })
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let _ = self.lock.unlock();
    }
}

impl fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").field("lock", &self.lock).finish()
    }
}
