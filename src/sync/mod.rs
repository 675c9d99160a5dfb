//! Synchronization around the shared region
//!
//! The persisted structures carry no lock words:
//! one writer at a time is a precondition of correct use. This module holds
//! the opt-in hook for callers that need the region guarded across
//! processes.

pub mod lock;

pub use lock::{AdvisoryFileLock, LockGuard, LockMode, NoLock, RegionLock};
