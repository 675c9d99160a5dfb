//! # shmmap - Persistent Shared-Memory Hash Map
//!
//! shmmap keeps a string-to-string hash map inside a memory-mapped file.
//! Every process that maps the same file sees the same map, and the data
//! survives restarts: opening an existing file re-attaches to the layout
//! already in it.
//!
//! ## Features
//!
//! - **Offset addressing**: no pointer is ever persisted; links are 32-bit
//!   offsets, so mappings may land at any address
//! - **Size-class pool**: segregated free lists (8-byte granularity) over a
//!   bump arena, with FIFO reuse inside a class
//! - **Chained buckets**: power-of-two bucket array, doubly linked chains
//! - **Bootstrap or attach**: fresh files are laid out, existing ones re-read
//! - **Pluggable logging**: console, the `log` facade, or a callback
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────┬──────────────────┬─────┬─────────────┬────────────────┬─────┬─────────────┐
//! │  map header  │ buckets[B] (12B) │ pad │ pool header │ free lists[N]  │ pad │ arena ...   │
//! │   (16 B)     │                  │ 4 B │   (20 B)    │    (16 B)      │ 4 B │             │
//! └──────────────┴──────────────────┴─────┴─────────────┴────────────────┴─────┴─────────────┘
//!                                         ▲
//!                                         └─ pool offsets are relative to here
//! ```
//!
//! ## Concurrency
//!
//! The persisted structures carry no locks. At most one writer may touch a
//! file at a time unless the map is opened with
//! [`LockMode::AdvisoryFile`], which takes `flock(2)` around every
//! operation.
//!
//! ```no_run
//! use shmmap::{MapConfig, ShmMap};
//!
//! let mut map = ShmMap::open(MapConfig::new("shm_map.dat").with_capacity(16))?;
//! map.put("hello", "world")?;
//! assert_eq!(map.get("hello")?, Some("world"));
//! # Ok::<(), shmmap::ShmMapError>(())
//! ```

pub mod allocators;
pub mod error;
pub mod layout;
pub mod logging;
pub mod map;
pub mod memory;
pub mod offset;
pub mod sync;

pub use allocators::{
    AllocatorExt, BumpArena, FreeListInfo, OffsetAllocator, PoolStats, SizeClassPool,
};
pub use error::{Result, ShmMapError};
pub use logging::{LogSink, Severity};
pub use map::{Iter, MapConfig, MapInfo, ShmMap};
pub use memory::{BackingType, InitMode, RegionConfig, SharedMemoryRegion};
pub use offset::{Offset, OffsetSpace};
pub use sync::{LockGuard, LockMode};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
