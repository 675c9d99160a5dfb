//! Memory allocation over the pool region

pub mod bump;
pub mod pool;
pub mod stats;
pub mod traits;

pub use bump::BumpArena;
pub use pool::SizeClassPool;
pub use stats::{FreeListInfo, PoolStats};
pub use traits::{AllocatorExt, OffsetAllocator};
