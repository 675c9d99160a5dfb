//! Allocator trait definition

use crate::{
    error::Result,
    offset::{Offset, OffsetSpace},
};

/// Allocator handing out payloads addressed by [`Offset`]
///
/// Mutating calls take `&mut self`: the persisted free lists and bump pointer
/// have no internal synchronization, so at most one writer may touch them.
pub trait OffsetAllocator: std::fmt::Debug {
    /// Allocate a payload able to hold `len` bytes
    fn allocate(&mut self, len: usize) -> Result<Offset>;

    /// Return a payload previously handed out by `allocate`
    fn deallocate(&mut self, payload: Offset) -> Result<()>;

    /// Space the returned offsets are relative to
    fn space(&self) -> &OffsetSpace;

    /// Get the total size of the allocator
    fn total_size(&self) -> usize;

    /// Get the amount of used memory
    fn used_size(&self) -> usize;

    /// Get the amount of available memory
    fn available_size(&self) -> usize {
        self.total_size().saturating_sub(self.used_size())
    }

    /// Largest payload a single allocation can hold
    fn max_payload(&self) -> usize;

    /// Check if an offset could have been handed out by this allocator
    fn owns(&self, payload: Offset) -> bool;

    /// Get allocator type name for debugging
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Common allocator operations
pub trait AllocatorExt: OffsetAllocator {
    /// Allocate and zero-initialize a payload
    fn allocate_zeroed(&mut self, len: usize) -> Result<Offset> {
        let payload = self.allocate(len)?;
        self.space().copy_in(payload, &vec![0u8; len])?;
        Ok(payload)
    }

    /// Whether a request of `len` bytes is within the size limit
    fn fits(&self, len: usize) -> bool {
        len <= self.max_payload()
    }

    /// Get utilization percentage (0.0 to 1.0)
    fn utilization(&self) -> f64 {
        if self.total_size() == 0 {
            return 0.0;
        }
        self.used_size() as f64 / self.total_size() as f64
    }
}

// Blanket implementation for all allocators
impl<T: OffsetAllocator + ?Sized> AllocatorExt for T {}
