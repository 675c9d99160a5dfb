//! Bump arena - carves blocks sequentially from never-used memory

use crate::{
    error::{Result, ShmMapError},
    offset::{Offset, OffsetSpace},
};

/// Forward-only cursor over the tail of the pool region
///
/// The cursor itself is persisted (it lives in the pool header), so every
/// attached process carves from the same place. Nothing is ever given back
/// to the arena; freed blocks go to the size-class lists instead.
#[derive(Debug, Clone, Copy)]
pub struct BumpArena {
    /// Pool region
    space: OffsetSpace,
    /// Where the persisted cursor is stored
    cursor_at: Offset,
    /// First byte the cursor may ever point at
    start: usize,
}

impl BumpArena {
    /// View over an already laid out cursor
    pub fn new(space: OffsetSpace, cursor_at: Offset, start: usize) -> Self {
        Self {
            space,
            cursor_at,
            start,
        }
    }

    /// Current cursor position
    pub fn position(&self) -> Result<usize> {
        let raw = self.space.read::<i32>(self.cursor_at)?;
        usize::try_from(raw).map_err(|_| {
            ShmMapError::corrupt_layout(format!("bump pointer is negative ({})", raw))
        })
    }

    /// Bytes never carved so far
    pub fn remaining(&self) -> Result<usize> {
        Ok(self.space.len().saturating_sub(self.position()?))
    }

    /// Arena start
    pub fn start(&self) -> usize {
        self.start
    }

    /// Point the cursor at the start of the arena
    pub fn reset(&self) -> Result<()> {
        self.store(self.start)
    }

    /// Check a persisted cursor before trusting it
    pub fn validate(&self) -> Result<()> {
        let position = self.position()?;
        if position < self.start || position > self.space.len() {
            return Err(ShmMapError::corrupt_layout(format!(
                "bump pointer {} outside arena {}..{}",
                position,
                self.start,
                self.space.len()
            )));
        }
        Ok(())
    }

    /// Take `len` bytes off the front of the untouched area
    ///
    /// Nothing is written when the arena cannot hold the request.
    pub fn carve(&self, len: usize) -> Result<Offset> {
        let position = self.position()?;
        let available = self.space.len().saturating_sub(position);
        if len > available {
            return Err(ShmMapError::arena_exhausted(len, available));
        }
        let block = Offset::from_usize(position)?;
        self.store(position + len)?;
        Ok(block)
    }

    fn store(&self, position: usize) -> Result<()> {
        let raw = Offset::from_usize(position)?.raw();
        self.space.write(self.cursor_at, raw)
    }
}
