//! Offset addressing over a mapped region
//!
//! Every mapping of the backing file lands at a different address in every
//! process, so nothing persisted ever holds a pointer. Cross references are
//! 4-byte signed offsets from the start of an [`OffsetSpace`], with `-1`
//! reserved as "no link". Converting between offsets and process-local
//! pointers goes through this module only.

use std::{fmt, mem::size_of, ptr::NonNull};

use crate::error::{Result, ShmMapError};

/// Signed 32-bit position relative to the base of an [`OffsetSpace`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Offset(i32);

impl Offset {
    /// "No link"
    pub const NIL: Offset = Offset(-1);

    /// Wrap a raw persisted value
    pub const fn new(raw: i32) -> Self {
        Self(raw)
    }

    /// Convert a byte position, failing when it does not fit in 31 bits
    pub fn from_usize(position: usize) -> Result<Self> {
        i32::try_from(position)
            .map(Self)
            .map_err(|_| ShmMapError::offset_out_of_range(position as i64, i32::MAX as usize))
    }

    /// Raw persisted value
    pub const fn raw(self) -> i32 {
        self.0
    }

    pub const fn is_nil(self) -> bool {
        self.0 == Self::NIL.0
    }

    /// Byte position, or `None` for negative offsets (including `NIL`)
    pub fn as_usize(self) -> Option<usize> {
        usize::try_from(self.0).ok()
    }

    /// Offset `bytes` further along
    pub fn forward(self, bytes: usize) -> Result<Self> {
        let base = self
            .as_usize()
            .ok_or_else(|| ShmMapError::offset_out_of_range(self.0 as i64, i32::MAX as usize))?;
        Self::from_usize(base.saturating_add(bytes))
    }

    /// Offset `bytes` further back, failing below zero
    pub fn backward(self, bytes: usize) -> Result<Self> {
        let delta = i32::try_from(bytes)
            .map_err(|_| ShmMapError::offset_out_of_range(-(bytes as i64), i32::MAX as usize))?;
        match self.0.checked_sub(delta) {
            Some(raw) if raw >= 0 => Ok(Self(raw)),
            _ => Err(ShmMapError::offset_out_of_range(
                self.0 as i64 - bytes as i64,
                i32::MAX as usize,
            )),
        }
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_nil() {
            f.write_str("NIL")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Types that may be copied in and out of the mapped bytes
///
/// # Safety
/// Implementors must be `#[repr(C)]`, contain no padding that matters, and be
/// valid for every bit pattern (plain integers only).
pub unsafe trait Plain: Copy + 'static {}

unsafe impl Plain for i32 {}
unsafe impl Plain for u32 {}
unsafe impl Plain for i64 {}
unsafe impl Plain for Offset {}

/// A window of mapped memory addressed by [`Offset`]
///
/// Reads and writes are unaligned: blocks carved by the pool are not kept on
/// 8-byte boundaries, matching the persisted layout.
#[derive(Clone, Copy)]
pub struct OffsetSpace {
    base: NonNull<u8>,
    len: usize,
}

unsafe impl Send for OffsetSpace {}

impl OffsetSpace {
    /// Create from raw pointer and length
    ///
    /// # Safety
    /// - `ptr` must be valid for reads and writes for `len` bytes
    /// - The memory must stay mapped for as long as this space (or any copy
    ///   of it) is used
    pub unsafe fn from_raw(ptr: *mut u8, len: usize) -> Result<Self> {
        let base = NonNull::new(ptr)
            .ok_or_else(|| ShmMapError::invalid_parameter("ptr", "Base pointer is null"))?;
        if len == 0 {
            return Err(ShmMapError::invalid_parameter("len", "Offset space cannot be empty"));
        }
        if len > i32::MAX as usize {
            return Err(ShmMapError::invalid_parameter(
                "len",
                format!("Offset space of {} bytes cannot be addressed by 32-bit offsets", len),
            ));
        }
        Ok(Self { base, len })
    }

    /// Number of addressable bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Process-local base address; never persist it
    pub fn base(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Whether `offset` addresses a byte of this space
    pub fn contains(&self, offset: Offset) -> bool {
        offset.as_usize().is_some_and(|at| at < self.len)
    }

    /// Offset of an absolute pointer inside `[base, base + len)`
    pub fn offset_of(&self, ptr: *const u8) -> Result<Offset> {
        let base = self.base.as_ptr() as usize;
        let addr = ptr as usize;
        if addr < base || addr >= base + self.len {
            return Err(ShmMapError::offset_out_of_range(
                addr as i64 - base as i64,
                self.len,
            ));
        }
        Offset::from_usize(addr - base)
    }

    /// Absolute pointer for an offset inside the space
    pub fn ptr_of(&self, offset: Offset) -> Result<*mut u8> {
        let at = self.span(offset, 1)?;
        Ok(unsafe { self.base.as_ptr().add(at) })
    }

    /// Narrower space starting at `offset`, with its own zero
    pub fn subspace(&self, offset: Offset, len: usize) -> Result<OffsetSpace> {
        let at = self.span(offset, len)?;
        unsafe { OffsetSpace::from_raw(self.base.as_ptr().add(at), len) }
    }

    /// Copy a value out of the mapping
    pub fn read<T: Plain>(&self, offset: Offset) -> Result<T> {
        let at = self.span(offset, size_of::<T>())?;
        Ok(unsafe { std::ptr::read_unaligned(self.base.as_ptr().add(at) as *const T) })
    }

    /// Copy a value into the mapping
    pub fn write<T: Plain>(&self, offset: Offset, value: T) -> Result<()> {
        let at = self.span(offset, size_of::<T>())?;
        unsafe { std::ptr::write_unaligned(self.base.as_ptr().add(at) as *mut T, value) };
        Ok(())
    }

    /// Borrow `len` bytes starting at `offset`
    pub fn bytes(&self, offset: Offset, len: usize) -> Result<&[u8]> {
        let at = self.span(offset, len)?;
        Ok(unsafe { std::slice::from_raw_parts(self.base.as_ptr().add(at), len) })
    }

    /// Copy `src` into the mapping at `offset`
    pub fn copy_in(&self, offset: Offset, src: &[u8]) -> Result<()> {
        let at = self.span(offset, src.len())?;
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), self.base.as_ptr().add(at), src.len())
        };
        Ok(())
    }

    /// Start of `[offset, offset + size)` after checking it lies inside
    fn span(&self, offset: Offset, size: usize) -> Result<usize> {
        match offset.as_usize() {
            Some(at) if at.checked_add(size).is_some_and(|end| end <= self.len) => Ok(at),
            _ => Err(ShmMapError::offset_out_of_range(offset.raw() as i64, self.len)),
        }
    }
}

impl fmt::Debug for OffsetSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OffsetSpace")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space(buf: &mut [u8]) -> OffsetSpace {
        unsafe { OffsetSpace::from_raw(buf.as_mut_ptr(), buf.len()).unwrap() }
    }

    #[test]
    fn test_offset_nil() {
        assert!(Offset::NIL.is_nil());
        assert_eq!(Offset::NIL.as_usize(), None);
        assert_eq!(Offset::new(12).as_usize(), Some(12));
        assert_eq!(Offset::NIL.to_string(), "NIL");
        assert!(Offset::from_usize(usize::MAX).is_err());
    }

    #[test]
    fn test_offset_arithmetic() {
        let off = Offset::new(40);
        assert_eq!(off.forward(8).unwrap(), Offset::new(48));
        assert_eq!(off.backward(16).unwrap(), Offset::new(24));
        assert!(off.backward(41).is_err());
        assert!(Offset::NIL.forward(1).is_err());
    }

    #[test]
    fn test_pointer_round_trip() {
        let mut buf = vec![0u8; 64];
        let space = space(&mut buf);

        let ptr = space.ptr_of(Offset::new(17)).unwrap();
        assert_eq!(space.offset_of(ptr).unwrap(), Offset::new(17));

        assert!(space.ptr_of(Offset::new(64)).is_err());
        assert!(space.ptr_of(Offset::NIL).is_err());

        let outside = unsafe { space.base().add(64) };
        assert!(space.offset_of(outside).is_err());
    }

    #[test]
    fn test_unaligned_read_write() {
        let mut buf = vec![0u8; 32];
        let space = space(&mut buf);

        space.write(Offset::new(3), -7i32).unwrap();
        assert_eq!(space.read::<i32>(Offset::new(3)).unwrap(), -7);

        // last four bytes fit, one more does not
        assert!(space.write(Offset::new(28), 1i32).is_ok());
        assert!(space.write(Offset::new(29), 1i32).is_err());
        assert_eq!(&buf[3..7], &(-7i32).to_le_bytes());
    }

    #[test]
    fn test_subspace_has_own_zero() {
        let mut buf = vec![0u8; 32];
        let outer = space(&mut buf);
        let inner = outer.subspace(Offset::new(8), 16).unwrap();

        inner.copy_in(Offset::new(0), b"abc").unwrap();
        assert_eq!(outer.bytes(Offset::new(8), 3).unwrap(), b"abc");
        assert!(outer.subspace(Offset::new(20), 16).is_err());
    }
}
