use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// Lowest mapped address of the [`VmMemory`] arena. Leaving the first
/// page unmapped keeps null dereferences detectable.
const ARENA_BASE: u64 = 0x1_0000;

/// Stack allocations are aligned to this boundary, matching the AMD64
/// stack alignment requirement.
const STACK_ALIGN: u64 = 16;

/// Opaque address in the interpreted process's native memory.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NativePointer(u64);

impl NativePointer {
    pub const NULL: NativePointer = NativePointer(0);

    pub const fn new(address: u64) -> Self {
        NativePointer(address)
    }

    pub const fn address(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Pointer arithmetic: `self + n` bytes.
    pub const fn increment(self, n: u64) -> Self {
        NativePointer(self.0 + n)
    }

    /// Signed distance in bytes from `base` to `self`.
    pub fn offset_from(self, base: NativePointer) -> i64 {
        self.0 as i64 - base.0 as i64
    }
}

impl fmt::Debug for NativePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativePointer({:#x})", self.0)
    }
}

impl fmt::Display for NativePointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("access of {len} bytes at {addr} falls outside the arena")]
    OutOfRange { addr: NativePointer, len: u64 },
    #[error("null pointer dereference")]
    NullPointer,
    #[error("native stack exhausted: requested {requested} bytes, {remaining} remaining")]
    StackExhausted { requested: u64, remaining: u64 },
}

pub type MemoryResult<T> = Result<T, MemoryError>;

/// Byte-addressable view of native memory. All multi-byte accesses are
/// little-endian, as on the target.
///
/// The typed accessors are defined in terms of the two byte primitives,
/// so implementors only provide bounds-checked raw access.
pub trait MemoryAccess {
    fn read_bytes(&self, ptr: NativePointer, buf: &mut [u8]) -> MemoryResult<()>;

    fn write_bytes(&mut self, ptr: NativePointer, bytes: &[u8]) -> MemoryResult<()>;

    fn read_i8(&self, ptr: NativePointer) -> MemoryResult<i8> {
        let mut buf = [0u8; 1];
        self.read_bytes(ptr, &mut buf)?;
        Ok(buf[0] as i8)
    }

    fn read_i16(&self, ptr: NativePointer) -> MemoryResult<i16> {
        let mut buf = [0u8; 2];
        self.read_bytes(ptr, &mut buf)?;
        Ok(LittleEndian::read_i16(&buf))
    }

    fn read_i32(&self, ptr: NativePointer) -> MemoryResult<i32> {
        let mut buf = [0u8; 4];
        self.read_bytes(ptr, &mut buf)?;
        Ok(LittleEndian::read_i32(&buf))
    }

    fn read_i64(&self, ptr: NativePointer) -> MemoryResult<i64> {
        let mut buf = [0u8; 8];
        self.read_bytes(ptr, &mut buf)?;
        Ok(LittleEndian::read_i64(&buf))
    }

    fn read_pointer(&self, ptr: NativePointer) -> MemoryResult<NativePointer> {
        let mut buf = [0u8; 8];
        self.read_bytes(ptr, &mut buf)?;
        Ok(NativePointer::new(LittleEndian::read_u64(&buf)))
    }

    fn write_i8(&mut self, ptr: NativePointer, value: i8) -> MemoryResult<()> {
        self.write_bytes(ptr, &[value as u8])
    }

    fn write_i16(&mut self, ptr: NativePointer, value: i16) -> MemoryResult<()> {
        let mut buf = [0u8; 2];
        LittleEndian::write_i16(&mut buf, value);
        self.write_bytes(ptr, &buf)
    }

    fn write_i32(&mut self, ptr: NativePointer, value: i32) -> MemoryResult<()> {
        let mut buf = [0u8; 4];
        LittleEndian::write_i32(&mut buf, value);
        self.write_bytes(ptr, &buf)
    }

    fn write_i64(&mut self, ptr: NativePointer, value: i64) -> MemoryResult<()> {
        let mut buf = [0u8; 8];
        LittleEndian::write_i64(&mut buf, value);
        self.write_bytes(ptr, &buf)
    }

    fn write_pointer(&mut self, ptr: NativePointer, value: NativePointer) -> MemoryResult<()> {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, value.address());
        self.write_bytes(ptr, &buf)
    }

    /// memmove: copies through a temporary, so overlapping ranges are fine.
    fn move_bytes(&mut self, dst: NativePointer, src: NativePointer, n: u64) -> MemoryResult<()> {
        let mut buf = vec![0u8; n as usize];
        self.read_bytes(src, &mut buf)?;
        self.write_bytes(dst, &buf)
    }
}

/// Frame-scoped native stack allocation. Nothing is freed per
/// allocation; a whole frame is released at once via the owner's frame
/// marks.
pub trait StackAllocator {
    fn allocate(&mut self, size: u64) -> MemoryResult<NativePointer>;
}

/// Flat arena standing in for the native address space of the
/// interpreted process. Doubles as the native stack: allocations bump
/// `stack_top` and are reclaimed wholesale when the owning call frame
/// unwinds.
pub struct VmMemory {
    bytes: Vec<u8>,
    stack_top: u64,
}

impl VmMemory {
    pub fn new(capacity: u64) -> Self {
        VmMemory {
            bytes: vec![0; capacity as usize],
            stack_top: 0,
        }
    }

    /// Mark the current stack depth at frame entry.
    pub fn frame_mark(&self) -> u64 {
        self.stack_top
    }

    /// Release every allocation made since `mark` was taken.
    pub fn release_frame(&mut self, mark: u64) {
        debug_assert!(mark <= self.stack_top);
        self.stack_top = mark;
    }

    fn check_range(&self, ptr: NativePointer, len: u64) -> MemoryResult<usize> {
        if ptr.is_null() {
            return Err(MemoryError::NullPointer);
        }
        let start = ptr
            .address()
            .checked_sub(ARENA_BASE)
            .ok_or(MemoryError::OutOfRange { addr: ptr, len })?;
        let end = start
            .checked_add(len)
            .ok_or(MemoryError::OutOfRange { addr: ptr, len })?;
        if end > self.bytes.len() as u64 {
            return Err(MemoryError::OutOfRange { addr: ptr, len });
        }
        Ok(start as usize)
    }
}

impl MemoryAccess for VmMemory {
    fn read_bytes(&self, ptr: NativePointer, buf: &mut [u8]) -> MemoryResult<()> {
        let start = self.check_range(ptr, buf.len() as u64)?;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }

    fn write_bytes(&mut self, ptr: NativePointer, bytes: &[u8]) -> MemoryResult<()> {
        let start = self.check_range(ptr, bytes.len() as u64)?;
        self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl StackAllocator for VmMemory {
    fn allocate(&mut self, size: u64) -> MemoryResult<NativePointer> {
        let aligned = (self.stack_top + STACK_ALIGN - 1) & !(STACK_ALIGN - 1);
        let capacity = self.bytes.len() as u64;
        if aligned + size > capacity {
            return Err(MemoryError::StackExhausted {
                requested: size,
                remaining: capacity.saturating_sub(aligned),
            });
        }
        self.stack_top = aligned + size;
        log::trace!("stack allocate {} bytes at {:#x}", size, ARENA_BASE + aligned);
        Ok(NativePointer::new(ARENA_BASE + aligned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_roundtrip_is_little_endian() -> anyhow::Result<()> {
        let mut mem = VmMemory::new(4096);
        let p = mem.allocate(16)?;

        mem.write_i32(p, 0x11223344)?;
        let mut raw = [0u8; 4];
        mem.read_bytes(p, &mut raw)?;
        assert_eq!(raw, [0x44, 0x33, 0x22, 0x11]);
        assert_eq!(mem.read_i32(p)?, 0x11223344);

        mem.write_i64(p.increment(8), -2)?;
        assert_eq!(mem.read_i64(p.increment(8)).unwrap(), -2);
        Ok(())
    }

    #[test]
    fn test_pointer_roundtrip() {
        let mut mem = VmMemory::new(4096);
        let p = mem.allocate(8).unwrap();
        let q = NativePointer::new(0xdead_beef);
        mem.write_pointer(p, q).unwrap();
        assert_eq!(mem.read_pointer(p).unwrap(), q);
    }

    #[test]
    fn test_move_bytes() {
        let mut mem = VmMemory::new(4096);
        let src = mem.allocate(8).unwrap();
        let dst = mem.allocate(8).unwrap();
        mem.write_bytes(src, b"abcdefgh").unwrap();
        mem.move_bytes(dst, src, 8).unwrap();
        let mut buf = [0u8; 8];
        mem.read_bytes(dst, &mut buf).unwrap();
        assert_eq!(&buf, b"abcdefgh");
    }

    #[test]
    fn test_null_and_out_of_range_fail() {
        let mut mem = VmMemory::new(64);
        assert!(matches!(
            mem.read_i8(NativePointer::NULL),
            Err(MemoryError::NullPointer)
        ));
        // Below the arena base
        assert!(mem.read_i8(NativePointer::new(16)).is_err());
        // Past the end of the arena
        assert!(mem.write_i64(NativePointer::new(ARENA_BASE + 60), 0).is_err());
    }

    #[test]
    fn test_allocations_are_aligned_and_frame_scoped() {
        let mut mem = VmMemory::new(4096);
        let mark = mem.frame_mark();

        let a = mem.allocate(3).unwrap();
        let b = mem.allocate(24).unwrap();
        assert_eq!(a.address() % 16, 0);
        assert_eq!(b.address() % 16, 0);
        assert!(b.address() > a.address());

        mem.release_frame(mark);
        let c = mem.allocate(8).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn test_stack_exhaustion() {
        let mut mem = VmMemory::new(32);
        assert!(matches!(
            mem.allocate(64),
            Err(MemoryError::StackExhausted { requested: 64, .. })
        ));
    }

    #[test]
    fn test_offset_from() {
        let base = NativePointer::new(0x1000);
        assert_eq!(base.increment(24).offset_from(base), 24);
        assert_eq!(base.offset_from(base.increment(8)), -8);
    }
}
