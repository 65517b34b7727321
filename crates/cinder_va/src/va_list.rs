//! The managed `va_list` object and its native materialization.
//!
//! A list starts fully managed: classification happens once at
//! `va_start`, after which `va_arg` walks the two cursors without
//! touching native memory. Taking the list's address flips it to the
//! native representation, a byte-exact header plus both areas in the
//! interpreted process's memory; from then on the cursors live in those
//! bytes so native and interpreted code observe the same state.

use std::sync::Arc;

use cinder::memory::{MemoryAccess, NativePointer, StackAllocator};
use cinder::types::Type;
use cinder::values::Value;

use crate::abi::{
    self, VarArgArea, FP_LIMIT, FP_OFFSET, FP_STEP, GP_LIMIT, GP_OFFSET, GP_STEP,
    OVERFLOW_ARG_AREA, REG_SAVE_AREA, VA_LIST_BYTES,
};
use crate::area::{OverflowArea, Partition, RegSaveArea};
use crate::convert;
use crate::error::{VaError, VaResult};
use crate::native;

/// Addresses of a nativized list's parts. The area pointers stay null
/// while nativization happened before `va_start`; they are filled in
/// when the arguments arrive.
#[derive(Clone, Copy, Debug)]
pub struct NativeImage {
    pub header: NativePointer,
    pub reg_save_area: NativePointer,
    pub overflow_base: NativePointer,
}

/// Which of the two representations currently answers reads.
#[derive(Clone, Copy, Debug)]
pub enum Representation {
    Managed,
    Native(NativeImage),
}

pub struct VaList {
    args: Arc<[Value]>,
    explicit_count: usize,
    /// Consumed bytes of the GP zone, `va_list.gp_offset`.
    gp_offset: u32,
    /// Consumed bytes counted from the area base, `va_list.fp_offset`.
    fp_offset: u32,
    init_gp_offset: u32,
    init_fp_offset: u32,
    reg_save: Option<Arc<RegSaveArea>>,
    overflow: Option<OverflowArea>,
    repr: Representation,
}

impl Default for VaList {
    fn default() -> Self {
        VaList::new()
    }
}

impl VaList {
    /// A declared but not yet started list, the state between the
    /// `alloca` of a `va_list` slot and the `va_start` on it.
    pub fn new() -> VaList {
        VaList {
            args: Arc::from(Vec::new()),
            explicit_count: 0,
            gp_offset: 0,
            fp_offset: 0,
            init_gp_offset: 0,
            init_fp_offset: 0,
            reg_save: None,
            overflow: None,
            repr: Representation::Managed,
        }
    }

    pub fn is_nativized(&self) -> bool {
        matches!(self.repr, Representation::Native(_))
    }

    fn image(&self) -> Option<&NativeImage> {
        match &self.repr {
            Representation::Native(image) => Some(image),
            Representation::Managed => None,
        }
    }

    fn initialized(&self) -> bool {
        self.reg_save.is_some()
    }

    /// `va_start`: classify the full argument list and reset both
    /// cursors past the registers the explicit arguments consumed. If
    /// the list's address was taken before this point the native image
    /// exists but is empty; fill it now.
    pub fn initialize<M: MemoryAccess + StackAllocator>(
        &mut self,
        args: Arc<[Value]>,
        explicit_count: usize,
        mem: &mut M,
    ) -> VaResult<()> {
        let partition = Partition::compute(&args, explicit_count)?;
        log::debug!(
            "va_start: {} variadic args, {} registerized, {} overflow bytes",
            args.len() - explicit_count,
            partition.registerized_count(),
            partition.overflow.size
        );

        self.args = args;
        self.explicit_count = explicit_count;
        self.gp_offset = partition.init_gp_offset;
        self.fp_offset = partition.init_fp_offset;
        self.init_gp_offset = partition.init_gp_offset;
        self.init_fp_offset = partition.init_fp_offset;
        self.reg_save = Some(Arc::new(partition.reg_save));
        self.overflow = Some(partition.overflow);

        if let Some(image) = self.image() {
            let header = image.header;
            let areas = self.nativize_areas(mem)?;
            self.repr = Representation::Native(NativeImage { header, ..areas });
            self.write_native_header(mem, header)?;
        }
        Ok(())
    }

    /// `va_end`. The managed model is dropped with the list and native
    /// allocations are frame-scoped, so nothing is freed here.
    pub fn cleanup(&mut self) {}

    /// Number of variadic arguments the list carries.
    pub fn arg_count(&self) -> usize {
        self.args.len() - self.explicit_count
    }

    /// The `index`-th variadic argument, uncoerced and without moving
    /// any cursor.
    pub fn get_arg(&self, index: usize) -> VaResult<&Value> {
        self.args
            .get(self.explicit_count + index)
            .ok_or(VaError::ArgIndexOutOfBounds {
                index,
                available: self.arg_count(),
            })
    }

    /// `va_arg`: fetch the next argument of class `ty` and advance the
    /// corresponding cursor, falling through to the overflow area once
    /// the register zone for that class is exhausted.
    pub fn shift<M: MemoryAccess>(&mut self, ty: Type, mem: &mut M) -> VaResult<Value> {
        if !self.initialized() {
            return Err(VaError::Uninitialized);
        }
        match abi::classify_type(ty) {
            VarArgArea::Gp => {
                let offset = self.header_read_i32(mem, GP_OFFSET)? as u32;
                if offset < GP_LIMIT {
                    let value = self.reg_save_arg(offset, ty)?;
                    self.header_write_i32(mem, GP_OFFSET, (offset + GP_STEP) as i32)?;
                    return Ok(value);
                }
            }
            VarArgArea::Fp => {
                let offset = self.header_read_i32(mem, FP_OFFSET)? as u32;
                if offset < FP_LIMIT {
                    let value = self.reg_save_arg(offset, ty)?;
                    self.header_write_i32(mem, FP_OFFSET, (offset + FP_STEP) as i32)?;
                    return Ok(value);
                }
            }
            VarArgArea::Overflow => {}
        }
        self.shift_overflow(ty, mem)
    }

    fn reg_save_arg(&self, offset: u32, ty: Type) -> VaResult<Value> {
        let reg_save = self.reg_save.as_ref().ok_or(VaError::Uninitialized)?;
        // An empty slot under the cursor means the caller requested
        // past the variadic arguments of this class. The cursor is left
        // untouched in that case.
        let slot = reg_save
            .resolve(offset)
            .ok_or(VaError::ArgIndexOutOfBounds {
                index: self.arg_count(),
                available: self.arg_count(),
            })?;
        convert::coerce(reg_save.arg(slot.index)?, ty)
    }

    fn shift_overflow<M: MemoryAccess>(&mut self, ty: Type, mem: &mut M) -> VaResult<Value> {
        if let Some(image) = self.image() {
            // Cursor lives in the native header. Advance it past the
            // argument it points at and answer from the managed array,
            // which mirrors the area bytes.
            let overflow = self.overflow.as_ref().ok_or(VaError::Uninitialized)?;
            let cursor = mem.read_pointer(image.header.increment(OVERFLOW_ARG_AREA))?;
            let offset = cursor.offset_from(image.overflow_base) as u64;
            let slot = overflow.resolve(offset).ok_or(VaError::ArgIndexOutOfBounds {
                index: overflow.arg_count(),
                available: overflow.arg_count(),
            })?;
            let next = overflow.next_offset(slot.index);
            mem.write_pointer(
                image.header.increment(OVERFLOW_ARG_AREA),
                image.overflow_base.increment(next),
            )?;
            return convert::coerce(overflow.arg(slot.index)?, ty);
        }
        let overflow = self.overflow.as_mut().ok_or(VaError::Uninitialized)?;
        let value = overflow.current_arg()?.clone();
        overflow.shift();
        convert::coerce(&value, ty)
    }

    /// `va_copy`: a new list with the source's position. Areas are
    /// shared; only the cursors are duplicated. The copy is managed
    /// even when the source has been nativized, so its cursors are read
    /// back out of the source's native header.
    pub fn copy<M: MemoryAccess>(&self, mem: &M) -> VaResult<VaList> {
        let mut dest = VaList {
            args: Arc::clone(&self.args),
            explicit_count: self.explicit_count,
            gp_offset: self.gp_offset,
            fp_offset: self.fp_offset,
            init_gp_offset: self.init_gp_offset,
            init_fp_offset: self.init_fp_offset,
            reg_save: self.reg_save.clone(),
            overflow: self.overflow.clone(),
            repr: Representation::Managed,
        };
        if let Some(image) = self.image() {
            dest.gp_offset = mem.read_i32(image.header.increment(GP_OFFSET))? as u32;
            dest.fp_offset = mem.read_i32(image.header.increment(FP_OFFSET))? as u32;
            let cursor = mem.read_pointer(image.header.increment(OVERFLOW_ARG_AREA))?;
            let offset = cursor.offset_from(image.overflow_base) as u64;
            if let Some(overflow) = dest.overflow.as_mut() {
                overflow.current = match overflow.resolve(offset) {
                    Some(slot) => slot.index,
                    None => overflow.arg_count(),
                };
            }
        }
        Ok(dest)
    }

    /// Give the list a native address, building the byte image on first
    /// call. Idempotent. A list nativized before `va_start` gets a
    /// header only; the areas follow when the arguments arrive.
    pub fn to_native<M: MemoryAccess + StackAllocator>(
        &mut self,
        mem: &mut M,
    ) -> VaResult<NativePointer> {
        if let Some(image) = self.image() {
            return Ok(image.header);
        }
        let header = mem.allocate(VA_LIST_BYTES)?;
        if !self.initialized() {
            log::trace!("va_list nativized before va_start, header only at {}", header);
            self.repr = Representation::Native(NativeImage {
                header,
                reg_save_area: NativePointer::NULL,
                overflow_base: NativePointer::NULL,
            });
            return Ok(header);
        }
        let areas = self.nativize_areas(mem)?;
        self.repr = Representation::Native(NativeImage { header, ..areas });
        self.write_native_header(mem, header)?;
        log::trace!("va_list nativized at {}", header);
        Ok(header)
    }

    /// Allocate and fill both areas from the managed argument array.
    fn nativize_areas<M: MemoryAccess + StackAllocator>(
        &self,
        mem: &mut M,
    ) -> VaResult<NativeImage> {
        let overflow = self.overflow.as_ref().ok_or(VaError::Uninitialized)?;
        let reg_save_area = mem.allocate(FP_LIMIT as u64)?;
        let overflow_base = mem.allocate(overflow.size.max(1))?;
        native::init_native_areas(
            mem,
            &self.args,
            self.explicit_count,
            self.init_gp_offset,
            self.init_fp_offset,
            reg_save_area,
            overflow_base,
        )?;
        Ok(NativeImage {
            header: NativePointer::NULL,
            reg_save_area,
            overflow_base,
        })
    }

    /// Write all four header fields, carrying over the managed cursors.
    fn write_native_header<M: MemoryAccess>(
        &self,
        mem: &mut M,
        header: NativePointer,
    ) -> VaResult<()> {
        let image = self.image().ok_or(VaError::Uninitialized)?;
        let overflow = self.overflow.as_ref().ok_or(VaError::Uninitialized)?;
        let consumed = if overflow.current < overflow.arg_count() {
            overflow.offset_of(overflow.current)?
        } else {
            overflow.size
        };
        mem.write_i32(header.increment(GP_OFFSET), self.gp_offset as i32)?;
        mem.write_i32(header.increment(FP_OFFSET), self.fp_offset as i32)?;
        mem.write_pointer(
            header.increment(OVERFLOW_ARG_AREA),
            image.overflow_base.increment(consumed),
        )?;
        mem.write_pointer(header.increment(REG_SAVE_AREA), image.reg_save_area)?;
        Ok(())
    }

    /// Read one of the two i32 header cursors by its byte offset, the
    /// way a `load` through the list's address would.
    pub fn header_read_i32<M: MemoryAccess>(&self, mem: &M, offset: u64) -> VaResult<i32> {
        if let Some(image) = self.image() {
            return Ok(mem.read_i32(image.header.increment(offset))?);
        }
        match offset {
            GP_OFFSET => Ok(self.gp_offset as i32),
            FP_OFFSET => Ok(self.fp_offset as i32),
            _ => Err(VaError::BadHeaderOffset { offset }),
        }
    }

    pub fn header_write_i32<M: MemoryAccess>(
        &mut self,
        mem: &mut M,
        offset: u64,
        value: i32,
    ) -> VaResult<()> {
        if let Some(image) = self.image() {
            mem.write_i32(image.header.increment(offset), value)?;
            return Ok(());
        }
        match offset {
            GP_OFFSET => self.gp_offset = value as u32,
            FP_OFFSET => self.fp_offset = value as u32,
            _ => return Err(VaError::BadHeaderOffset { offset }),
        }
        Ok(())
    }

    /// Read a pointer-valued header field. The managed form has no
    /// addresses to hand out, so this forces nativization first.
    pub fn header_read_pointer<M: MemoryAccess + StackAllocator>(
        &mut self,
        mem: &mut M,
        offset: u64,
    ) -> VaResult<NativePointer> {
        match offset {
            OVERFLOW_ARG_AREA | REG_SAVE_AREA => {
                let header = self.to_native(mem)?;
                Ok(mem.read_pointer(header.increment(offset))?)
            }
            _ => Err(VaError::BadHeaderOffset { offset }),
        }
    }

    /// Store through a pointer-valued header field, as bitcode does
    /// when it advances `overflow_arg_area` by hand. Forces
    /// nativization for the same reason reads do.
    pub fn header_write_pointer<M: MemoryAccess + StackAllocator>(
        &mut self,
        mem: &mut M,
        offset: u64,
        value: NativePointer,
    ) -> VaResult<()> {
        match offset {
            OVERFLOW_ARG_AREA | REG_SAVE_AREA => {
                let header = self.to_native(mem)?;
                mem.write_pointer(header.increment(offset), value)?;
                Ok(())
            }
            _ => Err(VaError::BadHeaderOffset { offset }),
        }
    }
}
