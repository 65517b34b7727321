//! `va_list` storage that lives entirely in native memory.
//!
//! Used when the variadic callee is interpreted but the `va_list` slot
//! itself was handed over by native code: there is no managed model to
//! consult, only the 24 header bytes at a known address. `va_start` on
//! such a slot builds the full byte image in place; `va_arg` is then
//! expected to be performed by the bitcode's own loads and pointer
//! arithmetic against that image, not through this type.

use std::sync::Arc;

use cinder::memory::{MemoryAccess, NativePointer, StackAllocator};
use cinder::values::Value;

use crate::abi::{FP_LIMIT, FP_OFFSET, GP_OFFSET, OVERFLOW_ARG_AREA, REG_SAVE_AREA};
use crate::area::Partition;
use crate::error::{VaError, VaResult};
use crate::native;

#[derive(Clone, Copy, Debug)]
pub struct ForeignVaList {
    ptr: NativePointer,
}

impl ForeignVaList {
    pub fn new(ptr: NativePointer) -> ForeignVaList {
        ForeignVaList { ptr }
    }

    pub fn address(&self) -> NativePointer {
        self.ptr
    }

    /// `va_start` into caller-provided header storage: allocate both
    /// areas, fill them, and write the four header fields at `ptr`.
    pub fn initialize<M: MemoryAccess + StackAllocator>(
        &self,
        args: Arc<[Value]>,
        explicit_count: usize,
        mem: &mut M,
    ) -> VaResult<()> {
        let partition = Partition::compute(&args, explicit_count)?;
        log::debug!(
            "va_start into native storage at {}: {} variadic args",
            self.ptr,
            args.len() - explicit_count
        );

        let reg_save_area = mem.allocate(FP_LIMIT as u64)?;
        let overflow_base = mem.allocate(partition.overflow.size.max(1))?;
        native::init_native_areas(
            mem,
            &args,
            explicit_count,
            partition.init_gp_offset,
            partition.init_fp_offset,
            reg_save_area,
            overflow_base,
        )?;

        mem.write_i32(self.ptr.increment(GP_OFFSET), partition.init_gp_offset as i32)?;
        mem.write_i32(self.ptr.increment(FP_OFFSET), partition.init_fp_offset as i32)?;
        mem.write_pointer(self.ptr.increment(OVERFLOW_ARG_AREA), overflow_base)?;
        mem.write_pointer(self.ptr.increment(REG_SAVE_AREA), reg_save_area)?;
        Ok(())
    }

    /// There is no managed argument model behind a foreign list, so the
    /// runtime cannot answer `va_arg` for it.
    pub fn shift(&self) -> VaResult<Value> {
        Err(VaError::UnsupportedOnForeign { operation: "va_arg" })
    }

    /// Positional copy needs the managed model too.
    pub fn copy(&self) -> VaResult<ForeignVaList> {
        Err(VaError::UnsupportedOnForeign { operation: "va_copy" })
    }

    /// `va_end`. Area allocations are frame-scoped and the header bytes
    /// belong to the caller.
    pub fn cleanup(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder::memory::VmMemory;
    use crate::abi::{GP_LIMIT, VA_LIST_BYTES};

    #[test]
    fn test_initialize_builds_the_image_in_place() {
        let mut mem = VmMemory::new(16 * 1024);
        let storage = mem.allocate(VA_LIST_BYTES).unwrap();
        let list = ForeignVaList::new(storage);

        let mut values: Vec<Value> = (1..=7).map(Value::I64).collect();
        values.push(Value::F64(0.5));
        list.initialize(values.into(), 0, &mut mem).unwrap();

        assert_eq!(mem.read_i32(storage).unwrap(), 0);
        assert_eq!(mem.read_i32(storage.increment(4)).unwrap(), GP_LIMIT as i32);
        let overflow = mem.read_pointer(storage.increment(8)).unwrap();
        let reg_save = mem.read_pointer(storage.increment(16)).unwrap();
        assert_eq!(mem.read_i64(reg_save).unwrap(), 1);
        assert_eq!(mem.read_i64(reg_save.increment(40)).unwrap(), 6);
        assert_eq!(
            mem.read_i64(reg_save.increment(GP_LIMIT as u64)).unwrap() as u64,
            0.5f64.to_bits()
        );
        assert_eq!(mem.read_i64(overflow).unwrap(), 7);
    }

    #[test]
    fn test_explicit_arguments_offset_the_cursors() {
        let mut mem = VmMemory::new(16 * 1024);
        let storage = mem.allocate(VA_LIST_BYTES).unwrap();
        let list = ForeignVaList::new(storage);

        list.initialize(
            vec![Value::I32(1), Value::F64(2.0), Value::I64(3)].into(),
            2,
            &mut mem,
        )
        .unwrap();
        assert_eq!(mem.read_i32(storage).unwrap(), 8);
        assert_eq!(mem.read_i32(storage.increment(4)).unwrap(), GP_LIMIT as i32 + 16);
    }

    #[test]
    fn test_managed_operations_are_rejected() {
        let list = ForeignVaList::new(NativePointer::new(0x4000));
        assert!(matches!(
            list.shift(),
            Err(VaError::UnsupportedOnForeign { operation: "va_arg" })
        ));
        assert!(matches!(
            list.copy(),
            Err(VaError::UnsupportedOnForeign { operation: "va_copy" })
        ));
    }
}
