//! Replay of managed arguments into native memory.
//!
//! Once a `va_list` has to exist as real bytes, the two areas are
//! filled with exactly the image a native caller would have produced:
//! one 8-byte slot per scalar in the register zones, packed lanes for
//! vectors, a flat byte copy for aggregates.

use cinder::memory::{MemoryAccess, NativePointer};
use cinder::values::Value;

use crate::abi::{self, VarArgArea, FP_LIMIT, FP_STEP, GP_LIMIT, GP_STEP};
use crate::area::overflow_slot_bytes;
use crate::convert;
use crate::error::{VaError, VaResult};

/// Write one argument at `ptr` and return the bytes it occupies in the
/// overflow area. Register zones advance by their fixed step instead.
pub(crate) fn store_argument<M: MemoryAccess>(
    mem: &mut M,
    ptr: NativePointer,
    value: &Value,
) -> VaResult<u64> {
    if let Some(bits) = convert::scalar_slot_bits(value) {
        mem.write_i64(ptr, bits as i64)?;
        return Ok(overflow_slot_bytes(value));
    }
    match value {
        Value::Fp80(bytes) => {
            mem.write_bytes(ptr, bytes)?;
            Ok(16)
        }
        Value::FloatVector(lanes) => {
            for (i, lane) in lanes.iter().enumerate() {
                mem.write_i32(ptr.increment(4 * i as u64), lane.to_bits() as i32)?;
            }
            Ok(overflow_slot_bytes(value))
        }
        Value::Compound { addr, size } => {
            mem.move_bytes(ptr, *addr, *size)?;
            Ok(*size)
        }
        _ => Err(VaError::Inconsistent("scalar fell through the slot encoder")),
    }
}

/// Fill both areas by replaying the variadic arguments in declaration
/// order with the same greedy assignment used for the managed form, so
/// the byte image and the managed view answer every read identically.
pub(crate) fn init_native_areas<M: MemoryAccess>(
    mem: &mut M,
    args: &[Value],
    explicit_count: usize,
    init_gp_offset: u32,
    init_fp_offset: u32,
    reg_save: NativePointer,
    overflow_base: NativePointer,
) -> VaResult<()> {
    let mut gp = init_gp_offset;
    let mut fp = init_fp_offset;
    let mut overflow: u64 = 0;

    for arg in &args[explicit_count..] {
        match abi::classify_value(arg) {
            VarArgArea::Gp if gp < GP_LIMIT => {
                store_argument(mem, reg_save.increment(gp as u64), arg)?;
                gp += GP_STEP;
            }
            VarArgArea::Fp if fp < FP_LIMIT => {
                store_argument(mem, reg_save.increment(fp as u64), arg)?;
                fp += FP_STEP;
            }
            _ => {
                let used = store_argument(mem, overflow_base.increment(overflow), arg)?;
                overflow += used;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cinder::memory::{StackAllocator, VmMemory};

    #[test]
    fn test_scalar_slots_are_widened_register_images() {
        let mut mem = VmMemory::new(4096);
        let p = mem.allocate(8).unwrap();

        store_argument(&mut mem, p, &Value::I8(-1)).unwrap();
        assert_eq!(mem.read_i64(p).unwrap(), 0xFFFF_FFFF);

        store_argument(&mut mem, p, &Value::F32(1.0)).unwrap();
        assert_eq!(mem.read_i64(p).unwrap() as u64, 1.0f32.to_bits() as u64);
    }

    #[test]
    fn test_vector_and_fp80_images() {
        let mut mem = VmMemory::new(4096);
        let p = mem.allocate(32).unwrap();

        let used = store_argument(&mut mem, p, &Value::float_vector(&[1.5, -2.5, 3.5])).unwrap();
        assert_eq!(used, 16);
        assert_eq!(mem.read_i32(p).unwrap() as u32, 1.5f32.to_bits());
        assert_eq!(mem.read_i32(p.increment(8)).unwrap() as u32, 3.5f32.to_bits());

        let bytes: [u8; 10] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        let used = store_argument(&mut mem, p, &Value::Fp80(bytes)).unwrap();
        assert_eq!(used, 16);
        let mut back = [0u8; 10];
        mem.read_bytes(p, &mut back).unwrap();
        assert_eq!(back, bytes);
    }

    #[test]
    fn test_compound_is_copied_from_its_payload() {
        let mut mem = VmMemory::new(4096);
        let payload = mem.allocate(24).unwrap();
        mem.write_bytes(payload, &[0xCD; 24]).unwrap();
        let dst = mem.allocate(24).unwrap();

        let used = store_argument(
            &mut mem,
            dst,
            &Value::Compound {
                addr: payload,
                size: 24,
            },
        )
        .unwrap();
        assert_eq!(used, 24);
        let mut back = [0u8; 24];
        mem.read_bytes(dst, &mut back).unwrap();
        assert_eq!(back, [0xCD; 24]);
    }

    #[test]
    fn test_replay_places_spills_after_register_zones_fill() {
        let mut mem = VmMemory::new(8192);
        let reg_save = mem.allocate(FP_LIMIT as u64).unwrap();
        let overflow = mem.allocate(64).unwrap();

        // 7 ints: 6 in GP slots, the 7th at overflow offset 0.
        let args: Vec<Value> = (1..=7).map(Value::I64).collect();
        init_native_areas(&mut mem, &args, 0, 0, GP_LIMIT, reg_save, overflow).unwrap();

        for i in 0..6 {
            assert_eq!(mem.read_i64(reg_save.increment(8 * i)).unwrap(), i as i64 + 1);
        }
        assert_eq!(mem.read_i64(overflow).unwrap(), 7);
    }

    #[test]
    fn test_replay_honors_initial_cursors() {
        let mut mem = VmMemory::new(8192);
        let reg_save = mem.allocate(FP_LIMIT as u64).unwrap();
        let overflow = mem.allocate(64).unwrap();

        // One explicit int already consumed rdi, so the first variadic
        // int lands in the second GP slot; the double in xmm0's slot.
        let args = vec![Value::I32(0), Value::I64(41), Value::F64(2.5)];
        init_native_areas(&mut mem, &args, 1, GP_STEP, GP_LIMIT, reg_save, overflow).unwrap();

        assert_eq!(mem.read_i64(reg_save.increment(GP_STEP as u64)).unwrap(), 41);
        assert_eq!(
            mem.read_i64(reg_save.increment(GP_LIMIT as u64)).unwrap() as u64,
            2.5f64.to_bits()
        );
    }
}
