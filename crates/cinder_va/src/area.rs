//! The two argument areas behind a `va_list`: the register save area
//! and the overflow (stack) area.
//!
//! Both areas share the immutable argument array with the owning
//! `VaList` and any copies of it; only the overflow cursor is
//! per-instance state.

use std::sync::Arc;

use cinder::memory::NativePointer;
use cinder::values::Value;

use crate::abi::{
    self, VarArgArea, FP_LIMIT, FP_SLOTS, FP_STEP, GP_LIMIT, GP_SLOTS, GP_STEP, STACK_STEP,
};
use crate::convert;
use crate::error::{VaError, VaResult};

/// A byte offset resolved to the argument occupying that slot and the
/// byte offset within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotRef {
    pub index: usize,
    pub byte_offset: u32,
}

/// Bytes an argument occupies in the overflow area: one stack slot for
/// anything register-sized, 16 for an extended float, the natural
/// native size (rounded to stack slots) for vectors and aggregates.
pub(crate) fn overflow_slot_bytes(value: &Value) -> u64 {
    match value {
        Value::Fp80(_) => 16,
        Value::Compound { size, .. } => *size,
        Value::FloatVector(lanes) if lanes.len() > 2 => {
            let bytes = 4 * lanes.len() as u64;
            (bytes + STACK_STEP - 1) & !(STACK_STEP - 1)
        }
        _ => STACK_STEP,
    }
}

/// Register save area: six general-purpose slots and eight SSE slots,
/// each recording which argument was spilled there. Built once at
/// `va_start`; logically immutable afterwards.
#[derive(Debug)]
pub struct RegSaveArea {
    args: Arc<[Value]>,
    gp_index: [Option<usize>; GP_SLOTS],
    fp_index: [Option<usize>; FP_SLOTS],
}

impl RegSaveArea {
    pub fn arg(&self, index: usize) -> VaResult<&Value> {
        self.args
            .get(index)
            .ok_or(VaError::Inconsistent("register slot index out of range"))
    }

    /// Map a raw byte offset into the area to the occupying argument.
    /// `None` for offsets past the SSE zone and for empty slots.
    pub fn resolve(&self, offset: u32) -> Option<SlotRef> {
        if offset < GP_LIMIT {
            let slot = (offset / GP_STEP) as usize;
            let byte_offset = offset % GP_STEP;
            self.gp_index[slot].map(|index| SlotRef { index, byte_offset })
        } else if offset < FP_LIMIT {
            let rel = offset - GP_LIMIT;
            let slot = (rel / FP_STEP) as usize;
            let byte_offset = rel % FP_STEP;
            self.fp_index[slot].map(|index| SlotRef { index, byte_offset })
        } else {
            None
        }
    }

    pub fn read_i8(&self, offset: u32) -> VaResult<i8> {
        match self.resolve(offset) {
            Some(slot) => convert::read_i8(self.arg(slot.index)?, slot.byte_offset),
            None => Ok(0),
        }
    }

    pub fn read_i16(&self, offset: u32) -> VaResult<i16> {
        match self.resolve(offset) {
            Some(slot) => convert::read_i16(self.arg(slot.index)?, slot.byte_offset),
            None => Ok(0),
        }
    }

    pub fn read_i32(&self, offset: u32) -> VaResult<i32> {
        match self.resolve(offset) {
            Some(slot) => convert::read_i32(self.arg(slot.index)?, slot.byte_offset),
            None => Ok(0),
        }
    }

    pub fn read_i64(&self, offset: u32) -> VaResult<i64> {
        match self.resolve(offset) {
            Some(slot) => convert::read_i64(self.arg(slot.index)?, slot.byte_offset),
            None => Ok(0),
        }
    }

    pub fn read_pointer(&self, offset: u32) -> VaResult<NativePointer> {
        match self.resolve(offset) {
            Some(slot) => Ok(convert::read_pointer(self.arg(slot.index)?)),
            None => Ok(NativePointer::NULL),
        }
    }
}

/// Overflow area: the variadic arguments that did not fit a register,
/// in declaration order, each with its byte offset from the area base.
///
/// `offsets` is sized for the full variadic tail; entries past the last
/// overflow argument stay at the `-1` sentinel. The `current` cursor is
/// the only mutable field and is owned per instance; copies share the
/// arrays.
#[derive(Clone, Debug)]
pub struct OverflowArea {
    args: Arc<[Value]>,
    offsets: Arc<[i64]>,
    pub size: u64,
    pub current: usize,
}

impl OverflowArea {
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn arg(&self, index: usize) -> VaResult<&Value> {
        self.args.get(index).ok_or(VaError::ArgIndexOutOfBounds {
            index,
            available: self.args.len(),
        })
    }

    pub fn current_arg(&self) -> VaResult<&Value> {
        self.arg(self.current)
    }

    pub fn shift(&mut self) {
        self.current += 1;
    }

    /// Byte offset of the `index`-th overflow argument.
    pub fn offset_of(&self, index: usize) -> VaResult<u64> {
        match self.offsets.get(index) {
            Some(o) if *o >= 0 => Ok(*o as u64),
            _ => Err(VaError::ArgIndexOutOfBounds {
                index,
                available: self.args.len(),
            }),
        }
    }

    /// Byte offset one past the `index`-th argument: the next recorded
    /// offset, or the end of the area after the last argument.
    pub fn next_offset(&self, index: usize) -> u64 {
        match self.offsets.get(index + 1) {
            Some(o) if *o >= 0 => *o as u64,
            _ => self.size,
        }
    }

    /// Map a raw byte offset into the area to the argument holding it.
    /// Arguments wider than a stack slot cover a run of offsets, so the
    /// match is a range search over the non-decreasing offset array.
    pub fn resolve(&self, offset: u64) -> Option<SlotRef> {
        for i in 0..self.offsets.len() {
            if self.offsets[i] < 0 {
                // Sentinel tail: offset points past the last recorded
                // argument but may still be inside the area.
                if i == 0 || offset >= self.size {
                    return None;
                }
                let j = offset - self.offsets[i - 1] as u64;
                return Some(SlotRef {
                    index: i - 1,
                    byte_offset: j as u32,
                });
            }
            let o = self.offsets[i] as u64;
            if offset == o {
                return Some(SlotRef {
                    index: i,
                    byte_offset: 0,
                });
            }
            if offset < o {
                let j = offset - self.offsets[i - 1] as u64;
                return Some(SlotRef {
                    index: i - 1,
                    byte_offset: j as u32,
                });
            }
        }
        let last = self.offsets.len().checked_sub(1)?;
        if self.offsets[last] >= 0 && offset < self.size {
            let j = offset - self.offsets[last] as u64;
            return Some(SlotRef {
                index: last,
                byte_offset: j as u32,
            });
        }
        None
    }

    pub fn read_i8(&self, offset: u64) -> VaResult<i8> {
        match self.resolve(offset) {
            Some(slot) => convert::read_i8(self.arg(slot.index)?, slot.byte_offset),
            None => Ok(0),
        }
    }

    pub fn read_i16(&self, offset: u64) -> VaResult<i16> {
        match self.resolve(offset) {
            Some(slot) => convert::read_i16(self.arg(slot.index)?, slot.byte_offset),
            None => Ok(0),
        }
    }

    pub fn read_i32(&self, offset: u64) -> VaResult<i32> {
        match self.resolve(offset) {
            Some(slot) => convert::read_i32(self.arg(slot.index)?, slot.byte_offset),
            None => Ok(0),
        }
    }

    pub fn read_i64(&self, offset: u64) -> VaResult<i64> {
        match self.resolve(offset) {
            Some(slot) => convert::read_i64(self.arg(slot.index)?, slot.byte_offset),
            None => Ok(0),
        }
    }

    pub fn read_pointer(&self, offset: u64) -> VaResult<NativePointer> {
        match self.resolve(offset) {
            Some(slot) => Ok(convert::read_pointer(self.arg(slot.index)?)),
            None => Ok(NativePointer::NULL),
        }
    }
}

/// Result of classifying a full argument list at `va_start`: the two
/// area models plus the initial register cursors (accounting for the
/// registers the explicit arguments already consumed).
#[derive(Debug)]
pub struct Partition {
    pub init_gp_offset: u32,
    pub init_fp_offset: u32,
    pub reg_save: RegSaveArea,
    pub overflow: OverflowArea,
}

impl Partition {
    /// Greedily assign the variadic tail of `args` to register slots in
    /// declaration order, spilling to the overflow area once a zone is
    /// full.
    pub fn compute(args: &Arc<[Value]>, explicit_count: usize) -> VaResult<Partition> {
        if explicit_count > args.len() {
            return Err(VaError::ExplicitCountTooLarge {
                explicit: explicit_count,
                total: args.len(),
            });
        }

        let mut gp = used_gp_area(&args[..explicit_count]);
        let mut fp = GP_LIMIT + used_fp_area(&args[..explicit_count]);
        let init_gp_offset = gp;
        let init_fp_offset = fp;

        let mut gp_index = [None; GP_SLOTS];
        let mut fp_index = [None; FP_SLOTS];
        let variadic_count = args.len() - explicit_count;
        let mut overflow_args: Vec<Value> = Vec::new();
        let mut offsets = vec![-1i64; variadic_count];
        let mut overflow_size: u64 = 0;

        for i in explicit_count..args.len() {
            let arg = &args[i];
            match abi::classify_value(arg) {
                VarArgArea::Gp if gp < GP_LIMIT => {
                    gp_index[(gp / GP_STEP) as usize] = Some(i);
                    gp += GP_STEP;
                }
                VarArgArea::Fp if fp < FP_LIMIT => {
                    fp_index[((fp - GP_LIMIT) / FP_STEP) as usize] = Some(i);
                    fp += FP_STEP;
                }
                _ => {
                    offsets[overflow_args.len()] = overflow_size as i64;
                    overflow_size += overflow_slot_bytes(arg);
                    overflow_args.push(arg.clone());
                }
            }
        }

        Ok(Partition {
            init_gp_offset,
            init_fp_offset,
            reg_save: RegSaveArea {
                args: Arc::clone(args),
                gp_index,
                fp_index,
            },
            overflow: OverflowArea {
                args: overflow_args.into(),
                offsets: offsets.into(),
                size: overflow_size,
                current: 0,
            },
        })
    }

    /// Number of variadic arguments that landed in register slots.
    pub fn registerized_count(&self) -> usize {
        let gp = self.reg_save.gp_index.iter().flatten().count();
        let fp = self.reg_save.fp_index.iter().flatten().count();
        gp + fp
    }
}

/// Register bytes the explicit (non-variadic) arguments consume in the
/// general-purpose zone. Counted but never stored: the save area only
/// holds variadic arguments.
fn used_gp_area(explicit: &[Value]) -> u32 {
    let mut used = 0;
    for arg in explicit {
        if used >= GP_LIMIT {
            break;
        }
        if abi::classify_value(arg) == VarArgArea::Gp {
            used += GP_STEP;
        }
    }
    used
}

fn used_fp_area(explicit: &[Value]) -> u32 {
    let limit = FP_LIMIT - GP_LIMIT;
    let mut used = 0;
    for arg in explicit {
        if used >= limit {
            break;
        }
        if abi::classify_value(arg) == VarArgArea::Fp {
            used += FP_STEP;
        }
    }
    used
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_of(values: Vec<Value>) -> Arc<[Value]> {
        values.into()
    }

    #[test]
    fn test_partition_covers_every_variadic_argument() {
        // 8 ints, 2 floats, 1 extended float, all variadic
        let mut values: Vec<Value> = (0..8).map(Value::I64).collect();
        values.push(Value::F64(0.5));
        values.push(Value::F64(1.5));
        values.push(Value::Fp80([0xAB; 10]));
        let args = args_of(values);

        let p = Partition::compute(&args, 0).unwrap();
        assert_eq!(
            p.registerized_count() + p.overflow.arg_count(),
            args.len(),
            "every variadic argument is either registerized or spilled"
        );
        // 6 ints fill the GP zone, 2 spill at stack offsets 0 and 8,
        // the extended float follows at 16 in a 16-byte slot.
        assert_eq!(p.registerized_count(), 8);
        assert_eq!(p.overflow.arg_count(), 3);
        assert_eq!(p.overflow.offset_of(0).unwrap(), 0);
        assert_eq!(p.overflow.offset_of(1).unwrap(), 8);
        assert_eq!(p.overflow.offset_of(2).unwrap(), 16);
        assert_eq!(p.overflow.size, 32);
    }

    #[test]
    fn test_explicit_arguments_advance_initial_cursors() {
        // Two explicit ints and one explicit double consume registers
        // without occupying save-area slots.
        let args = args_of(vec![
            Value::I32(1),
            Value::I32(2),
            Value::F64(3.0),
            Value::I64(4),
            Value::F64(5.0),
        ]);
        let p = Partition::compute(&args, 3).unwrap();
        assert_eq!(p.init_gp_offset, 2 * GP_STEP);
        assert_eq!(p.init_fp_offset, GP_LIMIT + FP_STEP);

        // The first variadic int lands in the third GP slot.
        assert_eq!(
            p.reg_save.resolve(2 * GP_STEP),
            Some(SlotRef {
                index: 3,
                byte_offset: 0
            })
        );
        // The first variadic double lands in the second FP slot.
        assert_eq!(
            p.reg_save.resolve(GP_LIMIT + FP_STEP),
            Some(SlotRef {
                index: 4,
                byte_offset: 0
            })
        );
    }

    #[test]
    fn test_bad_explicit_count_is_rejected() {
        let args = args_of(vec![Value::I32(1)]);
        assert!(matches!(
            Partition::compute(&args, 2),
            Err(VaError::ExplicitCountTooLarge {
                explicit: 2,
                total: 1
            })
        ));
    }

    #[test]
    fn test_reg_save_resolve_intra_slot_offsets() {
        let args = args_of(vec![Value::I64(0x0102_0304_0506_0708)]);
        let p = Partition::compute(&args, 0).unwrap();
        assert_eq!(
            p.reg_save.resolve(4),
            Some(SlotRef {
                index: 0,
                byte_offset: 4
            })
        );
        assert_eq!(p.reg_save.read_i32(4).unwrap(), 0x0102_0304);
        // Empty slots and out-of-area offsets read as zero.
        assert_eq!(p.reg_save.resolve(GP_STEP), None);
        assert_eq!(p.reg_save.read_i64(GP_STEP).unwrap(), 0);
        assert_eq!(p.reg_save.resolve(FP_LIMIT), None);
    }

    #[test]
    fn test_fp_slot_padding_reads_as_zero() {
        // An f64 occupies the first half of its 16-byte SSE slot; the
        // padding half reads as zero, like the nativized image.
        let args = args_of(vec![Value::F64(2.5)]);
        let p = Partition::compute(&args, 0).unwrap();
        assert_eq!(
            p.reg_save.read_i64(GP_LIMIT).unwrap() as u64,
            2.5f64.to_bits()
        );
        assert_eq!(p.reg_save.read_i64(GP_LIMIT + 8).unwrap(), 0);
        assert_eq!(p.reg_save.read_i32(GP_LIMIT + 12).unwrap(), 0);
    }

    #[test]
    fn test_overflow_resolve_spans_wide_arguments() {
        // 6 GP args fill the registers; then an i64 at 0, an fp80 at 8
        // (16 bytes), and another i64 at 24.
        let mut values: Vec<Value> = (0..7).map(Value::I64).collect();
        values.insert(7, Value::Fp80([7; 10]));
        values.push(Value::I64(99));
        let args = args_of(values);
        let p = Partition::compute(&args, 0).unwrap();

        assert_eq!(p.overflow.arg_count(), 3);
        assert_eq!(p.overflow.offset_of(1).unwrap(), 8);
        assert_eq!(p.overflow.offset_of(2).unwrap(), 24);
        assert_eq!(p.overflow.size, 32);

        // An offset in the middle of the fp80 resolves to it.
        assert_eq!(
            p.overflow.resolve(12),
            Some(SlotRef {
                index: 1,
                byte_offset: 4
            })
        );
        // Offsets past the end of the area do not resolve.
        assert_eq!(p.overflow.resolve(32), None);
    }

    #[test]
    fn test_overflow_sentinel_tail() {
        // One overflow argument out of a three-element variadic tail:
        // the offsets array keeps its sentinel tail.
        let args = args_of(vec![
            Value::I64(1),
            Value::F64(2.0),
            Value::Compound {
                addr: NativePointer::new(0x8000),
                size: 24,
            },
        ]);
        let p = Partition::compute(&args, 0).unwrap();
        assert_eq!(p.overflow.arg_count(), 1);
        assert_eq!(p.overflow.size, 24);
        // Offsets inside the compound resolve through the sentinel path.
        assert_eq!(
            p.overflow.resolve(16),
            Some(SlotRef {
                index: 0,
                byte_offset: 16
            })
        );
        assert_eq!(p.overflow.resolve(24), None);
    }

    #[test]
    fn test_next_offset_past_last_argument_is_area_size() {
        let mut values: Vec<Value> = (0..8).map(Value::I64).collect();
        let args = args_of(values.drain(..).collect::<Vec<_>>());
        let p = Partition::compute(&args, 0).unwrap();
        // Two spilled ints at 0 and 8.
        assert_eq!(p.overflow.next_offset(0), 8);
        assert_eq!(p.overflow.next_offset(1), 16);
        assert_eq!(p.overflow.next_offset(1), p.overflow.size);
    }

    #[test]
    fn test_cursor_is_per_instance_but_arrays_are_shared() {
        let args = args_of((0..8).map(Value::I64).collect::<Vec<_>>());
        let p = Partition::compute(&args, 0).unwrap();
        let mut a = p.overflow.clone();
        let b = a.clone();
        a.shift();
        assert_eq!(a.current, 1);
        assert_eq!(b.current, 0);
        assert!(Arc::ptr_eq(&a.args, &b.args));
        assert!(Arc::ptr_eq(&a.offsets, &b.offsets));
    }
}
