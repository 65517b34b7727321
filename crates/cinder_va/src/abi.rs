//! AMD64 System V constants and argument classification.
//!
//! Layout reference: System V Application Binary Interface, AMD64
//! Architecture Processor Supplement, section 3.5.7 (variable argument
//! lists).

use cinder::types::Type;
use cinder::values::Value;

/// Byte offsets of the four `va_list` header fields.
pub const GP_OFFSET: u64 = 0;
pub const FP_OFFSET: u64 = 4;
pub const OVERFLOW_ARG_AREA: u64 = 8;
pub const REG_SAVE_AREA: u64 = 16;

/// Size of the `va_list` header itself (two i32 cursors, two pointers).
pub const VA_LIST_BYTES: u64 = 24;

/// End of the general-purpose zone of the register save area:
/// six 8-byte slots (rdi, rsi, rdx, rcx, r8, r9).
pub const GP_LIMIT: u32 = 48;
pub const GP_STEP: u32 = 8;

/// End of the floating-point zone: eight 16-byte slots (xmm0-xmm7)
/// following the general-purpose zone.
pub const FP_LIMIT: u32 = 176;
pub const FP_STEP: u32 = 16;

/// Stack slot granularity in the overflow area.
pub const STACK_STEP: u64 = 8;

/// Number of slots in each register save area zone.
pub const GP_SLOTS: usize = (GP_LIMIT / GP_STEP) as usize;
pub const FP_SLOTS: usize = ((FP_LIMIT - GP_LIMIT) / FP_STEP) as usize;

/// Which area of the `va_list` an argument travels through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarArgArea {
    /// General-purpose register class: booleans, integers and pointers
    /// up to 8 bytes.
    Gp,
    /// SSE register class: single/double floats and float vectors of at
    /// most two lanes.
    Fp,
    /// Everything else goes to the stack: extended floats, aggregates,
    /// wider vectors.
    Overflow,
}

/// Classify a runtime value. Total over the closed [`Value`] enum.
pub fn classify_value(value: &Value) -> VarArgArea {
    match value {
        Value::I1(_)
        | Value::I8(_)
        | Value::I16(_)
        | Value::I32(_)
        | Value::I64(_)
        | Value::Pointer(_) => VarArgArea::Gp,
        Value::F32(_) | Value::F64(_) => VarArgArea::Fp,
        Value::FloatVector(lanes) if lanes.len() <= 2 => VarArgArea::Fp,
        Value::FloatVector(_) | Value::Fp80(_) | Value::Compound { .. } => VarArgArea::Overflow,
    }
}

/// Classify a static type, as offered by the `va_arg` instruction.
/// Agrees with [`classify_value`] for every value of that type.
pub fn classify_type(ty: Type) -> VarArgArea {
    match ty {
        Type::I1 | Type::I8 | Type::I16 | Type::I32 | Type::I64 | Type::Pointer => VarArgArea::Gp,
        Type::F32 | Type::F64 => VarArgArea::Fp,
        Type::FloatVector(lanes) if lanes <= 2 => VarArgArea::Fp,
        Type::FloatVector(_) | Type::X86Fp80 | Type::Aggregate { .. } => VarArgArea::Overflow,
    }
}
