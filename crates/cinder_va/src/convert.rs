//! Byte-level reinterpretation of argument slots.
//!
//! A register or overflow slot is populated with the caller's value,
//! but `va_arg` may request a narrower (or, after integer promotion, a
//! wider) type. Reads therefore go through the slot's little-endian
//! byte image: for a `k`-byte number and a requested width `w` at
//! intra-slot byte offset `j`, the result is `(bits >> 8*j) & mask(w)`.
//! The image matches what the native bridge writes, so managed and
//! nativized reads agree bit for bit.

use byteorder::{ByteOrder, LittleEndian};

use cinder::memory::NativePointer;
use cinder::types::Type;
use cinder::values::Value;

use crate::error::{VaError, VaResult};

/// 8-byte register-slot encoding of a scalar argument.
///
/// Sub-8-byte integers are sign-extended to 32 bits and zero-extended
/// beyond, matching what a native caller leaves in the argument
/// register. `None` for values that do not fit one scalar slot.
pub(crate) fn scalar_slot_bits(value: &Value) -> Option<u64> {
    match value {
        Value::I1(b) => Some(*b as u64),
        Value::I8(v) => Some(*v as i32 as u32 as u64),
        Value::I16(v) => Some(*v as i32 as u32 as u64),
        Value::I32(v) => Some(*v as u32 as u64),
        Value::I64(v) => Some(*v as u64),
        Value::F32(v) => Some(v.to_bits() as u64),
        Value::F64(v) => Some(v.to_bits()),
        Value::Pointer(p) => Some(p.address()),
        Value::Fp80(_) | Value::FloatVector(_) | Value::Compound { .. } => None,
    }
}

/// Little-endian byte image of a slot, for sub-slot reads. Scalars
/// image as their full 8-byte slot; extended floats as their 10-byte
/// representation; float vectors lane by lane.
fn le_image(value: &Value) -> VaResult<([u8; 16], usize)> {
    let mut buf = [0u8; 16];
    if let Some(bits) = scalar_slot_bits(value) {
        LittleEndian::write_u64(&mut buf, bits);
        return Ok((buf, 8));
    }
    match value {
        Value::Fp80(bytes) => {
            buf[..10].copy_from_slice(bytes);
            Ok((buf, 10))
        }
        Value::FloatVector(lanes) => {
            if lanes.len() > 4 {
                return Err(VaError::Inconsistent(
                    "float vector wider than a register save slot",
                ));
            }
            for (i, lane) in lanes.iter().enumerate() {
                LittleEndian::write_u32(&mut buf[4 * i..], lane.to_bits());
            }
            Ok((buf, 4 * lanes.len()))
        }
        Value::Compound { .. } => Err(VaError::Inconsistent(
            "sub-slot read of a compound value",
        )),
        _ => unreachable!("scalar handled above"),
    }
}

/// Bytes past the stored value's image but still inside the 16-byte
/// slot read as zero, the same as the padding bytes of the nativized
/// image.
fn slice_at(value: &Value, byte_offset: u32, width: usize) -> VaResult<[u8; 16]> {
    let (buf, _len) = le_image(value)?;
    let off = byte_offset as usize;
    if off + width > buf.len() {
        return Err(VaError::Inconsistent(
            "intra-slot byte offset outside the slot",
        ));
    }
    let mut out = [0u8; 16];
    out[..width].copy_from_slice(&buf[off..off + width]);
    Ok(out)
}

pub fn read_i8(value: &Value, byte_offset: u32) -> VaResult<i8> {
    Ok(slice_at(value, byte_offset, 1)?[0] as i8)
}

pub fn read_i16(value: &Value, byte_offset: u32) -> VaResult<i16> {
    Ok(LittleEndian::read_i16(&slice_at(value, byte_offset, 2)?))
}

/// Also serves float-vector lane reads: lane `byte_offset / 4` comes
/// back as its raw bit pattern.
pub fn read_i32(value: &Value, byte_offset: u32) -> VaResult<i32> {
    Ok(LittleEndian::read_i32(&slice_at(value, byte_offset, 4)?))
}

pub fn read_i64(value: &Value, byte_offset: u32) -> VaResult<i64> {
    Ok(LittleEndian::read_i64(&slice_at(value, byte_offset, 8)?))
}

/// Pointer view of a slot; non-pointer slots read as null.
pub fn read_pointer(value: &Value) -> NativePointer {
    match value {
        Value::Pointer(p) => *p,
        _ => NativePointer::NULL,
    }
}

/// Type-directed reinterpretation applied by `va_arg`: integer requests
/// narrower or wider than the stored value go through the byte image;
/// all other requests return the stored value unchanged.
pub fn coerce(value: &Value, ty: Type) -> VaResult<Value> {
    Ok(match ty {
        Type::I1 => Value::I1(read_i8(value, 0)? != 0),
        Type::I8 => Value::I8(read_i8(value, 0)?),
        Type::I16 => Value::I16(read_i16(value, 0)?),
        Type::I32 => Value::I32(read_i32(value, 0)?),
        Type::I64 => Value::I64(read_i64(value, 0)?),
        Type::F32
        | Type::F64
        | Type::X86Fp80
        | Type::Pointer
        | Type::FloatVector(_)
        | Type::Aggregate { .. } => value.clone(),
    })
}
