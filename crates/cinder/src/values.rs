use std::sync::Arc;

use crate::memory::NativePointer;

/// Runtime value of a single call argument.
///
/// Covers every representation the bitcode front end can hand to a
/// call site: scalars up to 8 bytes, x87 extended floats, short packed
/// float vectors, pointers, and by-reference compound values whose
/// payload already lives in native memory.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    I1(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// x87 80-bit extended float, little-endian byte image.
    Fp80([u8; 10]),
    /// Packed single-precision vector.
    FloatVector(Arc<[f32]>),
    Pointer(NativePointer),
    /// Aggregate passed indirectly: `size` bytes at `addr`.
    Compound { addr: NativePointer, size: u64 },
}

impl Value {
    pub fn float_vector(lanes: &[f32]) -> Value {
        Value::FloatVector(Arc::from(lanes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_float_vector_lanes() {
        let v = Value::float_vector(&[1.0, 2.0]);
        match v {
            Value::FloatVector(lanes) => assert_eq!(&lanes[..], &[1.0, 2.0]),
            other => panic!("unexpected value {:?}", other),
        }
    }
}
