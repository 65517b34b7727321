/// Static argument type, as declared at a call or `va_arg` site.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Type {
    I1,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// x87 80-bit extended float (`long double` on the target).
    X86Fp80,
    Pointer,
    /// Packed single-precision vector with the given lane count.
    FloatVector(u32),
    /// Aggregate of the given native size, passed indirectly.
    Aggregate { size: u64 },
}

impl Type {
    pub fn is_pointer(self) -> bool {
        self == Type::Pointer
    }

    pub fn is_extended_float(self) -> bool {
        self == Type::X86Fp80
    }

    pub fn float_vector_lanes(self) -> Option<u32> {
        match self {
            Type::FloatVector(lanes) => Some(lanes),
            _ => None,
        }
    }

    /// Width in bytes of a scalar of this type, if it is a scalar.
    pub fn scalar_bytes(self) -> Option<u32> {
        match self {
            Type::I1 | Type::I8 => Some(1),
            Type::I16 => Some(2),
            Type::I32 | Type::F32 => Some(4),
            Type::I64 | Type::F64 | Type::Pointer => Some(8),
            Type::X86Fp80 => Some(10),
            Type::FloatVector(_) | Type::Aggregate { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queries() {
        assert!(Type::Pointer.is_pointer());
        assert!(!Type::I64.is_pointer());
        assert!(Type::X86Fp80.is_extended_float());
        assert_eq!(Type::FloatVector(2).float_vector_lanes(), Some(2));
        assert_eq!(Type::F64.float_vector_lanes(), None);
        assert_eq!(Type::X86Fp80.scalar_bytes(), Some(10));
        assert_eq!(Type::Aggregate { size: 32 }.scalar_bytes(), None);
    }
}
