use serde::{Deserialize, Serialize};

/// First-class IR types.
///
/// Vectors only ever hold scalar elements; the verifier rejects anything else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Void,
    Int(u32),
    F32,
    F64,
    Ptr,
    Vector { elem: Box<Type>, lanes: u32 },
}

impl Type {
    pub const I1: Type = Type::Int(1);
    pub const I8: Type = Type::Int(8);
    pub const I32: Type = Type::Int(32);
    pub const I64: Type = Type::Int(64);

    #[must_use]
    pub fn vector(elem: Type, lanes: u32) -> Type {
        Type::Vector {
            elem: Box::new(elem),
            lanes,
        }
    }

    #[must_use]
    pub fn is_vector(&self) -> bool {
        matches!(self, Type::Vector { .. })
    }

    #[must_use]
    pub fn is_int(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    #[must_use]
    pub fn is_float(&self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    #[must_use]
    pub fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    /// Scalar types are the ones a vector lane may hold.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Int(_) | Type::F32 | Type::F64 | Type::Ptr)
    }

    /// Bit width of an integer type, or of the lanes of an integer vector.
    #[must_use]
    pub fn int_width(&self) -> Option<u32> {
        match self.element() {
            Type::Int(bits) => Some(*bits),
            _ => None,
        }
    }

    /// Lane type for vectors, the type itself for everything else.
    #[must_use]
    pub fn element(&self) -> &Type {
        match self {
            Type::Vector { elem, .. } => elem,
            other => other,
        }
    }

    #[must_use]
    pub fn lanes(&self) -> Option<u32> {
        match self {
            Type::Vector { lanes, .. } => Some(*lanes),
            _ => None,
        }
    }

    /// Same shape as `self` (scalar or vector with the same lane count) but
    /// with `elem` lanes. Used for `icmp` results and per-lane casts.
    #[must_use]
    pub fn with_element(&self, elem: Type) -> Type {
        match self {
            Type::Vector { lanes, .. } => Type::vector(elem, *lanes),
            _ => elem,
        }
    }

    /// Number of bytes a load or store of this type touches.
    ///
    /// Integer vectors are bit-packed: `<8 x i1>` occupies one byte and
    /// `<3 x i4>` two. Other vectors lay their lanes out back to back.
    #[must_use]
    pub fn store_size(&self) -> u64 {
        match self {
            Type::Void => 0,
            Type::Int(bits) => u64::from(bits.div_ceil(8)),
            Type::F32 => 4,
            Type::F64 | Type::Ptr => 8,
            Type::Vector { elem, lanes } => match **elem {
                Type::Int(bits) => (u64::from(bits) * u64::from(*lanes)).div_ceil(8),
                _ => elem.store_size() * u64::from(*lanes),
            },
        }
    }

    /// Integer vectors whose lanes do not fill whole bytes, such as
    /// `<N x i1>`. Memory holds them packed, not one lane per byte.
    #[must_use]
    pub fn is_packed_vector(&self) -> bool {
        match self {
            Type::Vector { elem, .. } => matches!(**elem, Type::Int(bits) if bits % 8 != 0),
            _ => false,
        }
    }
}

/// Mask `value` down to `bits` bits.
#[must_use]
pub fn truncate_to(value: u64, bits: u32) -> u64 {
    if bits >= 64 {
        value
    } else {
        value & ((1u64 << bits) - 1)
    }
}

/// Sign-extend the low `bits` bits of `value` to 64 bits.
#[must_use]
pub fn sign_extend(value: u64, bits: u32) -> i64 {
    if bits == 0 || bits >= 64 {
        return value as i64;
    }
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_shape_helpers() {
        let v = Type::vector(Type::I32, 4);
        assert!(v.is_vector());
        assert_eq!(v.lanes(), Some(4));
        assert_eq!(v.element(), &Type::I32);
        assert_eq!(v.int_width(), Some(32));
        assert_eq!(v.with_element(Type::I1), Type::vector(Type::I1, 4));
        assert_eq!(Type::I32.with_element(Type::I1), Type::I1);
        assert_eq!(v.store_size(), 16);
    }

    #[test]
    fn odd_int_widths_round_up_in_memory() {
        assert_eq!(Type::I1.store_size(), 1);
        assert_eq!(Type::Int(17).store_size(), 3);
    }

    #[test]
    fn bool_vectors_are_bit_packed() {
        assert_eq!(Type::vector(Type::I1, 8).store_size(), 1);
        assert_eq!(Type::vector(Type::I1, 9).store_size(), 2);
        assert_eq!(Type::vector(Type::Int(4), 3).store_size(), 2);
        assert!(Type::vector(Type::I1, 4).is_packed_vector());
        assert!(!Type::vector(Type::I8, 4).is_packed_vector());
        assert!(!Type::I1.is_packed_vector());
    }

    #[test]
    fn mask_and_sign_extend() {
        assert_eq!(truncate_to(0x1ff, 8), 0xff);
        assert_eq!(truncate_to(u64::MAX, 64), u64::MAX);
        assert_eq!(sign_extend(0xff, 8), -1);
        assert_eq!(sign_extend(0x7f, 8), 127);
        assert_eq!(sign_extend(1, 1), -1);
    }
}
