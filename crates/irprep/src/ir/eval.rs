// Integer semantics of the scalar opcodes, over values masked to their width.
// Shared by constant folding and the reference evaluator.

use super::instruction::{BinOp, CastOp, IntPredicate};
use super::types::{sign_extend, truncate_to};

/// `lhs op rhs` on `bits`-wide integers. `None` for operations with no
/// defined result: division by zero, signed overflow of `sdiv`/`srem`,
/// shift amounts of at least `bits`, and float opcodes.
#[must_use]
pub fn binary(op: BinOp, bits: u32, lhs: u64, rhs: u64) -> Option<u64> {
    let (lhs, rhs) = (truncate_to(lhs, bits), truncate_to(rhs, bits));
    let (slhs, srhs) = (sign_extend(lhs, bits), sign_extend(rhs, bits));
    let signed_overflow = srhs == -1 && lhs == truncate_to(1 << (bits.clamp(1, 64) - 1), bits);
    let value = match op {
        BinOp::Add => lhs.wrapping_add(rhs),
        BinOp::Sub => lhs.wrapping_sub(rhs),
        BinOp::Mul => lhs.wrapping_mul(rhs),
        BinOp::UDiv => lhs.checked_div(rhs)?,
        BinOp::URem => lhs.checked_rem(rhs)?,
        BinOp::SDiv if rhs == 0 || signed_overflow => return None,
        BinOp::SRem if rhs == 0 || signed_overflow => return None,
        BinOp::SDiv => (slhs / srhs) as u64,
        BinOp::SRem => (slhs % srhs) as u64,
        BinOp::Shl | BinOp::LShr | BinOp::AShr if rhs >= u64::from(bits) => return None,
        BinOp::Shl => lhs << rhs,
        BinOp::LShr => lhs >> rhs,
        BinOp::AShr => (slhs >> rhs) as u64,
        BinOp::And => lhs & rhs,
        BinOp::Or => lhs | rhs,
        BinOp::Xor => lhs ^ rhs,
        BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv => return None,
    };
    Some(truncate_to(value, bits))
}

#[must_use]
pub fn icmp(pred: IntPredicate, bits: u32, lhs: u64, rhs: u64) -> bool {
    let (lhs, rhs) = (truncate_to(lhs, bits), truncate_to(rhs, bits));
    let (slhs, srhs) = (sign_extend(lhs, bits), sign_extend(rhs, bits));
    match pred {
        IntPredicate::Eq => lhs == rhs,
        IntPredicate::Ne => lhs != rhs,
        IntPredicate::Ult => lhs < rhs,
        IntPredicate::Ule => lhs <= rhs,
        IntPredicate::Ugt => lhs > rhs,
        IntPredicate::Uge => lhs >= rhs,
        IntPredicate::Slt => slhs < srhs,
        IntPredicate::Sle => slhs <= srhs,
        IntPredicate::Sgt => slhs > srhs,
        IntPredicate::Sge => slhs >= srhs,
    }
}

/// Integer-to-integer cast. Pointers are treated as 64-bit integers.
#[must_use]
pub fn cast(op: CastOp, from_bits: u32, to_bits: u32, value: u64) -> u64 {
    let value = truncate_to(value, from_bits);
    match op {
        CastOp::SExt => truncate_to(sign_extend(value, from_bits) as u64, to_bits),
        CastOp::Trunc
        | CastOp::ZExt
        | CastOp::Bitcast
        | CastOp::PtrToInt
        | CastOp::IntToPtr => truncate_to(value, to_bits),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrapping_arithmetic_stays_in_width() {
        assert_eq!(binary(BinOp::Add, 8, 0xff, 1), Some(0));
        assert_eq!(binary(BinOp::Sub, 32, 0, 1), Some(0xffff_ffff));
        assert_eq!(binary(BinOp::Mul, 64, u64::MAX, 2), Some(u64::MAX - 1));
    }

    #[test]
    fn undefined_results_are_none() {
        assert_eq!(binary(BinOp::UDiv, 32, 7, 0), None);
        assert_eq!(binary(BinOp::SRem, 32, 7, 0), None);
        assert_eq!(binary(BinOp::SDiv, 8, 0x80, 0xff), None);
        assert_eq!(binary(BinOp::SDiv, 64, 1 << 63, u64::MAX), None);
        assert_eq!(binary(BinOp::Shl, 32, 1, 32), None);
        assert_eq!(binary(BinOp::FAdd, 32, 1, 1), None);
    }

    #[test]
    fn signed_operations_use_twos_complement() {
        // -7 / 2 = -3, -7 % 2 = -1
        assert_eq!(binary(BinOp::SDiv, 8, 0xf9, 2), Some(0xfd));
        assert_eq!(binary(BinOp::SRem, 8, 0xf9, 2), Some(0xff));
        assert_eq!(binary(BinOp::AShr, 8, 0x80, 7), Some(0xff));
        assert_eq!(binary(BinOp::LShr, 8, 0x80, 7), Some(1));
        assert!(icmp(IntPredicate::Slt, 8, 0xff, 0));
        assert!(!icmp(IntPredicate::Ult, 8, 0xff, 0));
    }

    #[test]
    fn casts() {
        assert_eq!(cast(CastOp::SExt, 8, 32, 0x80), 0xffff_ff80);
        assert_eq!(cast(CastOp::ZExt, 8, 32, 0x80), 0x80);
        assert_eq!(cast(CastOp::Trunc, 32, 8, 0x1234), 0x34);
        assert_eq!(cast(CastOp::SExt, 1, 64, 1), u64::MAX);
    }
}
