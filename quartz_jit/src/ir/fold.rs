//! Integer constant-folding helpers.
//!
//! Redundancy passes fold side-effect-free integer arithmetic at compile
//! time. Folding is rejected whenever the folded value could mask runtime
//! semantics the integer representation cannot carry:
//!
//! - a `Mul` whose result is arithmetic zero (a negative factor would
//!   produce float `-0`, which `0_i32` silently erases);
//! - `Div` by zero (runtime produces an infinity, not an int);
//! - `Div` of a zero dividend by a negative divisor (`-0` again);
//! - inexact `Div` (the runtime result is fractional);
//! - any result that overflows the 32-bit range.
//!
//! Shifts follow the bytecode's modulo-32 semantics, so wrapping is the
//! correct fold, not an overflow.

use super::opcode::Opcode;

/// Fold a binary integer operation, or report that it must stay.
pub fn fold_int_binary(opcode: Opcode, lhs: i32, rhs: i32) -> Option<i32> {
    match opcode {
        Opcode::Add => lhs.checked_add(rhs),
        Opcode::Sub => lhs.checked_sub(rhs),
        Opcode::Mul => match lhs.checked_mul(rhs) {
            Some(0) | None => None,
            some => some,
        },
        Opcode::Div => {
            if rhs == 0 {
                return None;
            }
            if lhs == 0 && rhs < 0 {
                return None;
            }
            if lhs % rhs != 0 {
                return None;
            }
            lhs.checked_div(rhs)
        }
        Opcode::Rem => {
            if rhs == 0 {
                return None;
            }
            match lhs.checked_rem(rhs) {
                Some(0) if lhs < 0 => None,
                other => other,
            }
        }
        Opcode::Shl => Some(lhs.wrapping_shl(rhs as u32 & 31)),
        Opcode::Shr => Some(lhs >> (rhs as u32 & 31)),
        Opcode::ShrU => {
            let shifted = (lhs as u32) >> (rhs as u32 & 31);
            i32::try_from(shifted).ok()
        }
        Opcode::And => Some(lhs & rhs),
        Opcode::Or => Some(lhs | rhs),
        Opcode::Xor => Some(lhs ^ rhs),
        _ => None,
    }
}

/// Fold a unary integer operation, or report that it must stay.
pub fn fold_int_unary(opcode: Opcode, src: i32) -> Option<i32> {
    match opcode {
        Opcode::Neg => {
            if src == 0 {
                return None;
            }
            src.checked_neg()
        }
        Opcode::Not => Some(!src),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_folds() {
        assert_eq!(fold_int_binary(Opcode::Add, 2, 3), Some(5));
        assert_eq!(fold_int_binary(Opcode::Sub, 2, 3), Some(-1));
        assert_eq!(fold_int_binary(Opcode::Mul, 6, 7), Some(42));
        assert_eq!(fold_int_binary(Opcode::Div, 42, 6), Some(7));
        assert_eq!(fold_int_binary(Opcode::And, 0b1100, 0b1010), Some(0b1000));
    }

    #[test]
    fn test_mul_to_zero_rejected() {
        assert_eq!(fold_int_binary(Opcode::Mul, -5, 0), None);
        assert_eq!(fold_int_binary(Opcode::Mul, 0, 9), None);
    }

    #[test]
    fn test_div_by_zero_rejected() {
        assert_eq!(fold_int_binary(Opcode::Div, 42, 0), None);
    }

    #[test]
    fn test_zero_over_negative_rejected() {
        assert_eq!(fold_int_binary(Opcode::Div, 0, -3), None);
        // Zero over a positive divisor is exact +0 and folds.
        assert_eq!(fold_int_binary(Opcode::Div, 0, 3), Some(0));
    }

    #[test]
    fn test_inexact_div_rejected() {
        assert_eq!(fold_int_binary(Opcode::Div, 7, 2), None);
    }

    #[test]
    fn test_overflow_rejected() {
        assert_eq!(fold_int_binary(Opcode::Add, i32::MAX, 1), None);
        assert_eq!(fold_int_binary(Opcode::Mul, i32::MAX, 2), None);
        assert_eq!(fold_int_binary(Opcode::Div, i32::MIN, -1), None);
        assert_eq!(fold_int_unary(Opcode::Neg, i32::MIN), None);
    }

    #[test]
    fn test_negative_rem_zero_rejected() {
        assert_eq!(fold_int_binary(Opcode::Rem, -6, 3), None);
        assert_eq!(fold_int_binary(Opcode::Rem, 7, 3), Some(1));
    }

    #[test]
    fn test_shifts_use_modulo_semantics() {
        assert_eq!(fold_int_binary(Opcode::Shl, 1, 33), Some(2));
        assert_eq!(fold_int_binary(Opcode::Shr, -8, 1), Some(-4));
        assert_eq!(fold_int_binary(Opcode::ShrU, -1, 28), Some(0xF));
        // An unsigned shift whose result exceeds the int range stays
        // unfolded.
        assert_eq!(fold_int_binary(Opcode::ShrU, -1, 0), None);
    }

    #[test]
    fn test_neg_zero_rejected() {
        assert_eq!(fold_int_unary(Opcode::Neg, 0), None);
        assert_eq!(fold_int_unary(Opcode::Neg, 4), Some(-4));
    }
}
