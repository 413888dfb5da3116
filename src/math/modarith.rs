//! Modular arithmetic under a [`Modulus`] of at most 61 bits.
//!
//! Unless stated otherwise, operands must already be reduced (`< modulus`).

use super::{MathError, MathResult, Modulus, uint::multiply_u64_hw64};

/// Barrett reduction of a full 128-bit value.
#[inline]
pub fn barrett_reduce_128(input: u128, modulus: &Modulus) -> u64 {
    let x0 = input as u64;
    let x1 = (input >> 64) as u64;
    let ratio = modulus.const_ratio();

    // Round 1
    let carry = multiply_u64_hw64(x0, ratio[0]);
    let tmp2 = x0 as u128 * ratio[1] as u128;
    let (tmp1, c) = (tmp2 as u64).overflowing_add(carry);
    let tmp3 = ((tmp2 >> 64) as u64).wrapping_add(c as u64);

    // Round 2
    let tmp2 = x1 as u128 * ratio[0] as u128;
    let (_, c) = tmp1.overflowing_add(tmp2 as u64);
    let carry = ((tmp2 >> 64) as u64).wrapping_add(c as u64);

    // Only the low word of the estimated quotient matters here.
    let q = x1
        .wrapping_mul(ratio[1])
        .wrapping_add(tmp3)
        .wrapping_add(carry);
    let r = x0.wrapping_sub(q.wrapping_mul(modulus.value()));
    if r >= modulus.value() {
        r - modulus.value()
    } else {
        r
    }
}

/// Barrett reduction of a single word.
#[inline]
pub fn barrett_reduce_64(input: u64, modulus: &Modulus) -> u64 {
    let q = multiply_u64_hw64(input, modulus.const_ratio()[1]);
    let r = input.wrapping_sub(q.wrapping_mul(modulus.value()));
    if r >= modulus.value() {
        r - modulus.value()
    } else {
        r
    }
}

#[inline]
pub fn add_uint_mod(a: u64, b: u64, modulus: &Modulus) -> u64 {
    debug_assert!(a < modulus.value() && b < modulus.value());
    let sum = a + b;
    if sum >= modulus.value() {
        sum - modulus.value()
    } else {
        sum
    }
}

#[inline]
pub fn sub_uint_mod(a: u64, b: u64, modulus: &Modulus) -> u64 {
    debug_assert!(a < modulus.value() && b < modulus.value());
    if a >= b { a - b } else { a + modulus.value() - b }
}

#[inline]
pub fn negate_uint_mod(a: u64, modulus: &Modulus) -> u64 {
    debug_assert!(a < modulus.value());
    if a == 0 { 0 } else { modulus.value() - a }
}

#[inline]
pub fn increment_uint_mod(a: u64, modulus: &Modulus) -> u64 {
    add_uint_mod(a, 1, modulus)
}

#[inline]
pub fn decrement_uint_mod(a: u64, modulus: &Modulus) -> u64 {
    sub_uint_mod(a, 1, modulus)
}

/// `a / 2 mod modulus` for an odd modulus.
#[inline]
pub fn div2_uint_mod(a: u64, modulus: &Modulus) -> u64 {
    debug_assert!(modulus.value() & 1 == 1);
    if a & 1 == 1 {
        (a + modulus.value()) >> 1
    } else {
        a >> 1
    }
}

/// `a * b mod modulus`; the inputs need not be reduced.
#[inline]
pub fn multiply_uint_mod(a: u64, b: u64, modulus: &Modulus) -> u64 {
    barrett_reduce_128(a as u128 * b as u128, modulus)
}

/// `a * b + c mod modulus`; the inputs need not be reduced.
#[inline]
pub fn multiply_add_uint_mod(a: u64, b: u64, c: u64, modulus: &Modulus) -> u64 {
    barrett_reduce_128(a as u128 * b as u128 + c as u128, modulus)
}

pub fn exponentiate_uint_mod(base: u64, mut exponent: u64, modulus: &Modulus) -> u64 {
    let mut base = barrett_reduce_64(base, modulus);
    let mut acc = 1u64;
    while exponent > 0 {
        if exponent & 1 == 1 {
            acc = multiply_uint_mod(acc, base, modulus);
        }
        base = multiply_uint_mod(base, base, modulus);
        exponent >>= 1;
    }
    acc
}

/// Extended Euclid: returns `(gcd, x, y)` with `a*x + b*y = gcd`.
pub fn xgcd(a: u64, b: u64) -> (u64, i128, i128) {
    let (mut old_r, mut r) = (a as i128, b as i128);
    let (mut old_s, mut s) = (1i128, 0i128);
    let (mut old_t, mut t) = (0i128, 1i128);
    while r != 0 {
        let q = old_r / r;
        (old_r, r) = (r, old_r - q * r);
        (old_s, s) = (s, old_s - q * s);
        (old_t, t) = (t, old_t - q * t);
    }
    (old_r as u64, old_s, old_t)
}

/// Modular inverse of `value`; fails when `value` is zero or shares a factor
/// with the modulus.
pub fn try_invert_uint_mod(value: u64, modulus: &Modulus) -> MathResult<u64> {
    let value = barrett_reduce_64(value, modulus);
    if value == 0 {
        return Err(MathError::DivisionByZero);
    }
    let (gcd, x, _) = xgcd(value, modulus.value());
    if gcd != 1 {
        return Err(MathError::NotInvertible {
            value,
            modulus: modulus.value(),
        });
    }
    Ok(x.rem_euclid(modulus.value() as i128) as u64)
}

/// A fixed right-hand multiplicand with its Shoup quotient
/// `floor(operand * 2^64 / modulus)` precomputed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MultiplyModOperand {
    pub operand: u64,
    pub quotient: u64,
}

impl MultiplyModOperand {
    pub fn new(operand: u64, modulus: &Modulus) -> Self {
        assert!(
            operand < modulus.value(),
            "MultiplyModOperand: operand {operand} not reduced modulo {}",
            modulus.value()
        );
        let quotient = ((operand as u128) << 64) / modulus.value() as u128;
        Self {
            operand,
            quotient: quotient as u64,
        }
    }
}

/// `x * y.operand mod modulus` with output in `[0, 2 * modulus)`. `x` may be
/// any word.
#[inline]
pub fn multiply_uint_mod_lazy(x: u64, y: &MultiplyModOperand, modulus: &Modulus) -> u64 {
    let q = multiply_u64_hw64(x, y.quotient);
    y.operand
        .wrapping_mul(x)
        .wrapping_sub(q.wrapping_mul(modulus.value()))
}

/// `x * y.operand mod modulus`, fully reduced. `x` may be any word.
#[inline]
pub fn multiply_uint_mod_operand(x: u64, y: &MultiplyModOperand, modulus: &Modulus) -> u64 {
    let r = multiply_uint_mod_lazy(x, y, modulus);
    if r >= modulus.value() {
        r - modulus.value()
    } else {
        r
    }
}

/// Number of 128-bit products of `max_bits`-wide reduced operands that can be
/// summed before the accumulator may overflow.
pub const fn multiply_accumulate_bound(max_bits: u32) -> usize {
    let spare = 128 - 2 * max_bits;
    if spare >= 32 { 1 << 31 } else { 1 << spare }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crypto_bigint::{NonZero, U256};
    use proptest::prelude::*;

    const P: u64 = (1 << 61) - 1;

    fn modulus() -> Modulus {
        Modulus::new(P).unwrap()
    }

    fn reference_mul_mod(a: u64, b: u64, p: u64) -> u64 {
        let product = U256::from_u64(a).wrapping_mul(&U256::from_u64(b));
        let (_, r) = product.div_rem(&NonZero::new(U256::from_u64(p)).unwrap());
        r.to_words()[0]
    }

    #[test]
    fn barrett_handles_extremes() {
        let m = modulus();
        assert_eq!(barrett_reduce_128(u128::MAX, &m), (u128::MAX % P as u128) as u64);
        assert_eq!(barrett_reduce_128(0, &m), 0);
        assert_eq!(barrett_reduce_64(u64::MAX, &m), u64::MAX % P);
        assert_eq!(barrett_reduce_64(P, &m), 0);
    }

    #[test]
    fn inverse_fails_for_zero_and_shared_factors() {
        let m = Modulus::new(12).unwrap();
        assert_eq!(try_invert_uint_mod(0, &m), Err(MathError::DivisionByZero));
        assert!(matches!(
            try_invert_uint_mod(8, &m),
            Err(MathError::NotInvertible { value: 8, modulus: 12 })
        ));
        assert_eq!(try_invert_uint_mod(5, &m), Ok(5));
    }

    #[test]
    fn exponentiation_matches_fermat() {
        let m = Modulus::new(65537).unwrap();
        assert_eq!(exponentiate_uint_mod(3, 65536, &m), 1);
        assert_eq!(exponentiate_uint_mod(3, 0, &m), 1);
        assert_eq!(exponentiate_uint_mod(2, 16, &m), 65536);
    }

    #[test]
    fn halving_is_inverse_of_doubling() {
        let m = Modulus::new(97).unwrap();
        for a in 0..97 {
            let half = div2_uint_mod(a, &m);
            assert_eq!(add_uint_mod(half, half, &m), a);
        }
    }

    #[test]
    fn accumulate_bound_for_sixty_bit_operands() {
        assert_eq!(multiply_accumulate_bound(60), 256);
        assert_eq!(multiply_accumulate_bound(61), 64);
    }

    proptest! {
        #[test]
        fn barrett_product_matches_reference(a in 0..P, b in 0..P) {
            let m = modulus();
            prop_assert_eq!(multiply_uint_mod(a, b, &m), reference_mul_mod(a, b, P));
        }

        #[test]
        fn shoup_product_matches_barrett(x in any::<u64>(), y in 0..P) {
            let m = modulus();
            let operand = MultiplyModOperand::new(y, &m);
            let lazy = multiply_uint_mod_lazy(x, &operand, &m);
            prop_assert!(lazy < 2 * P);
            prop_assert_eq!(
                multiply_uint_mod_operand(x, &operand, &m),
                reference_mul_mod(x % P, y, P)
            );
        }

        #[test]
        fn inverse_times_value_is_one(a in 1..P) {
            let m = modulus();
            let inv = try_invert_uint_mod(a, &m).unwrap();
            prop_assert_eq!(multiply_uint_mod(a, inv, &m), 1);
        }

        #[test]
        fn add_sub_negate_are_consistent(a in 0..P, b in 0..P) {
            let m = modulus();
            let sum = add_uint_mod(a, b, &m);
            prop_assert_eq!(sub_uint_mod(sum, b, &m), a);
            prop_assert_eq!(add_uint_mod(a, negate_uint_mod(a, &m), &m), 0);
        }
    }
}
