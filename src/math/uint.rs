//! Fixed-length multi-precision unsigned integers.
//!
//! Values are little-endian arrays of `u64` words: word `0` holds the least
//! significant 64 bits. Routines take explicit input and output slices; an
//! `_inplace` suffix marks the variants whose first operand is also the
//! destination. Inputs and outputs never alias otherwise, which the borrow
//! checker enforces.

use std::cmp::Ordering;

use super::{MathError, MathResult};

/// Adds two words plus an incoming carry, returning `(sum, carry_out)`.
#[inline]
pub fn add_u64_carry(a: u64, b: u64, carry: bool) -> (u64, bool) {
    let (s1, c1) = a.overflowing_add(b);
    let (s2, c2) = s1.overflowing_add(carry as u64);
    (s2, c1 | c2)
}

/// Subtracts `b` and an incoming borrow from `a`, returning `(diff, borrow_out)`.
#[inline]
pub fn sub_u64_borrow(a: u64, b: u64, borrow: bool) -> (u64, bool) {
    let (d1, b1) = a.overflowing_sub(b);
    let (d2, b2) = d1.overflowing_sub(borrow as u64);
    (d2, b1 | b2)
}

/// Full 64x64 -> 128-bit product as `[low, high]`.
#[inline]
pub fn multiply_u64(a: u64, b: u64) -> [u64; 2] {
    let product = a as u128 * b as u128;
    [product as u64, (product >> 64) as u64]
}

/// High word of the 128-bit product.
#[inline]
pub fn multiply_u64_hw64(a: u64, b: u64) -> u64 {
    ((a as u128 * b as u128) >> 64) as u64
}

pub fn is_zero_uint(value: &[u64]) -> bool {
    value.iter().all(|&w| w == 0)
}

pub fn set_uint(value: u64, result: &mut [u64]) {
    result.fill(0);
    if let Some(first) = result.first_mut() {
        *first = value;
    }
}

/// Number of significant bits; zero for the zero value.
pub fn significant_bit_count_uint(value: &[u64]) -> usize {
    for (index, &word) in value.iter().enumerate().rev() {
        if word != 0 {
            return index * 64 + (64 - word.leading_zeros() as usize);
        }
    }
    0
}

/// Compares two values of possibly different word lengths.
pub fn compare_uint(a: &[u64], b: &[u64]) -> Ordering {
    let len = a.len().max(b.len());
    for index in (0..len).rev() {
        let wa = a.get(index).copied().unwrap_or(0);
        let wb = b.get(index).copied().unwrap_or(0);
        match wa.cmp(&wb) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

pub fn is_greater_than_or_equal_uint(a: &[u64], b: &[u64]) -> bool {
    compare_uint(a, b) != Ordering::Less
}

/// `result = a + b`; returns the final carry. All slices share one length.
pub fn add_uint(a: &[u64], b: &[u64], result: &mut [u64]) -> bool {
    debug_assert_eq!(a.len(), result.len());
    debug_assert_eq!(b.len(), result.len());
    let mut carry = false;
    for ((r, &x), &y) in result.iter_mut().zip(a).zip(b) {
        let (sum, c) = add_u64_carry(x, y, carry);
        *r = sum;
        carry = c;
    }
    carry
}

pub fn add_uint_inplace(a: &mut [u64], b: &[u64]) -> bool {
    debug_assert!(b.len() <= a.len());
    let mut carry = false;
    for (index, word) in a.iter_mut().enumerate() {
        let rhs = b.get(index).copied().unwrap_or(0);
        if rhs == 0 && !carry && index >= b.len() {
            break;
        }
        let (sum, c) = add_u64_carry(*word, rhs, carry);
        *word = sum;
        carry = c;
    }
    carry
}

/// Adds a single word to a multi-word value in place; returns the carry.
pub fn add_uint_u64_inplace(a: &mut [u64], b: u64) -> bool {
    let mut carry = b;
    for word in a.iter_mut() {
        if carry == 0 {
            return false;
        }
        let (sum, c) = word.overflowing_add(carry);
        *word = sum;
        carry = c as u64;
    }
    carry != 0
}

/// `result = a - b`; returns the final borrow. All slices share one length.
pub fn sub_uint(a: &[u64], b: &[u64], result: &mut [u64]) -> bool {
    debug_assert_eq!(a.len(), result.len());
    debug_assert_eq!(b.len(), result.len());
    let mut borrow = false;
    for ((r, &x), &y) in result.iter_mut().zip(a).zip(b) {
        let (diff, bo) = sub_u64_borrow(x, y, borrow);
        *r = diff;
        borrow = bo;
    }
    borrow
}

pub fn sub_uint_inplace(a: &mut [u64], b: &[u64]) -> bool {
    debug_assert!(b.len() <= a.len());
    let mut borrow = false;
    for (index, word) in a.iter_mut().enumerate() {
        let rhs = b.get(index).copied().unwrap_or(0);
        let (diff, bo) = sub_u64_borrow(*word, rhs, borrow);
        *word = diff;
        borrow = bo;
    }
    borrow
}

pub fn increment_uint_inplace(a: &mut [u64]) -> bool {
    add_uint_u64_inplace(a, 1)
}

pub fn decrement_uint_inplace(a: &mut [u64]) -> bool {
    for word in a.iter_mut() {
        let (diff, borrow) = word.overflowing_sub(1);
        *word = diff;
        if !borrow {
            return false;
        }
    }
    true
}

/// Two's-complement negation modulo `2^(64 * len)`.
pub fn negate_uint_inplace(a: &mut [u64]) {
    for word in a.iter_mut() {
        *word = !*word;
    }
    increment_uint_inplace(a);
}

/// `result = a * b`, truncated to `result.len()` words.
pub fn multiply_uint(a: &[u64], b: &[u64], result: &mut [u64]) {
    result.fill(0);
    let out_len = result.len();
    for (i, &x) in a.iter().enumerate() {
        if x == 0 || i >= out_len {
            continue;
        }
        let mut carry = 0u64;
        let mut j = 0;
        while j < b.len() && i + j < out_len {
            let acc = x as u128 * b[j] as u128 + result[i + j] as u128 + carry as u128;
            result[i + j] = acc as u64;
            carry = (acc >> 64) as u64;
            j += 1;
        }
        let mut k = i + j;
        while carry != 0 && k < out_len {
            let (sum, c) = result[k].overflowing_add(carry);
            result[k] = sum;
            carry = c as u64;
            k += 1;
        }
    }
}

/// `result = a * b` for a single-word `b`, truncated to `result.len()` words.
pub fn multiply_uint_u64(a: &[u64], b: u64, result: &mut [u64]) {
    result.fill(0);
    let mut carry = 0u64;
    for (index, slot) in result.iter_mut().enumerate() {
        let word = a.get(index).copied().unwrap_or(0);
        let acc = word as u128 * b as u128 + carry as u128;
        *slot = acc as u64;
        carry = (acc >> 64) as u64;
    }
}

pub fn left_shift_uint_inplace(a: &mut [u64], shift: usize) {
    let len = a.len();
    let word_shift = shift / 64;
    let bit_shift = shift % 64;
    if word_shift >= len {
        a.fill(0);
        return;
    }
    for index in (0..len).rev() {
        let src = index as isize - word_shift as isize;
        let hi = if src >= 0 { a[src as usize] } else { 0 };
        let lo = if src >= 1 { a[src as usize - 1] } else { 0 };
        a[index] = if bit_shift == 0 {
            hi
        } else {
            (hi << bit_shift) | (lo >> (64 - bit_shift))
        };
    }
}

pub fn right_shift_uint_inplace(a: &mut [u64], shift: usize) {
    let len = a.len();
    let word_shift = shift / 64;
    let bit_shift = shift % 64;
    if word_shift >= len {
        a.fill(0);
        return;
    }
    for index in 0..len {
        let src = index + word_shift;
        let lo = if src < len { a[src] } else { 0 };
        let hi = if src + 1 < len { a[src + 1] } else { 0 };
        a[index] = if bit_shift == 0 {
            lo
        } else {
            (lo >> bit_shift) | (hi << (64 - bit_shift))
        };
    }
}

/// `ceil(a / 2)` in place.
pub fn half_round_up_uint_inplace(a: &mut [u64]) {
    let odd = a.first().is_some_and(|&w| w & 1 == 1);
    right_shift_uint_inplace(a, 1);
    if odd {
        increment_uint_inplace(a);
    }
}

/// Long division. On return `numerator` holds the remainder and `quotient`
/// the quotient; both have the numerator's word length.
pub fn divide_uint_inplace(
    numerator: &mut [u64],
    denominator: &[u64],
    quotient: &mut [u64],
) -> MathResult<()> {
    debug_assert_eq!(numerator.len(), quotient.len());
    quotient.fill(0);
    let den_bits = significant_bit_count_uint(denominator);
    if den_bits == 0 {
        return Err(MathError::DivisionByZero);
    }
    let num_bits = significant_bit_count_uint(numerator);
    if num_bits < den_bits {
        return Ok(());
    }

    let len = numerator.len();
    let mut shifted = vec![0u64; len];
    for (dst, &src) in shifted.iter_mut().zip(denominator) {
        *dst = src;
    }
    let mut bit = num_bits - den_bits;
    left_shift_uint_inplace(&mut shifted, bit);
    loop {
        if is_greater_than_or_equal_uint(numerator, &shifted) {
            sub_uint_inplace(numerator, &shifted);
            quotient[bit / 64] |= 1u64 << (bit % 64);
        }
        if bit == 0 {
            break;
        }
        right_shift_uint_inplace(&mut shifted, 1);
        bit -= 1;
    }
    Ok(())
}

/// Divides a multi-word value by a single word; returns the remainder.
pub fn divide_uint_u64_inplace(
    numerator: &mut [u64],
    denominator: u64,
) -> MathResult<u64> {
    if denominator == 0 {
        return Err(MathError::DivisionByZero);
    }
    let mut remainder = 0u128;
    for word in numerator.iter_mut().rev() {
        let acc = (remainder << 64) | *word as u128;
        *word = (acc / denominator as u128) as u64;
        remainder = acc % denominator as u128;
    }
    Ok(remainder as u64)
}

/// Nearest `f64` to the multi-word value.
pub fn uint_to_f64(value: &[u64]) -> f64 {
    const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;
    value
        .iter()
        .rev()
        .fold(0.0, |acc, &word| acc * TWO_POW_64 + word as f64)
}
