use std::fmt;

use super::{MathError, MathResult, primes::is_prime};

/// Largest supported modulus width. Keeps `4 * value` inside a word, which the
/// lazy NTT butterflies rely on.
pub const MAX_MODULUS_BITS: u32 = 61;

/// An integer modulus together with its Barrett constants.
///
/// `const_ratio[0..2]` holds `floor(2^128 / value)` and `const_ratio[2]` the
/// remainder `2^128 mod value`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Modulus {
    value: u64,
    const_ratio: [u64; 3],
    bit_count: u32,
    is_prime: bool,
}

impl Modulus {
    pub fn new(value: u64) -> MathResult<Self> {
        if value < 2 || 64 - value.leading_zeros() > MAX_MODULUS_BITS {
            return Err(MathError::InvalidModulus(value));
        }
        let mut quotient = u128::MAX / value as u128;
        let mut remainder = u128::MAX % value as u128 + 1;
        if remainder == value as u128 {
            quotient += 1;
            remainder = 0;
        }
        Ok(Self {
            value,
            const_ratio: [quotient as u64, (quotient >> 64) as u64, remainder as u64],
            bit_count: 64 - value.leading_zeros(),
            is_prime: is_prime(value),
        })
    }

    /// Builds a list of moduli, failing on the first invalid value.
    pub fn from_values(values: &[u64]) -> MathResult<Vec<Self>> {
        values.iter().map(|&v| Self::new(v)).collect()
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.value
    }

    #[inline]
    pub fn const_ratio(&self) -> &[u64; 3] {
        &self.const_ratio
    }

    #[inline]
    pub fn bit_count(&self) -> u32 {
        self.bit_count
    }

    #[inline]
    pub fn is_prime(&self) -> bool {
        self.is_prime
    }

    /// `value mod self` for a single word.
    #[inline]
    pub fn reduce(&self, value: u64) -> u64 {
        super::barrett_reduce_64(value, self)
    }
}

impl fmt::Debug for Modulus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modulus({})", self.value)
    }
}

impl fmt::Display for Modulus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl TryFrom<u64> for Modulus {
    type Error = MathError;

    fn try_from(value: u64) -> MathResult<Self> {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_is_floor_of_two_pow_128() {
        let m = Modulus::new(3).unwrap();
        // 2^128 = 3 * 0x5555...5555 + 1
        assert_eq!(m.const_ratio()[0], 0x5555_5555_5555_5555);
        assert_eq!(m.const_ratio()[1], 0x5555_5555_5555_5555);
        assert_eq!(m.const_ratio()[2], 1);
    }

    #[test]
    fn power_of_two_modulus_has_zero_remainder() {
        let m = Modulus::new(1 << 32).unwrap();
        assert_eq!(m.const_ratio()[0], 0);
        assert_eq!(m.const_ratio()[1], 1 << 32);
        assert_eq!(m.const_ratio()[2], 0);
        assert!(!m.is_prime());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert_eq!(Modulus::new(0), Err(MathError::InvalidModulus(0)));
        assert_eq!(Modulus::new(1), Err(MathError::InvalidModulus(1)));
        assert!(Modulus::new(1 << 62).is_err());
        assert!(Modulus::new((1 << 61) - 1).is_ok());
    }

    #[test]
    fn bit_count_and_primality() {
        let m = Modulus::new(65537).unwrap();
        assert_eq!(m.bit_count(), 17);
        assert!(m.is_prime());
    }
}
