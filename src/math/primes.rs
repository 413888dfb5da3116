//! Prime search for NTT-friendly moduli.
//!
//! Primality uses deterministic Miller-Rabin over `u64`: with the first twelve
//! prime bases no composite below 3.3 * 10^24 passes, which covers every word.
//! Reference: https://en.wikipedia.org/wiki/Miller%E2%80%93Rabin_primality_test

use super::{MathError, MathResult, Modulus};

const MILLER_RABIN_BASES: [u64; 12] = [2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37];

fn mul_mod(a: u64, b: u64, modulus: u64) -> u64 {
    ((a as u128 * b as u128) % modulus as u128) as u64
}

fn pow_mod(mut base: u64, mut exp: u64, modulus: u64) -> u64 {
    let mut acc = 1 % modulus;
    base %= modulus;
    while exp > 0 {
        if exp & 1 == 1 {
            acc = mul_mod(acc, base, modulus);
        }
        base = mul_mod(base, base, modulus);
        exp >>= 1;
    }
    acc
}

/// Returns `true` if `n` is prime.
pub fn is_prime(n: u64) -> bool {
    match n {
        0 | 1 => return false,
        2 | 3 => return true,
        _ if n & 1 == 0 => return false,
        _ => {}
    }

    let r = (n - 1).trailing_zeros();
    let d = (n - 1) >> r;
    'bases: for &a in MILLER_RABIN_BASES.iter() {
        if a % n == 0 {
            continue;
        }
        let mut x = pow_mod(a, d, n);
        if x == 1 || x == n - 1 {
            continue;
        }
        for _ in 1..r {
            x = mul_mod(x, x, n);
            if x == n - 1 {
                continue 'bases;
            }
        }
        return false;
    }
    true
}

/// `p` is prime and `p = 1 (mod 2n)`, so `Z_p` has a primitive `2n`-th root of
/// unity and supports the negacyclic NTT of degree `n`.
#[inline]
pub fn is_ntt_friendly_prime(p: u64, n: u64) -> bool {
    match n.checked_mul(2) {
        Some(order) => is_prime(p) && p % order == 1,
        None => false,
    }
}

/// Largest prime `p < bound` with `p = 1 (mod factor)`, if any exists above
/// `floor`.
pub fn get_first_prime_down(bound: u64, factor: u64, floor: u64) -> Option<u64> {
    if bound <= 2 || factor == 0 {
        return None;
    }
    let start = bound - 1;
    let mut candidate = start - (start + factor - 1) % factor;
    while candidate > floor.max(2) {
        if is_prime(candidate) {
            return Some(candidate);
        }
        candidate = candidate.checked_sub(factor)?;
    }
    None
}

/// `count` distinct primes of exactly `bit_size` bits congruent to
/// `1 mod factor`, in descending order starting below `2^bit_size`.
pub fn get_primes(factor: u64, bit_size: u32, count: usize) -> MathResult<Vec<Modulus>> {
    let exhausted = MathError::PrimeSearchExhausted {
        factor,
        bit_size,
        count,
    };
    if !(2..=super::modulus::MAX_MODULUS_BITS).contains(&bit_size) || factor == 0 {
        return Err(exhausted);
    }
    let floor = 1u64 << (bit_size - 1);
    let mut primes = Vec::with_capacity(count);
    let mut bound = 1u64 << bit_size;
    while primes.len() < count {
        let Some(p) = get_first_prime_down(bound, factor, floor) else {
            return Err(exhausted);
        };
        primes.push(Modulus::new(p)?);
        bound = p;
    }
    Ok(primes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_prime_reference(n: u64) -> bool {
        if n < 2 {
            return false;
        }
        let mut i = 2u64;
        while i * i <= n {
            if n % i == 0 {
                return false;
            }
            i += 1;
        }
        true
    }

    #[test]
    fn small_values() {
        for n in 0..2000 {
            assert_eq!(is_prime(n), is_prime_reference(n), "mismatch at {n}");
        }
    }

    #[test]
    fn tricky_composites_and_large_primes() {
        for n in [561u64, 1_105, 1_729, 3_215_031_751] {
            assert!(!is_prime(n), "expected composite: {n}");
        }
        assert!(is_prime(2_305_843_009_213_693_951));
        assert!(is_prime(18_446_744_073_709_551_557));
        assert!(!is_prime(u64::MAX));
    }

    #[test]
    fn ntt_friendly_condition() {
        assert!(is_ntt_friendly_prime(12289, 1024));
        assert!(!is_ntt_friendly_prime(2049, 1024));
        assert!(!is_ntt_friendly_prime(12289, u64::MAX));
    }

    #[test]
    fn get_primes_descends_with_exact_width() {
        let primes = get_primes(2 * 1024, 40, 3).unwrap();
        assert_eq!(primes.len(), 3);
        for pair in primes.windows(2) {
            assert!(pair[0].value() > pair[1].value());
        }
        for p in &primes {
            assert_eq!(p.bit_count(), 40);
            assert!(is_ntt_friendly_prime(p.value(), 1024));
        }
    }

    #[test]
    fn get_primes_reports_exhaustion() {
        // Only 17 is 1 mod 16 among 5-bit integers.
        assert!(get_primes(16, 5, 1).is_ok());
        assert!(matches!(
            get_primes(16, 5, 2),
            Err(MathError::PrimeSearchExhausted { .. })
        ));
    }
}
