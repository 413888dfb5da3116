//! Coefficient-wise arithmetic on RNS polynomials.
//!
//! Every routine walks a `k * n` buffer row by row; rows are independent and
//! are processed on the rayon pool.

use rayon::prelude::*;

use crate::math::{
    Modulus, MultiplyModOperand, add_uint_mod, barrett_reduce_64, multiply_uint_mod,
    multiply_uint_mod_operand, negate_uint_mod, sub_uint_mod,
};

use super::ntt::{
    NttTables, inverse_ntt_negacyclic_harvey, inverse_ntt_negacyclic_harvey_lazy,
    ntt_negacyclic_harvey, ntt_negacyclic_harvey_lazy,
};

pub fn add_poly_inplace(dest: &mut [u64], operand: &[u64], moduli: &[Modulus], n: usize) {
    debug_assert_eq!(dest.len(), operand.len());
    dest.par_chunks_exact_mut(n)
        .zip(operand.par_chunks_exact(n))
        .zip(moduli.par_iter())
        .for_each(|((d, o), m)| {
            for (x, &y) in d.iter_mut().zip(o) {
                *x = add_uint_mod(*x, y, m);
            }
        });
}

pub fn sub_poly_inplace(dest: &mut [u64], operand: &[u64], moduli: &[Modulus], n: usize) {
    debug_assert_eq!(dest.len(), operand.len());
    dest.par_chunks_exact_mut(n)
        .zip(operand.par_chunks_exact(n))
        .zip(moduli.par_iter())
        .for_each(|((d, o), m)| {
            for (x, &y) in d.iter_mut().zip(o) {
                *x = sub_uint_mod(*x, y, m);
            }
        });
}

pub fn negate_poly_inplace(dest: &mut [u64], moduli: &[Modulus], n: usize) {
    dest.par_chunks_exact_mut(n)
        .zip(moduli.par_iter())
        .for_each(|(d, m)| {
            for x in d.iter_mut() {
                *x = negate_uint_mod(*x, m);
            }
        });
}

/// Coefficient-wise product, the ring product when both sides are in NTT
/// form.
pub fn dyadic_product_inplace(dest: &mut [u64], operand: &[u64], moduli: &[Modulus], n: usize) {
    debug_assert_eq!(dest.len(), operand.len());
    dest.par_chunks_exact_mut(n)
        .zip(operand.par_chunks_exact(n))
        .zip(moduli.par_iter())
        .for_each(|((d, o), m)| {
            for (x, &y) in d.iter_mut().zip(o) {
                *x = multiply_uint_mod(*x, y, m);
            }
        });
}

/// `dest += a * b` coefficient-wise.
pub fn dyadic_product_accumulate(
    dest: &mut [u64],
    a: &[u64],
    b: &[u64],
    moduli: &[Modulus],
    n: usize,
) {
    dest.par_chunks_exact_mut(n)
        .zip(a.par_chunks_exact(n))
        .zip(b.par_chunks_exact(n))
        .zip(moduli.par_iter())
        .for_each(|(((d, x), y), m)| {
            for ((acc, &u), &v) in d.iter_mut().zip(x).zip(y) {
                *acc = add_uint_mod(*acc, multiply_uint_mod(u, v, m), m);
            }
        });
}

/// Multiplies row `i` by `scalars[i]`, which must be reduced modulo the
/// row's modulus.
pub fn multiply_scalars_inplace(dest: &mut [u64], scalars: &[u64], moduli: &[Modulus], n: usize) {
    dest.par_chunks_exact_mut(n)
        .zip(scalars.par_iter())
        .zip(moduli.par_iter())
        .for_each(|((d, &s), m)| {
            let operand = MultiplyModOperand::new(s, m);
            for x in d.iter_mut() {
                *x = multiply_uint_mod_operand(*x, &operand, m);
            }
        });
}

/// Multiplies every row by the same word, reduced per modulus.
pub fn multiply_scalar_inplace(dest: &mut [u64], scalar: u64, moduli: &[Modulus], n: usize) {
    let scalars: Vec<u64> = moduli.iter().map(|m| barrett_reduce_64(scalar, m)).collect();
    multiply_scalars_inplace(dest, &scalars, moduli, n);
}

/// Multiplies by the monomial `X^shift`, `shift < 2n`, using `X^n = -1`.
pub fn negacyclic_shift(source: &[u64], shift: usize, dest: &mut [u64], moduli: &[Modulus], n: usize) {
    debug_assert!(shift < 2 * n);
    dest.par_chunks_exact_mut(n)
        .zip(source.par_chunks_exact(n))
        .zip(moduli.par_iter())
        .for_each(|((d, s), m)| {
            for (i, &c) in s.iter().enumerate() {
                let index = (i + shift) % (2 * n);
                if index < n {
                    d[index] = c;
                } else {
                    d[index - n] = negate_uint_mod(c, m);
                }
            }
        });
}

/// Reduces each row modulo its modulus; used after lazy transforms.
pub fn reduce_poly_inplace(dest: &mut [u64], moduli: &[Modulus], n: usize) {
    dest.par_chunks_exact_mut(n)
        .zip(moduli.par_iter())
        .for_each(|(d, m)| {
            for x in d.iter_mut() {
                *x = barrett_reduce_64(*x, m);
            }
        });
}

pub fn ntt_poly_inplace(dest: &mut [u64], tables: &[NttTables]) {
    let n = tables[0].coeff_count();
    dest.par_chunks_exact_mut(n)
        .zip(tables.par_iter())
        .for_each(|(d, t)| ntt_negacyclic_harvey(d, t));
}

pub fn ntt_poly_lazy_inplace(dest: &mut [u64], tables: &[NttTables]) {
    let n = tables[0].coeff_count();
    dest.par_chunks_exact_mut(n)
        .zip(tables.par_iter())
        .for_each(|(d, t)| ntt_negacyclic_harvey_lazy(d, t));
}

pub fn inverse_ntt_poly_inplace(dest: &mut [u64], tables: &[NttTables]) {
    let n = tables[0].coeff_count();
    dest.par_chunks_exact_mut(n)
        .zip(tables.par_iter())
        .for_each(|(d, t)| inverse_ntt_negacyclic_harvey(d, t));
}

pub fn inverse_ntt_poly_lazy_inplace(dest: &mut [u64], tables: &[NttTables]) {
    let n = tables[0].coeff_count();
    dest.par_chunks_exact_mut(n)
        .zip(tables.par_iter())
        .for_each(|(d, t)| inverse_ntt_negacyclic_harvey_lazy(d, t));
}

/// Largest absolute value of the centered representative in a single row.
pub fn poly_infty_norm_row(row: &[u64], modulus: &Modulus) -> u64 {
    let half = modulus.value() >> 1;
    row.iter()
        .map(|&c| if c > half { modulus.value() - c } else { c })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::get_primes;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    fn setup(n: usize, count: usize) -> (Vec<Modulus>, Vec<NttTables>) {
        let moduli = get_primes(2 * n as u64, 45, count).unwrap();
        let tables = NttTables::create_many(n.trailing_zeros(), &moduli).unwrap();
        (moduli, tables)
    }

    fn random_poly(rng: &mut ChaCha20Rng, moduli: &[Modulus], n: usize) -> Vec<u64> {
        moduli
            .iter()
            .flat_map(|m| (0..n).map(|_| rng.random_range(0..m.value())).collect::<Vec<_>>())
            .collect()
    }

    #[test]
    fn add_then_sub_is_identity() {
        let n = 32;
        let (moduli, _) = setup(n, 3);
        let mut rng = ChaCha20Rng::seed_from_u64(11);
        let a = random_poly(&mut rng, &moduli, n);
        let b = random_poly(&mut rng, &moduli, n);
        let mut c = a.clone();
        add_poly_inplace(&mut c, &b, &moduli, n);
        sub_poly_inplace(&mut c, &b, &moduli, n);
        assert_eq!(c, a);
    }

    #[test]
    fn negation_sums_to_zero() {
        let n = 16;
        let (moduli, _) = setup(n, 2);
        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let a = random_poly(&mut rng, &moduli, n);
        let mut neg = a.clone();
        negate_poly_inplace(&mut neg, &moduli, n);
        add_poly_inplace(&mut neg, &a, &moduli, n);
        assert!(neg.iter().all(|&x| x == 0));
    }

    #[test]
    fn monomial_shift_matches_ntt_product() {
        let n = 16;
        let (moduli, tables) = setup(n, 2);
        let mut rng = ChaCha20Rng::seed_from_u64(8);
        let a = random_poly(&mut rng, &moduli, n);

        let mut shifted = vec![0u64; a.len()];
        negacyclic_shift(&a, 5, &mut shifted, &moduli, n);

        let mut monomial = vec![0u64; a.len()];
        monomial[5] = 1;
        monomial[n + 5] = 1;
        let mut lhs = a.clone();
        ntt_poly_inplace(&mut lhs, &tables);
        ntt_poly_inplace(&mut monomial, &tables);
        dyadic_product_inplace(&mut lhs, &monomial, &moduli, n);
        inverse_ntt_poly_inplace(&mut lhs, &tables);
        assert_eq!(lhs, shifted);
    }

    #[test]
    fn shifting_by_n_negates() {
        let n = 8;
        let moduli = Modulus::from_values(&[17]).unwrap();
        let a: Vec<u64> = (0..8).collect();
        let mut out = vec![0u64; 8];
        negacyclic_shift(&a, n, &mut out, &moduli, n);
        let expected: Vec<u64> = a.iter().map(|&c| negate_uint_mod(c, &moduli[0])).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn infinity_norm_uses_centered_representatives() {
        let m = Modulus::new(97).unwrap();
        assert_eq!(poly_infty_norm_row(&[0, 1, 96, 50], &m), 47);
        assert_eq!(poly_infty_norm_row(&[], &m), 0);
    }
}
