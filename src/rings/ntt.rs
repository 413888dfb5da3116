//! Negacyclic number-theoretic transform over `Z_p[X] / (X^N + 1)`.
//!
//! Forward output is in bit-reversed order: slot `i` holds the evaluation at
//! `psi^(2 * bitrev(i) + 1)` where `psi` is the minimal primitive `2N`-th root
//! of unity. Butterflies follow Harvey's lazy scheme; the `_lazy` entry points
//! leave results in `[0, 4p)` (forward) or `[0, 2p)` (inverse) and callers
//! must reduce before handing values to anything expecting `[0, p)`.

use crate::math::{
    Modulus, MultiplyModOperand, exponentiate_uint_mod, multiply_uint_mod,
    multiply_uint_mod_lazy, try_invert_uint_mod,
};

use super::{RingError, RingResult};

#[inline]
pub(crate) fn reverse_bits(value: usize, bit_count: u32) -> usize {
    if bit_count == 0 {
        0
    } else {
        value.reverse_bits() >> (usize::BITS - bit_count)
    }
}

/// Checks whether `root` is a primitive `degree`-th root of unity, `degree` a
/// power of two.
fn is_primitive_root(root: u64, degree: u64, modulus: &Modulus) -> bool {
    if root == 0 {
        return false;
    }
    exponentiate_uint_mod(root, degree >> 1, modulus) == modulus.value() - 1
}

/// Any primitive `degree`-th root of unity, found by raising candidates to
/// the cofactor `(p - 1) / degree`.
fn try_primitive_root(degree: u64, modulus: &Modulus) -> Option<u64> {
    let size_entire_group = modulus.value() - 1;
    if size_entire_group % degree != 0 {
        return None;
    }
    let cofactor = size_entire_group / degree;
    for candidate in 2..modulus.value().min(1 << 20) {
        let root = exponentiate_uint_mod(candidate, cofactor, modulus);
        if is_primitive_root(root, degree, modulus) {
            return Some(root);
        }
    }
    None
}

/// The smallest primitive `degree`-th root of unity.
///
/// Every primitive root is an odd power of any one of them, so walking
/// `root^1, root^3, ...` visits them all.
pub fn try_minimal_primitive_root(degree: u64, modulus: &Modulus) -> Option<u64> {
    let root = try_primitive_root(degree, modulus)?;
    let generator_sq = multiply_uint_mod(root, root, modulus);
    let mut current = root;
    let mut minimal = root;
    for _ in 0..(degree >> 1) {
        minimal = minimal.min(current);
        current = multiply_uint_mod(current, generator_sq, modulus);
    }
    Some(minimal)
}

/// Precomputed twiddle tables for one prime and one ring degree.
///
/// `root_powers[i] = psi^bitrev(i)`, consumed in index order by the forward
/// transform. `inv_root_powers` is the scrambled inverse table
/// `inv_root_powers[i] = psi^-(bitrev(i - 1) + 1)`, shifted by one so that
/// the inverse transform also walks it in index order.
#[derive(Debug, Clone)]
pub struct NttTables {
    root: u64,
    coeff_count_power: u32,
    coeff_count: usize,
    modulus: Modulus,
    root_powers: Vec<MultiplyModOperand>,
    inv_root_powers: Vec<MultiplyModOperand>,
    inv_degree_modulo: MultiplyModOperand,
}

impl NttTables {
    pub fn new(coeff_count_power: u32, modulus: Modulus) -> RingResult<Self> {
        if !(1..=17).contains(&coeff_count_power) {
            return Err(RingError::InvalidDegree(1usize << coeff_count_power.min(63)));
        }
        let coeff_count = 1usize << coeff_count_power;
        let root = try_minimal_primitive_root(2 * coeff_count as u64, &modulus).ok_or(
            RingError::NotNttFriendly {
                modulus: modulus.value(),
                degree: coeff_count,
            },
        )?;
        let inverse_root = try_invert_uint_mod(root, &modulus)?;

        let mut root_powers = vec![MultiplyModOperand::default(); coeff_count];
        let mut inv_root_powers = vec![MultiplyModOperand::default(); coeff_count];
        root_powers[0] = MultiplyModOperand::new(1, &modulus);
        inv_root_powers[0] = MultiplyModOperand::new(1, &modulus);

        // psi^j for j in [0, N), indexed naturally, then scattered.
        let mut powers = vec![1u64; coeff_count];
        let mut inverse_powers = vec![1u64; coeff_count + 1];
        for j in 1..coeff_count {
            powers[j] = multiply_uint_mod(powers[j - 1], root, &modulus);
        }
        for j in 1..=coeff_count {
            inverse_powers[j] = multiply_uint_mod(inverse_powers[j - 1], inverse_root, &modulus);
        }
        for i in 1..coeff_count {
            let exponent = reverse_bits(i, coeff_count_power);
            root_powers[i] = MultiplyModOperand::new(powers[exponent], &modulus);
            let inv_exponent = reverse_bits(i - 1, coeff_count_power) + 1;
            inv_root_powers[i] = MultiplyModOperand::new(inverse_powers[inv_exponent], &modulus);
        }

        let inv_degree = try_invert_uint_mod(coeff_count as u64, &modulus)?;
        Ok(Self {
            root,
            coeff_count_power,
            coeff_count,
            modulus,
            root_powers,
            inv_root_powers,
            inv_degree_modulo: MultiplyModOperand::new(inv_degree, &modulus),
        })
    }

    /// One table per modulus, all for degree `2^coeff_count_power`.
    pub fn create_many(coeff_count_power: u32, moduli: &[Modulus]) -> RingResult<Vec<Self>> {
        moduli
            .iter()
            .map(|&m| Self::new(coeff_count_power, m))
            .collect()
    }

    #[inline]
    pub fn root(&self) -> u64 {
        self.root
    }

    #[inline]
    pub fn coeff_count(&self) -> usize {
        self.coeff_count
    }

    #[inline]
    pub fn coeff_count_power(&self) -> u32 {
        self.coeff_count_power
    }

    #[inline]
    pub fn modulus(&self) -> &Modulus {
        &self.modulus
    }

    pub fn root_powers(&self) -> &[MultiplyModOperand] {
        &self.root_powers
    }

    pub fn inv_root_powers(&self) -> &[MultiplyModOperand] {
        &self.inv_root_powers
    }
}

/// Forward transform with outputs in `[0, 4p)`. Inputs must be below `4p`.
pub fn ntt_negacyclic_harvey_lazy(operand: &mut [u64], tables: &NttTables) {
    let n = tables.coeff_count;
    debug_assert_eq!(operand.len(), n);
    let p = tables.modulus.value();
    let two_p = p << 1;
    let modulus = &tables.modulus;
    let roots = &tables.root_powers;

    let mut root_index = 0;
    let mut gap = n >> 1;
    let mut m = 1;
    while m < n {
        let mut offset = 0;
        for _ in 0..m {
            root_index += 1;
            let w = &roots[root_index];
            let (xs, ys) = operand[offset..offset + 2 * gap].split_at_mut(gap);
            for (x, y) in xs.iter_mut().zip(ys.iter_mut()) {
                let mut u = *x;
                if u >= two_p {
                    u -= two_p;
                }
                let v = multiply_uint_mod_lazy(*y, w, modulus);
                *x = u + v;
                *y = u + two_p - v;
            }
            offset += gap << 1;
        }
        m <<= 1;
        gap >>= 1;
    }
}

/// Forward transform with fully reduced output.
pub fn ntt_negacyclic_harvey(operand: &mut [u64], tables: &NttTables) {
    ntt_negacyclic_harvey_lazy(operand, tables);
    let p = tables.modulus.value();
    let two_p = p << 1;
    for x in operand.iter_mut() {
        if *x >= two_p {
            *x -= two_p;
        }
        if *x >= p {
            *x -= p;
        }
    }
}

/// Inverse transform (including the `1/N` factor) with outputs in `[0, 2p)`.
/// Inputs must be below `2p`.
pub fn inverse_ntt_negacyclic_harvey_lazy(operand: &mut [u64], tables: &NttTables) {
    let n = tables.coeff_count;
    debug_assert_eq!(operand.len(), n);
    let p = tables.modulus.value();
    let two_p = p << 1;
    let modulus = &tables.modulus;
    let roots = &tables.inv_root_powers;

    let mut root_index = 0;
    let mut gap = 1;
    let mut m = n >> 1;
    while m >= 1 {
        let mut offset = 0;
        for _ in 0..m {
            root_index += 1;
            let w = &roots[root_index];
            let (xs, ys) = operand[offset..offset + 2 * gap].split_at_mut(gap);
            for (x, y) in xs.iter_mut().zip(ys.iter_mut()) {
                let u = *x;
                let v = *y;
                let mut t = u + v;
                if t >= two_p {
                    t -= two_p;
                }
                *x = t;
                *y = multiply_uint_mod_lazy(u + two_p - v, w, modulus);
            }
            offset += gap << 1;
        }
        m >>= 1;
        gap <<= 1;
    }

    for x in operand.iter_mut() {
        *x = multiply_uint_mod_lazy(*x, &tables.inv_degree_modulo, modulus);
    }
}

/// Inverse transform with fully reduced output.
pub fn inverse_ntt_negacyclic_harvey(operand: &mut [u64], tables: &NttTables) {
    inverse_ntt_negacyclic_harvey_lazy(operand, tables);
    let p = tables.modulus.value();
    for x in operand.iter_mut() {
        if *x >= p {
            *x -= p;
        }
    }
}
