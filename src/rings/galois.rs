//! Galois automorphisms `X -> X^g` of `Z_q[X] / (X^N + 1)`, `g` odd.
//!
//! Slot rotations by `k` steps use `g = 3^k mod 2N`; `g = 2N - 1` is complex
//! conjugation for CKKS and the row swap for BFV batching.

use std::sync::OnceLock;

use crate::math::{Modulus, negate_uint_mod};

use super::{RingError, RingResult, ntt::reverse_bits};

/// Generator of the rotation subgroup of `(Z / 2N)^*`.
pub const GALOIS_GENERATOR: u32 = 3;

#[derive(Debug)]
pub struct GaloisTool {
    coeff_count_power: u32,
    coeff_count: usize,
    /// Lazily built NTT-domain permutations, indexed by `(g - 1) / 2`.
    permutation_tables: Vec<OnceLock<Vec<u32>>>,
}

impl GaloisTool {
    pub fn new(coeff_count_power: u32) -> RingResult<Self> {
        if !(1..=17).contains(&coeff_count_power) {
            return Err(RingError::InvalidDegree(1usize << coeff_count_power.min(63)));
        }
        let coeff_count = 1usize << coeff_count_power;
        Ok(Self {
            coeff_count_power,
            coeff_count,
            permutation_tables: (0..coeff_count).map(|_| OnceLock::new()).collect(),
        })
    }

    pub fn coeff_count(&self) -> usize {
        self.coeff_count
    }

    fn validate_elt(&self, galois_elt: u32) -> RingResult<()> {
        let m = 2 * self.coeff_count as u32;
        if galois_elt & 1 == 0 || galois_elt >= m {
            return Err(RingError::InvalidGaloisElement(galois_elt));
        }
        Ok(())
    }

    /// Galois element for a rotation by `step` slots; positive steps rotate
    /// left, zero means conjugation.
    pub fn get_elt_from_step(&self, step: i32) -> RingResult<u32> {
        let n = self.coeff_count as u32;
        let m = 2 * n;
        if step == 0 {
            return Ok(m - 1);
        }
        let pos_step = step.unsigned_abs();
        if pos_step >= n >> 1 {
            return Err(RingError::InvalidStep {
                step,
                slots: self.coeff_count >> 1,
            });
        }
        let exponent = if step < 0 { (n >> 1) - pos_step } else { pos_step };
        let mut galois_elt = 1u64;
        for _ in 0..exponent {
            galois_elt = (galois_elt * GALOIS_GENERATOR as u64) & (m as u64 - 1);
        }
        Ok(galois_elt as u32)
    }

    pub fn get_elts_from_steps(&self, steps: &[i32]) -> RingResult<Vec<u32>> {
        steps.iter().map(|&s| self.get_elt_from_step(s)).collect()
    }

    /// Conjugation plus rotations by every power of two in both directions,
    /// enough to reach any rotation through repeated application.
    pub fn get_elts_all(&self) -> Vec<u32> {
        let m = 2 * self.coeff_count as u32;
        let mut elts = vec![m - 1];
        for i in 0..self.coeff_count_power.saturating_sub(1) {
            let step = 1i32 << i;
            for s in [step, -step] {
                if let Ok(elt) = self.get_elt_from_step(s) {
                    elts.push(elt);
                }
            }
        }
        elts
    }

    #[inline]
    pub fn get_index_from_elt(galois_elt: u32) -> usize {
        ((galois_elt - 1) >> 1) as usize
    }

    /// Applies `X -> X^g` to one coefficient-form row.
    pub fn apply_galois(
        &self,
        operand: &[u64],
        galois_elt: u32,
        modulus: &Modulus,
        result: &mut [u64],
    ) -> RingResult<()> {
        self.validate_elt(galois_elt)?;
        let n = self.coeff_count;
        debug_assert_eq!(operand.len(), n);
        debug_assert_eq!(result.len(), n);
        let mask = n - 1;
        for (i, &c) in operand.iter().enumerate() {
            let index_raw = i * galois_elt as usize;
            let index = index_raw & mask;
            result[index] = if (index_raw >> self.coeff_count_power) & 1 == 1 {
                negate_uint_mod(c, modulus)
            } else {
                c
            };
        }
        Ok(())
    }

    /// Applies the automorphism to every row of a `k * n` coefficient-form
    /// polynomial.
    pub fn apply_galois_poly(
        &self,
        operand: &[u64],
        galois_elt: u32,
        moduli: &[Modulus],
        result: &mut [u64],
    ) -> RingResult<()> {
        let n = self.coeff_count;
        for ((src, dst), m) in operand.chunks_exact(n).zip(result.chunks_exact_mut(n)).zip(moduli) {
            self.apply_galois(src, galois_elt, m, dst)?;
        }
        Ok(())
    }

    fn permutation_table(&self, galois_elt: u32) -> &[u32] {
        let index = Self::get_index_from_elt(galois_elt);
        self.permutation_tables[index].get_or_init(|| {
            let n = self.coeff_count;
            let logn = self.coeff_count_power;
            let mask = 2 * n - 1;
            (0..n)
                .map(|i| {
                    let reversed = reverse_bits(i + n, logn + 1);
                    let index_raw = (galois_elt as usize * reversed) & mask;
                    reverse_bits((index_raw - 1) >> 1, logn) as u32
                })
                .collect()
        })
    }

    /// Applies the automorphism to one NTT-form row; a pure permutation.
    pub fn apply_galois_ntt(&self, operand: &[u64], galois_elt: u32, result: &mut [u64]) -> RingResult<()> {
        self.validate_elt(galois_elt)?;
        let table = self.permutation_table(galois_elt);
        for (r, &index) in result.iter_mut().zip(table) {
            *r = operand[index as usize];
        }
        Ok(())
    }

    pub fn apply_galois_ntt_poly(&self, operand: &[u64], galois_elt: u32, result: &mut [u64]) -> RingResult<()> {
        let n = self.coeff_count;
        for (src, dst) in operand.chunks_exact(n).zip(result.chunks_exact_mut(n)) {
            self.apply_galois_ntt(src, galois_elt, dst)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::get_primes;
    use crate::rings::ntt::{NttTables, ntt_negacyclic_harvey};
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn elements_from_steps() {
        let tool = GaloisTool::new(4).unwrap();
        assert_eq!(tool.get_elt_from_step(0).unwrap(), 31);
        assert_eq!(tool.get_elt_from_step(1).unwrap(), 3);
        assert_eq!(tool.get_elt_from_step(2).unwrap(), 9);
        // 3^7 = 2187 = 68 * 32 + 11
        assert_eq!(tool.get_elt_from_step(-1).unwrap(), 11);
        assert_eq!((3 * 11) % 32, 1);
        assert!(matches!(
            tool.get_elt_from_step(8),
            Err(RingError::InvalidStep { step: 8, slots: 8 })
        ));
        assert!(tool.get_elt_from_step(-8).is_err());
    }

    #[test]
    fn all_elements_cover_power_of_two_steps() {
        let tool = GaloisTool::new(4).unwrap();
        let elts = tool.get_elts_all();
        assert_eq!(elts[0], 31);
        assert_eq!(elts.len(), 1 + 2 * 3);
        assert!(elts.iter().all(|e| e & 1 == 1));
    }

    #[test]
    fn rejects_even_elements() {
        let tool = GaloisTool::new(3).unwrap();
        let m = Modulus::new(17).unwrap();
        let mut out = vec![0u64; 8];
        assert_eq!(
            tool.apply_galois(&[0; 8], 4, &m, &mut out),
            Err(RingError::InvalidGaloisElement(4))
        );
        assert!(tool.apply_galois_ntt(&[0; 8], 17, &mut out).is_err());
    }

    #[test]
    fn coefficient_form_automorphism() {
        // X -> X^3 on 1 + X + X^3 over degree 4: 1 + X^3 + X^9 = 1 + X + X^3 (X^8 = 1).
        let tool = GaloisTool::new(2).unwrap();
        let m = Modulus::new(17).unwrap();
        let mut out = vec![0u64; 4];
        tool.apply_galois(&[1, 1, 0, 1], 3, &m, &mut out).unwrap();
        // X^9 = X^8 * X = X since X^4 = -1, X^8 = 1.
        assert_eq!(out, vec![1, 1, 0, 1]);
        tool.apply_galois(&[0, 0, 1, 0], 3, &m, &mut out).unwrap();
        // X^6 = -X^2
        assert_eq!(out, vec![0, 0, 16, 0]);
    }

    #[test]
    fn ntt_permutation_commutes_with_transform() {
        let logn = 5;
        let n = 1usize << logn;
        let tool = GaloisTool::new(logn).unwrap();
        let m = get_primes(2 * n as u64, 40, 1).unwrap()[0];
        let tables = NttTables::new(logn, m).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(2);
        let poly: Vec<u64> = (0..n).map(|_| rng.random_range(0..m.value())).collect();

        for elt in tool.get_elts_all() {
            let mut expected = vec![0u64; n];
            tool.apply_galois(&poly, elt, &m, &mut expected).unwrap();
            ntt_negacyclic_harvey(&mut expected, &tables);

            let mut transformed = poly.clone();
            ntt_negacyclic_harvey(&mut transformed, &tables);
            let mut got = vec![0u64; n];
            tool.apply_galois_ntt(&transformed, elt, &mut got).unwrap();
            assert_eq!(got, expected, "element {elt}");
        }
    }
}
