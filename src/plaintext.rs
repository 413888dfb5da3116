use std::ops::{Index, IndexMut};

use crate::context::ParmsId;

/// A plaintext polynomial.
///
/// In coefficient form (BFV) the buffer holds `N` values modulo the plain
/// modulus and the parms id is [`ParmsId::ZERO`]. In NTT form (CKKS, or BFV
/// after `transform_to_ntt`) it holds `N * k` residues laid out row by row
/// for the `k` primes of the level named by the parms id.
#[derive(Debug, Clone, PartialEq)]
pub struct Plaintext {
    data: Vec<u64>,
    coeff_count: usize,
    parms_id: ParmsId,
    scale: f64,
}

impl Plaintext {
    /// A zero coefficient-form plaintext with `coeff_count` coefficients.
    pub fn new(coeff_count: usize) -> Self {
        Self {
            data: vec![0; coeff_count],
            coeff_count,
            parms_id: ParmsId::ZERO,
            scale: 1.0,
        }
    }

    /// A coefficient-form plaintext from explicit coefficients.
    pub fn from_coeffs(coeffs: Vec<u64>) -> Self {
        Self {
            coeff_count: coeffs.len(),
            data: coeffs,
            parms_id: ParmsId::ZERO,
            scale: 1.0,
        }
    }

    /// A zero NTT-form plaintext at the given level.
    pub fn new_ntt(parms_id: ParmsId, coeff_count: usize, coeff_modulus_size: usize) -> Self {
        Self {
            data: vec![0; coeff_count * coeff_modulus_size],
            coeff_count,
            parms_id,
            scale: 1.0,
        }
    }

    #[inline]
    pub fn is_ntt_form(&self) -> bool {
        self.parms_id != ParmsId::ZERO
    }

    #[inline]
    pub fn coeff_count(&self) -> usize {
        self.coeff_count
    }

    pub fn parms_id(&self) -> ParmsId {
        self.parms_id
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f64) {
        self.scale = scale;
    }

    pub fn data(&self) -> &[u64] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u64] {
        &mut self.data
    }

    /// Row `index` of an NTT-form plaintext.
    pub fn row(&self, index: usize) -> &[u64] {
        &self.data[index * self.coeff_count..(index + 1) * self.coeff_count]
    }

    pub fn is_zero(&self) -> bool {
        self.data.iter().all(|&c| c == 0)
    }

    /// Number of coefficients up to and including the last non-zero one.
    pub fn significant_coeff_count(&self) -> usize {
        self.data
            .iter()
            .rposition(|&c| c != 0)
            .map_or(0, |pos| pos + 1)
    }
}

impl Index<usize> for Plaintext {
    type Output = u64;

    fn index(&self, index: usize) -> &u64 {
        &self.data[index]
    }
}

impl IndexMut<usize> for Plaintext {
    fn index_mut(&mut self, index: usize) -> &mut u64 {
        &mut self.data[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coefficient_form_basics() {
        let mut plain = Plaintext::new(8);
        assert!(!plain.is_ntt_form());
        assert!(plain.is_zero());
        plain[3] = 5;
        assert_eq!(plain.significant_coeff_count(), 4);
        assert_eq!(plain.data()[3], 5);
    }

    #[test]
    fn ntt_form_rows() {
        let mut data = Plaintext::new_ntt(ParmsId::default(), 4, 2);
        assert!(!data.is_ntt_form(), "zero id means coefficient form");
        data.data_mut()[5] = 9;
        assert_eq!(data.row(1), &[0, 9, 0, 0]);
        assert_eq!(Plaintext::from_coeffs(vec![1, 2, 0]).significant_coeff_count(), 2);
    }
}
