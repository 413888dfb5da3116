//! CKKS canonical-embedding encoder.
//!
//! Encoding places the slot values and their conjugates at the positions of
//! [`super::matrix_reps_index_map`], runs the inverse DWT scaled by
//! `scale / N`, rounds to integers and reduces into every prime of the
//! level before a forward NTT. Decoding reverses the path, reading each
//! coefficient as the representative of `[-q/2, q/2)`.

use std::f64::consts::PI;
use std::sync::Arc;

use num_complex::Complex64;
use tracing::{debug, instrument};

use crate::context::{Context, ContextData, ParmsId, SchemeType};
use crate::crypto::{HeError, HeResult};
use crate::math::{barrett_reduce_128, barrett_reduce_64, negate_uint_mod, uint::is_greater_than_or_equal_uint};
use crate::plaintext::Plaintext;
use crate::rings::{
    ntt::reverse_bits,
    polyarith::{inverse_ntt_poly_inplace, ntt_poly_inplace},
};

const TWO_POW_64: f64 = 18_446_744_073_709_551_616.0;

pub struct CkksEncoder {
    context: Arc<Context>,
    slots: usize,
    matrix_reps_index_map: Vec<usize>,
    /// `root_powers[i] = zeta^bitrev(i)` with `zeta = exp(2 pi i / 2N)`.
    root_powers: Vec<Complex64>,
    /// `inv_root_powers[i] = conj(zeta^(bitrev(i - 1) + 1))`, the scrambled
    /// table walked in order by the inverse transform.
    inv_root_powers: Vec<Complex64>,
}

impl CkksEncoder {
    pub fn new(context: Arc<Context>) -> HeResult<Self> {
        if context.scheme() != SchemeType::Ckks {
            return Err(HeError::UnsupportedScheme(context.scheme()));
        }
        let key_data = context.key_context_data();
        let n = key_data.coeff_count();
        let coeff_count_power = key_data.coeff_count_power();
        let m = 2 * n;

        let root = |index: usize| Complex64::from_polar(1.0, 2.0 * PI * index as f64 / m as f64);
        let mut root_powers = vec![Complex64::new(1.0, 0.0); n];
        let mut inv_root_powers = vec![Complex64::new(1.0, 0.0); n];
        for i in 1..n {
            root_powers[i] = root(reverse_bits(i, coeff_count_power));
            inv_root_powers[i] = root(reverse_bits(i - 1, coeff_count_power) + 1).conj();
        }

        Ok(Self {
            context,
            slots: n >> 1,
            matrix_reps_index_map: super::matrix_reps_index_map(coeff_count_power),
            root_powers,
            inv_root_powers,
        })
    }

    /// Number of complex slots, `N / 2`.
    pub fn slot_count(&self) -> usize {
        self.slots
    }

    fn context_data(&self, parms_id: &ParmsId) -> HeResult<&Arc<ContextData>> {
        self.context
            .get_context_data(parms_id)
            .ok_or(HeError::InvalidParmsId(*parms_id))
    }

    #[instrument(skip_all, fields(values = values.len(), scale = scale))]
    pub fn encode_complex(&self, values: &[Complex64], parms_id: ParmsId, scale: f64) -> HeResult<Plaintext> {
        let context_data = self.context_data(&parms_id)?;
        if values.len() > self.slots {
            return Err(HeError::TooManyValues {
                given: values.len(),
                max: self.slots,
            });
        }
        check_scale(scale, context_data)?;

        let n = context_data.coeff_count();
        let mut conj_values = vec![Complex64::new(0.0, 0.0); n];
        for (i, v) in values.iter().enumerate() {
            conj_values[self.matrix_reps_index_map[i]] = *v;
            conj_values[self.matrix_reps_index_map[i + self.slots]] = v.conj();
        }
        transform_from_rev(&mut conj_values, &self.inv_root_powers, scale / n as f64);

        let coeffs: Vec<f64> = conj_values.iter().map(|c| c.re).collect();
        let max_coeff = coeffs.iter().fold(0.0f64, |acc, c| acc.max(c.abs()));
        if !max_coeff.is_finite() {
            return Err(HeError::ValueOutOfRange("encoded values must be finite"));
        }
        check_coeff_bits(max_coeff, context_data)?;

        let k = context_data.coeff_modulus_size();
        let mut plain = Plaintext::new_ntt(parms_id, n, k);
        let data = plain.data_mut();
        let mut residues = vec![0u64; k];
        for (i, &c) in coeffs.iter().enumerate() {
            rounded_residues(c, context_data, &mut residues);
            for (j, &r) in residues.iter().enumerate() {
                data[j * n + i] = r;
            }
        }
        ntt_poly_inplace(data, context_data.small_ntt_tables());
        plain.set_scale(scale);
        debug!(max_coeff, "encoded slot vector");
        Ok(plain)
    }

    pub fn encode_f64(&self, values: &[f64], parms_id: ParmsId, scale: f64) -> HeResult<Plaintext> {
        let complex: Vec<Complex64> = values.iter().map(|&v| Complex64::new(v, 0.0)).collect();
        self.encode_complex(&complex, parms_id, scale)
    }

    /// Encodes `value` into every slot. The plaintext is the constant
    /// polynomial `round(value * scale)`, which is constant in NTT form too.
    pub fn encode_scalar(&self, value: f64, parms_id: ParmsId, scale: f64) -> HeResult<Plaintext> {
        let context_data = self.context_data(&parms_id)?;
        check_scale(scale, context_data)?;
        let coeffd = (value * scale).round();
        if !coeffd.is_finite() {
            return Err(HeError::ValueOutOfRange("encoded values must be finite"));
        }
        check_coeff_bits(coeffd.abs(), context_data)?;
        let mut residues = vec![0u64; context_data.coeff_modulus_size()];
        rounded_residues(coeffd, context_data, &mut residues);
        let mut plain = constant_plaintext(&residues, context_data);
        plain.set_scale(scale);
        Ok(plain)
    }

    /// Encodes an integer into every slot with scale 1. The value is reduced
    /// exactly, without passing through a float.
    pub fn encode_integer(&self, value: i64, parms_id: ParmsId) -> HeResult<Plaintext> {
        let context_data = self.context_data(&parms_id)?;
        let magnitude = value.unsigned_abs();
        let bits = (u64::BITS - magnitude.leading_zeros()) as usize;
        if bits + 2 >= context_data.total_coeff_modulus_bit_count() {
            return Err(HeError::EncodedValuesTooLarge);
        }
        let residues: Vec<u64> = context_data
            .coeff_modulus()
            .iter()
            .map(|m| {
                let r = barrett_reduce_64(magnitude, m);
                if value < 0 { negate_uint_mod(r, m) } else { r }
            })
            .collect();
        Ok(constant_plaintext(&residues, context_data))
    }

    #[instrument(skip_all, fields(scale = plain.scale()))]
    pub fn decode_complex(&self, plain: &Plaintext) -> HeResult<Vec<Complex64>> {
        if !plain.is_ntt_form() {
            return Err(HeError::NttFormMismatch { expected: true });
        }
        let context_data = self.context_data(&plain.parms_id())?;
        let n = context_data.coeff_count();
        let k = context_data.coeff_modulus_size();
        let scale = plain.scale();
        if scale <= 0.0 || !scale.is_finite() || scale.log2() >= context_data.total_coeff_modulus_bit_count() as f64 {
            return Err(HeError::ScaleOutOfBounds { scale });
        }
        let inv_scale = 1.0 / scale;

        let mut copy = plain.data().to_vec();
        inverse_ntt_poly_inplace(&mut copy, context_data.small_ntt_tables());
        context_data.rns_base().compose_array(&mut copy, n);

        let modulus = context_data.total_coeff_modulus();
        let threshold = context_data.upper_half_threshold();
        let mut res = vec![Complex64::new(0.0, 0.0); n];
        for (i, value) in copy.chunks_exact(k).enumerate() {
            let mut acc = 0.0;
            let mut scaled_two_pow_64 = inv_scale;
            if is_greater_than_or_equal_uint(value, threshold) {
                for (&x, &q) in value.iter().zip(modulus) {
                    if x > q {
                        acc += (x - q) as f64 * scaled_two_pow_64;
                    } else {
                        acc -= (q - x) as f64 * scaled_two_pow_64;
                    }
                    scaled_two_pow_64 *= TWO_POW_64;
                }
            } else {
                for &x in value {
                    acc += x as f64 * scaled_two_pow_64;
                    scaled_two_pow_64 *= TWO_POW_64;
                }
            }
            res[i].re = acc;
        }

        transform_to_rev(&mut res, &self.root_powers);
        Ok((0..self.slots)
            .map(|i| res[self.matrix_reps_index_map[i]])
            .collect())
    }

    pub fn decode_f64(&self, plain: &Plaintext) -> HeResult<Vec<f64>> {
        Ok(self.decode_complex(plain)?.into_iter().map(|c| c.re).collect())
    }
}

/// The constant polynomial with the given residues, which is its own NTT.
fn constant_plaintext(residues: &[u64], context_data: &ContextData) -> Plaintext {
    let n = context_data.coeff_count();
    let mut plain = Plaintext::new_ntt(context_data.parms_id(), n, residues.len());
    for (row, &r) in plain.data_mut().chunks_exact_mut(n).zip(residues) {
        row.fill(r);
    }
    plain
}

fn check_scale(scale: f64, context_data: &ContextData) -> HeResult<()> {
    if !scale.is_finite()
        || scale <= 0.0
        || scale.log2() + 1.0 >= context_data.total_coeff_modulus_bit_count() as f64
    {
        return Err(HeError::ScaleOutOfBounds { scale });
    }
    Ok(())
}

fn check_coeff_bits(max_coeff: f64, context_data: &ContextData) -> HeResult<()> {
    let bits = max_coeff.max(1.0).log2().ceil() as usize;
    if bits >= context_data.total_coeff_modulus_bit_count() {
        return Err(HeError::EncodedValuesTooLarge);
    }
    Ok(())
}

/// Rounds `value` and writes its residue modulo every prime of the level.
/// Magnitudes up to 128 bits take a Barrett path; larger ones are split into
/// words and decomposed through the CRT.
fn rounded_residues(value: f64, context_data: &ContextData, out: &mut [u64]) {
    let coeffd = value.round();
    let is_negative = coeffd.is_sign_negative();
    let magnitude = coeffd.abs();
    let moduli = context_data.coeff_modulus();

    if magnitude < TWO_POW_64 {
        let coeffu = magnitude as u64;
        for (r, m) in out.iter_mut().zip(moduli) {
            *r = barrett_reduce_64(coeffu, m);
        }
    } else if magnitude < TWO_POW_64 * TWO_POW_64 {
        let low = (magnitude % TWO_POW_64) as u64;
        let high = (magnitude / TWO_POW_64) as u64;
        let coeffu = ((high as u128) << 64) | low as u128;
        for (r, m) in out.iter_mut().zip(moduli) {
            *r = barrett_reduce_128(coeffu, m);
        }
    } else {
        let mut remaining = magnitude;
        for word in out.iter_mut() {
            *word = (remaining % TWO_POW_64) as u64;
            remaining = (remaining / TWO_POW_64).trunc();
        }
        context_data.rns_base().decompose(out);
    }

    if is_negative {
        for (r, m) in out.iter_mut().zip(moduli) {
            *r = negate_uint_mod(*r, m);
        }
    }
}

/// Forward DWT, output in bit-reversed order.
fn transform_to_rev(values: &mut [Complex64], roots: &[Complex64]) {
    let n = values.len();
    let mut root_index = 0;
    let mut gap = n >> 1;
    let mut m = 1;
    while m < n {
        let mut offset = 0;
        for _ in 0..m {
            root_index += 1;
            let w = roots[root_index];
            let (xs, ys) = values[offset..offset + 2 * gap].split_at_mut(gap);
            for (x, y) in xs.iter_mut().zip(ys.iter_mut()) {
                let u = *x;
                let v = *y * w;
                *x = u + v;
                *y = u - v;
            }
            offset += gap << 1;
        }
        m <<= 1;
        gap >>= 1;
    }
}

/// Inverse DWT from bit-reversed order, multiplied by `scalar`.
fn transform_from_rev(values: &mut [Complex64], roots: &[Complex64], scalar: f64) {
    let n = values.len();
    let mut root_index = 0;
    let mut gap = 1;
    let mut m = n >> 1;
    while m >= 1 {
        let mut offset = 0;
        for _ in 0..m {
            root_index += 1;
            let w = roots[root_index];
            let (xs, ys) = values[offset..offset + 2 * gap].split_at_mut(gap);
            for (x, y) in xs.iter_mut().zip(ys.iter_mut()) {
                let u = *x;
                let v = *y;
                *x = u + v;
                *y = (u - v) * w;
            }
            offset += gap << 1;
        }
        m >>= 1;
        gap <<= 1;
    }
    for v in values.iter_mut() {
        *v *= scalar;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CoeffModulus, EncryptionParameters};
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    fn context(n: usize, bit_sizes: &[u32]) -> Arc<Context> {
        let parms = EncryptionParameters::builder(SchemeType::Ckks)
            .poly_modulus_degree(n)
            .coeff_modulus(CoeffModulus::create(n, bit_sizes).unwrap())
            .build()
            .unwrap();
        Context::new(parms).unwrap()
    }

    fn random_slots(rng: &mut ChaCha20Rng, count: usize, bound: f64) -> Vec<Complex64> {
        (0..count)
            .map(|_| Complex64::new(rng.random_range(-bound..bound), rng.random_range(-bound..bound)))
            .collect()
    }

    /// Each of the `N` coefficients is rounded by at most 1/2 and every slot
    /// is a unit-weight sum of them, so a slot moves by at most `N / 2` before
    /// the division by `scale`.
    #[test]
    fn roundtrip_within_rounding_bound() {
        let n = 64;
        let context = context(n, &[40, 40, 40]);
        let encoder = CkksEncoder::new(context.clone()).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let values = random_slots(&mut rng, encoder.slot_count(), 10.0);
        let scale = 2f64.powi(30);
        let plain = encoder.encode_complex(&values, context.first_parms_id(), scale).unwrap();
        assert!(plain.is_ntt_form());
        assert_eq!(plain.scale(), scale);
        let decoded = encoder.decode_complex(&plain).unwrap();
        for (a, b) in decoded.iter().zip(&values) {
            assert!((a - b).norm() <= n as f64 / 2.0 / scale, "{a} vs {b}");
        }
    }

    #[test]
    fn short_input_pads_with_zeros() {
        let context = context(32, &[40, 40]);
        let encoder = CkksEncoder::new(context.clone()).unwrap();
        let plain = encoder
            .encode_f64(&[1.5, -2.25], context.first_parms_id(), 2f64.powi(25))
            .unwrap();
        let decoded = encoder.decode_f64(&plain).unwrap();
        assert_relative_eq!(decoded[0], 1.5, epsilon = 1e-5);
        assert_relative_eq!(decoded[1], -2.25, epsilon = 1e-5);
        for v in &decoded[2..] {
            assert!(v.abs() < 1e-5);
        }
    }

    #[test]
    fn scalar_fills_every_slot() {
        let context = context(32, &[40, 40]);
        let encoder = CkksEncoder::new(context.clone()).unwrap();
        let plain = encoder
            .encode_scalar(-3.75, context.first_parms_id(), 2f64.powi(20))
            .unwrap();
        for v in encoder.decode_f64(&plain).unwrap() {
            assert_relative_eq!(v, -3.75, epsilon = 1e-5);
        }
        let plain = encoder.encode_integer(7, context.first_parms_id()).unwrap();
        for v in encoder.decode_f64(&plain).unwrap() {
            assert_relative_eq!(v, 7.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn integer_is_reduced_exactly() {
        let context = context(32, &[30, 30, 30]);
        let encoder = CkksEncoder::new(context.clone()).unwrap();
        let key_data = context.key_context_data();
        for value in [(1i64 << 53) + 1, -(1i64 << 53) - 1, i64::MAX >> 8] {
            let plain = encoder.encode_integer(value, context.key_parms_id()).unwrap();
            for (row, m) in plain.data().chunks_exact(32).zip(key_data.coeff_modulus()) {
                let q = m.value() as i128;
                let expected = (value as i128).rem_euclid(q) as u64;
                assert!(row.iter().all(|&r| r == expected), "{value} mod {q}");
            }
        }
    }

    #[test]
    fn integer_outside_headroom_is_rejected() {
        let context = context(32, &[30, 30]);
        let encoder = CkksEncoder::new(context.clone()).unwrap();
        let first = context.first_parms_id();
        assert_eq!(
            encoder.encode_integer(1 << 40, first).unwrap_err(),
            HeError::EncodedValuesTooLarge
        );
        assert_eq!(
            encoder.encode_integer(-(1 << 40), first).unwrap_err(),
            HeError::EncodedValuesTooLarge
        );
        assert_eq!(
            encoder.encode_integer(i64::MIN, context.key_parms_id()).unwrap_err(),
            HeError::EncodedValuesTooLarge
        );
        let plain = encoder.encode_integer(-(1 << 20), first).unwrap();
        for v in encoder.decode_f64(&plain).unwrap() {
            assert_relative_eq!(v, -(1i64 << 20) as f64, epsilon = 1e-6);
        }
    }

    #[test]
    fn wide_coefficients_take_the_multi_word_path() {
        let context = context(16, &[50, 50, 50, 50]);
        let encoder = CkksEncoder::new(context.clone()).unwrap();
        let scale = 2f64.powi(120);
        let values: Vec<f64> = (0..8).map(|i| 1000.0 * (i as f64 - 3.5)).collect();
        let plain = encoder.encode_f64(&values, context.key_parms_id(), scale).unwrap();
        let decoded = encoder.decode_f64(&plain).unwrap();
        for (a, b) in decoded.iter().zip(&values) {
            assert_relative_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    #[test]
    fn rejects_bad_inputs() {
        let context = context(16, &[30, 30]);
        let encoder = CkksEncoder::new(context.clone()).unwrap();
        let id = context.first_parms_id();
        assert_eq!(
            encoder.encode_f64(&[0.0; 9], id, 1024.0).unwrap_err(),
            HeError::TooManyValues { given: 9, max: 8 }
        );
        assert!(matches!(
            encoder.encode_f64(&[1.0], id, 2f64.powi(59)),
            Err(HeError::ScaleOutOfBounds { .. })
        ));
        assert_eq!(
            encoder.encode_f64(&[1e15], id, 2f64.powi(25)).unwrap_err(),
            HeError::EncodedValuesTooLarge
        );
        assert!(matches!(
            encoder.encode_f64(&[1.0], ParmsId::ZERO, 1024.0),
            Err(HeError::InvalidParmsId(_))
        ));
        assert_eq!(
            encoder.decode_f64(&Plaintext::new(16)).unwrap_err(),
            HeError::NttFormMismatch { expected: true }
        );
    }

    #[test]
    fn rejects_non_ckks_context() {
        let parms = EncryptionParameters::builder(SchemeType::Bfv)
            .poly_modulus_degree(16)
            .coeff_modulus(CoeffModulus::create(16, &[30]).unwrap())
            .plain_modulus(crate::math::Modulus::new(17).unwrap())
            .build()
            .unwrap();
        let context = Context::new(parms).unwrap();
        assert!(matches!(
            CkksEncoder::new(context),
            Err(HeError::UnsupportedScheme(SchemeType::Bfv))
        ));
    }
}
