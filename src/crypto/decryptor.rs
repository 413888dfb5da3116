use std::cmp::Ordering;
use std::sync::Arc;

use rayon::prelude::*;
use tracing::{instrument, warn};

use crate::ciphertext::Ciphertext;
use crate::context::{Context, ContextData, MAX_USER_MODULUS_BITS, SchemeType};
use crate::keys::SecretKey;
use crate::math::{
    barrett_reduce_128, modarith::multiply_accumulate_bound,
    uint::{compare_uint, is_greater_than_or_equal_uint, significant_bit_count_uint, sub_uint},
};
use crate::plaintext::Plaintext;
use crate::rings::polyarith::{
    add_poly_inplace, dyadic_product_inplace, inverse_ntt_poly_inplace, multiply_scalar_inplace,
    ntt_poly_inplace,
};

use super::{HeError, HeResult};

/// Decrypts ciphertexts of any size.
///
/// Powers of the secret key are computed on first use and kept for later
/// calls, so decryption takes `&mut self`.
pub struct Decryptor {
    context: Arc<Context>,
    /// `s, s^2, ...` in NTT form at the key level.
    secret_key_powers: Vec<Vec<u64>>,
}

impl Decryptor {
    pub fn new(context: Arc<Context>, secret_key: &SecretKey) -> HeResult<Self> {
        if context.scheme() == SchemeType::Bgv {
            return Err(HeError::UnsupportedScheme(SchemeType::Bgv));
        }
        let key_data = context.key_context_data();
        if secret_key.parms_id() != key_data.parms_id()
            || secret_key.data().data().len() != key_data.coeff_count() * key_data.coeff_modulus_size()
        {
            return Err(HeError::KeyMismatch);
        }
        Ok(Self {
            secret_key_powers: vec![secret_key.data().data().to_vec()],
            context,
        })
    }

    fn ensure_powers(&mut self, max_power: usize) {
        let key_data = self.context.key_context_data();
        let n = key_data.coeff_count();
        let moduli = key_data.coeff_modulus();
        while self.secret_key_powers.len() < max_power {
            let mut next = self.secret_key_powers[self.secret_key_powers.len() - 1].clone();
            dyadic_product_inplace(&mut next, &self.secret_key_powers[0], moduli, n);
            self.secret_key_powers.push(next);
        }
    }

    fn validate(&self, ciphertext: &Ciphertext) -> HeResult<Arc<ContextData>> {
        let context_data = self
            .context
            .get_context_data(&ciphertext.parms_id())
            .ok_or(HeError::InvalidParmsId(ciphertext.parms_id()))?;
        if ciphertext.size() < 2 {
            return Err(HeError::InvalidSize(ciphertext.size()));
        }
        if ciphertext.coeff_modulus_size() != context_data.coeff_modulus_size() {
            return Err(HeError::InvalidParmsId(ciphertext.parms_id()));
        }
        let expected = self.context.scheme() == SchemeType::Ckks;
        if ciphertext.is_ntt_form() != expected {
            return Err(HeError::NttFormMismatch { expected });
        }
        Ok(Arc::clone(context_data))
    }

    /// `c_0 + c_1*s + ... + c_{k-1}*s^{k-1}` in the ciphertext's own form.
    fn dot_product_ct_sk_array(&mut self, ciphertext: &Ciphertext, context_data: &ContextData) -> Vec<u64> {
        let n = context_data.coeff_count();
        let moduli = context_data.coeff_modulus();
        let tables = context_data.small_ntt_tables();
        let len = n * moduli.len();
        let is_ntt_form = ciphertext.is_ntt_form();
        self.ensure_powers(ciphertext.size() - 1);

        let components: Vec<Vec<u64>> = ciphertext
            .polys()
            .skip(1)
            .map(|poly| {
                let mut copy = poly.to_vec();
                if !is_ntt_form {
                    ntt_poly_inplace(&mut copy, tables);
                }
                copy
            })
            .collect();

        let bound = multiply_accumulate_bound(MAX_USER_MODULUS_BITS);
        let powers = &self.secret_key_powers;
        let mut dest = vec![0u64; len];
        dest.par_chunks_exact_mut(n)
            .zip(moduli.par_iter())
            .enumerate()
            .for_each(|(j, (row, qj))| {
                let offset = j * n;
                for (i, d) in row.iter_mut().enumerate() {
                    let mut acc = 0u128;
                    for (p, (component, power)) in components.iter().zip(powers).enumerate() {
                        acc += component[offset + i] as u128 * power[offset + i] as u128;
                        if (p + 1) % bound == 0 {
                            acc = barrett_reduce_128(acc, qj) as u128;
                        }
                    }
                    *d = barrett_reduce_128(acc, qj);
                }
            });

        if !is_ntt_form {
            inverse_ntt_poly_inplace(&mut dest, tables);
        }
        add_poly_inplace(&mut dest, ciphertext.poly(0), moduli, n);
        dest
    }

    /// BFV results are coefficient-form plaintexts modulo `t`; CKKS results
    /// are NTT-form plaintexts carrying the ciphertext's scale.
    #[instrument(skip_all, fields(size = ciphertext.size()))]
    pub fn decrypt(&mut self, ciphertext: &Ciphertext) -> HeResult<Plaintext> {
        let context_data = self.validate(ciphertext)?;
        let n = context_data.coeff_count();
        let tmp = self.dot_product_ct_sk_array(ciphertext, &context_data);
        match context_data.scheme() {
            SchemeType::Bfv => {
                let mut coeffs = vec![0u64; n];
                context_data
                    .rns_tool()
                    .decrypt_scale_and_round(&tmp, &mut coeffs)?;
                Ok(Plaintext::from_coeffs(coeffs))
            }
            SchemeType::Ckks => {
                let mut plain = Plaintext::new_ntt(context_data.parms_id(), n, context_data.coeff_modulus_size());
                plain.data_mut().copy_from_slice(&tmp);
                plain.set_scale(ciphertext.scale());
                Ok(plain)
            }
            SchemeType::Bgv => Err(HeError::UnsupportedScheme(SchemeType::Bgv)),
        }
    }

    /// Bits of headroom left before a BFV ciphertext stops decrypting
    /// correctly: `log2(q) - log2(||t * (c . s)||_inf) - 1`, floored at zero.
    #[instrument(skip_all, fields(size = ciphertext.size()))]
    pub fn invariant_noise_budget(&mut self, ciphertext: &Ciphertext) -> HeResult<u32> {
        if self.context.scheme() != SchemeType::Bfv {
            return Err(HeError::UnsupportedScheme(self.context.scheme()));
        }
        let context_data = self.validate(ciphertext)?;
        let n = context_data.coeff_count();
        let k = context_data.coeff_modulus_size();
        let moduli = context_data.coeff_modulus();
        let t = context_data
            .plain_modulus()
            .ok_or(HeError::UnsupportedScheme(context_data.scheme()))?
            .value();

        let mut noise = self.dot_product_ct_sk_array(ciphertext, &context_data);
        multiply_scalar_inplace(&mut noise, t, moduli, n);
        context_data.rns_base().compose_array(&mut noise, n);

        let modulus = context_data.total_coeff_modulus();
        let threshold = context_data.upper_half_threshold();
        let mut norm = vec![0u64; k];
        let mut centered = vec![0u64; k];
        for value in noise.chunks_exact(k) {
            if is_greater_than_or_equal_uint(value, threshold) {
                sub_uint(modulus, value, &mut centered);
            } else {
                centered.copy_from_slice(value);
            }
            if compare_uint(&centered, &norm) == Ordering::Greater {
                norm.copy_from_slice(&centered);
            }
        }

        let budget = context_data.total_coeff_modulus_bit_count() as i64
            - significant_bit_count_uint(&norm) as i64
            - 1;
        if budget <= 0 {
            warn!("noise budget exhausted");
        }
        Ok(budget.max(0) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CoeffModulus, EncryptionParameters};
    use crate::crypto::Encryptor;
    use crate::keys::KeyGenerator;
    use crate::math::Modulus;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn bfv_context() -> Arc<Context> {
        let parms = EncryptionParameters::builder(SchemeType::Bfv)
            .poly_modulus_degree(64)
            .coeff_modulus(CoeffModulus::create(64, &[40, 40, 50]).unwrap())
            .plain_modulus(Modulus::new(257).unwrap())
            .build()
            .unwrap();
        Context::new(parms).unwrap()
    }

    #[test]
    fn powers_grow_on_demand() {
        let context = bfv_context();
        let mut rng = ChaCha20Rng::seed_from_u64(30);
        let keygen = KeyGenerator::new(context.clone(), &mut rng).unwrap();
        let mut decryptor = Decryptor::new(context.clone(), keygen.secret_key()).unwrap();
        assert_eq!(decryptor.secret_key_powers.len(), 1);
        decryptor.ensure_powers(3);
        assert_eq!(decryptor.secret_key_powers.len(), 3);

        let key_data = context.key_context_data();
        let mut square = decryptor.secret_key_powers[0].clone();
        dyadic_product_inplace(&mut square, &decryptor.secret_key_powers[0], key_data.coeff_modulus(), 64);
        assert_eq!(decryptor.secret_key_powers[1], square);
    }

    #[test]
    fn symmetric_roundtrip_and_budget() {
        let context = bfv_context();
        let mut rng = ChaCha20Rng::seed_from_u64(31);
        let keygen = KeyGenerator::new(context.clone(), &mut rng).unwrap();
        let encryptor = Encryptor::with_secret_key(context.clone(), keygen.secret_key().clone()).unwrap();
        let mut decryptor = Decryptor::new(context.clone(), keygen.secret_key()).unwrap();

        let plain = Plaintext::from_coeffs((0..64).map(|i| (i * 7) % 257).collect());
        let ct = encryptor.encrypt_symmetric(&plain, &mut rng).unwrap();
        assert_eq!(decryptor.decrypt(&ct).unwrap(), plain);

        // 80-bit q, t = 257 and noise below 2^8 leave roughly 80 - 17 bits.
        let budget = decryptor.invariant_noise_budget(&ct).unwrap();
        assert!(budget > 50, "budget {budget}");
    }

    #[test]
    fn rejects_malformed_ciphertexts() {
        let context = bfv_context();
        let mut rng = ChaCha20Rng::seed_from_u64(32);
        let keygen = KeyGenerator::new(context.clone(), &mut rng).unwrap();
        let mut decryptor = Decryptor::new(context.clone(), keygen.secret_key()).unwrap();
        let data = context.first_context_data();
        assert_eq!(
            decryptor.decrypt(&Ciphertext::new(data, 1, false)).unwrap_err(),
            HeError::InvalidSize(1)
        );
        assert_eq!(
            decryptor.decrypt(&Ciphertext::new(data, 2, true)).unwrap_err(),
            HeError::NttFormMismatch { expected: false }
        );
    }
}
