use std::sync::Arc;

use rand::{CryptoRng, Rng};
use tracing::{debug, instrument};

use crate::ciphertext::{Ciphertext, SEED_LEN, SeededCiphertext, expand_seed};
use crate::context::{Context, ContextData, ParmsId, SchemeType};
use crate::keys::{PublicKey, SecretKey};
use crate::math::{
    Modulus, add_uint_mod, multiply_add_uint_mod, sampling::sample_poly_normal,
    sampling::sample_poly_ternary, sub_uint_mod,
};
use crate::plaintext::Plaintext;
use crate::rings::polyarith::{
    add_poly_inplace, dyadic_product_inplace, inverse_ntt_poly_inplace, negate_poly_inplace,
    ntt_poly_inplace,
};

use super::{HeError, HeResult};

// ─── RLWE primitives ───────────────────────────────────────────────────────

/// `(-(a*s + e), a)` at the given level, with `a` expanded from a fresh seed.
/// Returns the ciphertext together with that seed.
pub(crate) fn encrypt_zero_symmetric<R: Rng + CryptoRng + ?Sized>(
    secret_key: &SecretKey,
    context: &Context,
    parms_id: ParmsId,
    is_ntt_form: bool,
    rng: &mut R,
) -> HeResult<(Ciphertext, [u8; SEED_LEN])> {
    let context_data = context
        .get_context_data(&parms_id)
        .ok_or(HeError::InvalidParmsId(parms_id))?;
    let n = context_data.coeff_count();
    let moduli = context_data.coeff_modulus();
    let tables = context_data.small_ntt_tables();
    let len = n * moduli.len();

    let mut seed = [0u8; SEED_LEN];
    rng.fill(&mut seed);
    let a = expand_seed(&seed, context_data, true);

    let mut noise = vec![0u64; len];
    sample_poly_normal(rng, moduli, n, &mut noise);

    let mut c0 = a;
    dyadic_product_inplace(&mut c0, secret_key.rows(len), moduli, n);
    if is_ntt_form {
        ntt_poly_inplace(&mut noise, tables);
    } else {
        inverse_ntt_poly_inplace(&mut c0, tables);
    }
    add_poly_inplace(&mut c0, &noise, moduli, n);
    negate_poly_inplace(&mut c0, moduli, n);

    let mut ciphertext = Ciphertext::new(context_data, 2, is_ntt_form);
    ciphertext.poly_mut(0).copy_from_slice(&c0);
    ciphertext
        .poly_mut(1)
        .copy_from_slice(&expand_seed(&seed, context_data, is_ntt_form));
    Ok((ciphertext, seed))
}

/// `(pk0*u + e0, pk1*u + e1)` at the given level, `u` ternary.
pub(crate) fn encrypt_zero_asymmetric<R: Rng + CryptoRng + ?Sized>(
    public_key: &PublicKey,
    context_data: &ContextData,
    is_ntt_form: bool,
    rng: &mut R,
) -> Ciphertext {
    let n = context_data.coeff_count();
    let moduli = context_data.coeff_modulus();
    let tables = context_data.small_ntt_tables();
    let len = n * moduli.len();

    let mut u = vec![0u64; len];
    sample_poly_ternary(rng, moduli, n, &mut u);
    ntt_poly_inplace(&mut u, tables);

    let mut ciphertext = Ciphertext::new(context_data, 2, is_ntt_form);
    let mut noise = vec![0u64; len];
    for j in 0..2 {
        let mut c = public_key.data().poly(j)[..len].to_vec();
        dyadic_product_inplace(&mut c, &u, moduli, n);
        sample_poly_normal(rng, moduli, n, &mut noise);
        if is_ntt_form {
            ntt_poly_inplace(&mut noise, tables);
        } else {
            inverse_ntt_poly_inplace(&mut c, tables);
        }
        add_poly_inplace(&mut c, &noise, moduli, n);
        ciphertext.poly_mut(j).copy_from_slice(&c);
    }
    ciphertext
}

/// Adds (or subtracts) `round(q * m / t)` to a coefficient-form polynomial:
/// `floor(q / t) * m` plus the rounded fractional part
/// `floor(((q mod t) * m + (t + 1) / 2) / t)`.
pub(crate) fn add_scaled_plain(
    plain: &Plaintext,
    context_data: &ContextData,
    plain_modulus: &Modulus,
    dest: &mut [u64],
    subtract: bool,
) {
    let n = context_data.coeff_count();
    let moduli = context_data.coeff_modulus();
    let delta = context_data.coeff_div_plain_modulus_rns();
    let q_mod_t = context_data.coeff_modulus_mod_plain_modulus() as u128;
    let half_t = context_data.plain_upper_half_threshold() as u128;
    let t = plain_modulus.value() as u128;

    for (i, &m) in plain.data().iter().enumerate() {
        let fix = ((q_mod_t * m as u128 + half_t) / t) as u64;
        for ((row, qj), &dj) in dest.chunks_exact_mut(n).zip(moduli).zip(delta) {
            let scaled = multiply_add_uint_mod(dj, m, fix, qj);
            row[i] = if subtract {
                sub_uint_mod(row[i], scaled, qj)
            } else {
                add_uint_mod(row[i], scaled, qj)
            };
        }
    }
}

/// Checks that a BFV plaintext is in coefficient form with at most `N`
/// coefficients, each below `t`.
pub(crate) fn validate_bfv_plain(plain: &Plaintext, context_data: &ContextData) -> HeResult<Modulus> {
    if plain.is_ntt_form() {
        return Err(HeError::NttFormMismatch { expected: false });
    }
    let t = *context_data
        .plain_modulus()
        .ok_or(HeError::UnsupportedScheme(context_data.scheme()))?;
    if plain.coeff_count() > context_data.coeff_count() {
        return Err(HeError::TooManyValues {
            given: plain.coeff_count(),
            max: context_data.coeff_count(),
        });
    }
    if plain.data().iter().any(|&c| c >= t.value()) {
        return Err(HeError::ValueOutOfRange("plaintext coefficients must be below the plain modulus"));
    }
    Ok(t)
}

/// Checks that a CKKS plaintext is in NTT form at a level of this context and
/// returns that level.
pub(crate) fn validate_ckks_plain<'a>(
    plain: &Plaintext,
    context: &'a Context,
) -> HeResult<&'a Arc<ContextData>> {
    if !plain.is_ntt_form() {
        return Err(HeError::NttFormMismatch { expected: true });
    }
    let context_data = context
        .get_context_data(&plain.parms_id())
        .ok_or(HeError::InvalidParmsId(plain.parms_id()))?;
    if plain.data().len() != context_data.coeff_count() * context_data.coeff_modulus_size() {
        return Err(HeError::InvalidParmsId(plain.parms_id()));
    }
    let scale = plain.scale();
    if !scale.is_finite()
        || scale <= 0.0
        || scale.log2() >= context_data.total_coeff_modulus_bit_count() as f64
    {
        return Err(HeError::ScaleOutOfBounds { scale });
    }
    Ok(context_data)
}

// ─── Encryptor ─────────────────────────────────────────────────────────────

/// Encrypts plaintexts under a public key, a secret key, or both.
///
/// BFV plaintexts are encrypted at the first data level in coefficient form;
/// CKKS plaintexts at their own level in NTT form.
pub struct Encryptor {
    context: Arc<Context>,
    public_key: Option<PublicKey>,
    secret_key: Option<SecretKey>,
}

impl Encryptor {
    fn new(context: Arc<Context>) -> HeResult<Self> {
        if context.scheme() == SchemeType::Bgv {
            return Err(HeError::UnsupportedScheme(SchemeType::Bgv));
        }
        Ok(Self {
            context,
            public_key: None,
            secret_key: None,
        })
    }

    pub fn with_public_key(context: Arc<Context>, public_key: PublicKey) -> HeResult<Self> {
        let mut encryptor = Self::new(context)?;
        encryptor.set_public_key(public_key)?;
        Ok(encryptor)
    }

    pub fn with_secret_key(context: Arc<Context>, secret_key: SecretKey) -> HeResult<Self> {
        let mut encryptor = Self::new(context)?;
        encryptor.set_secret_key(secret_key)?;
        Ok(encryptor)
    }

    pub fn set_public_key(&mut self, public_key: PublicKey) -> HeResult<()> {
        let key_data = self.context.key_context_data();
        let ct = public_key.data();
        if public_key.parms_id() != key_data.parms_id() || ct.size() != 2 || !ct.is_ntt_form() {
            return Err(HeError::KeyMismatch);
        }
        self.public_key = Some(public_key);
        Ok(())
    }

    pub fn set_secret_key(&mut self, secret_key: SecretKey) -> HeResult<()> {
        let key_data = self.context.key_context_data();
        if secret_key.parms_id() != key_data.parms_id() {
            return Err(HeError::KeyMismatch);
        }
        self.secret_key = Some(secret_key);
        Ok(())
    }

    fn context_data(&self, parms_id: &ParmsId) -> HeResult<&Arc<ContextData>> {
        self.context
            .get_context_data(parms_id)
            .ok_or(HeError::InvalidParmsId(*parms_id))
    }

    fn default_ntt_form(&self) -> bool {
        self.context.scheme() == SchemeType::Ckks
    }

    /// Public-key encryption of zero at `parms_id`. Below the key level the
    /// sample is drawn one level higher and the extra prime divided away,
    /// which shrinks the fresh noise.
    fn encrypt_zero_public<R: Rng + CryptoRng + ?Sized>(
        &self,
        parms_id: ParmsId,
        is_ntt_form: bool,
        rng: &mut R,
    ) -> HeResult<Ciphertext> {
        let public_key = self.public_key.as_ref().ok_or(HeError::MissingKey("public"))?;
        let context_data = self.context_data(&parms_id)?;
        let Some(prev_data) = context_data
            .prev_parms_id()
            .and_then(|id| self.context.get_context_data(&id))
        else {
            return Ok(encrypt_zero_asymmetric(public_key, context_data, is_ntt_form, rng));
        };

        let mut temp = encrypt_zero_asymmetric(public_key, prev_data, is_ntt_form, rng);
        let len = context_data.coeff_count() * context_data.coeff_modulus_size();
        let rns_tool = prev_data.rns_tool();
        let mut data = Vec::with_capacity(2 * len);
        for poly in temp.polys_mut() {
            if is_ntt_form {
                rns_tool.divide_and_round_q_last_ntt_inplace(poly, prev_data.small_ntt_tables());
            } else {
                rns_tool.divide_and_round_q_last_inplace(poly);
            }
            data.extend_from_slice(&poly[..len]);
        }
        temp.reset_level(context_data, data);
        Ok(temp)
    }

    /// A fresh public-key encryption of zero at the first data level.
    pub fn encrypt_zero<R: Rng + CryptoRng + ?Sized>(&self, rng: &mut R) -> HeResult<Ciphertext> {
        self.encrypt_zero_at(self.context.first_parms_id(), rng)
    }

    pub fn encrypt_zero_at<R: Rng + CryptoRng + ?Sized>(
        &self,
        parms_id: ParmsId,
        rng: &mut R,
    ) -> HeResult<Ciphertext> {
        self.encrypt_zero_public(parms_id, self.default_ntt_form(), rng)
    }

    #[instrument(skip_all, fields(scheme = %self.context.scheme()))]
    pub fn encrypt<R: Rng + CryptoRng + ?Sized>(&self, plain: &Plaintext, rng: &mut R) -> HeResult<Ciphertext> {
        self.encrypt_internal(plain, false, rng).map(|(ct, _)| ct)
    }

    /// Secret-key encryption of zero at `parms_id`.
    pub fn encrypt_zero_symmetric<R: Rng + CryptoRng + ?Sized>(
        &self,
        parms_id: ParmsId,
        rng: &mut R,
    ) -> HeResult<Ciphertext> {
        let secret_key = self.secret_key.as_ref().ok_or(HeError::MissingKey("secret"))?;
        encrypt_zero_symmetric(secret_key, &self.context, parms_id, self.default_ntt_form(), rng)
            .map(|(ct, _)| ct)
    }

    #[instrument(skip_all, fields(scheme = %self.context.scheme()))]
    pub fn encrypt_symmetric<R: Rng + CryptoRng + ?Sized>(
        &self,
        plain: &Plaintext,
        rng: &mut R,
    ) -> HeResult<Ciphertext> {
        self.encrypt_internal(plain, true, rng).map(|(ct, _)| ct)
    }

    /// Secret-key encryption that keeps only the seed of the uniform
    /// component.
    pub fn encrypt_symmetric_seeded<R: Rng + CryptoRng + ?Sized>(
        &self,
        plain: &Plaintext,
        rng: &mut R,
    ) -> HeResult<SeededCiphertext> {
        let (ciphertext, seed) = self.encrypt_internal(plain, true, rng)?;
        let seed = seed.ok_or(HeError::MissingKey("secret"))?;
        Ok(SeededCiphertext::from_ciphertext(ciphertext, seed))
    }

    fn encrypt_internal<R: Rng + CryptoRng + ?Sized>(
        &self,
        plain: &Plaintext,
        symmetric: bool,
        rng: &mut R,
    ) -> HeResult<(Ciphertext, Option<[u8; SEED_LEN]>)> {
        let zero = |parms_id: ParmsId,
                    is_ntt_form: bool,
                    rng: &mut R|
         -> HeResult<(Ciphertext, Option<[u8; SEED_LEN]>)> {
            if symmetric {
                let secret_key = self.secret_key.as_ref().ok_or(HeError::MissingKey("secret"))?;
                encrypt_zero_symmetric(secret_key, &self.context, parms_id, is_ntt_form, rng)
                    .map(|(ct, seed)| (ct, Some(seed)))
            } else {
                self.encrypt_zero_public(parms_id, is_ntt_form, rng)
                    .map(|ct| (ct, None))
            }
        };

        match self.context.scheme() {
            SchemeType::Bfv => {
                let context_data = self.context.first_context_data();
                let t = validate_bfv_plain(plain, context_data)?;
                let (mut ciphertext, seed) = zero(context_data.parms_id(), false, rng)?;
                add_scaled_plain(plain, context_data, &t, ciphertext.poly_mut(0), false);
                debug!(level = context_data.chain_index(), "encrypted BFV plaintext");
                Ok((ciphertext, seed))
            }
            SchemeType::Ckks => {
                let context_data = validate_ckks_plain(plain, &self.context)?;
                let (mut ciphertext, seed) = zero(plain.parms_id(), true, rng)?;
                add_poly_inplace(
                    ciphertext.poly_mut(0),
                    plain.data(),
                    context_data.coeff_modulus(),
                    context_data.coeff_count(),
                );
                ciphertext.set_scale(plain.scale());
                debug!(level = context_data.chain_index(), "encrypted CKKS plaintext");
                Ok((ciphertext, seed))
            }
            SchemeType::Bgv => Err(HeError::UnsupportedScheme(SchemeType::Bgv)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CoeffModulus, EncryptionParameters};
    use crate::keys::KeyGenerator;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn bfv_context() -> Arc<Context> {
        let parms = EncryptionParameters::builder(SchemeType::Bfv)
            .poly_modulus_degree(32)
            .coeff_modulus(CoeffModulus::create(32, &[40, 40, 50]).unwrap())
            .plain_modulus(Modulus::new(257).unwrap())
            .build()
            .unwrap();
        Context::new(parms).unwrap()
    }

    #[test]
    fn scaled_plain_is_rounded_delta_times_m() {
        let context = bfv_context();
        let data = context.first_context_data();
        let t = *data.plain_modulus().unwrap();
        let plain = Plaintext::from_coeffs(vec![1, 256, 0, 128]);
        let len = data.coeff_count() * data.coeff_modulus_size();
        let mut dest = vec![0u64; len];
        add_scaled_plain(&plain, data, &t, &mut dest, false);

        // Compare against round(q * m / t) computed with two 64-bit words.
        let q = data.total_coeff_modulus();
        let q128 = q[0] as u128 | (q[1] as u128) << 64;
        let n = data.coeff_count();
        for (i, &m) in plain.data().iter().enumerate() {
            let exact = (q128 / 257) * m as u128 + ((q128 % 257) * m as u128 + 129) / 257;
            for (j, qj) in data.coeff_modulus().iter().enumerate() {
                assert_eq!(dest[j * n + i], (exact % qj.value() as u128) as u64);
            }
        }

        add_scaled_plain(&plain, data, &t, &mut dest, true);
        assert!(dest.iter().all(|&c| c == 0));
    }

    #[test]
    fn plaintext_validation() {
        let context = bfv_context();
        let data = context.first_context_data();
        assert!(matches!(
            validate_bfv_plain(&Plaintext::from_coeffs(vec![257]), data),
            Err(HeError::ValueOutOfRange(_))
        ));
        assert!(matches!(
            validate_bfv_plain(&Plaintext::new(33), data),
            Err(HeError::TooManyValues { given: 33, max: 32 })
        ));
        assert!(validate_bfv_plain(&Plaintext::from_coeffs(vec![256, 3]), data).is_ok());
    }

    #[test]
    fn keys_must_be_set() {
        let context = bfv_context();
        let mut rng = ChaCha20Rng::seed_from_u64(20);
        let keygen = KeyGenerator::new(context.clone(), &mut rng).unwrap();
        let encryptor = Encryptor::with_secret_key(context.clone(), keygen.secret_key().clone()).unwrap();
        assert_eq!(
            encryptor.encrypt(&Plaintext::new(4), &mut rng).unwrap_err(),
            HeError::MissingKey("public")
        );
        let ct = encryptor.encrypt_symmetric(&Plaintext::from_coeffs(vec![5]), &mut rng).unwrap();
        assert_eq!(ct.parms_id(), context.first_parms_id());
        assert!(!ct.is_ntt_form());
        assert_eq!(ct.coeff_modulus_size(), 2);
    }

    #[test]
    fn seeded_ciphertext_expands_to_the_same_encryption() {
        let context = bfv_context();
        let mut rng = ChaCha20Rng::seed_from_u64(21);
        let keygen = KeyGenerator::new(context.clone(), &mut rng).unwrap();
        let encryptor = Encryptor::with_secret_key(context.clone(), keygen.secret_key().clone()).unwrap();
        let plain = Plaintext::from_coeffs(vec![1, 2, 3]);

        let mut rng_a = ChaCha20Rng::seed_from_u64(99);
        let mut rng_b = ChaCha20Rng::seed_from_u64(99);
        let seeded = encryptor.encrypt_symmetric_seeded(&plain, &mut rng_a).unwrap();
        let full = encryptor.encrypt_symmetric(&plain, &mut rng_b).unwrap();
        assert_eq!(seeded.expand(&context).unwrap(), full);
    }

    #[test]
    fn public_encryption_lands_at_the_requested_level() {
        let context = bfv_context();
        let mut rng = ChaCha20Rng::seed_from_u64(22);
        let keygen = KeyGenerator::new(context.clone(), &mut rng).unwrap();
        let pk = keygen.create_public_key(&mut rng).unwrap();
        let encryptor = Encryptor::with_public_key(context.clone(), pk).unwrap();
        let ct = encryptor.encrypt_zero_at(context.last_parms_id(), &mut rng).unwrap();
        assert_eq!(ct.parms_id(), context.last_parms_id());
        assert_eq!(ct.coeff_modulus_size(), 1);
        assert_eq!(ct.size(), 2);
    }
}
