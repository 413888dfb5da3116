use std::sync::Arc;

use rand::{CryptoRng, Rng};
use tracing::{debug, instrument};

use crate::context::{Context, ContextData};
use crate::crypto::{HeError, HeResult, encryptor::encrypt_zero_symmetric};
use crate::math::{barrett_reduce_64, multiply_add_uint_mod, sampling::sample_poly_ternary};
use crate::plaintext::Plaintext;
use crate::rings::polyarith::{dyadic_product_inplace, ntt_poly_inplace};

use super::{GaloisKeys, KSwitchKeys, PublicKey, RelinKeys, SecretKey};

/// Reference key generator.
///
/// Samples a ternary secret at the key level and derives the public key and
/// key-switching keys from it.
#[derive(Debug)]
pub struct KeyGenerator {
    context: Arc<Context>,
    secret_key: SecretKey,
}

impl KeyGenerator {
    #[instrument(skip_all)]
    pub fn new<R: Rng + CryptoRng + ?Sized>(context: Arc<Context>, rng: &mut R) -> HeResult<Self> {
        let key_data = context.key_context_data();
        let n = key_data.coeff_count();
        let moduli = key_data.coeff_modulus();
        let mut plain = Plaintext::new_ntt(key_data.parms_id(), n, moduli.len());
        sample_poly_ternary(rng, moduli, n, plain.data_mut());
        ntt_poly_inplace(plain.data_mut(), key_data.small_ntt_tables());
        debug!(primes = moduli.len(), "sampled secret key");
        Ok(Self {
            secret_key: SecretKey::new(plain),
            context,
        })
    }

    /// Wraps an existing secret key, which must belong to this context.
    pub fn from_secret_key(context: Arc<Context>, secret_key: SecretKey) -> HeResult<Self> {
        let key_data = context.key_context_data();
        if secret_key.parms_id() != key_data.parms_id()
            || secret_key.data().data().len() != key_data.coeff_count() * key_data.coeff_modulus_size()
        {
            return Err(HeError::KeyMismatch);
        }
        Ok(Self { context, secret_key })
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    #[instrument(skip_all)]
    pub fn create_public_key<R: Rng + CryptoRng + ?Sized>(&self, rng: &mut R) -> HeResult<PublicKey> {
        let (ciphertext, _) =
            encrypt_zero_symmetric(&self.secret_key, &self.context, self.context.key_parms_id(), true, rng)?;
        Ok(PublicKey::new(ciphertext))
    }

    /// Relinearization keys for `s^2`.
    pub fn create_relin_keys<R: Rng + CryptoRng + ?Sized>(&self, rng: &mut R) -> HeResult<RelinKeys> {
        self.create_relin_keys_up_to(2, rng)
    }

    /// Relinearization keys for `s^2, ..., s^max_power`, enough to
    /// relinearize ciphertexts of size up to `max_power + 1` in one call.
    #[instrument(skip_all, fields(max_power = max_power))]
    pub fn create_relin_keys_up_to<R: Rng + CryptoRng + ?Sized>(
        &self,
        max_power: usize,
        rng: &mut R,
    ) -> HeResult<RelinKeys> {
        self.require_keyswitching()?;
        if max_power < 2 {
            return Err(HeError::ValueOutOfRange("relinearization needs powers of at least 2"));
        }
        let key_data = self.context.key_context_data();
        let n = key_data.coeff_count();
        let moduli = key_data.coeff_modulus();

        let s = self.secret_key.data().data();
        let mut power = s.to_vec();
        let mut keys = Vec::with_capacity(max_power - 1);
        for _ in 2..=max_power {
            dyadic_product_inplace(&mut power, s, moduli, n);
            keys.push(self.generate_kswitch_keys(key_data, &power, rng)?);
        }
        Ok(RelinKeys::new(KSwitchKeys::new(key_data.parms_id(), keys)))
    }

    /// Galois keys for conjugation and every power-of-two rotation.
    pub fn create_galois_keys<R: Rng + CryptoRng + ?Sized>(&self, rng: &mut R) -> HeResult<GaloisKeys> {
        let elts = self.context.key_context_data().galois_tool().get_elts_all();
        self.create_galois_keys_from_elts(&elts, rng)
    }

    pub fn create_galois_keys_from_steps<R: Rng + CryptoRng + ?Sized>(
        &self,
        steps: &[i32],
        rng: &mut R,
    ) -> HeResult<GaloisKeys> {
        let elts = self
            .context
            .key_context_data()
            .galois_tool()
            .get_elts_from_steps(steps)?;
        self.create_galois_keys_from_elts(&elts, rng)
    }

    #[instrument(skip_all, fields(count = galois_elts.len()))]
    pub fn create_galois_keys_from_elts<R: Rng + CryptoRng + ?Sized>(
        &self,
        galois_elts: &[u32],
        rng: &mut R,
    ) -> HeResult<GaloisKeys> {
        self.require_keyswitching()?;
        let key_data = self.context.key_context_data();
        let n = key_data.coeff_count();
        let s = self.secret_key.data().data();

        let mut keys: Vec<Vec<PublicKey>> = vec![Vec::new(); n];
        let mut rotated = vec![0u64; s.len()];
        for &elt in galois_elts {
            key_data.galois_tool().apply_galois_ntt_poly(s, elt, &mut rotated)?;
            let index = GaloisKeys::get_index(elt);
            if keys[index].is_empty() {
                keys[index] = self.generate_kswitch_keys(key_data, &rotated, rng)?;
            }
        }
        Ok(GaloisKeys::new(KSwitchKeys::new(key_data.parms_id(), keys)))
    }

    fn require_keyswitching(&self) -> HeResult<()> {
        if !self.context.using_keyswitching() {
            return Err(HeError::KeySwitchingUnavailable);
        }
        Ok(())
    }

    /// One encryption of zero per data prime `q_J`, with `(P mod q_J) * s'`
    /// added to row `J` of its first component.
    fn generate_kswitch_keys<R: Rng + CryptoRng + ?Sized>(
        &self,
        key_data: &ContextData,
        new_key: &[u64],
        rng: &mut R,
    ) -> HeResult<Vec<PublicKey>> {
        let n = key_data.coeff_count();
        let key_modulus = key_data.coeff_modulus();
        let special = key_modulus[key_modulus.len() - 1].value();
        let decomp_mod_count = self.context.first_context_data().coeff_modulus_size();

        let mut keys = Vec::with_capacity(decomp_mod_count);
        for j in 0..decomp_mod_count {
            let (mut ciphertext, _) =
                encrypt_zero_symmetric(&self.secret_key, &self.context, key_data.parms_id(), true, rng)?;
            let qj = &key_modulus[j];
            let factor = barrett_reduce_64(special, qj);
            let row = &mut ciphertext.poly_mut(0)[j * n..(j + 1) * n];
            for (c, &s) in row.iter_mut().zip(&new_key[j * n..(j + 1) * n]) {
                *c = multiply_add_uint_mod(s, factor, *c, qj);
            }
            keys.push(PublicKey::new(ciphertext));
        }
        Ok(keys)
    }
}
