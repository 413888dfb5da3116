use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::context::{Context, ContextData, ParmsId};
use crate::crypto::{HeError, HeResult};
use crate::math::sampling::sample_poly_uniform;
use crate::rings::polyarith::inverse_ntt_poly_inplace;

/// Length of the ChaCha20 seed stored by seeded ciphertexts.
pub const SEED_LEN: usize = 32;

/// A ciphertext of `size` polynomials, each `N * k` words in row-major RNS
/// layout for the `k` primes of its level.
#[derive(Debug, Clone, PartialEq)]
pub struct Ciphertext {
    data: Vec<u64>,
    size: usize,
    coeff_count: usize,
    coeff_modulus_size: usize,
    parms_id: ParmsId,
    is_ntt_form: bool,
    scale: f64,
}

impl Ciphertext {
    /// A zero ciphertext with `size` components at the given level.
    pub fn new(context_data: &ContextData, size: usize, is_ntt_form: bool) -> Self {
        let coeff_count = context_data.coeff_count();
        let coeff_modulus_size = context_data.coeff_modulus_size();
        Self {
            data: vec![0; size * coeff_count * coeff_modulus_size],
            size,
            coeff_count,
            coeff_modulus_size,
            parms_id: context_data.parms_id(),
            is_ntt_form,
            scale: 1.0,
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn coeff_count(&self) -> usize {
        self.coeff_count
    }

    #[inline]
    pub fn coeff_modulus_size(&self) -> usize {
        self.coeff_modulus_size
    }

    #[inline]
    pub fn poly_len(&self) -> usize {
        self.coeff_count * self.coeff_modulus_size
    }

    pub fn parms_id(&self) -> ParmsId {
        self.parms_id
    }

    pub fn is_ntt_form(&self) -> bool {
        self.is_ntt_form
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

    pub fn poly(&self, index: usize) -> &[u64] {
        let len = self.poly_len();
        &self.data[index * len..(index + 1) * len]
    }

    pub fn poly_mut(&mut self, index: usize) -> &mut [u64] {
        let len = self.poly_len();
        &mut self.data[index * len..(index + 1) * len]
    }

    pub fn polys(&self) -> std::slice::ChunksExact<'_, u64> {
        self.data.chunks_exact(self.poly_len())
    }

    pub fn polys_mut(&mut self) -> std::slice::ChunksExactMut<'_, u64> {
        let len = self.poly_len();
        self.data.chunks_exact_mut(len)
    }

    /// A ciphertext decrypts to the same value under every key when all
    /// components multiplying a power of `s` are zero.
    pub fn is_transparent(&self) -> bool {
        self.size < 2 || self.polys().skip(1).all(|p| p.iter().all(|&c| c == 0))
    }

    pub(crate) fn set_ntt_form(&mut self, is_ntt_form: bool) {
        self.is_ntt_form = is_ntt_form;
    }

    /// Changes the number of components, zero-filling new ones.
    pub(crate) fn resize(&mut self, size: usize) {
        self.data.resize(size * self.poly_len(), 0);
        self.size = size;
    }

    /// Moves the ciphertext to another level, replacing its data.
    pub(crate) fn reset_level(&mut self, context_data: &ContextData, data: Vec<u64>) {
        self.coeff_modulus_size = context_data.coeff_modulus_size();
        self.coeff_count = context_data.coeff_count();
        debug_assert_eq!(data.len(), self.size * self.poly_len());
        self.data = data;
        self.parms_id = context_data.parms_id();
    }
}

/// A symmetric encryption whose second component is replaced by the seed
/// that generates it.
#[derive(Debug, Clone, PartialEq)]
pub struct SeededCiphertext {
    c0: Vec<u64>,
    seed: [u8; SEED_LEN],
    parms_id: ParmsId,
    is_ntt_form: bool,
    scale: f64,
}

impl SeededCiphertext {
    pub(crate) fn from_ciphertext(ciphertext: Ciphertext, seed: [u8; SEED_LEN]) -> Self {
        let c0 = ciphertext.poly(0).to_vec();
        Self {
            c0,
            seed,
            parms_id: ciphertext.parms_id,
            is_ntt_form: ciphertext.is_ntt_form,
            scale: ciphertext.scale,
        }
    }

    pub fn seed(&self) -> &[u8; SEED_LEN] {
        &self.seed
    }

    pub fn c0(&self) -> &[u64] {
        &self.c0
    }

    pub fn parms_id(&self) -> ParmsId {
        self.parms_id
    }

    pub fn is_ntt_form(&self) -> bool {
        self.is_ntt_form
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Regenerates the second component and returns the full ciphertext.
    pub fn expand(&self, context: &Context) -> HeResult<Ciphertext> {
        let context_data = context
            .get_context_data(&self.parms_id)
            .ok_or(HeError::InvalidParmsId(self.parms_id))?;
        let mut ciphertext = Ciphertext::new(context_data, 2, self.is_ntt_form);
        if self.c0.len() != ciphertext.poly_len() {
            return Err(HeError::KeyMismatch);
        }
        ciphertext.poly_mut(0).copy_from_slice(&self.c0);
        let c1 = expand_seed(&self.seed, context_data, self.is_ntt_form);
        ciphertext.poly_mut(1).copy_from_slice(&c1);
        ciphertext.set_scale(self.scale);
        Ok(ciphertext)
    }
}

/// The uniform polynomial generated from `seed`, sampled in NTT form and
/// converted to coefficient form when `ntt_form` is false.
pub(crate) fn expand_seed(seed: &[u8; SEED_LEN], context_data: &ContextData, ntt_form: bool) -> Vec<u64> {
    let n = context_data.coeff_count();
    let moduli = context_data.coeff_modulus();
    let mut rng = ChaCha20Rng::from_seed(*seed);
    let mut poly = vec![0u64; n * moduli.len()];
    sample_poly_uniform(&mut rng, moduli, n, &mut poly);
    if !ntt_form {
        inverse_ntt_poly_inplace(&mut poly, context_data.small_ntt_tables());
    }
    poly
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CoeffModulus, EncryptionParameters, SchemeType};

    fn context() -> std::sync::Arc<Context> {
        let parms = EncryptionParameters::builder(SchemeType::Ckks)
            .poly_modulus_degree(16)
            .coeff_modulus(CoeffModulus::create(16, &[30, 30]).unwrap())
            .build()
            .unwrap();
        Context::new(parms).unwrap()
    }

    #[test]
    fn layout_and_transparency() {
        let context = context();
        let data = context.key_context_data();
        let mut ct = Ciphertext::new(data, 2, true);
        assert_eq!(ct.poly_len(), 32);
        assert_eq!(ct.data().len(), 64);
        assert!(ct.is_transparent());
        ct.poly_mut(0)[0] = 1;
        assert!(ct.is_transparent());
        ct.poly_mut(1)[31] = 1;
        assert!(!ct.is_transparent());
        assert_eq!(ct.polys().count(), 2);

        ct.resize(3);
        assert_eq!(ct.size(), 3);
        assert!(ct.poly(2).iter().all(|&c| c == 0));
    }

    #[test]
    fn seed_expansion_is_deterministic() {
        let context = context();
        let data = context.first_context_data();
        let seed = [7u8; SEED_LEN];
        let a = expand_seed(&seed, data, true);
        assert_eq!(a, expand_seed(&seed, data, true));
        assert_ne!(a, expand_seed(&[8u8; SEED_LEN], data, true));

        let seeded = SeededCiphertext::from_ciphertext(Ciphertext::new(data, 2, true), seed);
        let full = seeded.expand(&context).unwrap();
        assert_eq!(full.poly(1), &a[..]);
        assert_eq!(full.parms_id(), data.parms_id());
    }
}
