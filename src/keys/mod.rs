//! Key material: the secret key, public key and key-switching keys used for
//! relinearization and Galois automorphisms.
//!
//! All keys live at the key level of the modulus chain and are stored in NTT
//! form. A key-switching key for a target secret `s'` holds one RLWE
//! encryption per data prime `q_J`, each encrypting `P * s'` in row `J` only,
//! where `P` is the special prime dropped after switching.

pub mod keygen;

pub use keygen::KeyGenerator;

use crate::ciphertext::Ciphertext;
use crate::context::ParmsId;
use crate::plaintext::Plaintext;
use crate::rings::GaloisTool;

/// A ternary secret in NTT form over every prime of the key level.
#[derive(Debug, Clone, PartialEq)]
pub struct SecretKey {
    data: Plaintext,
}

impl SecretKey {
    pub(crate) fn new(data: Plaintext) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &Plaintext {
        &self.data
    }

    pub fn parms_id(&self) -> ParmsId {
        self.data.parms_id()
    }

    /// The first `len` words, i.e. the rows for a level with `len / N` primes.
    pub(crate) fn rows(&self, len: usize) -> &[u64] {
        &self.data.data()[..len]
    }
}

/// An encryption of zero under the secret key, `(-(a*s + e), a)`.
#[derive(Debug, Clone, PartialEq)]
pub struct PublicKey {
    data: Ciphertext,
}

impl PublicKey {
    pub(crate) fn new(data: Ciphertext) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &Ciphertext {
        &self.data
    }

    pub fn parms_id(&self) -> ParmsId {
        self.data.parms_id()
    }
}

/// Key-switching keys indexed by slot; empty slots have no key.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct KSwitchKeys {
    parms_id: ParmsId,
    keys: Vec<Vec<PublicKey>>,
}

impl KSwitchKeys {
    pub(crate) fn new(parms_id: ParmsId, keys: Vec<Vec<PublicKey>>) -> Self {
        Self { parms_id, keys }
    }

    pub fn parms_id(&self) -> ParmsId {
        self.parms_id
    }

    /// Number of non-empty slots.
    pub fn size(&self) -> usize {
        self.keys.iter().filter(|k| !k.is_empty()).count()
    }

    pub fn data(&self) -> &[Vec<PublicKey>] {
        &self.keys
    }

    fn get(&self, index: usize) -> Option<&[PublicKey]> {
        self.keys
            .get(index)
            .filter(|k| !k.is_empty())
            .map(Vec::as_slice)
    }
}

/// Keys switching `s^k` back to `s`, for `k = 2, 3, ...`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RelinKeys {
    keys: KSwitchKeys,
}

impl RelinKeys {
    pub(crate) fn new(keys: KSwitchKeys) -> Self {
        Self { keys }
    }

    #[inline]
    pub fn get_index(key_power: usize) -> usize {
        key_power - 2
    }

    pub fn has_key(&self, key_power: usize) -> bool {
        self.key(key_power).is_some()
    }

    pub fn key(&self, key_power: usize) -> Option<&[PublicKey]> {
        if key_power < 2 {
            return None;
        }
        self.keys.get(Self::get_index(key_power))
    }

    pub fn parms_id(&self) -> ParmsId {
        self.keys.parms_id()
    }

    pub fn size(&self) -> usize {
        self.keys.size()
    }

    pub fn as_kswitch_keys(&self) -> &KSwitchKeys {
        &self.keys
    }
}

/// Keys switching `s(X^g)` back to `s(X)`, indexed by Galois element.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GaloisKeys {
    keys: KSwitchKeys,
}

impl GaloisKeys {
    pub(crate) fn new(keys: KSwitchKeys) -> Self {
        Self { keys }
    }

    #[inline]
    pub fn get_index(galois_elt: u32) -> usize {
        GaloisTool::get_index_from_elt(galois_elt)
    }

    pub fn has_key(&self, galois_elt: u32) -> bool {
        self.key(galois_elt).is_some()
    }

    pub fn key(&self, galois_elt: u32) -> Option<&[PublicKey]> {
        if galois_elt & 1 == 0 {
            return None;
        }
        self.keys.get(Self::get_index(galois_elt))
    }

    pub fn parms_id(&self) -> ParmsId {
        self.keys.parms_id()
    }

    pub fn size(&self) -> usize {
        self.keys.size()
    }

    pub fn as_kswitch_keys(&self) -> &KSwitchKeys {
        &self.keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices() {
        assert_eq!(RelinKeys::get_index(2), 0);
        assert_eq!(RelinKeys::get_index(5), 3);
        assert_eq!(GaloisKeys::get_index(1), 0);
        assert_eq!(GaloisKeys::get_index(3), 1);
        assert_eq!(GaloisKeys::get_index(31), 15);
    }

    #[test]
    fn empty_slots_have_no_key() {
        let keys = KSwitchKeys::new(ParmsId::ZERO, vec![Vec::new(), Vec::new()]);
        assert_eq!(keys.size(), 0);
        let relin = RelinKeys::new(keys.clone());
        assert!(!relin.has_key(2));
        assert!(!relin.has_key(1));
        assert!(!relin.has_key(9));
        let galois = GaloisKeys::new(keys);
        assert!(!galois.has_key(3));
        assert!(!galois.has_key(4));
    }
}
