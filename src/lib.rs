//! RNS variants of the BFV and CKKS homomorphic encryption schemes.
//!
//! A [`Context`] validates [`EncryptionParameters`] and precomputes one level
//! per prefix of the coefficient modulus chain. Keys, plaintexts and
//! ciphertexts carry the [`ParmsId`] of the level they live on.

pub mod ciphertext;
pub mod context;
pub mod crypto;
pub mod encoding;
pub mod keys;
pub mod math;
pub mod plaintext;
pub mod rings;

pub use ciphertext::{Ciphertext, SeededCiphertext};
pub use context::{
    CoeffModulus, Context, ContextData, ContextError, EncryptionParameters, ParmsId, PlainModulus,
    SchemeType,
};
pub use crypto::{Decryptor, Encryptor, Evaluator, HeError, HeResult};
pub use encoding::{BatchEncoder, CkksEncoder};
pub use keys::{GaloisKeys, KSwitchKeys, KeyGenerator, PublicKey, RelinKeys, SecretKey};
pub use math::Modulus;
pub use plaintext::Plaintext;
