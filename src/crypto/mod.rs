//! Encryption, decryption and homomorphic evaluation.

pub mod decryptor;
pub mod encryptor;
pub mod errors;
pub mod evaluator;
mod key_switch;

pub use decryptor::Decryptor;
pub use encryptor::Encryptor;
pub use errors::{HeError, HeResult};
pub use evaluator::Evaluator;
