//! The encryption context: validated parameters and the chain of levels
//! derived from them.

mod context_data;
mod params;

pub use context_data::{Context, ContextData};
pub use params::{
    CoeffModulus, EncryptionParameters, EncryptionParametersBuilder, MAX_USER_MODULUS_BITS,
    ParmsId, PlainModulus, SchemeType,
};

use thiserror::Error;

use crate::math::MathError;
use crate::rings::RingError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("poly_modulus_degree must be a power of two between 2 and 131072, got {0}")]
    InvalidDegree(usize),
    #[error("missing encryption parameter: {0}")]
    MissingParameter(&'static str),
    #[error("CKKS does not use a plain modulus, got {0}")]
    UnexpectedPlainModulus(u64),
    #[error("invalid modulus bit size {0}")]
    InvalidBitSize(u32),
    #[error("coefficient modulus {0} exceeds 60 bits")]
    CoeffModulusTooLarge(u64),
    #[error("coefficient modulus {modulus} does not support a negacyclic NTT of degree {degree}")]
    NotNttFriendly { modulus: u64, degree: usize },
    #[error("coefficient modulus {0} appears more than once")]
    DuplicateModulus(u64),
    #[error("plain modulus {0} is not valid for the coefficient modulus")]
    InvalidPlainModulus(u64),
    #[error(transparent)]
    Ring(#[from] RingError),
    #[error(transparent)]
    Math(#[from] MathError),
}

pub type ContextResult<T> = Result<T, ContextError>;
