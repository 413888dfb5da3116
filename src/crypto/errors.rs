use thiserror::Error;

use crate::context::{ContextError, ParmsId, SchemeType};
use crate::math::MathError;
use crate::rings::RingError;

/// Caller errors and degenerate results from encoding, encryption and
/// evaluation. Inputs are left untouched whenever one of these is returned,
/// except for [`HeError::TransparentCiphertext`], which is detected after the
/// computation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HeError {
    #[error("parameters {0} do not belong to this context")]
    InvalidParmsId(ParmsId),

    #[error("operands are at different levels: {left} vs {right}")]
    ParmsIdMismatch { left: ParmsId, right: ParmsId },

    #[error("NTT form mismatch: expected ntt_form = {expected}")]
    NttFormMismatch { expected: bool },

    #[error("scale mismatch: {left:.4e} vs {right:.4e}")]
    ScaleMismatch { left: f64, right: f64 },

    #[error("scale {scale:.4e} is out of bounds for the coefficient modulus")]
    ScaleOutOfBounds { scale: f64 },

    #[error("invalid ciphertext size {0}")]
    InvalidSize(usize),

    #[error("value out of range: {0}")]
    ValueOutOfRange(&'static str),

    #[error("too many values: got {given}, at most {max}")]
    TooManyValues { given: usize, max: usize },

    #[error("encoded values are too large for the coefficient modulus")]
    EncodedValuesTooLarge,

    #[error("relinearization keys do not cover ciphertext size {0}")]
    MissingRelinKey(usize),

    #[error("no Galois key for element {0}")]
    MissingGaloisKey(u32),

    #[error("key material does not match the context")]
    KeyMismatch,

    #[error("no {0} key was set")]
    MissingKey(&'static str),

    #[error("result ciphertext is transparent")]
    TransparentCiphertext,

    #[error("operation is not supported for {0}")]
    UnsupportedScheme(SchemeType),

    #[error("end of modulus switching chain reached")]
    EndOfModulusChain,

    #[error("key switching needs at least two coefficient moduli")]
    KeySwitchingUnavailable,

    #[error("batching needs a prime plain modulus congruent to 1 mod 2N")]
    BatchingUnavailable,

    #[error(transparent)]
    Context(#[from] ContextError),

    #[error(transparent)]
    Ring(#[from] RingError),

    #[error(transparent)]
    Math(#[from] MathError),
}

pub type HeResult<T> = Result<T, HeError>;
