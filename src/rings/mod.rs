//! Polynomial rings `Z_q[X] / (X^N + 1)` in RNS form.
//!
//! An RNS polynomial over `k` moduli is stored as a flat `k * N` buffer of
//! `u64`, row `i` holding the residues modulo the `i`-th modulus.

pub mod galois;
pub mod ntt;
pub mod polyarith;
pub mod rns_base;
pub mod rns_tool;

pub use galois::GaloisTool;
pub use ntt::{
    NttTables, inverse_ntt_negacyclic_harvey, inverse_ntt_negacyclic_harvey_lazy,
    ntt_negacyclic_harvey, ntt_negacyclic_harvey_lazy,
};
pub use rns_base::{BaseConverter, RnsBase};
pub use rns_tool::RnsTool;

use thiserror::Error;

use crate::math::MathError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RingError {
    #[error("polynomial degree must be a power of two between 2 and 2^17, got {0}")]
    InvalidDegree(usize),
    #[error("modulus {modulus} does not support a negacyclic NTT of degree {degree}")]
    NotNttFriendly { modulus: u64, degree: usize },
    #[error("RNS base must contain at least one modulus")]
    EmptyBase,
    #[error("RNS base moduli must be pairwise coprime, {0} and {1} are not")]
    NotCoprime(u64, u64),
    #[error("modulus {0} is not part of the RNS base")]
    ModulusNotInBase(u64),
    #[error("plain modulus {0} is incompatible with the coefficient modulus")]
    InvalidPlainModulus(u64),
    #[error("{0} is not a valid Galois element")]
    InvalidGaloisElement(u32),
    #[error("rotation step {step} is out of range for {slots} slots")]
    InvalidStep { step: i32, slots: usize },
    #[error(transparent)]
    Math(#[from] MathError),
}

pub type RingResult<T> = Result<T, RingError>;
