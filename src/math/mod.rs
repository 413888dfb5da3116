//! Arithmetic kernel: multi-word integers, Barrett-reduced modular arithmetic,
//! prime search and polynomial sampling.

pub mod modarith;
pub mod modulus;
pub mod primes;
pub mod sampling;
pub mod uint;

pub use modarith::{
    MultiplyModOperand, add_uint_mod, barrett_reduce_64, barrett_reduce_128,
    div2_uint_mod, exponentiate_uint_mod, increment_uint_mod, decrement_uint_mod,
    multiply_add_uint_mod, multiply_uint_mod, multiply_uint_mod_lazy,
    multiply_uint_mod_operand, negate_uint_mod, sub_uint_mod, try_invert_uint_mod,
};
pub use modulus::Modulus;
pub use primes::{get_primes, is_ntt_friendly_prime, is_prime};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MathError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("{value} is not invertible modulo {modulus}")]
    NotInvertible { value: u64, modulus: u64 },
    #[error("modulus must be non-zero and at most 61 bits, got {0}")]
    InvalidModulus(u64),
    #[error("could not find {count} primes of {bit_size} bits congruent to 1 mod {factor}")]
    PrimeSearchExhausted {
        factor: u64,
        bit_size: u32,
        count: usize,
    },
}

pub type MathResult<T> = Result<T, MathError>;
