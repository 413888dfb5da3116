//! Encoders between plaintext polynomials and slot vectors.
//!
//! Both encoders use the same slot ordering: slot `i` of the first row is the
//! evaluation at `zeta^(3^i)` and slot `i` of the second row the evaluation
//! at `zeta^(-3^i)`, `zeta` a primitive `2N`-th root of unity. Rotating slots
//! is therefore the Galois automorphism `X -> X^(3^k)`.

pub mod batch_encoder;
pub mod ckks_encoder;

pub use batch_encoder::BatchEncoder;
pub use ckks_encoder::CkksEncoder;

use crate::rings::{galois::GALOIS_GENERATOR, ntt::reverse_bits};

/// Maps slot indices to positions in the bit-reversed NTT / DWT output.
/// Entries `0..N/2` belong to the first row, `N/2..N` to the second.
pub(crate) fn matrix_reps_index_map(coeff_count_power: u32) -> Vec<usize> {
    let n = 1usize << coeff_count_power;
    let row_size = n >> 1;
    let m = (n << 1) as u64;
    let mut map = vec![0usize; n];
    let mut pos = 1u64;
    for i in 0..row_size {
        let index1 = ((pos - 1) >> 1) as usize;
        let index2 = ((m - pos - 1) >> 1) as usize;
        map[i] = reverse_bits(index1, coeff_count_power);
        map[row_size | i] = reverse_bits(index2, coeff_count_power);
        pos = (pos * GALOIS_GENERATOR as u64) & (m - 1);
    }
    map
}
