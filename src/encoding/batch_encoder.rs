//! SIMD batching for BFV.
//!
//! With a prime plain modulus `t = 1 mod 2N` the plaintext ring splits into
//! `N` slots arranged as a `2 x N/2` matrix. Slot-wise addition and
//! multiplication of the vectors correspond to polynomial addition and
//! multiplication modulo `X^N + 1` and `t`.

use std::sync::Arc;

use tracing::instrument;

use crate::context::{Context, SchemeType};
use crate::crypto::{HeError, HeResult};
use crate::math::Modulus;
use crate::plaintext::Plaintext;
use crate::rings::{
    NttTables,
    ntt::{inverse_ntt_negacyclic_harvey, ntt_negacyclic_harvey},
};

pub struct BatchEncoder {
    plain_ntt_tables: NttTables,
    matrix_reps_index_map: Vec<usize>,
}

impl BatchEncoder {
    pub fn new(context: Arc<Context>) -> HeResult<Self> {
        if context.scheme() != SchemeType::Bfv {
            return Err(HeError::UnsupportedScheme(context.scheme()));
        }
        let context_data = context.first_context_data();
        let plain_ntt_tables = context_data
            .plain_ntt_tables()
            .ok_or(HeError::BatchingUnavailable)?
            .clone();
        Ok(Self {
            matrix_reps_index_map: super::matrix_reps_index_map(context_data.coeff_count_power()),
            plain_ntt_tables,
        })
    }

    /// Number of slots, `N`.
    pub fn slot_count(&self) -> usize {
        self.matrix_reps_index_map.len()
    }

    pub fn plain_modulus(&self) -> &Modulus {
        self.plain_ntt_tables.modulus()
    }

    /// The first `N/2` values fill the top row, the rest the bottom row.
    /// Missing values are zero.
    #[instrument(skip_all, fields(values = values.len()))]
    pub fn encode(&self, values: &[u64]) -> HeResult<Plaintext> {
        let slots = self.slot_count();
        if values.len() > slots {
            return Err(HeError::TooManyValues {
                given: values.len(),
                max: slots,
            });
        }
        let t = self.plain_modulus().value();
        if values.iter().any(|&v| v >= t) {
            return Err(HeError::ValueOutOfRange("batched values must be below the plain modulus"));
        }

        let mut coeffs = vec![0u64; slots];
        for (&value, &index) in values.iter().zip(&self.matrix_reps_index_map) {
            coeffs[index] = value;
        }
        inverse_ntt_negacyclic_harvey(&mut coeffs, &self.plain_ntt_tables);
        Ok(Plaintext::from_coeffs(coeffs))
    }

    /// Encodes signed values as their representatives modulo `t`.
    pub fn encode_signed(&self, values: &[i64]) -> HeResult<Plaintext> {
        let modulus = self.plain_modulus();
        let t = modulus.value();
        let half = (t >> 1) as i64;
        let mut unsigned = Vec::with_capacity(values.len());
        for &v in values {
            if v > half || v < -half {
                return Err(HeError::ValueOutOfRange("signed batched values must lie in (-t/2, t/2]"));
            }
            unsigned.push(if v < 0 { t - v.unsigned_abs() } else { v as u64 });
        }
        self.encode(&unsigned)
    }

    #[instrument(skip_all)]
    pub fn decode(&self, plain: &Plaintext) -> HeResult<Vec<u64>> {
        if plain.is_ntt_form() {
            return Err(HeError::NttFormMismatch { expected: false });
        }
        let slots = self.slot_count();
        let t = self.plain_modulus().value();
        let significant = plain.significant_coeff_count();
        if significant > slots || plain.data()[..significant].iter().any(|&c| c >= t) {
            return Err(HeError::ValueOutOfRange("plaintext is not reduced modulo the plain modulus"));
        }

        let mut coeffs = vec![0u64; slots];
        coeffs[..significant].copy_from_slice(&plain.data()[..significant]);
        ntt_negacyclic_harvey(&mut coeffs, &self.plain_ntt_tables);
        Ok(self.matrix_reps_index_map.iter().map(|&index| coeffs[index]).collect())
    }

    /// Decodes into `(-t/2, t/2]`.
    pub fn decode_signed(&self, plain: &Plaintext) -> HeResult<Vec<i64>> {
        let t = self.plain_modulus().value();
        let threshold = (t + 1) >> 1;
        Ok(self
            .decode(plain)?
            .into_iter()
            .map(|v| if v >= threshold { -((t - v) as i64) } else { v as i64 })
            .collect())
    }
}
