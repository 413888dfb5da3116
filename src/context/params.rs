//! Encryption parameters, their identifying hash and helpers for choosing
//! moduli.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::math::{Modulus, get_primes};

use super::{ContextError, ContextResult};

/// Largest coefficient modulus accepted from callers. The 61-bit headroom is
/// reserved for the auxiliary BEHZ primes.
pub const MAX_USER_MODULUS_BITS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemeType {
    Bfv,
    Ckks,
    /// Accepted by [`super::Context`] but not by the encryptor, decryptor or
    /// evaluator.
    Bgv,
}

impl SchemeType {
    fn tag(self) -> u8 {
        match self {
            SchemeType::Bfv => 1,
            SchemeType::Ckks => 2,
            SchemeType::Bgv => 3,
        }
    }

    pub fn needs_plain_modulus(self) -> bool {
        matches!(self, SchemeType::Bfv | SchemeType::Bgv)
    }
}

impl fmt::Display for SchemeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SchemeType::Bfv => "BFV",
            SchemeType::Ckks => "CKKS",
            SchemeType::Bgv => "BGV",
        };
        f.write_str(name)
    }
}

/// SHA-256 of a parameter set, used to name levels of the modulus chain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ParmsId([u64; 4]);

impl ParmsId {
    pub const ZERO: ParmsId = ParmsId([0; 4]);

    pub fn words(&self) -> &[u64; 4] {
        &self.0
    }

    fn compute(
        scheme: SchemeType,
        poly_modulus_degree: usize,
        coeff_modulus: &[Modulus],
        plain_modulus: Option<&Modulus>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update([scheme.tag()]);
        hasher.update((poly_modulus_degree as u64).to_le_bytes());
        hasher.update((coeff_modulus.len() as u64).to_le_bytes());
        for m in coeff_modulus {
            hasher.update(m.value().to_le_bytes());
        }
        hasher.update(plain_modulus.map_or(0, |t| t.value()).to_le_bytes());
        let digest = hasher.finalize();

        let mut words = [0u64; 4];
        for (word, chunk) in words.iter_mut().zip(digest.chunks_exact(8)) {
            *word = chunk
                .iter()
                .rev()
                .fold(0u64, |acc, &byte| (acc << 8) | byte as u64);
        }
        ParmsId(words)
    }
}

impl fmt::Debug for ParmsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParmsId({self})")
    }
}

impl fmt::Display for ParmsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for word in self.0.iter().rev() {
            write!(f, "{word:016x}")?;
        }
        Ok(())
    }
}

/// A fully specified parameter set. Immutable once built; the id is computed
/// at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionParameters {
    scheme: SchemeType,
    poly_modulus_degree: usize,
    coeff_modulus: Vec<Modulus>,
    plain_modulus: Option<Modulus>,
    parms_id: ParmsId,
}

impl EncryptionParameters {
    pub fn builder(scheme: SchemeType) -> EncryptionParametersBuilder {
        EncryptionParametersBuilder::new(scheme)
    }

    pub fn scheme(&self) -> SchemeType {
        self.scheme
    }

    pub fn poly_modulus_degree(&self) -> usize {
        self.poly_modulus_degree
    }

    pub fn coeff_modulus(&self) -> &[Modulus] {
        &self.coeff_modulus
    }

    pub fn plain_modulus(&self) -> Option<&Modulus> {
        self.plain_modulus.as_ref()
    }

    pub fn parms_id(&self) -> ParmsId {
        self.parms_id
    }

    /// The same parameters over a different coefficient modulus; used to
    /// derive the lower levels of the chain.
    pub(crate) fn with_coeff_modulus(&self, coeff_modulus: Vec<Modulus>) -> Self {
        let parms_id = ParmsId::compute(
            self.scheme,
            self.poly_modulus_degree,
            &coeff_modulus,
            self.plain_modulus.as_ref(),
        );
        Self {
            coeff_modulus,
            parms_id,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncryptionParametersBuilder {
    scheme: SchemeType,
    poly_modulus_degree: Option<usize>,
    coeff_modulus: Vec<Modulus>,
    plain_modulus: Option<Modulus>,
}

impl EncryptionParametersBuilder {
    pub fn new(scheme: SchemeType) -> Self {
        Self {
            scheme,
            poly_modulus_degree: None,
            coeff_modulus: Vec::new(),
            plain_modulus: None,
        }
    }

    pub fn poly_modulus_degree(mut self, degree: usize) -> Self {
        self.poly_modulus_degree = Some(degree);
        self
    }

    pub fn coeff_modulus(mut self, moduli: Vec<Modulus>) -> Self {
        self.coeff_modulus = moduli;
        self
    }

    pub fn plain_modulus(mut self, modulus: Modulus) -> Self {
        self.plain_modulus = Some(modulus);
        self
    }

    /// Checks presence and scheme consistency; numeric validation against
    /// the degree happens when the [`super::Context`] is built.
    pub fn build(self) -> ContextResult<EncryptionParameters> {
        let poly_modulus_degree = self
            .poly_modulus_degree
            .ok_or(ContextError::MissingParameter("poly_modulus_degree"))?;
        if self.coeff_modulus.is_empty() {
            return Err(ContextError::MissingParameter("coeff_modulus"));
        }
        match (self.scheme.needs_plain_modulus(), self.plain_modulus) {
            (true, None) => return Err(ContextError::MissingParameter("plain_modulus")),
            (false, Some(t)) => return Err(ContextError::UnexpectedPlainModulus(t.value())),
            _ => {}
        }
        let parms_id = ParmsId::compute(
            self.scheme,
            poly_modulus_degree,
            &self.coeff_modulus,
            self.plain_modulus.as_ref(),
        );
        Ok(EncryptionParameters {
            scheme: self.scheme,
            poly_modulus_degree,
            coeff_modulus: self.coeff_modulus,
            plain_modulus: self.plain_modulus,
            parms_id,
        })
    }
}

/// Helpers for picking coefficient moduli.
pub struct CoeffModulus;

impl CoeffModulus {
    /// NTT-friendly primes for degree `degree` with the requested bit sizes,
    /// returned in the order the sizes were given. Primes of equal size are
    /// distinct and handed out largest first.
    pub fn create(degree: usize, bit_sizes: &[u32]) -> ContextResult<Vec<Modulus>> {
        if !degree.is_power_of_two() || degree < 2 {
            return Err(ContextError::InvalidDegree(degree));
        }
        if let Some(&bad) = bit_sizes
            .iter()
            .find(|&&b| b == 0 || b > MAX_USER_MODULUS_BITS)
        {
            return Err(ContextError::InvalidBitSize(bad));
        }

        let mut distinct: Vec<u32> = bit_sizes.to_vec();
        distinct.sort_unstable();
        distinct.dedup();

        let mut pools = Vec::with_capacity(distinct.len());
        for &size in &distinct {
            let count = bit_sizes.iter().filter(|&&b| b == size).count();
            let mut primes = get_primes(2 * degree as u64, size, count)?;
            primes.reverse();
            pools.push((size, primes));
        }

        let mut result = Vec::with_capacity(bit_sizes.len());
        for &size in bit_sizes {
            let pool = pools
                .iter_mut()
                .find(|(s, _)| *s == size)
                .ok_or(ContextError::InvalidBitSize(size))?;
            let prime = pool.1.pop().ok_or(ContextError::InvalidBitSize(size))?;
            result.push(prime);
        }
        Ok(result)
    }

    /// Bit sizes of a conservative default chain for BFV at the given degree;
    /// the last prime doubles as the key-switching special prime.
    pub fn bfv_default_bit_sizes(degree: usize) -> ContextResult<Vec<u32>> {
        let sizes = match degree {
            1024 => vec![27],
            2048 => vec![54],
            4096 => vec![36, 36, 37],
            8192 => vec![43, 43, 44, 44, 44],
            16384 => vec![48, 48, 48, 49, 49, 49, 49, 49, 49],
            32768 => {
                let mut sizes = vec![55; 15];
                sizes.push(56);
                sizes
            }
            _ => return Err(ContextError::InvalidDegree(degree)),
        };
        Ok(sizes)
    }

    pub fn bfv_default(degree: usize) -> ContextResult<Vec<Modulus>> {
        Self::create(degree, &Self::bfv_default_bit_sizes(degree)?)
    }
}

/// Helpers for picking a BFV plaintext modulus.
pub struct PlainModulus;

impl PlainModulus {
    /// A prime `t = 1 mod 2 * degree` of `bit_size` bits, which enables
    /// batching.
    pub fn batching(degree: usize, bit_size: u32) -> ContextResult<Modulus> {
        Ok(Self::batching_many(degree, &[bit_size])?.remove(0))
    }

    pub fn batching_many(degree: usize, bit_sizes: &[u32]) -> ContextResult<Vec<Modulus>> {
        CoeffModulus::create(degree, bit_sizes)
    }
}
