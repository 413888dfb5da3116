//! Homomorphic operations on ciphertexts.
//!
//! Every public entry point validates its operands, dispatches once on the
//! scheme and delegates to a scheme-specific routine. Results that would
//! decrypt to the same value under every key are rejected.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::ciphertext::Ciphertext;
use crate::context::{Context, ContextData, ParmsId, SchemeType};
use crate::keys::{GaloisKeys, RelinKeys};
use crate::math::barrett_reduce_64;
use crate::plaintext::Plaintext;
use crate::rings::polyarith::{
    add_poly_inplace, dyadic_product_accumulate, dyadic_product_inplace, inverse_ntt_poly_inplace,
    multiply_scalar_inplace, negate_poly_inplace, ntt_poly_inplace, sub_poly_inplace,
};

use super::encryptor::{add_scaled_plain, validate_bfv_plain, validate_ckks_plain};
use super::key_switch::{check_switch_keys, switch_key_inplace};
use super::{HeError, HeResult};

/// Relative tolerance when comparing CKKS scales.
const SCALE_RELATIVE_TOLERANCE: f64 = 1e-9;

fn are_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= SCALE_RELATIVE_TOLERANCE * a.abs().max(b.abs())
}

/// Non-adjacent form of `value`: signed powers of two summing to it.
fn naf(value: i32) -> Vec<i32> {
    let sign = value.signum();
    let mut k = value.unsigned_abs() as i64;
    let mut terms = Vec::new();
    let mut bit = 0;
    while k > 0 {
        if k & 1 == 1 {
            let z = 2 - (k & 3);
            k -= z;
            terms.push(sign * (z as i32) * (1 << bit));
        }
        k >>= 1;
        bit += 1;
    }
    terms
}

pub struct Evaluator {
    context: Arc<Context>,
}

impl Evaluator {
    pub fn new(context: Arc<Context>) -> HeResult<Self> {
        if context.scheme() == SchemeType::Bgv {
            return Err(HeError::UnsupportedScheme(SchemeType::Bgv));
        }
        Ok(Self { context })
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    // ─── Validation ────────────────────────────────────────────────────────

    fn context_data(&self, parms_id: &ParmsId) -> HeResult<Arc<ContextData>> {
        self.context
            .get_context_data(parms_id)
            .cloned()
            .ok_or(HeError::InvalidParmsId(*parms_id))
    }

    fn validate(&self, encrypted: &Ciphertext) -> HeResult<Arc<ContextData>> {
        let context_data = self.context_data(&encrypted.parms_id())?;
        if encrypted.size() < 2 {
            return Err(HeError::InvalidSize(encrypted.size()));
        }
        if encrypted.coeff_modulus_size() != context_data.coeff_modulus_size()
            || encrypted.coeff_count() != context_data.coeff_count()
        {
            return Err(HeError::InvalidParmsId(encrypted.parms_id()));
        }
        if context_data.scheme() == SchemeType::Ckks && !encrypted.is_ntt_form() {
            return Err(HeError::NttFormMismatch { expected: true });
        }
        Ok(context_data)
    }

    fn validate_pair(&self, a: &Ciphertext, b: &Ciphertext) -> HeResult<Arc<ContextData>> {
        let context_data = self.validate(a)?;
        self.validate(b)?;
        if a.parms_id() != b.parms_id() {
            return Err(HeError::ParmsIdMismatch {
                left: a.parms_id(),
                right: b.parms_id(),
            });
        }
        if a.is_ntt_form() != b.is_ntt_form() {
            return Err(HeError::NttFormMismatch {
                expected: a.is_ntt_form(),
            });
        }
        if context_data.scheme() == SchemeType::Ckks && !are_close(a.scale(), b.scale()) {
            return Err(HeError::ScaleMismatch {
                left: a.scale(),
                right: b.scale(),
            });
        }
        Ok(context_data)
    }

    fn require_coeff_form(encrypted: &Ciphertext) -> HeResult<()> {
        if encrypted.is_ntt_form() {
            return Err(HeError::NttFormMismatch { expected: false });
        }
        Ok(())
    }

    fn require_scheme(&self, scheme: SchemeType) -> HeResult<()> {
        if self.context.scheme() != scheme {
            return Err(HeError::UnsupportedScheme(self.context.scheme()));
        }
        Ok(())
    }

    fn check_scale(scale: f64, context_data: &ContextData) -> HeResult<()> {
        if !scale.is_finite() || scale.log2() >= context_data.total_coeff_modulus_bit_count() as f64 {
            return Err(HeError::ScaleOutOfBounds { scale });
        }
        Ok(())
    }

    fn check_transparent(encrypted: &Ciphertext) -> HeResult<()> {
        if encrypted.is_transparent() {
            return Err(HeError::TransparentCiphertext);
        }
        Ok(())
    }

    // ─── Addition and negation ─────────────────────────────────────────────

    pub fn negate_inplace(&self, encrypted: &mut Ciphertext) -> HeResult<()> {
        let context_data = self.validate(encrypted)?;
        let moduli = context_data.coeff_modulus();
        let n = context_data.coeff_count();
        for poly in encrypted.polys_mut() {
            negate_poly_inplace(poly, moduli, n);
        }
        Self::check_transparent(encrypted)
    }

    pub fn negate(&self, encrypted: &Ciphertext) -> HeResult<Ciphertext> {
        let mut result = encrypted.clone();
        self.negate_inplace(&mut result)?;
        Ok(result)
    }

    fn add_sub_inplace(&self, encrypted1: &mut Ciphertext, encrypted2: &Ciphertext, subtract: bool) -> HeResult<()> {
        let context_data = self.validate_pair(encrypted1, encrypted2)?;
        let moduli = context_data.coeff_modulus();
        let n = context_data.coeff_count();
        let size1 = encrypted1.size();
        let size2 = encrypted2.size();
        if size2 > size1 {
            encrypted1.resize(size2);
        }
        for (i, operand) in encrypted2.polys().enumerate() {
            let dest = encrypted1.poly_mut(i);
            if subtract {
                sub_poly_inplace(dest, operand, moduli, n);
            } else {
                add_poly_inplace(dest, operand, moduli, n);
            }
        }
        Self::check_transparent(encrypted1)
    }

    pub fn add_inplace(&self, encrypted1: &mut Ciphertext, encrypted2: &Ciphertext) -> HeResult<()> {
        self.add_sub_inplace(encrypted1, encrypted2, false)
    }

    pub fn add(&self, encrypted1: &Ciphertext, encrypted2: &Ciphertext) -> HeResult<Ciphertext> {
        let mut result = encrypted1.clone();
        self.add_inplace(&mut result, encrypted2)?;
        Ok(result)
    }

    pub fn add_many(&self, encrypteds: &[Ciphertext]) -> HeResult<Ciphertext> {
        let (first, rest) = encrypteds
            .split_first()
            .ok_or(HeError::ValueOutOfRange("add_many needs at least one ciphertext"))?;
        let mut result = first.clone();
        for encrypted in rest {
            self.add_inplace(&mut result, encrypted)?;
        }
        Ok(result)
    }

    pub fn sub_inplace(&self, encrypted1: &mut Ciphertext, encrypted2: &Ciphertext) -> HeResult<()> {
        self.add_sub_inplace(encrypted1, encrypted2, true)
    }

    pub fn sub(&self, encrypted1: &Ciphertext, encrypted2: &Ciphertext) -> HeResult<Ciphertext> {
        let mut result = encrypted1.clone();
        self.sub_inplace(&mut result, encrypted2)?;
        Ok(result)
    }

    // ─── Multiplication ────────────────────────────────────────────────────

    /// Tensor product; the result has `size1 + size2 - 1` components.
    #[instrument(skip_all, fields(size1 = encrypted1.size(), size2 = encrypted2.size()))]
    pub fn multiply_inplace(&self, encrypted1: &mut Ciphertext, encrypted2: &Ciphertext) -> HeResult<()> {
        let context_data = self.validate_pair(encrypted1, encrypted2)?;
        match context_data.scheme() {
            SchemeType::Bfv => self.bfv_multiply(encrypted1, encrypted2, &context_data)?,
            SchemeType::Ckks => self.ckks_multiply(encrypted1, encrypted2, &context_data)?,
            SchemeType::Bgv => return Err(HeError::UnsupportedScheme(SchemeType::Bgv)),
        }
        Self::check_transparent(encrypted1)
    }

    pub fn multiply(&self, encrypted1: &Ciphertext, encrypted2: &Ciphertext) -> HeResult<Ciphertext> {
        let mut result = encrypted1.clone();
        self.multiply_inplace(&mut result, encrypted2)?;
        Ok(result)
    }

    pub fn square_inplace(&self, encrypted: &mut Ciphertext) -> HeResult<()> {
        let copy = encrypted.clone();
        self.multiply_inplace(encrypted, &copy)
    }

    pub fn square(&self, encrypted: &Ciphertext) -> HeResult<Ciphertext> {
        let mut result = encrypted.clone();
        self.square_inplace(&mut result)?;
        Ok(result)
    }

    /// BEHZ multiplication: both operands are extended from `q` to `Bsk`,
    /// multiplied in NTT form over both bases, scaled by `t`, floored by `q`
    /// and converted back to `q`.
    fn bfv_multiply(
        &self,
        encrypted1: &mut Ciphertext,
        encrypted2: &Ciphertext,
        context_data: &ContextData,
    ) -> HeResult<()> {
        Self::require_coeff_form(encrypted1)?;
        let n = context_data.coeff_count();
        let base_q = context_data.coeff_modulus();
        let q_tables = context_data.small_ntt_tables();
        let rns_tool = context_data.rns_tool();
        let base_bsk = rns_tool.base_bsk().base();
        let bsk_tables = rns_tool.base_bsk_ntt_tables();
        let t = context_data
            .plain_modulus()
            .ok_or(HeError::UnsupportedScheme(context_data.scheme()))?
            .value();

        let size1 = encrypted1.size();
        let size2 = encrypted2.size();
        let dest_size = size1 + size2 - 1;

        let behz_extend = |poly: &[u64]| {
            let mut q_part = poly.to_vec();
            ntt_poly_inplace(&mut q_part, q_tables);
            let mut temp = vec![0u64; (base_bsk.len() + 1) * n];
            rns_tool.fastbconv_m_tilde(poly, &mut temp);
            let mut bsk_part = vec![0u64; base_bsk.len() * n];
            rns_tool.sm_mrq(&temp, &mut bsk_part);
            ntt_poly_inplace(&mut bsk_part, bsk_tables);
            (q_part, bsk_part)
        };
        let extended1: Vec<_> = encrypted1.polys().map(&behz_extend).collect();
        let extended2: Vec<_> = encrypted2.polys().map(&behz_extend).collect();

        let mut dest_q = vec![vec![0u64; base_q.len() * n]; dest_size];
        let mut dest_bsk = vec![vec![0u64; base_bsk.len() * n]; dest_size];
        for i in 0..dest_size {
            let curr2_first = i.min(size2 - 1);
            let curr1_first = i - curr2_first;
            let curr1_last = i.min(size1 - 1);
            for a in curr1_first..=curr1_last {
                let b = i - a;
                dyadic_product_accumulate(&mut dest_q[i], &extended1[a].0, &extended2[b].0, base_q, n);
                dyadic_product_accumulate(&mut dest_bsk[i], &extended1[a].1, &extended2[b].1, base_bsk, n);
            }
        }

        encrypted1.resize(dest_size);
        for (i, (mut q_part, mut bsk_part)) in dest_q.into_iter().zip(dest_bsk).enumerate() {
            inverse_ntt_poly_inplace(&mut q_part, q_tables);
            inverse_ntt_poly_inplace(&mut bsk_part, bsk_tables);
            multiply_scalar_inplace(&mut q_part, t, base_q, n);
            multiply_scalar_inplace(&mut bsk_part, t, base_bsk, n);

            q_part.extend_from_slice(&bsk_part);
            rns_tool.fast_floor(&q_part, &mut bsk_part);
            rns_tool.fastbconv_sk(&bsk_part, encrypted1.poly_mut(i));
        }
        debug!(size = dest_size, "BFV tensor product");
        Ok(())
    }

    fn ckks_multiply(
        &self,
        encrypted1: &mut Ciphertext,
        encrypted2: &Ciphertext,
        context_data: &ContextData,
    ) -> HeResult<()> {
        let new_scale = encrypted1.scale() * encrypted2.scale();
        Self::check_scale(new_scale, context_data)?;
        let n = context_data.coeff_count();
        let moduli = context_data.coeff_modulus();
        let size1 = encrypted1.size();
        let size2 = encrypted2.size();
        let dest_size = size1 + size2 - 1;

        let mut dest = vec![vec![0u64; encrypted1.poly_len()]; dest_size];
        for (i, d) in dest.iter_mut().enumerate() {
            let curr2_first = i.min(size2 - 1);
            let curr1_first = i - curr2_first;
            let curr1_last = i.min(size1 - 1);
            for a in curr1_first..=curr1_last {
                dyadic_product_accumulate(d, encrypted1.poly(a), encrypted2.poly(i - a), moduli, n);
            }
        }

        encrypted1.resize(dest_size);
        for (target, source) in encrypted1.polys_mut().zip(&dest) {
            target.copy_from_slice(source);
        }
        encrypted1.set_scale(new_scale);
        Ok(())
    }

    /// Product of all ciphertexts, relinearizing after every multiplication.
    pub fn multiply_many(&self, encrypteds: &[Ciphertext], relin_keys: &RelinKeys) -> HeResult<Ciphertext> {
        if encrypteds.is_empty() {
            return Err(HeError::ValueOutOfRange("multiply_many needs at least one ciphertext"));
        }
        let mut level: Vec<Ciphertext> = encrypteds.to_vec();
        while level.len() > 1 {
            let mut next = Vec::with_capacity(level.len().div_ceil(2));
            let mut iter = level.into_iter();
            while let Some(mut left) = iter.next() {
                if let Some(right) = iter.next() {
                    self.multiply_inplace(&mut left, &right)?;
                    self.relinearize_inplace(&mut left, relin_keys)?;
                }
                next.push(left);
            }
            level = next;
        }
        level.pop().ok_or(HeError::ValueOutOfRange("multiply_many needs at least one ciphertext"))
    }

    /// Raises to `exponent >= 1` by square-and-multiply, relinearizing after
    /// every step.
    pub fn exponentiate_inplace(
        &self,
        encrypted: &mut Ciphertext,
        exponent: u64,
        relin_keys: &RelinKeys,
    ) -> HeResult<()> {
        if exponent == 0 {
            return Err(HeError::ValueOutOfRange("exponent must be at least 1"));
        }
        self.validate(encrypted)?;
        let base = encrypted.clone();
        for bit in (0..63 - exponent.leading_zeros()).rev() {
            self.square_inplace(encrypted)?;
            self.relinearize_inplace(encrypted, relin_keys)?;
            if (exponent >> bit) & 1 == 1 {
                self.multiply_inplace(encrypted, &base)?;
                self.relinearize_inplace(encrypted, relin_keys)?;
            }
        }
        Ok(())
    }

    pub fn exponentiate(&self, encrypted: &Ciphertext, exponent: u64, relin_keys: &RelinKeys) -> HeResult<Ciphertext> {
        let mut result = encrypted.clone();
        self.exponentiate_inplace(&mut result, exponent, relin_keys)?;
        Ok(result)
    }

    // ─── Relinearization ───────────────────────────────────────────────────

    /// Brings the ciphertext back to two components, switching the highest
    /// component from `s^k` to `s` one power at a time.
    #[instrument(skip_all, fields(size = encrypted.size()))]
    pub fn relinearize_inplace(&self, encrypted: &mut Ciphertext, relin_keys: &RelinKeys) -> HeResult<()> {
        let context_data = self.validate(encrypted)?;
        if context_data.scheme() == SchemeType::Bfv {
            Self::require_coeff_form(encrypted)?;
        }
        let size = encrypted.size();
        if size == 2 {
            return Ok(());
        }
        if relin_keys.parms_id() != self.context.key_parms_id() {
            return Err(HeError::KeyMismatch);
        }
        let mut powers = Vec::with_capacity(size - 2);
        for power in (2..size).rev() {
            let keys = relin_keys.key(power).ok_or(HeError::MissingRelinKey(size))?;
            check_switch_keys(&self.context, relin_keys.as_kswitch_keys(), keys)?;
            powers.push((power, keys));
        }

        for (power, keys) in powers {
            let target = encrypted.poly(power).to_vec();
            encrypted.resize(power);
            switch_key_inplace(&self.context, encrypted, &target, relin_keys.as_kswitch_keys(), keys)?;
        }
        Self::check_transparent(encrypted)
    }

    pub fn relinearize(&self, encrypted: &Ciphertext, relin_keys: &RelinKeys) -> HeResult<Ciphertext> {
        let mut result = encrypted.clone();
        self.relinearize_inplace(&mut result, relin_keys)?;
        Ok(result)
    }

    // ─── Modulus switching ─────────────────────────────────────────────────

    fn next_level(&self, context_data: &ContextData) -> HeResult<Arc<ContextData>> {
        self.context
            .next_context_data(context_data)
            .cloned()
            .ok_or(HeError::EndOfModulusChain)
    }

    /// Drops the last prime. BFV divides by it with rounding, which keeps the
    /// plaintext and scales the noise down; CKKS only discards the row, which
    /// keeps the scale.
    pub fn mod_switch_to_next_inplace(&self, encrypted: &mut Ciphertext) -> HeResult<()> {
        let context_data = self.validate(encrypted)?;
        let next_data = self.next_level(&context_data)?;
        let next_len = next_data.coeff_count() * next_data.coeff_modulus_size();
        let mut data = Vec::with_capacity(encrypted.size() * next_len);
        match context_data.scheme() {
            SchemeType::Bfv => {
                Self::require_coeff_form(encrypted)?;
                let rns_tool = context_data.rns_tool();
                for poly in encrypted.polys_mut() {
                    rns_tool.divide_and_round_q_last_inplace(poly);
                    data.extend_from_slice(&poly[..next_len]);
                }
            }
            SchemeType::Ckks => {
                Self::check_scale(encrypted.scale(), &next_data)?;
                for poly in encrypted.polys() {
                    data.extend_from_slice(&poly[..next_len]);
                }
            }
            SchemeType::Bgv => return Err(HeError::UnsupportedScheme(SchemeType::Bgv)),
        }
        encrypted.reset_level(&next_data, data);
        debug!(level = next_data.chain_index(), "switched to next level");
        Self::check_transparent(encrypted)
    }

    pub fn mod_switch_to_next(&self, encrypted: &Ciphertext) -> HeResult<Ciphertext> {
        let mut result = encrypted.clone();
        self.mod_switch_to_next_inplace(&mut result)?;
        Ok(result)
    }

    /// Switches down the chain until the ciphertext reaches `parms_id`.
    pub fn mod_switch_to_inplace(&self, encrypted: &mut Ciphertext, parms_id: ParmsId) -> HeResult<()> {
        let context_data = self.validate(encrypted)?;
        let target = self.context_data(&parms_id)?;
        if target.chain_index() > context_data.chain_index() {
            return Err(HeError::InvalidParmsId(parms_id));
        }
        while encrypted.parms_id() != parms_id {
            self.mod_switch_to_next_inplace(encrypted)?;
        }
        Ok(())
    }

    pub fn mod_switch_to(&self, encrypted: &Ciphertext, parms_id: ParmsId) -> HeResult<Ciphertext> {
        let mut result = encrypted.clone();
        self.mod_switch_to_inplace(&mut result, parms_id)?;
        Ok(result)
    }

    /// Drops the last prime of an NTT-form plaintext.
    pub fn mod_switch_plain_to_next_inplace(&self, plain: &mut Plaintext) -> HeResult<()> {
        if !plain.is_ntt_form() {
            return Err(HeError::NttFormMismatch { expected: true });
        }
        let context_data = self.context_data(&plain.parms_id())?;
        let next_data = self.next_level(&context_data)?;
        if self.context.scheme() == SchemeType::Ckks {
            Self::check_scale(plain.scale(), &next_data)?;
        }
        let n = next_data.coeff_count();
        let k = next_data.coeff_modulus_size();
        let mut switched = Plaintext::new_ntt(next_data.parms_id(), n, k);
        switched.data_mut().copy_from_slice(&plain.data()[..n * k]);
        switched.set_scale(plain.scale());
        *plain = switched;
        Ok(())
    }

    pub fn mod_switch_plain_to_inplace(&self, plain: &mut Plaintext, parms_id: ParmsId) -> HeResult<()> {
        if !plain.is_ntt_form() {
            return Err(HeError::NttFormMismatch { expected: true });
        }
        let context_data = self.context_data(&plain.parms_id())?;
        let target = self.context_data(&parms_id)?;
        if target.chain_index() > context_data.chain_index() {
            return Err(HeError::InvalidParmsId(parms_id));
        }
        while plain.parms_id() != parms_id {
            self.mod_switch_plain_to_next_inplace(plain)?;
        }
        Ok(())
    }

    /// Divides a CKKS ciphertext by the last prime with rounding and divides
    /// its scale by the same prime.
    #[instrument(skip_all, fields(scale = encrypted.scale()))]
    pub fn rescale_to_next_inplace(&self, encrypted: &mut Ciphertext) -> HeResult<()> {
        self.require_scheme(SchemeType::Ckks)?;
        let context_data = self.validate(encrypted)?;
        let next_data = self.next_level(&context_data)?;
        let moduli = context_data.coeff_modulus();
        let q_last = moduli[moduli.len() - 1].value() as f64;
        let new_scale = encrypted.scale() / q_last;
        if new_scale <= 0.0 {
            return Err(HeError::ScaleOutOfBounds { scale: new_scale });
        }

        let next_len = next_data.coeff_count() * next_data.coeff_modulus_size();
        let rns_tool = context_data.rns_tool();
        let tables = context_data.small_ntt_tables();
        let mut data = Vec::with_capacity(encrypted.size() * next_len);
        for poly in encrypted.polys_mut() {
            rns_tool.divide_and_round_q_last_ntt_inplace(poly, tables);
            data.extend_from_slice(&poly[..next_len]);
        }
        encrypted.reset_level(&next_data, data);
        encrypted.set_scale(new_scale);
        Self::check_transparent(encrypted)
    }

    pub fn rescale_to_next(&self, encrypted: &Ciphertext) -> HeResult<Ciphertext> {
        let mut result = encrypted.clone();
        self.rescale_to_next_inplace(&mut result)?;
        Ok(result)
    }

    pub fn rescale_to_inplace(&self, encrypted: &mut Ciphertext, parms_id: ParmsId) -> HeResult<()> {
        let context_data = self.validate(encrypted)?;
        let target = self.context_data(&parms_id)?;
        if target.chain_index() > context_data.chain_index() {
            return Err(HeError::InvalidParmsId(parms_id));
        }
        while encrypted.parms_id() != parms_id {
            self.rescale_to_next_inplace(encrypted)?;
        }
        Ok(())
    }

    pub fn rescale_to(&self, encrypted: &Ciphertext, parms_id: ParmsId) -> HeResult<Ciphertext> {
        let mut result = encrypted.clone();
        self.rescale_to_inplace(&mut result, parms_id)?;
        Ok(result)
    }

    // ─── Plaintext operands ────────────────────────────────────────────────

    fn add_sub_plain_inplace(&self, encrypted: &mut Ciphertext, plain: &Plaintext, subtract: bool) -> HeResult<()> {
        let context_data = self.validate(encrypted)?;
        let n = context_data.coeff_count();
        let moduli = context_data.coeff_modulus();
        match context_data.scheme() {
            SchemeType::Bfv => {
                Self::require_coeff_form(encrypted)?;
                let t = validate_bfv_plain(plain, &context_data)?;
                add_scaled_plain(plain, &context_data, &t, encrypted.poly_mut(0), subtract);
            }
            SchemeType::Ckks => {
                validate_ckks_plain(plain, &self.context)?;
                if plain.parms_id() != encrypted.parms_id() {
                    return Err(HeError::ParmsIdMismatch {
                        left: encrypted.parms_id(),
                        right: plain.parms_id(),
                    });
                }
                if !are_close(encrypted.scale(), plain.scale()) {
                    return Err(HeError::ScaleMismatch {
                        left: encrypted.scale(),
                        right: plain.scale(),
                    });
                }
                if subtract {
                    sub_poly_inplace(encrypted.poly_mut(0), plain.data(), moduli, n);
                } else {
                    add_poly_inplace(encrypted.poly_mut(0), plain.data(), moduli, n);
                }
            }
            SchemeType::Bgv => return Err(HeError::UnsupportedScheme(SchemeType::Bgv)),
        }
        Self::check_transparent(encrypted)
    }

    pub fn add_plain_inplace(&self, encrypted: &mut Ciphertext, plain: &Plaintext) -> HeResult<()> {
        self.add_sub_plain_inplace(encrypted, plain, false)
    }

    pub fn add_plain(&self, encrypted: &Ciphertext, plain: &Plaintext) -> HeResult<Ciphertext> {
        let mut result = encrypted.clone();
        self.add_plain_inplace(&mut result, plain)?;
        Ok(result)
    }

    pub fn sub_plain_inplace(&self, encrypted: &mut Ciphertext, plain: &Plaintext) -> HeResult<()> {
        self.add_sub_plain_inplace(encrypted, plain, true)
    }

    pub fn sub_plain(&self, encrypted: &Ciphertext, plain: &Plaintext) -> HeResult<Ciphertext> {
        let mut result = encrypted.clone();
        self.sub_plain_inplace(&mut result, plain)?;
        Ok(result)
    }

    /// Lifts a BFV plaintext to the level's primes, mapping values in the
    /// upper half of `[0, t)` to the upper half of `[0, q)`.
    fn lift_bfv_plain(plain: &Plaintext, context_data: &ContextData) -> HeResult<Vec<u64>> {
        validate_bfv_plain(plain, context_data)?;
        let n = context_data.coeff_count();
        let threshold = context_data.plain_upper_half_threshold();
        let increment = context_data.plain_upper_half_increment();
        let mut lifted = vec![0u64; n * context_data.coeff_modulus_size()];
        for ((row, qj), &inc) in lifted
            .chunks_exact_mut(n)
            .zip(context_data.coeff_modulus())
            .zip(increment)
        {
            for (d, &m) in row.iter_mut().zip(plain.data()) {
                *d = if m >= threshold {
                    barrett_reduce_64(m + inc, qj)
                } else {
                    barrett_reduce_64(m, qj)
                };
            }
        }
        Ok(lifted)
    }

    #[instrument(skip_all, fields(ntt_form = plain.is_ntt_form()))]
    pub fn multiply_plain_inplace(&self, encrypted: &mut Ciphertext, plain: &Plaintext) -> HeResult<()> {
        let context_data = self.validate(encrypted)?;
        let n = context_data.coeff_count();
        let moduli = context_data.coeff_modulus();
        let tables = context_data.small_ntt_tables();
        match context_data.scheme() {
            SchemeType::Bfv if plain.is_ntt_form() => {
                if !encrypted.is_ntt_form() {
                    return Err(HeError::NttFormMismatch { expected: true });
                }
                if plain.parms_id() != encrypted.parms_id() {
                    return Err(HeError::ParmsIdMismatch {
                        left: encrypted.parms_id(),
                        right: plain.parms_id(),
                    });
                }
                for poly in encrypted.polys_mut() {
                    dyadic_product_inplace(poly, plain.data(), moduli, n);
                }
            }
            SchemeType::Bfv => {
                Self::require_coeff_form(encrypted)?;
                let mut lifted = Self::lift_bfv_plain(plain, &context_data)?;
                ntt_poly_inplace(&mut lifted, tables);
                for poly in encrypted.polys_mut() {
                    ntt_poly_inplace(poly, tables);
                    dyadic_product_inplace(poly, &lifted, moduli, n);
                    inverse_ntt_poly_inplace(poly, tables);
                }
            }
            SchemeType::Ckks => {
                validate_ckks_plain(plain, &self.context)?;
                if plain.parms_id() != encrypted.parms_id() {
                    return Err(HeError::ParmsIdMismatch {
                        left: encrypted.parms_id(),
                        right: plain.parms_id(),
                    });
                }
                let new_scale = encrypted.scale() * plain.scale();
                Self::check_scale(new_scale, &context_data)?;
                for poly in encrypted.polys_mut() {
                    dyadic_product_inplace(poly, plain.data(), moduli, n);
                }
                encrypted.set_scale(new_scale);
            }
            SchemeType::Bgv => return Err(HeError::UnsupportedScheme(SchemeType::Bgv)),
        }
        Self::check_transparent(encrypted)
    }

    pub fn multiply_plain(&self, encrypted: &Ciphertext, plain: &Plaintext) -> HeResult<Ciphertext> {
        let mut result = encrypted.clone();
        self.multiply_plain_inplace(&mut result, plain)?;
        Ok(result)
    }

    // ─── NTT form conversions (BFV) ────────────────────────────────────────

    /// Converts a coefficient-form BFV plaintext into an NTT-form plaintext at
    /// `parms_id`, ready for [`Self::multiply_plain_inplace`] against NTT-form
    /// ciphertexts.
    pub fn transform_plain_to_ntt_inplace(&self, plain: &mut Plaintext, parms_id: ParmsId) -> HeResult<()> {
        self.require_scheme(SchemeType::Bfv)?;
        let context_data = self.context_data(&parms_id)?;
        let mut lifted = Self::lift_bfv_plain(plain, &context_data)?;
        ntt_poly_inplace(&mut lifted, context_data.small_ntt_tables());
        let mut transformed = Plaintext::new_ntt(
            parms_id,
            context_data.coeff_count(),
            context_data.coeff_modulus_size(),
        );
        transformed.data_mut().copy_from_slice(&lifted);
        *plain = transformed;
        Ok(())
    }

    pub fn transform_to_ntt_inplace(&self, encrypted: &mut Ciphertext) -> HeResult<()> {
        self.require_scheme(SchemeType::Bfv)?;
        let context_data = self.validate(encrypted)?;
        Self::require_coeff_form(encrypted)?;
        for poly in encrypted.polys_mut() {
            ntt_poly_inplace(poly, context_data.small_ntt_tables());
        }
        encrypted.set_ntt_form(true);
        Ok(())
    }

    pub fn transform_to_ntt(&self, encrypted: &Ciphertext) -> HeResult<Ciphertext> {
        let mut result = encrypted.clone();
        self.transform_to_ntt_inplace(&mut result)?;
        Ok(result)
    }

    pub fn transform_from_ntt_inplace(&self, encrypted: &mut Ciphertext) -> HeResult<()> {
        self.require_scheme(SchemeType::Bfv)?;
        let context_data = self.validate(encrypted)?;
        if !encrypted.is_ntt_form() {
            return Err(HeError::NttFormMismatch { expected: true });
        }
        for poly in encrypted.polys_mut() {
            inverse_ntt_poly_inplace(poly, context_data.small_ntt_tables());
        }
        encrypted.set_ntt_form(false);
        Ok(())
    }

    pub fn transform_from_ntt(&self, encrypted: &Ciphertext) -> HeResult<Ciphertext> {
        let mut result = encrypted.clone();
        self.transform_from_ntt_inplace(&mut result)?;
        Ok(result)
    }

    // ─── Galois automorphisms ──────────────────────────────────────────────

    /// Applies `X -> X^g` to both components and switches the permuted
    /// second component back to the original key.
    #[instrument(skip_all, fields(galois_elt = galois_elt))]
    pub fn apply_galois_inplace(
        &self,
        encrypted: &mut Ciphertext,
        galois_elt: u32,
        galois_keys: &GaloisKeys,
    ) -> HeResult<()> {
        let context_data = self.validate(encrypted)?;
        if encrypted.size() != 2 {
            return Err(HeError::InvalidSize(encrypted.size()));
        }
        if galois_keys.parms_id() != self.context.key_parms_id() {
            return Err(HeError::KeyMismatch);
        }
        let keys = galois_keys
            .key(galois_elt)
            .ok_or(HeError::MissingGaloisKey(galois_elt))?;
        check_switch_keys(&self.context, galois_keys.as_kswitch_keys(), keys)?;
        let galois_tool = context_data.galois_tool();
        let moduli = context_data.coeff_modulus();

        let mut permuted0 = vec![0u64; encrypted.poly_len()];
        let mut target = vec![0u64; encrypted.poly_len()];
        match context_data.scheme() {
            SchemeType::Bfv => {
                Self::require_coeff_form(encrypted)?;
                galois_tool.apply_galois_poly(encrypted.poly(0), galois_elt, moduli, &mut permuted0)?;
                galois_tool.apply_galois_poly(encrypted.poly(1), galois_elt, moduli, &mut target)?;
            }
            SchemeType::Ckks => {
                galois_tool.apply_galois_ntt_poly(encrypted.poly(0), galois_elt, &mut permuted0)?;
                galois_tool.apply_galois_ntt_poly(encrypted.poly(1), galois_elt, &mut target)?;
            }
            SchemeType::Bgv => return Err(HeError::UnsupportedScheme(SchemeType::Bgv)),
        }
        encrypted.poly_mut(0).copy_from_slice(&permuted0);
        encrypted.poly_mut(1).fill(0);
        switch_key_inplace(&self.context, encrypted, &target, galois_keys.as_kswitch_keys(), keys)?;
        Self::check_transparent(encrypted)
    }

    pub fn apply_galois(&self, encrypted: &Ciphertext, galois_elt: u32, galois_keys: &GaloisKeys) -> HeResult<Ciphertext> {
        let mut result = encrypted.clone();
        self.apply_galois_inplace(&mut result, galois_elt, galois_keys)?;
        Ok(result)
    }

    /// Galois elements whose composition rotates by `steps`: the key for that
    /// rotation if present, and otherwise a chain of power-of-two rotations.
    fn rotation_elts(
        &self,
        context_data: &ContextData,
        steps: i32,
        galois_keys: &GaloisKeys,
        elts: &mut Vec<u32>,
    ) -> HeResult<()> {
        if steps == 0 {
            return Ok(());
        }
        let galois_elt = context_data.galois_tool().get_elt_from_step(steps)?;
        if galois_keys.has_key(galois_elt) {
            elts.push(galois_elt);
            return Ok(());
        }
        let terms = naf(steps);
        if terms.len() == 1 {
            return Err(HeError::MissingGaloisKey(galois_elt));
        }
        let row_size = (context_data.coeff_count() >> 1) as i32;
        for step in terms.into_iter().filter(|s| s.abs() != row_size) {
            self.rotation_elts(context_data, step, galois_keys, elts)?;
        }
        Ok(())
    }

    fn rotate_internal(&self, encrypted: &mut Ciphertext, steps: i32, galois_keys: &GaloisKeys) -> HeResult<()> {
        let context_data = self.validate(encrypted)?;
        let mut elts = Vec::new();
        self.rotation_elts(&context_data, steps, galois_keys, &mut elts)?;
        if elts.len() <= 1 {
            return match elts.first() {
                Some(&elt) => self.apply_galois_inplace(encrypted, elt, galois_keys),
                None => Ok(()),
            };
        }
        // A chain can fail part way, so it runs on a copy.
        let mut rotated = encrypted.clone();
        for elt in elts {
            self.apply_galois_inplace(&mut rotated, elt, galois_keys)?;
        }
        *encrypted = rotated;
        Ok(())
    }

    /// Rotates both rows of a batched BFV ciphertext left by `steps`.
    pub fn rotate_rows_inplace(&self, encrypted: &mut Ciphertext, steps: i32, galois_keys: &GaloisKeys) -> HeResult<()> {
        self.require_scheme(SchemeType::Bfv)?;
        self.rotate_internal(encrypted, steps, galois_keys)
    }

    pub fn rotate_rows(&self, encrypted: &Ciphertext, steps: i32, galois_keys: &GaloisKeys) -> HeResult<Ciphertext> {
        let mut result = encrypted.clone();
        self.rotate_rows_inplace(&mut result, steps, galois_keys)?;
        Ok(result)
    }

    /// Swaps the two rows of a batched BFV ciphertext.
    pub fn rotate_columns_inplace(&self, encrypted: &mut Ciphertext, galois_keys: &GaloisKeys) -> HeResult<()> {
        self.require_scheme(SchemeType::Bfv)?;
        let elt = self.context.key_context_data().galois_tool().get_elt_from_step(0)?;
        self.apply_galois_inplace(encrypted, elt, galois_keys)
    }

    pub fn rotate_columns(&self, encrypted: &Ciphertext, galois_keys: &GaloisKeys) -> HeResult<Ciphertext> {
        let mut result = encrypted.clone();
        self.rotate_columns_inplace(&mut result, galois_keys)?;
        Ok(result)
    }

    /// Rotates the CKKS slot vector left by `steps`.
    pub fn rotate_vector_inplace(&self, encrypted: &mut Ciphertext, steps: i32, galois_keys: &GaloisKeys) -> HeResult<()> {
        self.require_scheme(SchemeType::Ckks)?;
        self.rotate_internal(encrypted, steps, galois_keys)
    }

    pub fn rotate_vector(&self, encrypted: &Ciphertext, steps: i32, galois_keys: &GaloisKeys) -> HeResult<Ciphertext> {
        let mut result = encrypted.clone();
        self.rotate_vector_inplace(&mut result, steps, galois_keys)?;
        Ok(result)
    }

    /// Conjugates every CKKS slot.
    pub fn complex_conjugate_inplace(&self, encrypted: &mut Ciphertext, galois_keys: &GaloisKeys) -> HeResult<()> {
        self.require_scheme(SchemeType::Ckks)?;
        let elt = self.context.key_context_data().galois_tool().get_elt_from_step(0)?;
        self.apply_galois_inplace(encrypted, elt, galois_keys)
    }

    pub fn complex_conjugate(&self, encrypted: &Ciphertext, galois_keys: &GaloisKeys) -> HeResult<Ciphertext> {
        let mut result = encrypted.clone();
        self.complex_conjugate_inplace(&mut result, galois_keys)?;
        Ok(result)
    }
}
