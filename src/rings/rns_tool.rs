//! Precomputed bases and routines for RNS-native rescaling, BFV decryption
//! scaling and the BEHZ multiplication pipeline.
//!
//! Auxiliary moduli are 61-bit NTT-friendly primes: `m_sk`, `gamma` and the
//! base `B` of the same size as `q`. `Bsk = B + {m_sk}` carries the tensor
//! product and `m_tilde = 2^32` drives the Montgomery step that removes the
//! `q`-overflow after base extension.

use tracing::debug;

use crate::math::{
    Modulus, MultiplyModOperand, add_uint_mod, barrett_reduce_64, get_primes,
    modulus::MAX_MODULUS_BITS, multiply_add_uint_mod, multiply_uint_mod,
    multiply_uint_mod_operand, negate_uint_mod, sub_uint_mod, try_invert_uint_mod,
};

use super::{
    RingError, RingResult,
    ntt::{NttTables, inverse_ntt_negacyclic_harvey, ntt_negacyclic_harvey},
    rns_base::{BaseConverter, RnsBase, reduce_uint},
};

#[derive(Debug, Clone)]
pub struct RnsTool {
    coeff_count: usize,
    base_q: RnsBase,
    base_b: RnsBase,
    base_bsk: RnsBase,
    base_bsk_m_tilde: RnsBase,

    base_q_to_bsk_conv: BaseConverter,
    base_q_to_m_tilde_conv: BaseConverter,
    base_b_to_q_conv: BaseConverter,
    base_b_to_m_sk_conv: BaseConverter,
    base_q_to_t_gamma_conv: Option<BaseConverter>,

    base_bsk_ntt_tables: Vec<NttTables>,

    m_tilde: Modulus,
    m_sk: Modulus,
    t: Option<Modulus>,
    gamma: Modulus,

    inv_prod_q_mod_bsk: Vec<MultiplyModOperand>,
    neg_inv_prod_q_mod_m_tilde: MultiplyModOperand,
    inv_prod_b_mod_m_sk: MultiplyModOperand,
    inv_gamma_mod_t: Option<MultiplyModOperand>,
    prod_b_mod_q: Vec<u64>,
    inv_m_tilde_mod_bsk: Vec<MultiplyModOperand>,
    prod_q_mod_bsk: Vec<u64>,
    neg_inv_q_mod_t_gamma: Vec<MultiplyModOperand>,
    prod_t_gamma_mod_q: Vec<MultiplyModOperand>,
    inv_q_last_mod_q: Vec<MultiplyModOperand>,
    m_tilde_mod_q: Vec<MultiplyModOperand>,
}

impl RnsTool {
    /// Builds the tool for degree `n`, data base `coeff_modulus` and an
    /// optional plain modulus (absent for CKKS).
    pub fn new(n: usize, coeff_modulus: &RnsBase, plain_modulus: Option<Modulus>) -> RingResult<Self> {
        if !n.is_power_of_two() || !(2..=1 << 17).contains(&n) {
            return Err(RingError::InvalidDegree(n));
        }
        let base_q = coeff_modulus.clone();
        let base_q_size = base_q.size();
        let base_b_size = base_q_size;
        let base_bsk_m_tilde_size = base_b_size + 2;

        let aux = get_primes(2 * n as u64, MAX_MODULUS_BITS, base_bsk_m_tilde_size)?;
        let m_sk = aux[0];
        let gamma = aux[1];
        let base_b = RnsBase::new(&aux[2..])?;
        let base_bsk = base_b.extend(m_sk)?;
        let m_tilde = Modulus::new(1 << 32)?;
        let base_bsk_m_tilde = base_bsk.extend(m_tilde)?;
        let base_m_tilde = RnsBase::new(&[m_tilde])?;
        let base_m_sk = RnsBase::new(&[m_sk])?;

        let base_q_to_t_gamma_conv = match plain_modulus {
            Some(t) => Some(BaseConverter::new(&base_q, &RnsBase::new(&[t, gamma])?)),
            None => None,
        };

        let base_bsk_ntt_tables = NttTables::create_many(n.trailing_zeros(), base_bsk.base())?;

        let prod_q = base_q.base_prod();
        let prod_q_mod_bsk: Vec<u64> = base_bsk.base().iter().map(|m| reduce_uint(prod_q, m)).collect();
        let inv_prod_q_mod_bsk = prod_q_mod_bsk
            .iter()
            .zip(base_bsk.base())
            .map(|(&v, m)| Ok(MultiplyModOperand::new(try_invert_uint_mod(v, m)?, m)))
            .collect::<RingResult<Vec<_>>>()?;

        let prod_b_mod_q: Vec<u64> = base_q
            .base()
            .iter()
            .map(|m| reduce_uint(base_b.base_prod(), m))
            .collect();
        let inv_prod_b_mod_m_sk = MultiplyModOperand::new(
            try_invert_uint_mod(reduce_uint(base_b.base_prod(), &m_sk), &m_sk)?,
            &m_sk,
        );

        let inv_m_tilde_mod_bsk = base_bsk
            .base()
            .iter()
            .map(|m| {
                let inv = try_invert_uint_mod(barrett_reduce_64(m_tilde.value(), m), m)?;
                Ok(MultiplyModOperand::new(inv, m))
            })
            .collect::<RingResult<Vec<_>>>()?;

        let inv_prod_q_mod_m_tilde = try_invert_uint_mod(reduce_uint(prod_q, &m_tilde), &m_tilde)?;
        let neg_inv_prod_q_mod_m_tilde =
            MultiplyModOperand::new(negate_uint_mod(inv_prod_q_mod_m_tilde, &m_tilde), &m_tilde);

        let m_tilde_mod_q = base_q
            .base()
            .iter()
            .map(|m| MultiplyModOperand::new(barrett_reduce_64(m_tilde.value(), m), m))
            .collect();

        let (inv_gamma_mod_t, prod_t_gamma_mod_q, neg_inv_q_mod_t_gamma) = match plain_modulus {
            Some(t) => {
                let inv_gamma = try_invert_uint_mod(barrett_reduce_64(gamma.value(), &t), &t)?;
                let prod_t_gamma = base_q
                    .base()
                    .iter()
                    .map(|m| {
                        let v = multiply_uint_mod(t.value(), gamma.value(), m);
                        MultiplyModOperand::new(v, m)
                    })
                    .collect();
                let neg_inv_q = [t, gamma]
                    .iter()
                    .map(|m| {
                        let inv = try_invert_uint_mod(reduce_uint(prod_q, m), m)?;
                        Ok(MultiplyModOperand::new(negate_uint_mod(inv, m), m))
                    })
                    .collect::<RingResult<Vec<_>>>()?;
                (Some(MultiplyModOperand::new(inv_gamma, &t)), prod_t_gamma, neg_inv_q)
            }
            None => (None, Vec::new(), Vec::new()),
        };

        let inv_q_last_mod_q = match base_q.base().split_last() {
            Some((last, rest)) => rest
                .iter()
                .map(|m| {
                    let inv = try_invert_uint_mod(barrett_reduce_64(last.value(), m), m)?;
                    Ok(MultiplyModOperand::new(inv, m))
                })
                .collect::<RingResult<Vec<_>>>()?,
            None => Vec::new(),
        };

        debug!(
            n,
            base_q_size,
            m_sk = m_sk.value(),
            gamma = gamma.value(),
            "initialized RNS tool"
        );

        Ok(Self {
            coeff_count: n,
            base_q_to_bsk_conv: BaseConverter::new(&base_q, &base_bsk),
            base_q_to_m_tilde_conv: BaseConverter::new(&base_q, &base_m_tilde),
            base_b_to_q_conv: BaseConverter::new(&base_b, &base_q),
            base_b_to_m_sk_conv: BaseConverter::new(&base_b, &base_m_sk),
            base_q_to_t_gamma_conv,
            base_q,
            base_b,
            base_bsk,
            base_bsk_m_tilde,
            base_bsk_ntt_tables,
            m_tilde,
            m_sk,
            t: plain_modulus,
            gamma,
            inv_prod_q_mod_bsk,
            neg_inv_prod_q_mod_m_tilde,
            inv_prod_b_mod_m_sk,
            inv_gamma_mod_t,
            prod_b_mod_q,
            inv_m_tilde_mod_bsk,
            prod_q_mod_bsk,
            neg_inv_q_mod_t_gamma,
            prod_t_gamma_mod_q,
            inv_q_last_mod_q,
            m_tilde_mod_q,
        })
    }

    pub fn coeff_count(&self) -> usize {
        self.coeff_count
    }

    pub fn base_q(&self) -> &RnsBase {
        &self.base_q
    }

    pub fn base_b(&self) -> &RnsBase {
        &self.base_b
    }

    pub fn base_bsk(&self) -> &RnsBase {
        &self.base_bsk
    }

    pub fn base_bsk_m_tilde(&self) -> &RnsBase {
        &self.base_bsk_m_tilde
    }

    pub fn base_bsk_ntt_tables(&self) -> &[NttTables] {
        &self.base_bsk_ntt_tables
    }

    pub fn m_tilde(&self) -> &Modulus {
        &self.m_tilde
    }

    pub fn m_sk(&self) -> &Modulus {
        &self.m_sk
    }

    pub fn gamma(&self) -> &Modulus {
        &self.gamma
    }

    pub fn t(&self) -> Option<&Modulus> {
        self.t.as_ref()
    }

    pub fn inv_q_last_mod_q(&self) -> &[MultiplyModOperand] {
        &self.inv_q_last_mod_q
    }

    // ─── Rescaling by the last prime ───────────────────────────────────────

    /// `round(x / q_last)` on a coefficient-form polynomial over `base_q`.
    /// On return the first `k - 1` rows hold the result; the last row is
    /// scratch.
    pub fn divide_and_round_q_last_inplace(&self, input: &mut [u64]) {
        let n = self.coeff_count;
        let k = self.base_q.size();
        debug_assert_eq!(input.len(), k * n);
        let q_last = *self.base_q.get(k - 1);
        let half = q_last.value() >> 1;

        let (head, last) = input.split_at_mut((k - 1) * n);
        for x in last.iter_mut() {
            *x = barrett_reduce_64(*x + half, &q_last);
        }

        for (i, row) in head.chunks_exact_mut(n).enumerate() {
            let qi = self.base_q.get(i);
            let half_mod = barrett_reduce_64(half, qi);
            let inv = &self.inv_q_last_mod_q[i];
            for (x, &l) in row.iter_mut().zip(last.iter()) {
                let temp = sub_uint_mod(barrett_reduce_64(l, qi), half_mod, qi);
                *x = multiply_uint_mod_operand(sub_uint_mod(*x, temp, qi), inv, qi);
            }
        }
    }

    /// As [`Self::divide_and_round_q_last_inplace`] for an NTT-form input.
    pub fn divide_and_round_q_last_ntt_inplace(&self, input: &mut [u64], rns_ntt_tables: &[NttTables]) {
        let n = self.coeff_count;
        let k = self.base_q.size();
        debug_assert_eq!(input.len(), k * n);
        let q_last = *self.base_q.get(k - 1);
        let half = q_last.value() >> 1;

        let (head, last) = input.split_at_mut((k - 1) * n);
        inverse_ntt_negacyclic_harvey(last, &rns_ntt_tables[k - 1]);
        for x in last.iter_mut() {
            *x = barrett_reduce_64(*x + half, &q_last);
        }

        let mut temp = vec![0u64; n];
        for (i, row) in head.chunks_exact_mut(n).enumerate() {
            let qi = self.base_q.get(i);
            let half_mod = barrett_reduce_64(half, qi);
            for (t, &l) in temp.iter_mut().zip(last.iter()) {
                *t = sub_uint_mod(barrett_reduce_64(l, qi), half_mod, qi);
            }
            ntt_negacyclic_harvey(&mut temp, &rns_ntt_tables[i]);
            let inv = &self.inv_q_last_mod_q[i];
            for (x, &t) in row.iter_mut().zip(temp.iter()) {
                *x = multiply_uint_mod_operand(sub_uint_mod(*x, t, qi), inv, qi);
            }
        }
    }

    // ─── BEHZ base extension ───────────────────────────────────────────────

    /// Extends `m_tilde * x` from `q` to `Bsk + {m_tilde}`, up to a small
    /// multiple of `q`.
    pub fn fastbconv_m_tilde(&self, input: &[u64], dest: &mut [u64]) {
        let n = self.coeff_count;
        let base_q_size = self.base_q.size();
        let base_bsk_size = self.base_bsk.size();
        debug_assert_eq!(input.len(), base_q_size * n);
        debug_assert_eq!(dest.len(), (base_bsk_size + 1) * n);

        let mut temp = input.to_vec();
        for (i, row) in temp.chunks_exact_mut(n).enumerate() {
            let qi = self.base_q.get(i);
            for x in row.iter_mut() {
                *x = multiply_uint_mod_operand(*x, &self.m_tilde_mod_q[i], qi);
            }
        }

        let (bsk_part, m_tilde_part) = dest.split_at_mut(base_bsk_size * n);
        self.base_q_to_bsk_conv.fast_convert_array(&temp, n, bsk_part);
        self.base_q_to_m_tilde_conv.fast_convert_array(&temp, n, m_tilde_part);
    }

    /// Small Montgomery reduction: removes the `q`-overflow left by
    /// [`Self::fastbconv_m_tilde`] and divides out `m_tilde`. Output is in
    /// `Bsk`.
    pub fn sm_mrq(&self, input: &[u64], dest: &mut [u64]) {
        let n = self.coeff_count;
        let base_bsk_size = self.base_bsk.size();
        debug_assert_eq!(input.len(), (base_bsk_size + 1) * n);
        debug_assert_eq!(dest.len(), base_bsk_size * n);

        let m_tilde = &self.m_tilde;
        let m_tilde_div_2 = m_tilde.value() >> 1;
        let input_m_tilde = &input[base_bsk_size * n..];
        let r_m_tilde: Vec<u64> = input_m_tilde
            .iter()
            .map(|&x| multiply_uint_mod_operand(x, &self.neg_inv_prod_q_mod_m_tilde, m_tilde))
            .collect();

        for (i, (dst, src)) in dest
            .chunks_exact_mut(n)
            .zip(input.chunks_exact(n))
            .enumerate()
        {
            let bsk_i = self.base_bsk.get(i);
            let prod_q = self.prod_q_mod_bsk[i];
            for ((d, &s), &r) in dst.iter_mut().zip(src).zip(&r_m_tilde) {
                // Center r around zero before lifting it into Bsk_i.
                let r = if r >= m_tilde_div_2 {
                    r + bsk_i.value() - m_tilde.value()
                } else {
                    r
                };
                let sum = multiply_add_uint_mod(prod_q, r, s, bsk_i);
                *d = multiply_uint_mod_operand(sum, &self.inv_m_tilde_mod_bsk[i], bsk_i);
            }
        }
    }

    /// Given `x` over `q + Bsk`, returns `floor(x / q)` over `Bsk` up to a
    /// small additive error.
    pub fn fast_floor(&self, input: &[u64], dest: &mut [u64]) {
        let n = self.coeff_count;
        let base_q_size = self.base_q.size();
        let base_bsk_size = self.base_bsk.size();
        debug_assert_eq!(input.len(), (base_q_size + base_bsk_size) * n);
        debug_assert_eq!(dest.len(), base_bsk_size * n);

        let (input_q, input_bsk) = input.split_at(base_q_size * n);
        self.base_q_to_bsk_conv.fast_convert_array(input_q, n, dest);

        for (i, (dst, src)) in dest
            .chunks_exact_mut(n)
            .zip(input_bsk.chunks_exact(n))
            .enumerate()
        {
            let bsk_i = self.base_bsk.get(i);
            for (d, &s) in dst.iter_mut().zip(src) {
                *d = multiply_uint_mod_operand(
                    s + bsk_i.value() - *d,
                    &self.inv_prod_q_mod_bsk[i],
                    bsk_i,
                );
            }
        }
    }

    /// Shenoy-Kumaresan conversion from `Bsk` back to `q`, exact for inputs
    /// of magnitude well below `B / 2`.
    pub fn fastbconv_sk(&self, input: &[u64], dest: &mut [u64]) {
        let n = self.coeff_count;
        let base_b_size = self.base_b.size();
        debug_assert_eq!(input.len(), (base_b_size + 1) * n);
        debug_assert_eq!(dest.len(), self.base_q.size() * n);

        let (input_b, input_m_sk) = input.split_at(base_b_size * n);
        self.base_b_to_q_conv.fast_convert_array(input_b, n, dest);

        let m_sk = &self.m_sk;
        let mut alpha_sk = vec![0u64; n];
        self.base_b_to_m_sk_conv.fast_convert_array(input_b, n, &mut alpha_sk);
        for (a, &x) in alpha_sk.iter_mut().zip(input_m_sk) {
            *a = multiply_uint_mod_operand(*a + (m_sk.value() - x), &self.inv_prod_b_mod_m_sk, m_sk);
        }

        let m_sk_div_2 = m_sk.value() >> 1;
        for (i, dst) in dest.chunks_exact_mut(n).enumerate() {
            let qi = self.base_q.get(i);
            let prod_b = self.prod_b_mod_q[i];
            let neg_prod_b = qi.value() - prod_b;
            for (d, &alpha) in dst.iter_mut().zip(&alpha_sk) {
                *d = if alpha > m_sk_div_2 {
                    multiply_add_uint_mod(prod_b, m_sk.value() - alpha, *d, qi)
                } else {
                    multiply_add_uint_mod(neg_prod_b, alpha, *d, qi)
                };
            }
        }
    }

    // ─── BFV decryption ───────────────────────────────────────────────────

    /// `round(t * x / q) mod t` for a coefficient-form polynomial over `q`,
    /// using the `gamma` correction.
    pub fn decrypt_scale_and_round(&self, input: &[u64], dest: &mut [u64]) -> RingResult<()> {
        let n = self.coeff_count;
        let (Some(t), Some(conv), Some(inv_gamma_mod_t)) = (
            self.t.as_ref(),
            self.base_q_to_t_gamma_conv.as_ref(),
            self.inv_gamma_mod_t.as_ref(),
        ) else {
            return Err(RingError::InvalidPlainModulus(0));
        };
        debug_assert_eq!(input.len(), self.base_q.size() * n);
        debug_assert_eq!(dest.len(), n);

        let mut temp = input.to_vec();
        for (i, row) in temp.chunks_exact_mut(n).enumerate() {
            let qi = self.base_q.get(i);
            for x in row.iter_mut() {
                *x = multiply_uint_mod_operand(*x, &self.prod_t_gamma_mod_q[i], qi);
            }
        }

        let mut temp_t_gamma = vec![0u64; 2 * n];
        conv.fast_convert_array(&temp, n, &mut temp_t_gamma);
        let t_gamma = [*t, self.gamma];
        for (row, (m, factor)) in temp_t_gamma
            .chunks_exact_mut(n)
            .zip(t_gamma.iter().zip(&self.neg_inv_q_mod_t_gamma))
        {
            for x in row.iter_mut() {
                *x = multiply_uint_mod_operand(*x, factor, m);
            }
        }

        let gamma = self.gamma.value();
        let gamma_div_2 = gamma >> 1;
        let (temp_t, temp_gamma) = temp_t_gamma.split_at(n);
        for ((d, &xt), &xg) in dest.iter_mut().zip(temp_t).zip(temp_gamma) {
            let value = if xg > gamma_div_2 {
                add_uint_mod(xt, barrett_reduce_64(gamma - xg, t), t)
            } else {
                sub_uint_mod(xt, barrett_reduce_64(xg, t), t)
            };
            *d = if value != 0 {
                multiply_uint_mod_operand(value, inv_gamma_mod_t, t)
            } else {
                0
            };
        }
        Ok(())
    }
}
