//! Hybrid key switching with one special prime.
//!
//! The target polynomial is split into its residues modulo each data prime
//! `q_J`. Each residue, lifted to every prime of the key level, multiplies
//! the `J`-th key-switching key; the sum is an encryption of `P * target * s'`
//! under `s` over `q * P`, and dividing by the special prime `P` with
//! rounding leaves an encryption of `target * s'` that is added onto the
//! ciphertext.

use rayon::prelude::*;

use crate::ciphertext::Ciphertext;
use crate::context::{Context, MAX_USER_MODULUS_BITS};
use crate::keys::{KSwitchKeys, PublicKey};
use crate::math::{
    add_uint_mod, barrett_reduce_128, barrett_reduce_64, modarith::multiply_accumulate_bound,
    multiply_uint_mod_operand, sub_uint_mod,
};
use crate::rings::ntt::{inverse_ntt_negacyclic_harvey, ntt_negacyclic_harvey};

use super::{HeError, HeResult};

/// Checks that `keys` can switch ciphertexts of this context, so callers can
/// fail before touching their operand.
pub(super) fn check_switch_keys(context: &Context, kswitch_keys: &KSwitchKeys, keys: &[PublicKey]) -> HeResult<()> {
    if !context.using_keyswitching() {
        return Err(HeError::KeySwitchingUnavailable);
    }
    if kswitch_keys.parms_id() != context.key_parms_id() {
        return Err(HeError::KeyMismatch);
    }
    let key_mod_count = context.key_context_data().coeff_modulus_size();
    if keys.len() != context.first_context_data().coeff_modulus_size()
        || keys.iter().any(|k| k.data().coeff_modulus_size() != key_mod_count)
    {
        return Err(HeError::KeyMismatch);
    }
    Ok(())
}

/// Adds the key-switched `target` onto components 0 and 1 of `encrypted`.
///
/// `target` has the ciphertext's level and form. `keys` holds one
/// key-level encryption per prime of the first data level.
pub(super) fn switch_key_inplace(
    context: &Context,
    encrypted: &mut Ciphertext,
    target: &[u64],
    kswitch_keys: &KSwitchKeys,
    keys: &[PublicKey],
) -> HeResult<()> {
    check_switch_keys(context, kswitch_keys, keys)?;
    let context_data = context
        .get_context_data(&encrypted.parms_id())
        .ok_or(HeError::InvalidParmsId(encrypted.parms_id()))?;
    let key_data = context.key_context_data();
    let key_modulus = key_data.coeff_modulus();
    let key_ntt_tables = key_data.small_ntt_tables();
    let key_mod_count = key_modulus.len();
    let decomp_mod_count = context_data.coeff_modulus_size();
    let rns_mod_count = decomp_mod_count + 1;
    let n = context_data.coeff_count();
    let is_ntt_form = encrypted.is_ntt_form();

    debug_assert_eq!(target.len(), decomp_mod_count * n);

    // Residues of the target in coefficient form.
    let mut t_target = target.to_vec();
    if is_ntt_form {
        t_target
            .par_chunks_exact_mut(n)
            .zip(key_ntt_tables.par_iter())
            .for_each(|(row, tables)| inverse_ntt_negacyclic_harvey(row, tables));
    }

    // poly_prod[I] holds both output components modulo the I-th prime of
    // the extended base, in NTT form.
    let bound = multiply_accumulate_bound(MAX_USER_MODULUS_BITS);
    let poly_prod: Vec<[Vec<u64>; 2]> = (0..rns_mod_count)
        .into_par_iter()
        .map(|i| {
            let key_index = if i == decomp_mod_count { key_mod_count - 1 } else { i };
            let key_mod = &key_modulus[key_index];
            let mut acc = [vec![0u128; n], vec![0u128; n]];
            let mut t_ntt = vec![0u64; n];
            for j in 0..decomp_mod_count {
                if is_ntt_form && i == j {
                    t_ntt.copy_from_slice(&target[j * n..(j + 1) * n]);
                } else {
                    let row = &t_target[j * n..(j + 1) * n];
                    if key_modulus[j].value() <= key_mod.value() {
                        t_ntt.copy_from_slice(row);
                    } else {
                        for (d, &s) in t_ntt.iter_mut().zip(row) {
                            *d = barrett_reduce_64(s, key_mod);
                        }
                    }
                    ntt_negacyclic_harvey(&mut t_ntt, &key_ntt_tables[key_index]);
                }

                let key = keys[j].data();
                for (k, acc_k) in acc.iter_mut().enumerate() {
                    let key_row = &key.poly(k)[key_index * n..(key_index + 1) * n];
                    for ((a, &x), &y) in acc_k.iter_mut().zip(&t_ntt).zip(key_row) {
                        *a += x as u128 * y as u128;
                    }
                    if (j + 1) % bound == 0 {
                        for a in acc_k.iter_mut() {
                            *a = barrett_reduce_128(*a, key_mod) as u128;
                        }
                    }
                }
            }
            acc.map(|acc_k| {
                acc_k
                    .into_iter()
                    .map(|a| barrett_reduce_128(a, key_mod))
                    .collect()
            })
        })
        .collect();

    // Divide by the special prime with rounding and add into the ciphertext.
    let special = &key_modulus[key_mod_count - 1];
    let special_half = special.value() >> 1;
    let inv_special_mod_q = key_data.rns_tool().inv_q_last_mod_q();
    for k in 0..2 {
        let mut last = poly_prod[decomp_mod_count][k].clone();
        inverse_ntt_negacyclic_harvey(&mut last, &key_ntt_tables[key_mod_count - 1]);
        for x in last.iter_mut() {
            *x = barrett_reduce_64(*x + special_half, special);
        }

        encrypted
            .poly_mut(k)
            .par_chunks_exact_mut(n)
            .enumerate()
            .for_each(|(j, dest)| {
                let qj = &key_modulus[j];
                let half_mod = barrett_reduce_64(special_half, qj);
                let mut correction: Vec<u64> = last
                    .iter()
                    .map(|&x| sub_uint_mod(barrett_reduce_64(x, qj), half_mod, qj))
                    .collect();
                let mut prod = poly_prod[j][k].clone();
                if is_ntt_form {
                    ntt_negacyclic_harvey(&mut correction, &key_ntt_tables[j]);
                } else {
                    inverse_ntt_negacyclic_harvey(&mut prod, &key_ntt_tables[j]);
                }
                for ((d, &p), &c) in dest.iter_mut().zip(&prod).zip(&correction) {
                    let scaled = multiply_uint_mod_operand(sub_uint_mod(p, c, qj), &inv_special_mod_q[j], qj);
                    *d = add_uint_mod(*d, scaled, qj);
                }
            });
    }
    Ok(())
}
