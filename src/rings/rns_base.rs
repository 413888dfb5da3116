//! RNS bases, CRT composition and fast base conversion.

use crate::math::{
    Modulus, MultiplyModOperand, barrett_reduce_128, barrett_reduce_64, multiply_uint_mod_operand,
    try_invert_uint_mod,
    uint::{add_uint_inplace, is_greater_than_or_equal_uint, multiply_uint_u64, sub_uint_inplace},
};

use super::{RingError, RingResult};

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Reduces a little-endian multi-word value modulo `modulus`.
pub(crate) fn reduce_uint(value: &[u64], modulus: &Modulus) -> u64 {
    value.iter().rev().fold(0u64, |acc, &word| {
        barrett_reduce_128(((acc as u128) << 64) | word as u128, modulus)
    })
}

/// A list of pairwise coprime moduli with CRT constants.
///
/// For `Q = prod q_i`, `punctured_prod(i) = Q / q_i` as a multi-word integer
/// and `inv_punctured_prod_mod_base(i) = (Q / q_i)^-1 mod q_i`.
#[derive(Debug, Clone)]
pub struct RnsBase {
    base: Vec<Modulus>,
    base_prod: Vec<u64>,
    punctured_prod: Vec<u64>,
    inv_punctured_prod_mod_base: Vec<MultiplyModOperand>,
}

impl RnsBase {
    pub fn new(moduli: &[Modulus]) -> RingResult<Self> {
        if moduli.is_empty() {
            return Err(RingError::EmptyBase);
        }
        for (i, a) in moduli.iter().enumerate() {
            for b in &moduli[i + 1..] {
                if gcd(a.value(), b.value()) != 1 {
                    return Err(RingError::NotCoprime(a.value(), b.value()));
                }
            }
        }

        let size = moduli.len();
        let mut base_prod = vec![0u64; size];
        let mut punctured_prod = vec![0u64; size * size];
        let mut inv_punctured_prod_mod_base = Vec::with_capacity(size);

        if size == 1 {
            base_prod[0] = moduli[0].value();
            punctured_prod[0] = 1;
            inv_punctured_prod_mod_base.push(MultiplyModOperand::new(1, &moduli[0]));
        } else {
            let mut scratch = vec![0u64; size];
            for i in 0..size {
                let row = &mut punctured_prod[i * size..(i + 1) * size];
                row[0] = 1;
                for (j, m) in moduli.iter().enumerate() {
                    if j != i {
                        multiply_uint_u64(row, m.value(), &mut scratch);
                        row.copy_from_slice(&scratch);
                    }
                }
                let punctured_mod = reduce_uint(row, &moduli[i]);
                let inverse = try_invert_uint_mod(punctured_mod, &moduli[i])?;
                inv_punctured_prod_mod_base.push(MultiplyModOperand::new(inverse, &moduli[i]));
            }
            multiply_uint_u64(&punctured_prod[..size], moduli[0].value(), &mut base_prod);
        }

        Ok(Self {
            base: moduli.to_vec(),
            base_prod,
            punctured_prod,
            inv_punctured_prod_mod_base,
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.base.len()
    }

    #[inline]
    pub fn base(&self) -> &[Modulus] {
        &self.base
    }

    #[inline]
    pub fn get(&self, index: usize) -> &Modulus {
        &self.base[index]
    }

    /// The product of all moduli, `size()` words.
    pub fn base_prod(&self) -> &[u64] {
        &self.base_prod
    }

    pub fn punctured_prod(&self, index: usize) -> &[u64] {
        let size = self.size();
        &self.punctured_prod[index * size..(index + 1) * size]
    }

    pub fn inv_punctured_prod_mod_base(&self) -> &[MultiplyModOperand] {
        &self.inv_punctured_prod_mod_base
    }

    pub fn contains(&self, modulus: &Modulus) -> bool {
        self.base.contains(modulus)
    }

    pub fn is_subbase_of(&self, superbase: &RnsBase) -> bool {
        self.base.iter().all(|m| superbase.contains(m))
    }

    /// A new base with `modulus` appended.
    pub fn extend(&self, modulus: Modulus) -> RingResult<Self> {
        let mut moduli = self.base.clone();
        moduli.push(modulus);
        Self::new(&moduli)
    }

    pub fn extend_base(&self, other: &RnsBase) -> RingResult<Self> {
        let mut moduli = self.base.clone();
        moduli.extend_from_slice(&other.base);
        Self::new(&moduli)
    }

    /// A new base without its last modulus.
    pub fn drop_last(&self) -> RingResult<Self> {
        if self.size() == 1 {
            return Err(RingError::EmptyBase);
        }
        Self::new(&self.base[..self.size() - 1])
    }

    pub fn drop(&self, modulus: &Modulus) -> RingResult<Self> {
        if !self.contains(modulus) {
            return Err(RingError::ModulusNotInBase(modulus.value()));
        }
        let moduli: Vec<Modulus> = self.base.iter().copied().filter(|m| m != modulus).collect();
        if moduli.is_empty() {
            return Err(RingError::EmptyBase);
        }
        Self::new(&moduli)
    }

    /// Replaces a `size()`-word integer by its residues, in place.
    pub fn decompose(&self, value: &mut [u64]) {
        debug_assert_eq!(value.len(), self.size());
        if self.size() == 1 {
            value[0] = barrett_reduce_64(value[0], &self.base[0]);
            return;
        }
        let copy = value.to_vec();
        for (slot, m) in value.iter_mut().zip(&self.base) {
            *slot = reduce_uint(&copy, m);
        }
    }

    /// Decomposes `count` consecutive `size()`-word integers. The output is
    /// row-major: residues modulo `q_i` occupy `[i * count, (i + 1) * count)`.
    pub fn decompose_array(&self, values: &mut [u64], count: usize) {
        let size = self.size();
        debug_assert_eq!(values.len(), size * count);
        if size == 1 {
            for x in values.iter_mut() {
                *x = barrett_reduce_64(*x, &self.base[0]);
            }
            return;
        }
        let copy = values.to_vec();
        for (i, m) in self.base.iter().enumerate() {
            for j in 0..count {
                values[i * count + j] = reduce_uint(&copy[j * size..(j + 1) * size], m);
            }
        }
    }

    /// Replaces residues by the integer in `[0, Q)` they represent.
    pub fn compose(&self, value: &mut [u64]) {
        let size = self.size();
        debug_assert_eq!(value.len(), size);
        if size == 1 {
            return;
        }
        let residues = value.to_vec();
        value.fill(0);
        let mut term = vec![0u64; size];
        for (i, &residue) in residues.iter().enumerate() {
            let m = &self.base[i];
            let scaled = multiply_uint_mod_operand(residue, &self.inv_punctured_prod_mod_base[i], m);
            multiply_uint_u64(self.punctured_prod(i), scaled, &mut term);
            add_uint_mod_base(value, &term, &self.base_prod);
        }
    }

    /// Inverse of [`RnsBase::decompose_array`].
    pub fn compose_array(&self, values: &mut [u64], count: usize) {
        let size = self.size();
        debug_assert_eq!(values.len(), size * count);
        if size == 1 {
            return;
        }
        let residues = values.to_vec();
        let mut single = vec![0u64; size];
        for j in 0..count {
            for i in 0..size {
                single[i] = residues[i * count + j];
            }
            self.compose(&mut single);
            values[j * size..(j + 1) * size].copy_from_slice(&single);
        }
    }
}

/// `value = (value + operand) mod modulus` for multi-word values below
/// `modulus`.
fn add_uint_mod_base(value: &mut [u64], operand: &[u64], modulus: &[u64]) {
    let carry = add_uint_inplace(value, operand);
    if carry || is_greater_than_or_equal_uint(value, modulus) {
        sub_uint_inplace(value, modulus);
    }
}

/// Approximate conversion from one RNS base to another:
/// `x mod p_k ~ sum_i [x_i * (Q/q_i)^-1]_{q_i} * (Q/q_i) mod p_k`.
///
/// The result can be off by a small multiple of `Q`; callers correct for that
/// where it matters.
#[derive(Debug, Clone)]
pub struct BaseConverter {
    ibase: RnsBase,
    obase: RnsBase,
    /// `base_change_matrix[k][i] = (Q / q_i) mod p_k`.
    base_change_matrix: Vec<Vec<u64>>,
}

impl BaseConverter {
    pub fn new(ibase: &RnsBase, obase: &RnsBase) -> Self {
        let base_change_matrix = obase
            .base()
            .iter()
            .map(|p| {
                (0..ibase.size())
                    .map(|i| reduce_uint(ibase.punctured_prod(i), p))
                    .collect()
            })
            .collect();
        Self {
            ibase: ibase.clone(),
            obase: obase.clone(),
            base_change_matrix,
        }
    }

    pub fn ibase(&self) -> &RnsBase {
        &self.ibase
    }

    pub fn obase(&self) -> &RnsBase {
        &self.obase
    }

    /// Converts `n` coefficients given as `ibase.size()` rows into
    /// `obase.size()` rows.
    pub fn fast_convert_array(&self, input: &[u64], n: usize, output: &mut [u64]) {
        let ibase_size = self.ibase.size();
        debug_assert_eq!(input.len(), ibase_size * n);
        debug_assert_eq!(output.len(), self.obase.size() * n);

        let mut temp = vec![0u64; ibase_size * n];
        for (i, (src, dst)) in input.chunks_exact(n).zip(temp.chunks_exact_mut(n)).enumerate() {
            let m = self.ibase.get(i);
            let inv = &self.ibase.inv_punctured_prod_mod_base()[i];
            for (x, &y) in dst.iter_mut().zip(src) {
                *x = multiply_uint_mod_operand(y, inv, m);
            }
        }

        for (k, out_row) in output.chunks_exact_mut(n).enumerate() {
            let p = self.obase.get(k);
            let row = &self.base_change_matrix[k];
            for (j, out) in out_row.iter_mut().enumerate() {
                let mut acc = 0u128;
                for (i, &factor) in row.iter().enumerate() {
                    acc += temp[i * n + j] as u128 * factor as u128;
                }
                *out = barrett_reduce_128(acc, p);
            }
        }
    }

    /// Exact conversion of a single value: the composed integer in `[0, Q)`
    /// is reduced modulo each output prime.
    pub fn exact_convert(&self, input: &[u64]) -> Vec<u64> {
        let mut value = input.to_vec();
        self.ibase.compose(&mut value);
        self.obase
            .base()
            .iter()
            .map(|p| reduce_uint(&value, p))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::get_primes;
    use proptest::prelude::*;

    fn small_base() -> RnsBase {
        RnsBase::new(&Modulus::from_values(&[3, 5, 7]).unwrap()).unwrap()
    }

    #[test]
    fn products_for_small_base() {
        let base = small_base();
        assert_eq!(base.base_prod(), &[105, 0, 0]);
        assert_eq!(base.punctured_prod(0), &[35, 0, 0]);
        assert_eq!(base.punctured_prod(2), &[15, 0, 0]);
        // 35^-1 mod 3 = 2, 21^-1 mod 5 = 1, 15^-1 mod 7 = 1
        let inv: Vec<u64> = base
            .inv_punctured_prod_mod_base()
            .iter()
            .map(|o| o.operand)
            .collect();
        assert_eq!(inv, vec![2, 1, 1]);
    }

    #[test]
    fn rejects_empty_and_non_coprime() {
        assert_eq!(RnsBase::new(&[]).unwrap_err(), RingError::EmptyBase);
        let moduli = Modulus::from_values(&[6, 9]).unwrap();
        assert_eq!(RnsBase::new(&moduli).unwrap_err(), RingError::NotCoprime(6, 9));
    }

    #[test]
    fn extend_and_drop() {
        let base = small_base();
        let extended = base.extend(Modulus::new(11).unwrap()).unwrap();
        assert_eq!(extended.size(), 4);
        assert!(base.is_subbase_of(&extended));
        assert!(!extended.is_subbase_of(&base));
        assert_eq!(extended.drop_last().unwrap().base(), base.base());
        let dropped = base.drop(&Modulus::new(5).unwrap()).unwrap();
        assert_eq!(dropped.base_prod(), &[21, 0]);
        assert!(base.drop(&Modulus::new(13).unwrap()).is_err());
        assert!(extended.extend(Modulus::new(21).unwrap()).is_err());
    }

    #[test]
    fn single_modulus_base() {
        let base = RnsBase::new(&Modulus::from_values(&[97]).unwrap()).unwrap();
        let mut v = [200u64];
        base.decompose(&mut v);
        assert_eq!(v, [6]);
        base.compose(&mut v);
        assert_eq!(v, [6]);
        assert!(base.drop_last().is_err());
    }

    #[test]
    fn array_layout_is_row_major() {
        let base = small_base();
        let mut values = vec![10, 0, 0, 104, 0, 0];
        base.decompose_array(&mut values, 2);
        assert_eq!(values, vec![1, 2, 0, 4, 3, 6]);
        base.compose_array(&mut values, 2);
        assert_eq!(values, vec![10, 0, 0, 104, 0, 0]);
    }

    #[test]
    fn fast_conversion_is_off_by_small_multiple_of_q() {
        let ibase = small_base();
        let obase = RnsBase::new(&Modulus::from_values(&[11, 13]).unwrap()).unwrap();
        let conv = BaseConverter::new(&ibase, &obase);
        for x in 0..105u64 {
            let input = [x % 3, x % 5, x % 7];
            let mut out = [0u64; 2];
            conv.fast_convert_array(&input, 1, &mut out);
            let ok = (0..3u64).any(|a| out[0] == (x + a * 105) % 11 && out[1] == (x + a * 105) % 13);
            assert!(ok, "x = {x}, out = {out:?}");
            assert_eq!(conv.exact_convert(&input), vec![x % 11, x % 13]);
        }
    }

    proptest! {
        #[test]
        fn compose_inverts_decompose(a in any::<u64>(), b in any::<u64>()) {
            let moduli = get_primes(1 << 12, 60, 3).unwrap();
            let base = RnsBase::new(&moduli).unwrap();
            let mut value = vec![a, b, 0];
            let original = value.clone();
            base.decompose(&mut value);
            for (r, m) in value.iter().zip(&moduli) {
                prop_assert!(*r < m.value());
            }
            base.compose(&mut value);
            prop_assert_eq!(value, original);
        }
    }
}
