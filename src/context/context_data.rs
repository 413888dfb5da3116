use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use crate::math::{
    Modulus, barrett_reduce_64, is_ntt_friendly_prime, negate_uint_mod,
    uint::{divide_uint_u64_inplace, half_round_up_uint_inplace, significant_bit_count_uint},
};
use crate::rings::{GaloisTool, NttTables, RnsBase, RnsTool, rns_base::reduce_uint};

use super::{
    ContextError, ContextResult,
    params::{EncryptionParameters, MAX_USER_MODULUS_BITS, ParmsId, SchemeType},
};

const MAX_DEGREE_POWER: u32 = 17;

/// Precomputation for one level of the modulus chain.
#[derive(Debug)]
pub struct ContextData {
    parms: EncryptionParameters,
    chain_index: usize,
    prev_parms_id: Option<ParmsId>,
    next_parms_id: Option<ParmsId>,

    coeff_count_power: u32,
    rns_base: RnsBase,
    small_ntt_tables: Vec<NttTables>,
    rns_tool: RnsTool,
    galois_tool: Arc<GaloisTool>,

    total_coeff_modulus: Vec<u64>,
    total_coeff_modulus_bit_count: usize,
    upper_half_threshold: Vec<u64>,

    plain_ntt_tables: Option<NttTables>,
    coeff_div_plain_modulus: Vec<u64>,
    coeff_div_plain_modulus_rns: Vec<u64>,
    coeff_modulus_mod_plain_modulus: u64,
    plain_upper_half_threshold: u64,
    plain_upper_half_increment: Vec<u64>,
}

impl ContextData {
    fn new(
        parms: EncryptionParameters,
        chain_index: usize,
        galois_tool: Arc<GaloisTool>,
    ) -> ContextResult<Self> {
        let n = parms.poly_modulus_degree();
        let coeff_count_power = n.trailing_zeros();
        let coeff_modulus = parms.coeff_modulus();

        let rns_base = RnsBase::new(coeff_modulus)?;
        let small_ntt_tables = NttTables::create_many(coeff_count_power, coeff_modulus)?;
        let rns_tool = RnsTool::new(n, &rns_base, parms.plain_modulus().copied())?;

        let total_coeff_modulus = rns_base.base_prod().to_vec();
        let total_coeff_modulus_bit_count = significant_bit_count_uint(&total_coeff_modulus);
        let mut upper_half_threshold = total_coeff_modulus.clone();
        half_round_up_uint_inplace(&mut upper_half_threshold);

        let mut plain_ntt_tables = None;
        let mut coeff_div_plain_modulus = Vec::new();
        let mut coeff_div_plain_modulus_rns = Vec::new();
        let mut coeff_modulus_mod_plain_modulus = 0;
        let mut plain_upper_half_threshold = 0;
        let mut plain_upper_half_increment = Vec::new();

        if let Some(t) = parms.plain_modulus() {
            let mut quotient = total_coeff_modulus.clone();
            coeff_modulus_mod_plain_modulus = divide_uint_u64_inplace(&mut quotient, t.value())?;
            coeff_div_plain_modulus_rns = coeff_modulus.iter().map(|m| reduce_uint(&quotient, m)).collect();
            coeff_div_plain_modulus = quotient;
            plain_upper_half_threshold = (t.value() + 1) >> 1;
            plain_upper_half_increment = coeff_modulus
                .iter()
                .map(|m| negate_uint_mod(barrett_reduce_64(t.value(), m), m))
                .collect();
            if is_ntt_friendly_prime(t.value(), n as u64) {
                plain_ntt_tables = Some(NttTables::new(coeff_count_power, *t)?);
            }
        }

        Ok(Self {
            parms,
            chain_index,
            prev_parms_id: None,
            next_parms_id: None,
            coeff_count_power,
            rns_base,
            small_ntt_tables,
            rns_tool,
            galois_tool,
            total_coeff_modulus,
            total_coeff_modulus_bit_count,
            upper_half_threshold,
            plain_ntt_tables,
            coeff_div_plain_modulus,
            coeff_div_plain_modulus_rns,
            coeff_modulus_mod_plain_modulus,
            plain_upper_half_threshold,
            plain_upper_half_increment,
        })
    }

    pub fn parms(&self) -> &EncryptionParameters {
        &self.parms
    }

    pub fn parms_id(&self) -> ParmsId {
        self.parms.parms_id()
    }

    pub fn scheme(&self) -> SchemeType {
        self.parms.scheme()
    }

    /// Position in the chain; the last level has index zero.
    pub fn chain_index(&self) -> usize {
        self.chain_index
    }

    /// The level above this one, if any.
    pub fn prev_parms_id(&self) -> Option<ParmsId> {
        self.prev_parms_id
    }

    /// The level below this one, if any.
    pub fn next_parms_id(&self) -> Option<ParmsId> {
        self.next_parms_id
    }

    pub fn coeff_count(&self) -> usize {
        self.parms.poly_modulus_degree()
    }

    pub fn coeff_count_power(&self) -> u32 {
        self.coeff_count_power
    }

    pub fn coeff_modulus(&self) -> &[Modulus] {
        self.parms.coeff_modulus()
    }

    pub fn coeff_modulus_size(&self) -> usize {
        self.parms.coeff_modulus().len()
    }

    pub fn plain_modulus(&self) -> Option<&Modulus> {
        self.parms.plain_modulus()
    }

    pub fn rns_base(&self) -> &RnsBase {
        &self.rns_base
    }

    pub fn small_ntt_tables(&self) -> &[NttTables] {
        &self.small_ntt_tables
    }

    pub fn rns_tool(&self) -> &RnsTool {
        &self.rns_tool
    }

    pub fn galois_tool(&self) -> &GaloisTool {
        &self.galois_tool
    }

    pub fn total_coeff_modulus(&self) -> &[u64] {
        &self.total_coeff_modulus
    }

    pub fn total_coeff_modulus_bit_count(&self) -> usize {
        self.total_coeff_modulus_bit_count
    }

    /// `ceil(q / 2)`; composed values at or above it represent negatives.
    pub fn upper_half_threshold(&self) -> &[u64] {
        &self.upper_half_threshold
    }

    /// NTT tables modulo the plain modulus, present when batching is
    /// possible.
    pub fn plain_ntt_tables(&self) -> Option<&NttTables> {
        self.plain_ntt_tables.as_ref()
    }

    pub fn using_batching(&self) -> bool {
        self.plain_ntt_tables.is_some()
    }

    /// `floor(q / t)` as a multi-word integer.
    pub fn coeff_div_plain_modulus(&self) -> &[u64] {
        &self.coeff_div_plain_modulus
    }

    /// `floor(q / t) mod q_i` for each prime.
    pub fn coeff_div_plain_modulus_rns(&self) -> &[u64] {
        &self.coeff_div_plain_modulus_rns
    }

    pub fn coeff_modulus_mod_plain_modulus(&self) -> u64 {
        self.coeff_modulus_mod_plain_modulus
    }

    pub fn plain_upper_half_threshold(&self) -> u64 {
        self.plain_upper_half_threshold
    }

    /// `(q - t) mod q_i`, added to plaintext values in the upper half of
    /// `[0, t)` to lift them into the upper half of `[0, q)`.
    pub fn plain_upper_half_increment(&self) -> &[u64] {
        &self.plain_upper_half_increment
    }
}

/// The immutable chain of levels for one parameter set.
///
/// The key level holds every prime; each level below drops the last prime
/// of the one above it. With more than one prime, the key level is reserved
/// for key material and data starts one level lower.
#[derive(Debug)]
pub struct Context {
    context_data_map: HashMap<ParmsId, Arc<ContextData>>,
    key_parms_id: ParmsId,
    first_parms_id: ParmsId,
    last_parms_id: ParmsId,
}

impl Context {
    #[instrument(skip_all, fields(scheme = %parms.scheme(), n = parms.poly_modulus_degree()))]
    pub fn new(parms: EncryptionParameters) -> ContextResult<Arc<Self>> {
        validate(&parms)?;

        let n = parms.poly_modulus_degree();
        let galois_tool = Arc::new(GaloisTool::new(n.trailing_zeros())?);
        let prime_count = parms.coeff_modulus().len();

        let mut levels: Vec<ContextData> = Vec::with_capacity(prime_count);
        let mut current = parms;
        for size in (1..=prime_count).rev() {
            if size < prime_count {
                current = current.with_coeff_modulus(current.coeff_modulus()[..size].to_vec());
            }
            let data = ContextData::new(current.clone(), size - 1, Arc::clone(&galois_tool))?;
            debug!(
                chain_index = size - 1,
                bits = data.total_coeff_modulus_bit_count(),
                parms_id = %data.parms_id(),
                "built level"
            );
            levels.push(data);
        }

        for i in 0..levels.len() {
            if i > 0 {
                levels[i].prev_parms_id = Some(levels[i - 1].parms_id());
            }
            if i + 1 < levels.len() {
                levels[i].next_parms_id = Some(levels[i + 1].parms_id());
            }
        }

        let key_parms_id = levels[0].parms_id();
        let first_parms_id = levels[0].next_parms_id.unwrap_or(key_parms_id);
        let last_parms_id = levels[levels.len() - 1].parms_id();

        let context_data_map = levels
            .into_iter()
            .map(|data| (data.parms_id(), Arc::new(data)))
            .collect();

        info!(levels = prime_count, "encryption context ready");
        Ok(Arc::new(Self {
            context_data_map,
            key_parms_id,
            first_parms_id,
            last_parms_id,
        }))
    }

    pub fn get_context_data(&self, parms_id: &ParmsId) -> Option<&Arc<ContextData>> {
        self.context_data_map.get(parms_id)
    }

    pub fn key_context_data(&self) -> &Arc<ContextData> {
        &self.context_data_map[&self.key_parms_id]
    }

    pub fn first_context_data(&self) -> &Arc<ContextData> {
        &self.context_data_map[&self.first_parms_id]
    }

    pub fn last_context_data(&self) -> &Arc<ContextData> {
        &self.context_data_map[&self.last_parms_id]
    }

    pub fn next_context_data(&self, data: &ContextData) -> Option<&Arc<ContextData>> {
        data.next_parms_id().and_then(|id| self.get_context_data(&id))
    }

    pub fn key_parms_id(&self) -> ParmsId {
        self.key_parms_id
    }

    pub fn first_parms_id(&self) -> ParmsId {
        self.first_parms_id
    }

    pub fn last_parms_id(&self) -> ParmsId {
        self.last_parms_id
    }

    pub fn scheme(&self) -> SchemeType {
        self.key_context_data().scheme()
    }

    /// Key switching needs a special prime above the data levels.
    pub fn using_keyswitching(&self) -> bool {
        self.key_parms_id != self.first_parms_id
    }

    /// Data levels from the first down to the last.
    pub fn data_levels(&self) -> impl Iterator<Item = &Arc<ContextData>> {
        std::iter::successors(Some(self.first_context_data()), |data| self.next_context_data(data))
    }
}

fn validate(parms: &EncryptionParameters) -> ContextResult<()> {
    let n = parms.poly_modulus_degree();
    if !n.is_power_of_two() || n < 2 || n > 1 << MAX_DEGREE_POWER {
        return Err(ContextError::InvalidDegree(n));
    }

    let coeff_modulus = parms.coeff_modulus();
    for (i, m) in coeff_modulus.iter().enumerate() {
        if m.bit_count() > MAX_USER_MODULUS_BITS {
            return Err(ContextError::CoeffModulusTooLarge(m.value()));
        }
        if !is_ntt_friendly_prime(m.value(), n as u64) {
            return Err(ContextError::NotNttFriendly {
                modulus: m.value(),
                degree: n,
            });
        }
        if coeff_modulus[..i].contains(m) {
            return Err(ContextError::DuplicateModulus(m.value()));
        }
    }

    if let Some(t) = parms.plain_modulus() {
        // The last level keeps only the first prime, and it must still exceed t.
        if t.bit_count() > MAX_USER_MODULUS_BITS
            || t.value() >= coeff_modulus[0].value()
            || coeff_modulus.iter().any(|q| q.value() % t.value() == 0)
        {
            return Err(ContextError::InvalidPlainModulus(t.value()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{CoeffModulus, PlainModulus};

    fn ckks_context(bit_sizes: &[u32]) -> Arc<Context> {
        let parms = EncryptionParameters::builder(SchemeType::Ckks)
            .poly_modulus_degree(32)
            .coeff_modulus(CoeffModulus::create(32, bit_sizes).unwrap())
            .build()
            .unwrap();
        Context::new(parms).unwrap()
    }

    #[test]
    fn chain_drops_one_prime_per_level() {
        let context = ckks_context(&[50, 40, 40, 50]);
        assert!(context.using_keyswitching());
        assert_eq!(context.key_context_data().coeff_modulus_size(), 4);
        assert_eq!(context.key_context_data().chain_index(), 3);
        assert_eq!(context.first_context_data().coeff_modulus_size(), 3);
        assert_eq!(context.last_context_data().coeff_modulus_size(), 1);
        assert_eq!(context.last_context_data().chain_index(), 0);

        let sizes: Vec<usize> = context.data_levels().map(|d| d.coeff_modulus_size()).collect();
        assert_eq!(sizes, vec![3, 2, 1]);

        let mut prev = context.key_context_data().coeff_modulus().to_vec();
        for data in context.data_levels() {
            assert_eq!(data.coeff_modulus(), &prev[..prev.len() - 1]);
            let above = context.get_context_data(&data.prev_parms_id().unwrap()).unwrap();
            assert_eq!(above.coeff_modulus(), &prev[..]);
            prev = data.coeff_modulus().to_vec();
        }
        assert!(context.last_context_data().next_parms_id().is_none());
        assert!(context.key_context_data().prev_parms_id().is_none());
    }

    #[test]
    fn single_prime_has_no_key_level() {
        let context = ckks_context(&[50]);
        assert!(!context.using_keyswitching());
        assert_eq!(context.key_parms_id(), context.first_parms_id());
        assert_eq!(context.first_parms_id(), context.last_parms_id());
    }

    #[test]
    fn bfv_thresholds() {
        let t = PlainModulus::batching(32, 17).unwrap();
        let parms = EncryptionParameters::builder(SchemeType::Bfv)
            .poly_modulus_degree(32)
            .coeff_modulus(CoeffModulus::create(32, &[40, 40]).unwrap())
            .plain_modulus(t)
            .build()
            .unwrap();
        let context = Context::new(parms).unwrap();
        let data = context.first_context_data();
        let q = data.coeff_modulus()[0].value();
        assert!(data.using_batching());
        assert_eq!(data.coeff_div_plain_modulus()[0], q / t.value());
        assert_eq!(data.coeff_modulus_mod_plain_modulus(), q % t.value());
        assert_eq!(data.plain_upper_half_threshold(), (t.value() + 1) / 2);
        assert_eq!(data.plain_upper_half_increment()[0], q - t.value());
        assert_eq!(data.upper_half_threshold()[0], q.div_ceil(2));
        assert_eq!(data.total_coeff_modulus_bit_count(), 40);
    }

    #[test]
    fn rejects_bad_parameters() {
        let good = CoeffModulus::create(32, &[40]).unwrap();
        let build = |n: usize, moduli: Vec<Modulus>| {
            EncryptionParameters::builder(SchemeType::Ckks)
                .poly_modulus_degree(n)
                .coeff_modulus(moduli)
                .build()
                .unwrap()
        };
        assert_eq!(
            Context::new(build(24, good.clone())).unwrap_err(),
            ContextError::InvalidDegree(24)
        );
        assert_eq!(
            Context::new(build(32, vec![good[0], good[0]])).unwrap_err(),
            ContextError::DuplicateModulus(good[0].value())
        );
        let not_friendly = Modulus::new(1_000_003).unwrap();
        assert!(matches!(
            Context::new(build(32, vec![not_friendly])).unwrap_err(),
            ContextError::NotNttFriendly { degree: 32, .. }
        ));
        let wide = Modulus::new((1 << 61) - 1).unwrap();
        assert_eq!(
            Context::new(build(32, vec![wide])).unwrap_err(),
            ContextError::CoeffModulusTooLarge(wide.value())
        );
    }
}
