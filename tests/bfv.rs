use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use toy_rns_he::{
    BatchEncoder, CoeffModulus, Context, Decryptor, EncryptionParameters, Encryptor, Evaluator,
    HeError, KeyGenerator, PlainModulus, SchemeType,
};

const N: usize = 64;
const ROW: usize = N / 2;

struct Bfv {
    context: Arc<Context>,
    keygen: KeyGenerator,
    encoder: BatchEncoder,
    encryptor: Encryptor,
    decryptor: Decryptor,
    evaluator: Evaluator,
    rng: ChaCha20Rng,
    t: u64,
}

impl Bfv {
    fn new(seed: u64) -> Self {
        let parms = EncryptionParameters::builder(SchemeType::Bfv)
            .poly_modulus_degree(N)
            .coeff_modulus(CoeffModulus::create(N, &[50, 50, 50, 55]).unwrap())
            .plain_modulus(PlainModulus::batching(N, 20).unwrap())
            .build()
            .unwrap();
        let context = Context::new(parms).unwrap();
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let keygen = KeyGenerator::new(context.clone(), &mut rng).unwrap();
        let public_key = keygen.create_public_key(&mut rng).unwrap();
        let encoder = BatchEncoder::new(context.clone()).unwrap();
        let t = encoder.plain_modulus().value();
        Self {
            encryptor: Encryptor::with_public_key(context.clone(), public_key).unwrap(),
            decryptor: Decryptor::new(context.clone(), keygen.secret_key()).unwrap(),
            evaluator: Evaluator::new(context.clone()).unwrap(),
            encoder,
            keygen,
            context,
            rng,
            t,
        }
    }

    fn encrypt(&mut self, values: &[u64]) -> toy_rns_he::Ciphertext {
        let plain = self.encoder.encode(values).unwrap();
        self.encryptor.encrypt(&plain, &mut self.rng).unwrap()
    }

    fn decrypt(&mut self, ct: &toy_rns_he::Ciphertext) -> Vec<u64> {
        let plain = self.decryptor.decrypt(ct).unwrap();
        self.encoder.decode(&plain).unwrap()
    }
}

fn ramp(offset: u64) -> Vec<u64> {
    (0..N as u64).map(|i| i * 3 + offset).collect()
}

#[test]
fn test_roundtrip_with_public_and_secret_key() {
    let mut bfv = Bfv::new(1);
    let values = ramp(5);
    let ct = bfv.encrypt(&values);
    assert_eq!(ct.size(), 2);
    assert_eq!(ct.parms_id(), bfv.context.first_parms_id());
    assert_eq!(bfv.decrypt(&ct), values);

    let symmetric = Encryptor::with_secret_key(bfv.context.clone(), bfv.keygen.secret_key().clone()).unwrap();
    let plain = bfv.encoder.encode(&values).unwrap();
    let ct = symmetric.encrypt_symmetric(&plain, &mut bfv.rng).unwrap();
    assert_eq!(bfv.decrypt(&ct), values);

    let seeded = symmetric.encrypt_symmetric_seeded(&plain, &mut bfv.rng).unwrap();
    let expanded = seeded.expand(&bfv.context).unwrap();
    assert_eq!(bfv.decrypt(&expanded), values);
}

#[test]
fn test_addition_and_subtraction() {
    let mut bfv = Bfv::new(2);
    let a = ramp(1);
    let b: Vec<u64> = (0..N as u64).map(|i| bfv.t - 1 - i).collect();
    let ca = bfv.encrypt(&a);
    let cb = bfv.encrypt(&b);

    let sum = bfv.evaluator.add(&ca, &cb).unwrap();
    let expected: Vec<u64> = a.iter().zip(&b).map(|(x, y)| (x + y) % bfv.t).collect();
    assert_eq!(bfv.decrypt(&sum), expected);

    let diff = bfv.evaluator.sub(&ca, &cb).unwrap();
    let expected: Vec<u64> = a.iter().zip(&b).map(|(x, y)| (x + bfv.t - y) % bfv.t).collect();
    assert_eq!(bfv.decrypt(&diff), expected);

    let negated = bfv.evaluator.negate(&ca).unwrap();
    let expected: Vec<u64> = a.iter().map(|x| (bfv.t - x) % bfv.t).collect();
    assert_eq!(bfv.decrypt(&negated), expected);

    let many = bfv.evaluator.add_many(&[ca.clone(), ca.clone(), cb.clone()]).unwrap();
    let expected: Vec<u64> = a.iter().zip(&b).map(|(x, y)| (2 * x + y) % bfv.t).collect();
    assert_eq!(bfv.decrypt(&many), expected);
}

#[test]
fn test_plain_operands() {
    let mut bfv = Bfv::new(3);
    let a = ramp(7);
    let ca = bfv.encrypt(&a);
    let signed: Vec<i64> = (0..N as i64).map(|i| i - 32).collect();
    let plain = bfv.encoder.encode_signed(&signed).unwrap();
    let t = bfv.t as i64;
    let lift = |v: i64| v.rem_euclid(t) as u64;

    let sum = bfv.evaluator.add_plain(&ca, &plain).unwrap();
    let expected: Vec<u64> = a.iter().zip(&signed).map(|(&x, &y)| lift(x as i64 + y)).collect();
    assert_eq!(bfv.decrypt(&sum), expected);

    let diff = bfv.evaluator.sub_plain(&ca, &plain).unwrap();
    let expected: Vec<u64> = a.iter().zip(&signed).map(|(&x, &y)| lift(x as i64 - y)).collect();
    assert_eq!(bfv.decrypt(&diff), expected);

    let product = bfv.evaluator.multiply_plain(&ca, &plain).unwrap();
    let expected: Vec<u64> = a.iter().zip(&signed).map(|(&x, &y)| lift(x as i64 * y)).collect();
    assert_eq!(bfv.decrypt(&product), expected);
}

#[test]
fn test_multiply_relinearize_and_noise_budget() {
    let mut bfv = Bfv::new(4);
    let relin_keys = bfv.keygen.create_relin_keys(&mut bfv.rng).unwrap();
    let a = ramp(2);
    let b = ramp(9);
    let ca = bfv.encrypt(&a);
    let cb = bfv.encrypt(&b);
    let fresh_budget = bfv.decryptor.invariant_noise_budget(&ca).unwrap();
    assert!(fresh_budget > 0);

    let product = bfv.evaluator.multiply(&ca, &cb).unwrap();
    assert_eq!(product.size(), 3);
    let expected: Vec<u64> = a.iter().zip(&b).map(|(x, y)| x * y % bfv.t).collect();
    assert_eq!(bfv.decrypt(&product), expected);

    let product_budget = bfv.decryptor.invariant_noise_budget(&product).unwrap();
    assert!(product_budget > 0);
    assert!(product_budget < fresh_budget, "{product_budget} >= {fresh_budget}");

    let relinearized = bfv.evaluator.relinearize(&product, &relin_keys).unwrap();
    assert_eq!(relinearized.size(), 2);
    assert_eq!(bfv.decrypt(&relinearized), expected);

    let squared = bfv.evaluator.square(&ca).unwrap();
    let expected: Vec<u64> = a.iter().map(|x| x * x % bfv.t).collect();
    assert_eq!(bfv.decrypt(&squared), expected);
}

#[test]
fn test_multiply_many_and_exponentiate() {
    let mut bfv = Bfv::new(5);
    let relin_keys = bfv.keygen.create_relin_keys(&mut bfv.rng).unwrap();
    let values: Vec<u64> = (0..N as u64).map(|i| i % 5 + 1).collect();
    let ct = bfv.encrypt(&values);

    let cubed = bfv.evaluator.exponentiate(&ct, 3, &relin_keys).unwrap();
    let expected: Vec<u64> = values.iter().map(|x| x.pow(3) % bfv.t).collect();
    assert_eq!(bfv.decrypt(&cubed), expected);

    let others: Vec<_> = (0..3).map(|_| bfv.encrypt(&values)).collect();
    let product = bfv.evaluator.multiply_many(&others, &relin_keys).unwrap();
    assert_eq!(product.size(), 2);
    assert_eq!(bfv.decrypt(&product), expected);

    assert_eq!(
        bfv.evaluator.exponentiate(&ct, 0, &relin_keys).unwrap_err(),
        HeError::ValueOutOfRange("exponent must be at least 1")
    );
}

#[test]
fn test_mod_switch_preserves_plaintext() {
    let mut bfv = Bfv::new(6);
    let values = ramp(11);
    let ct = bfv.encrypt(&values);

    let next = bfv.evaluator.mod_switch_to_next(&ct).unwrap();
    assert_eq!(next.coeff_modulus_size(), ct.coeff_modulus_size() - 1);
    assert_eq!(bfv.decrypt(&next), values);

    let last = bfv.evaluator.mod_switch_to(&ct, bfv.context.last_parms_id()).unwrap();
    assert_eq!(last.coeff_modulus_size(), 1);
    assert_eq!(bfv.decrypt(&last), values);
    assert_eq!(
        bfv.evaluator.mod_switch_to_next(&last).unwrap_err(),
        HeError::EndOfModulusChain
    );
    assert!(bfv.evaluator.mod_switch_to(&last, ct.parms_id()).is_err());
}

#[test]
fn test_rotate_rows_every_step() {
    let mut bfv = Bfv::new(7);
    let galois_keys = bfv.keygen.create_galois_keys(&mut bfv.rng).unwrap();
    let values = ramp(0);
    let ct = bfv.encrypt(&values);

    for steps in -(ROW as i32 - 1)..=(ROW as i32 - 1) {
        let rotated = bfv.evaluator.rotate_rows(&ct, steps, &galois_keys).unwrap();
        let decoded = bfv.decrypt(&rotated);
        for row in 0..2 {
            for i in 0..ROW {
                let source = (i as i32 + steps).rem_euclid(ROW as i32) as usize;
                assert_eq!(
                    decoded[row * ROW + i],
                    values[row * ROW + source],
                    "steps {steps}, row {row}, slot {i}"
                );
            }
        }
    }
}

#[test]
fn test_rotate_columns_swaps_rows() {
    let mut bfv = Bfv::new(8);
    let galois_keys = bfv.keygen.create_galois_keys(&mut bfv.rng).unwrap();
    let values = ramp(4);
    let ct = bfv.encrypt(&values);
    let swapped = bfv.evaluator.rotate_columns(&ct, &galois_keys).unwrap();
    let decoded = bfv.decrypt(&swapped);
    assert_eq!(&decoded[..ROW], &values[ROW..]);
    assert_eq!(&decoded[ROW..], &values[..ROW]);
}

#[test]
fn test_rotation_with_missing_key() {
    let mut bfv = Bfv::new(9);
    let galois_keys = bfv.keygen.create_galois_keys_from_steps(&[1], &mut bfv.rng).unwrap();
    let ct = bfv.encrypt(&ramp(0));
    assert!(bfv.evaluator.rotate_rows(&ct, 1, &galois_keys).is_ok());
    assert!(matches!(
        bfv.evaluator.rotate_rows(&ct, 2, &galois_keys),
        Err(HeError::MissingGaloisKey(_))
    ));
    assert_eq!(
        bfv.evaluator.rotate_vector(&ct, 1, &galois_keys).unwrap_err(),
        HeError::UnsupportedScheme(SchemeType::Bfv)
    );
}

#[test]
fn test_failed_rotation_leaves_ciphertext_unchanged() {
    let mut bfv = Bfv::new(10);
    let galois_keys = bfv.keygen.create_galois_keys_from_steps(&[-1], &mut bfv.rng).unwrap();
    let values = ramp(0);
    let mut ct = bfv.encrypt(&values);
    let before = ct.clone();

    // 3 = 4 - 1: the key for -1 exists but the one for 4 does not.
    assert!(matches!(
        bfv.evaluator.rotate_rows_inplace(&mut ct, 3, &galois_keys),
        Err(HeError::MissingGaloisKey(_))
    ));
    assert_eq!(ct, before);
    assert_eq!(bfv.decrypt(&ct), values);

    bfv.evaluator.rotate_rows_inplace(&mut ct, -1, &galois_keys).unwrap();
    assert_eq!(bfv.decrypt(&ct)[..4], [ROW as u64 - 1, 0, 1, 2].map(|i| values[i as usize]));
}

#[test]
fn test_failed_relinearization_leaves_ciphertext_unchanged() {
    let mut bfv = Bfv::new(11);
    let relin_keys = bfv.keygen.create_relin_keys(&mut bfv.rng).unwrap();
    let values = ramp(1);
    let ct = bfv.encrypt(&values);
    let squared = bfv.evaluator.square(&ct).unwrap();
    let mut cubed = bfv.evaluator.multiply(&squared, &ct).unwrap();
    assert_eq!(cubed.size(), 4);
    let before = cubed.clone();

    assert_eq!(
        bfv.evaluator.relinearize_inplace(&mut cubed, &relin_keys).unwrap_err(),
        HeError::MissingRelinKey(4)
    );
    assert_eq!(cubed, before);
}
