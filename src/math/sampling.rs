//! Samplers writing RNS polynomials into `k x n` row-major buffers, one row per
//! modulus.

use rand::Rng;
use rand_distr::{Distribution, Normal};

use super::{Modulus, negate_uint_mod};

/// Standard deviation of the RLWE error distribution.
pub const NOISE_STANDARD_DEVIATION: f64 = 3.2;

/// Samples beyond this magnitude are rejected and redrawn.
pub const NOISE_MAX_DEVIATION: f64 = 6.0 * NOISE_STANDARD_DEVIATION;

fn write_signed(value: i64, moduli: &[Modulus], n: usize, index: usize, dest: &mut [u64]) {
    for (row, modulus) in dest.chunks_exact_mut(n).zip(moduli) {
        let magnitude = modulus.reduce(value.unsigned_abs());
        row[index] = if value < 0 {
            negate_uint_mod(magnitude, modulus)
        } else {
            magnitude
        };
    }
}

/// Uniform coefficients in `{-1, 0, 1}`.
pub fn sample_poly_ternary<R: Rng + ?Sized>(
    rng: &mut R,
    moduli: &[Modulus],
    n: usize,
    dest: &mut [u64],
) {
    debug_assert_eq!(dest.len(), moduli.len() * n);
    for index in 0..n {
        let value = rng.random_range(-1i64..=1);
        write_signed(value, moduli, n, index, dest);
    }
}

/// Rounded Gaussian coefficients clipped at [`NOISE_MAX_DEVIATION`].
pub fn sample_poly_normal<R: Rng + ?Sized>(
    rng: &mut R,
    moduli: &[Modulus],
    n: usize,
    dest: &mut [u64],
) {
    debug_assert_eq!(dest.len(), moduli.len() * n);
    let normal = Normal::new(0.0, NOISE_STANDARD_DEVIATION)
        .expect("sample_poly_normal: standard deviation is a finite positive constant");
    for index in 0..n {
        let sample = loop {
            let candidate = normal.sample(rng);
            if candidate.abs() <= NOISE_MAX_DEVIATION {
                break candidate.round() as i64;
            }
        };
        write_signed(sample, moduli, n, index, dest);
    }
}

/// Independent uniform residues per row, i.e. uniform modulo the product of
/// the moduli.
pub fn sample_poly_uniform<R: Rng + ?Sized>(
    rng: &mut R,
    moduli: &[Modulus],
    n: usize,
    dest: &mut [u64],
) {
    debug_assert_eq!(dest.len(), moduli.len() * n);
    for (row, modulus) in dest.chunks_exact_mut(n).zip(moduli) {
        for coeff in row.iter_mut() {
            *coeff = rng.random_range(0..modulus.value());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn moduli() -> Vec<Modulus> {
        Modulus::from_values(&[17, 97]).unwrap()
    }

    fn centered(value: u64, q: u64) -> i64 {
        if value > q / 2 { value as i64 - q as i64 } else { value as i64 }
    }

    #[test]
    fn ternary_rows_agree() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let mut poly = vec![0u64; 2 * 64];
        sample_poly_ternary(&mut rng, &moduli(), 64, &mut poly);
        for i in 0..64 {
            let a = centered(poly[i], 17);
            let b = centered(poly[64 + i], 97);
            assert_eq!(a, b);
            assert!((-1..=1).contains(&a));
        }
    }

    #[test]
    fn normal_samples_are_clipped_and_centered() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let n = 4096;
        let big = Modulus::from_values(&[65537]).unwrap();
        let mut poly = vec![0u64; n];
        sample_poly_normal(&mut rng, &big, n, &mut poly);
        let values: Vec<f64> = poly.iter().map(|&c| centered(c, 65537) as f64).collect();
        assert!(values.iter().all(|v| v.abs() <= NOISE_MAX_DEVIATION.ceil()));
        let mean = values.iter().sum::<f64>() / n as f64;
        let std_dev = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64).sqrt();
        assert!(mean.abs() < 0.3, "mean {mean}");
        assert!((std_dev - NOISE_STANDARD_DEVIATION).abs() < 0.3, "std dev {std_dev}");
    }

    #[test]
    fn uniform_stays_in_range() {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let mut poly = vec![0u64; 2 * 128];
        sample_poly_uniform(&mut rng, &moduli(), 128, &mut poly);
        assert!(poly[..128].iter().all(|&c| c < 17));
        assert!(poly[128..].iter().all(|&c| c < 97));
    }
}
