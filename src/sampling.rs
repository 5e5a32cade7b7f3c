//! Random sampling used to seed the embedding.
//!
//! All randomness in the crate flows through an explicit RNG created once per
//! run, so a fixed seed reproduces the identical embedding. This module draws
//! the standard-normal values used to initialize embedding coordinates.

use ndarray::Array2;
use rand::Rng;

/// Scale applied to the initial Gaussian draw; the optimization starts from a
/// tight cloud around the origin.
const INITIAL_COORDINATE_SCALE: f64 = 1e-4;

/// Draws a standard-normal value with the polar Box-Muller method.
///
/// Knuth, The Art of Computer Programming vol. 2, section 3.4.1, Algorithm P.
/// The rejection loop accepts on average after 1.27 draws. Pairs on or
/// outside the unit circle are rejected, as is the origin (its logarithm is
/// undefined).
///
/// # Arguments
/// * `rng` - Random number generator to draw uniform values from
pub fn gaussian<R: Rng>(rng: &mut R) -> f64 {
    loop {
        let v1 = 2.0 * rng.gen::<f64>() - 1.0;
        let v2 = 2.0 * rng.gen::<f64>() - 1.0;
        let s = v1 * v1 + v2 * v2;

        if s < 1.0 && s > 0.0 {
            return v1 * (-2.0 * s.ln() / s).sqrt();
        }
    }
}

/// Creates the initial embedding as a zero-mean, small-variance Gaussian
/// cloud.
///
/// # Arguments
/// * `points` - Number of rows in the embedding
/// * `dimensions` - Output dimensionality
/// * `rng` - Random number generator used for the draw
pub fn random_embedding<R: Rng>(points: usize, dimensions: usize, rng: &mut R) -> Array2<f64> {
    Array2::from_shape_simple_fn((points, dimensions), || {
        gaussian(rng) * INITIAL_COORDINATE_SCALE
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn test_gaussian_moments() {
        let mut rng = SmallRng::seed_from_u64(7);
        let samples: Vec<f64> = (0..100_000).map(|_| gaussian(&mut rng)).collect();

        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let variance =
            samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / samples.len() as f64;

        assert!(mean.abs() < 0.05, "mean {mean} too far from 0");
        assert!((variance - 1.0).abs() < 0.05, "variance {variance} too far from 1");
    }

    #[test]
    fn test_gaussian_deterministic() {
        let mut a = SmallRng::seed_from_u64(42);
        let mut b = SmallRng::seed_from_u64(42);

        for _ in 0..100 {
            assert_eq!(gaussian(&mut a).to_bits(), gaussian(&mut b).to_bits());
        }
    }

    #[test]
    fn test_random_embedding_shape_and_scale() {
        let mut rng = SmallRng::seed_from_u64(1);
        let embedding = random_embedding(50, 2, &mut rng);

        assert_eq!(embedding.shape(), &[50, 2]);
        // Draws are standard normal scaled by 1e-4; anything past 1e-2 would
        // be a hundred standard deviations out.
        assert!(embedding.iter().all(|v| v.abs() < 1e-2));
        assert!(embedding.iter().any(|&v| v != 0.0));
    }
}
