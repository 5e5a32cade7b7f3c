use crate::distance::array_euclidean_distance;
use crate::{fit_transform, sign, zero_mean, Configuration, TsneError};
use ndarray::{array, Array2, Axis};
use ndarray_rand::rand_distr::Uniform;
use ndarray_rand::RandomExt;
use rand::rngs::SmallRng;
use rand::SeedableRng;

/// Seven fixed points in 3-D, small enough for the exact path and large
/// enough to support perplexity 2.
fn small_fixture() -> Array2<f64> {
    array![
        [1.0, 0.2, -0.3],
        [-0.8, 0.5, 0.1],
        [0.3, -0.9, 0.7],
        [0.0, 0.4, -1.0],
        [0.6, 0.6, 0.6],
        [-0.4, -0.5, 0.2],
        [0.9, -0.1, -0.8],
    ]
}

/// Three well-separated clusters of thirty points each.
fn clustered_fixture() -> Array2<f64> {
    let mut rng = SmallRng::seed_from_u64(1000);
    let mut x = Array2::random_using((90, 10), Uniform::new(-1.0, 1.0), &mut rng);
    for i in 0..90 {
        let cluster = (i / 30) as f64;
        for j in 0..10 {
            x[[i, j]] += cluster * 3.0;
        }
    }
    x
}

#[test]
fn test_configuration_builder() {
    let config = Configuration::builder()
        .perplexity(30.0)
        .iterations(500)
        .seed(42)
        .build();

    assert_eq!(config.perplexity, 30.0);
    assert_eq!(config.theta, 0.2);
    assert_eq!(config.iterations, 500);
    assert_eq!(config.output_dimensions, 2);
    assert_eq!(config.learning_rate, 200.0);
    assert_eq!(config.seed, Some(42));
}

#[test]
fn test_empty_input_rejected() {
    let x = Array2::<f64>::zeros((0, 5));
    let result = fit_transform(x.view(), Configuration::default());
    assert!(matches!(result, Err(TsneError::EmptyInput)));
}

#[test]
fn test_perplexity_too_large_rejected() {
    // Seven points cannot support the default perplexity of 50
    let result = fit_transform(small_fixture().view(), Configuration::default());
    assert!(matches!(
        result,
        Err(TsneError::PerplexityTooLarge { points: 7, .. })
    ));
}

#[test]
fn test_identical_points_rejected() {
    let x = Array2::from_elem((10, 3), 1.5);
    let config = Configuration::builder()
        .perplexity(2.0)
        .iterations(10)
        .build();

    let result = fit_transform(x.view(), config);
    assert!(matches!(result, Err(TsneError::ZeroRange)));
}

#[test]
fn test_perplexity_clamped_to_minimum() {
    // 0.5 is clamped to 2.0, which seven points can support
    let config = Configuration::builder()
        .perplexity(0.5)
        .theta(0.0)
        .iterations(10)
        .output_dimensions(1)
        .seed(1)
        .build();

    let result = fit_transform(small_fixture().view(), config);
    assert!(result.is_ok());
}

#[test]
fn test_exact_path_deterministic() {
    let config = Configuration::builder()
        .perplexity(2.0)
        .theta(0.0)
        .iterations(100)
        .output_dimensions(1)
        .seed(1)
        .build();

    let (first, first_costs) = fit_transform(small_fixture().view(), config.clone()).unwrap();
    let (second, second_costs) = fit_transform(small_fixture().view(), config).unwrap();

    assert_eq!(first.shape(), &[7, 1]);
    assert!(first.iter().all(|v| v.is_finite()));
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.to_bits(), b.to_bits(), "embedding not reproducible");
    }

    assert_eq!(first_costs.len(), 2);
    assert_eq!(first_costs[0].iteration, 0);
    assert_eq!(first_costs[1].iteration, 50);
    for (a, b) in first_costs.iter().zip(&second_costs) {
        assert_eq!(a.kl_divergence.to_bits(), b.kl_divergence.to_bits());
    }
}

#[test]
fn test_tree_path_deterministic() {
    let config = Configuration::builder()
        .perplexity(2.0)
        .theta(0.2)
        .iterations(100)
        .output_dimensions(2)
        .seed(7)
        .build();

    let (first, _) = fit_transform(small_fixture().view(), config.clone()).unwrap();
    let (second, _) = fit_transform(small_fixture().view(), config).unwrap();

    assert_eq!(first.shape(), &[7, 2]);
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.to_bits(), b.to_bits(), "embedding not reproducible");
    }
}

#[test]
fn test_different_seeds_differ() {
    let base = Configuration::builder()
        .perplexity(2.0)
        .theta(0.0)
        .iterations(50)
        .output_dimensions(1)
        .seed(1)
        .build();
    let mut other = base.clone();
    other.seed = Some(2);

    let (first, _) = fit_transform(small_fixture().view(), base).unwrap();
    let (second, _) = fit_transform(small_fixture().view(), other).unwrap();

    assert!(
        first.iter().zip(second.iter()).any(|(a, b)| a != b),
        "different seeds produced identical embeddings"
    );
}

#[test]
fn test_fit_transform_preserves_clusters() {
    let x = clustered_fixture();
    let config = Configuration::builder()
        .perplexity(5.0)
        .iterations(300)
        .seed(42)
        .build();

    let (embedding, costs) = fit_transform(x.view(), config).unwrap();

    assert_eq!(embedding.shape(), &[90, 2]);
    assert!(embedding.iter().all(|v| v.is_finite()));

    // The loop re-centers after every iteration
    let mean = embedding.mean_axis(Axis(0)).unwrap();
    assert!(mean.iter().all(|m| m.abs() < 1e-9), "embedding not centered");

    // Non-degenerate spread in every output dimension
    let std = embedding.std_axis(Axis(0), 0.0);
    assert!(std.iter().all(|&s| s > 1e-6), "degenerate embedding");

    // Cost samples land every 50 iterations and stay finite; the last one
    // (post-exaggeration) sits well below the first (exaggerated) one
    assert_eq!(costs.len(), 6);
    assert!(costs.iter().all(|c| c.kl_divergence.is_finite()));
    assert_eq!(costs[5].iteration, 250);
    assert!(costs[5].kl_divergence < costs[0].kl_divergence);

    // Points from the same cluster should end up closer together than
    // points from different clusters
    let mut intra = (0.0, 0_usize);
    let mut inter = (0.0, 0_usize);
    for i in 0..90 {
        for j in (i + 1)..90 {
            let distance = array_euclidean_distance(embedding.row(i), embedding.row(j));
            if i / 30 == j / 30 {
                intra.0 += distance;
                intra.1 += 1;
            } else {
                inter.0 += distance;
                inter.1 += 1;
            }
        }
    }
    let intra_mean = intra.0 / intra.1 as f64;
    let inter_mean = inter.0 / inter.1 as f64;
    assert!(
        intra_mean < inter_mean,
        "clusters not preserved: intra {intra_mean} >= inter {inter_mean}"
    );
}

#[test]
fn test_zero_mean_centers_columns() {
    let mut rng = SmallRng::seed_from_u64(3);
    let mut x = Array2::random_using((40, 4), Uniform::new(5.0, 9.0), &mut rng);

    zero_mean(&mut x);

    let mean = x.mean_axis(Axis(0)).unwrap();
    assert!(mean.iter().all(|m| m.abs() < 1e-12));
}

#[test]
fn test_sign_buckets() {
    assert_eq!(sign(0.0), 0);
    assert_eq!(sign(-0.0), 0);
    assert_eq!(sign(3.5), 1);
    assert_eq!(sign(-2.0), -1);
    assert_ne!(sign(0.0), sign(1e-300));
    assert_ne!(sign(0.0), sign(-1e-300));
}
