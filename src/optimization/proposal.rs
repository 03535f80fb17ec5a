//! Candidate proposal by random affine recombination of the pool.

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

use super::types::Candidate;

/// Chance of adding noise to a proposal once the pool is full.
const NOISE_PROBABILITY: f64 = 0.1;

/// Propose a new parameter vector from the current pool.
///
/// The proposal is `Σ w_j·x_j` with weights drawn from `N(0, (1+2u)/√n)`,
/// shifted to sum to zero, and one randomly chosen weight raised by one. The
/// result is therefore an affine combination that stays within the span of
/// the pool and shrinks with it. With probability 0.1, or always when
/// `do_noise` is set, isotropic Gaussian noise of scale
/// `u·initial_accuracy` is added.
///
/// # Arguments
/// * `pool` - current population, at least one member
/// * `initial_accuracy` - noise scale
/// * `do_noise` - force noise, used while the pool is still filling
/// * `rng` - random source
pub fn make_update<R: Rng + ?Sized>(
    pool: &[Candidate],
    initial_accuracy: f64,
    do_noise: bool,
    rng: &mut R,
) -> Vec<f64> {
    assert!(!pool.is_empty(), "cannot propose from an empty pool");
    let do_noise = do_noise || rng.r#gen::<f64>() < NOISE_PROBABILITY;

    let n = pool.len();
    let m = pool[0].vector.len();

    let weight_weight = (1.0 + 2.0 * rng.r#gen::<f64>()) / (n as f64).sqrt();
    let mut weights: Vec<f64> = (0..n)
        .map(|_| {
            let z: f64 = StandardNormal.sample(rng);
            z * weight_weight
        })
        .collect();
    let offset = -weights.iter().sum::<f64>() / n as f64;
    for w in weights.iter_mut() {
        *w += offset;
    }
    weights[rng.gen_range(0..n)] += 1.0;

    let mut update = vec![0.0; m];
    for (member, &w) in pool.iter().zip(&weights) {
        for (u, &x) in update.iter_mut().zip(&member.vector) {
            *u += w * x;
        }
    }

    if do_noise {
        let extra = rng.r#gen::<f64>() * initial_accuracy;
        for u in update.iter_mut() {
            let z: f64 = StandardNormal.sample(rng);
            *u += z * extra;
        }
    }

    update
}
