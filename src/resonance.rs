//! Locating resonant wavelengths by bracketing a criterion's zero crossing.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::waveguide::TransformChain;

/// Controls for the bracketing search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParameters {
    /// Initial probe spacing in cents.
    pub step_cents: f64,
    /// Exponent applied to the step ratio each iteration once growth starts.
    pub step_increase: f64,
    /// Iterations with a fixed step before geometric growth begins.
    pub steady_steps: usize,
    /// Iteration budget.
    pub max_steps: usize,
    /// Brackets whose interpolated gradient exceeds this are treated as
    /// discontinuities rather than resonances.
    pub max_grad: f64,
}

impl Default for SearchParameters {
    fn default() -> Self {
        Self {
            step_cents: 1.0,
            step_increase: 1.05,
            steady_steps: 4,
            max_steps: 100,
            max_grad: 1e30,
        }
    }
}

impl SearchParameters {
    pub fn with_max_grad(mut self, max_grad: f64) -> Self {
        self.max_grad = max_grad;
        self
    }
}

/// Outcome of a resonance search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resonance {
    /// Wavelength (mm).
    pub wavelength: f64,
    /// `−dC/dλ · λ` at the crossing; 0.0 when not converged.
    pub gradient: f64,
    pub converged: bool,
    /// Criterion evaluations spent.
    pub evaluations: usize,
}

/// Which way a search is allowed to grow its probe list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expansion {
    Both,
    /// Only toward the side that can still hold a root of a monotone
    /// decreasing criterion.
    Monotone,
}

/// Resonance of `chain` nearest `wavelength` for the given finger pattern,
/// using the wrapped reflection-angle criterion.
pub fn locate_resonance(
    chain: &TransformChain,
    wavelength: f64,
    fingers: &[bool],
    params: &SearchParameters,
) -> Resonance {
    bracket_zero(
        |w| chain.resonance_score(w, fingers),
        wavelength,
        params,
        Expansion::Both,
    )
}

/// Wavelength of resonance mode `harmonic` (1 = lowest) near `wavelength`.
pub fn locate_harmonic(
    chain: &TransformChain,
    wavelength: f64,
    fingers: &[bool],
    harmonic: u32,
    params: &SearchParameters,
) -> Resonance {
    let target = chain.phase_at_infinity().floor() + harmonic as f64;
    bracket_zero(
        |w| chain.phase(w, fingers) - target,
        wavelength,
        params,
        Expansion::Monotone,
    )
}

/// Find where `criterion` crosses from ≥ 0 (shorter wavelength) to < 0
/// (longer wavelength), starting near `wavelength`.
///
/// Never fails: an exhausted search returns the end probe with the smaller
/// absolute criterion and `converged = false`.
fn bracket_zero<F>(criterion: F, wavelength: f64, params: &SearchParameters, expansion: Expansion) -> Resonance
where
    F: Fn(f64) -> f64,
{
    let mut step = 2f64.powf(params.step_cents / 1200.0);
    let half_step = step.sqrt();
    let mut probes = VecDeque::with_capacity(2 * params.max_steps + 2);
    let mut scores = VecDeque::with_capacity(2 * params.max_steps + 2);
    for w in [wavelength / half_step, wavelength * half_step] {
        probes.push_back(w);
        scores.push_back(criterion(w));
    }
    let mut evaluations = 2;

    let interpolate = |x1: f64, y1: f64, x2: f64, y2: f64, evaluations: usize| {
        let m = (y2 - y1) / (x2 - x1);
        let c = y1 - m * x1;
        let intercept = -c / m;
        let gradient = -m * intercept;
        if !intercept.is_finite() || gradient > params.max_grad {
            return None;
        }
        Some(Resonance {
            wavelength: intercept,
            gradient,
            converged: true,
            evaluations,
        })
    };

    for iteration in 0..params.max_steps {
        let n = probes.len();
        if scores[n - 2] >= 0.0 && scores[n - 1] < 0.0 {
            if let Some(found) =
                interpolate(probes[n - 2], scores[n - 2], probes[n - 1], scores[n - 1], evaluations)
            {
                return found;
            }
        }

        // A monotone decreasing criterion that is still negative at the
        // shortest probe can only cross further down, and vice versa.
        let grow_down = match expansion {
            Expansion::Both => true,
            Expansion::Monotone => scores[0] < 0.0,
        };
        let grow_up = match expansion {
            Expansion::Both => true,
            Expansion::Monotone => scores[probes.len() - 1] >= 0.0,
        };

        if grow_down {
            let w = probes[0] / step;
            probes.push_front(w);
            scores.push_front(criterion(w));
            evaluations += 1;
            if scores[0] >= 0.0 && scores[1] < 0.0 {
                if let Some(found) = interpolate(probes[0], scores[0], probes[1], scores[1], evaluations) {
                    return found;
                }
            }
        }

        if grow_up {
            let w = probes[probes.len() - 1] * step;
            probes.push_back(w);
            scores.push_back(criterion(w));
            evaluations += 1;
        }

        if iteration >= params.steady_steps {
            step = step.powf(params.step_increase);
        }
    }

    let last = probes.len() - 1;
    let wavelength = if scores[last].abs() < scores[0].abs() {
        probes[last]
    } else {
        probes[0]
    };
    Resonance {
        wavelength,
        gradient: 0.0,
        converged: false,
        evaluations,
    }
}
