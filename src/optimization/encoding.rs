//! Mapping between design state vectors and instruments.
//!
//! Layout of a state vector:
//!
//! | slot | meaning |
//! |---|---|
//! | 0 | length as a multiple of the transposed initial length |
//! | 1..=n | hole positions as fractions of the length |
//! | n+1..=2n | hole diameter fractions, stored squared |
//! | then | interior inner-bore breakpoints as fractions of the length |
//! | then | interior outer-wall breakpoints as fractions of the length |

use crate::instrument::Instrument;
use crate::profile::Profile;

use super::config::{DesignerConfig, Diameter};

/// `sign(x)·√|x|`, the inverse of the squared storage of diameter fractions.
#[inline]
pub fn signed_sqrt(x: f64) -> f64 {
    if x >= 0.0 {
        x.sqrt()
    } else {
        -(-x).sqrt()
    }
}

/// Starting point for the optimizer.
pub fn initial_state_vec(config: &DesignerConfig) -> Vec<f64> {
    let mut vec = Vec::with_capacity(config.state_len());
    vec.push(1.0);
    vec.extend_from_slice(&config.initial_hole_fractions);
    vec.extend(config.initial_hole_diameter_fractions.iter().map(|f| f * f));
    vec.extend_from_slice(&config.initial_inner_fractions);
    vec.extend_from_slice(&config.initial_outer_fractions);
    vec
}

fn profile_through(kinks: &[f64], length: f64, diameters: &[Diameter]) -> Profile {
    let mut pos = Vec::with_capacity(kinks.len() + 2);
    pos.push(0.0);
    pos.extend_from_slice(kinks);
    pos.push(length);
    // Infeasible vectors may order kinks arbitrarily; sort so the profile is
    // well formed and let the separation constraints report the problem.
    pos.sort_by(|a, b| a.total_cmp(b));
    Profile::new(
        pos,
        diameters.iter().map(Diameter::low).collect(),
        diameters.iter().map(Diameter::high).collect(),
    )
}

/// Build the instrument a state vector describes.
///
/// # Panics
/// If `state_vec` does not have [`DesignerConfig::state_len`] entries.
pub fn unpack(config: &DesignerConfig, state_vec: &[f64]) -> Instrument {
    assert_eq!(
        state_vec.len(),
        config.state_len(),
        "state vector length does not match designer configuration"
    );
    let n = config.n_holes();
    let n_inner = config.inner_diameters.len() - 2;
    let n_outer = config.outer_diameters.len() - 2;

    let length = state_vec[0] * config.initial_length * config.scale();
    let mut p = 1;

    let hole_positions: Vec<f64> = state_vec[p..p + n].iter().map(|f| f * length).collect();
    p += n;

    let hole_diameters: Vec<f64> = state_vec[p..p + n]
        .iter()
        .enumerate()
        .map(|(i, &f)| {
            let (min, max) = (config.min_hole_diameters[i], config.max_hole_diameters[i]);
            min + signed_sqrt(f) * (max - min)
        })
        .collect();
    p += n;

    let inner_kinks: Vec<f64> = state_vec[p..p + n_inner].iter().map(|f| f * length).collect();
    p += n_inner;
    let outer_kinks: Vec<f64> = state_vec[p..p + n_outer].iter().map(|f| f * length).collect();

    let inner = profile_through(&inner_kinks, length, &config.inner_diameters);
    let mut outer = profile_through(&outer_kinks, length, &config.outer_diameters);
    if config.outer_add {
        outer = outer.add(&inner);
    }

    let mut inner_hole_positions = Vec::with_capacity(n);
    let mut hole_lengths = Vec::with_capacity(n);
    for i in 0..n {
        // The bore is treated as locally cylindrical for the shift.
        let pos = hole_positions[i];
        let radians = config.hole_angles[i].to_radians();
        let thickness = 0.5 * (outer.value_at(pos, false) - inner.value_at(pos, false));
        let shift = radians.sin() * thickness;
        inner_hole_positions.push(pos + shift);
        hole_lengths.push(
            (thickness * thickness + shift * shift).sqrt()
                + config.hole_extra_height_by_diameter[i] * hole_diameters[i],
        );
    }

    Instrument {
        length,
        inner,
        outer,
        hole_positions,
        inner_hole_positions,
        hole_diameters,
        hole_angles: config.hole_angles.clone(),
        hole_horiz_angles: config.hole_horiz_angles.clone(),
        hole_lengths,
        inner_kinks,
        outer_kinks,
        closed_top: config.closed_top,
        cone_step: config.cone_step,
    }
}
