//! Geometric feasibility checks.

use crate::instrument::Instrument;

use super::config::DesignerConfig;

/// Every inequality the design must satisfy, as signed slack: non-negative
/// when the constraint holds.
pub fn constraint_checks(config: &DesignerConfig, inst: &Instrument) -> Vec<f64> {
    let length = inst.length;
    let mut checks = vec![length];

    kink_checks(
        &mut checks,
        &inst.inner_kinks,
        length,
        &config.min_inner_fraction_sep,
        config.max_inner_fraction_sep.as_deref(),
    );
    kink_checks(
        &mut checks,
        &inst.outer_kinks,
        length,
        &config.min_outer_fraction_sep,
        config.max_outer_fraction_sep.as_deref(),
    );

    let holes = &inst.hole_positions;
    if let (Some(&first), Some(&last)) = (holes.first(), holes.last()) {
        checks.push(first - config.bottom_clearance_fraction * length);
        checks.push((1.0 - config.top_clearance_fraction) * length - last);

        for (i, value) in config.min_hole_spacing.iter().enumerate() {
            if let Some(value) = value {
                checks.push(holes[i + 1] - holes[i] - value);
            }
        }
        for (i, value) in config.max_hole_spacing.iter().enumerate() {
            if let Some(value) = value {
                checks.push(value - (holes[i + 1] - holes[i]));
            }
        }

        for (d, min) in inst.hole_diameters.iter().zip(&config.min_hole_diameters) {
            checks.push(d - min);
        }
        for (d, max) in inst.hole_diameters.iter().zip(&config.max_hole_diameters) {
            checks.push(max - d);
        }

        // The middle of three consecutive holes may stray from the midpoint
        // of its neighbours by at most `value` of their half-spacing.
        for (i, value) in config.balance.iter().enumerate() {
            if let Some(value) = value {
                let half_span = 0.5 * (holes[i + 2] - holes[i]);
                let midpoint = 0.5 * holes[i] + 0.5 * holes[i + 2];
                checks.push(value * half_span - (midpoint - holes[i + 1]).abs());
            }
        }
    }

    checks
}

fn kink_checks(
    checks: &mut Vec<f64>,
    kinks: &[f64],
    length: f64,
    min_sep: &[f64],
    max_sep: Option<&[f64]>,
) {
    let mut points = Vec::with_capacity(kinks.len() + 2);
    points.push(0.0);
    points.extend_from_slice(kinks);
    points.push(length);

    for (i, pair) in points.windows(2).enumerate() {
        let diff = pair[1] - pair[0];
        checks.push(diff - min_sep[i] * length);
        if let Some(max_sep) = max_sep {
            checks.push(max_sep[i] * length - diff);
        }
    }
}

/// Total constraint violation: the sum of the negative parts of every
/// check. Exactly 0.0 when the design is feasible.
pub fn constraint_score(config: &DesignerConfig, inst: &Instrument) -> f64 {
    constraint_checks(config, inst)
        .into_iter()
        .filter(|&check| check < 0.0)
        .map(|check| -check)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::encoding::{initial_state_vec, unpack};

    #[test]
    fn initial_designs_are_feasible() {
        for config in [
            DesignerConfig::straight_folk_flute(),
            DesignerConfig::three_hole_pipe(),
        ] {
            let inst = unpack(&config, &initial_state_vec(&config));
            let checks = constraint_checks(&config, &inst);
            assert!(
                checks.iter().all(|&c| c >= 0.0),
                "{}: {:?}",
                config.name,
                checks
            );
            assert_eq!(constraint_score(&config, &inst), 0.0);
        }
    }

    #[test]
    fn violations_add_up() {
        let config = DesignerConfig::three_hole_pipe();
        let mut vec = initial_state_vec(&config);
        // Top hole well past the top clearance.
        vec[3] = 0.9;
        let inst = unpack(&config, &vec);
        let expected = inst.hole_positions[2] - 0.4 * inst.length;
        let score = constraint_score(&config, &inst);
        assert!(score >= expected - 1e-9);
        assert!(score > 0.0);
    }

    #[test]
    fn whistle_starts_outside_the_bore_separation_limits() {
        let config = DesignerConfig::folk_whistle();
        let inst = unpack(&config, &initial_state_vec(&config));
        // Second inner span is 0.4 of the length against a 0.5 minimum.
        let expected = 0.1 * inst.length;
        assert!((constraint_score(&config, &inst) - expected).abs() < 1e-9);
    }

    #[test]
    fn negative_length_is_infeasible() {
        let config = DesignerConfig::folk_whistle();
        let mut vec = initial_state_vec(&config);
        vec[0] = -0.1;
        let inst = unpack(&config, &vec);
        assert!(constraint_score(&config, &inst) > 0.0);
    }
}
