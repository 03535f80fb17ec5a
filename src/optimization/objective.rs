//! Tuning objective: how far an instrument's resonances sit from the
//! target notes.

use serde::{Deserialize, Serialize};

use crate::instrument::Instrument;
use crate::resonance::{locate_harmonic, locate_resonance, Resonance};
use crate::types::{cents_between, describe, Fingering, CENTS_PER_NEPER};
use crate::waveguide::TransformChain;

use super::config::DesignerConfig;

/// Floor on emission before taking its logarithm.
const MIN_EMISSION: f64 = 1e-12;

/// Weights of the objective terms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectiveWeights {
    /// Errors well beyond this many cents grow linearly rather than
    /// cubically. `None` keeps the pure cube.
    pub softening_cents: Option<f64>,
    /// Weight of the low-emission penalty. 0.0 disables it.
    pub emission_weight: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            softening_cents: Some(20.0),
            emission_weight: 0.0,
        }
    }
}

impl ObjectiveWeights {
    /// Contribution of one fingering's absolute error in cents.
    pub fn error_term(&self, cents: f64) -> f64 {
        let cube = cents * cents * cents;
        match self.softening_cents {
            Some(soft) => cube / (1.0 + (cents / soft).powi(2)),
            None => cube,
        }
    }
}

/// Absolute tuning error in cents between two wavelengths.
#[inline]
pub fn cents_error(target: f64, found: f64) -> f64 {
    (target.ln() - found.ln()).abs() * CENTS_PER_NEPER
}

/// How one fingering came out on a given instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingeringReport {
    pub fingering: Fingering,
    pub target_wavelength: f64,
    pub target_note: String,
    pub resonance: Resonance,
    pub actual_note: String,
    /// Signed error; positive is flat.
    pub cents: f64,
    pub emission: f64,
}

/// Locate the resonance a fingering should sound.
pub fn fingering_resonance(
    config: &DesignerConfig,
    chain: &TransformChain,
    fingering: &Fingering,
    target: f64,
) -> Resonance {
    match fingering.harmonic {
        Some(harmonic) => locate_harmonic(chain, target, &fingering.fingers, harmonic, &config.search),
        None => locate_resonance(chain, target, &fingering.fingers, &config.search),
    }
}

/// Per-fingering detail for a finished design.
pub fn fingering_report(
    config: &DesignerConfig,
    chain: &TransformChain,
    fingering: &Fingering,
    target: f64,
) -> FingeringReport {
    let resonance = fingering_resonance(config, chain, fingering, target);
    FingeringReport {
        fingering: fingering.clone(),
        target_wavelength: target,
        target_note: describe(target),
        resonance,
        actual_note: describe(resonance.wavelength),
        cents: cents_between(target, resonance.wavelength),
        emission: chain.emission(resonance.wavelength, &fingering.fingers),
    }
}

/// Tuning score of an instrument: the cube root of the mean (softened)
/// cubed error in cents, plus the emission penalty when weighted. A
/// configured whistle head is folded in first.
///
/// # Arguments
/// * `config` - designer configuration (fingerings, search and weights)
/// * `targets` - target wavelength of each fingering, already transposed
/// * `inst` - instrument to score
pub fn score(config: &DesignerConfig, targets: &[f64], inst: &Instrument) -> f64 {
    assert_eq!(targets.len(), config.fingerings.len(), "one target per fingering");
    if config.fingerings.is_empty() {
        return 0.0;
    }
    let chain = config.patched(inst).prepare(&config.corrections);
    let weights = &config.weights;

    let mut total = 0.0;
    let mut emission_penalty = 0.0;
    for (fingering, &target) in config.fingerings.iter().zip(targets) {
        let resonance = fingering_resonance(config, &chain, fingering, target);
        total += weights.error_term(cents_error(target, resonance.wavelength));
        if weights.emission_weight != 0.0 {
            let emission = chain.emission(resonance.wavelength, &fingering.fingers);
            emission_penalty -= emission.max(MIN_EMISSION).log10();
        }
    }

    let n = config.fingerings.len() as f64;
    let mut result = (total / n).cbrt();
    if weights.emission_weight != 0.0 {
        result += weights.emission_weight * emission_penalty / n;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::config::Diameter;
    use crate::types::{NoteSpec, SPEED_OF_SOUND};
    use crate::waveguide::EndCorrections;

    const CENTS_TOL: f64 = 1e-9;

    #[test]
    fn octave_is_1200_cents() {
        assert!((cents_error(400.0, 200.0) - 1200.0).abs() < CENTS_TOL);
        assert!((cents_error(200.0, 400.0) - 1200.0).abs() < CENTS_TOL);
    }

    #[test]
    fn softening_tames_large_errors() {
        let soft = ObjectiveWeights::default();
        let hard = ObjectiveWeights {
            softening_cents: None,
            ..ObjectiveWeights::default()
        };
        assert!((hard.error_term(3.0) - 27.0).abs() < CENTS_TOL);
        assert!(soft.error_term(3.0) < 27.0);
        assert!(soft.error_term(3.0) > 26.0);
        assert!(soft.error_term(200.0) < 0.02 * hard.error_term(200.0));
    }

    fn cylinder_config(closed_top: bool) -> DesignerConfig {
        DesignerConfig::new(
            "pipe",
            300.0,
            vec![Diameter::Same(15.0), Diameter::Same(15.0)],
            vec![Diameter::Same(22.0), Diameter::Same(22.0)],
            vec![],
        )
        .with_closed_top(closed_top)
    }

    #[test]
    fn perfectly_tuned_pipe_scores_zero() {
        let mut config = cylinder_config(true);
        let inst = Instrument::cylinder(300.0, 15.0, 22.0, true);
        let flange = inst.flange_correction(&EndCorrections::default());
        let target = 4.0 * (300.0 + flange);
        config.fingerings = vec![Fingering::new(
            NoteSpec::Frequency(SPEED_OF_SOUND / target),
            vec![],
        )];
        let s = score(&config, &[target], &inst);
        assert!(s < 1e-2, "score {s}");
    }

    #[test]
    fn detuned_pipe_scores_its_error() {
        let mut config = cylinder_config(true);
        config.weights.softening_cents = None;
        let inst = Instrument::cylinder(300.0, 15.0, 22.0, true);
        let flange = inst.flange_correction(&EndCorrections::default());
        let actual = 4.0 * (300.0 + flange);
        // A target one semitone sharp of what the pipe plays.
        let target = actual / 2f64.powf(1.0 / 12.0);
        config.fingerings = vec![Fingering::new(
            NoteSpec::Frequency(SPEED_OF_SOUND / target),
            vec![],
        )];
        let s = score(&config, &[target], &inst);
        assert!((s - 100.0).abs() < 0.1, "score {s}");

        let report = fingering_report(&config, &inst.prepare(&config.corrections), &config.fingerings[0], target);
        assert!(report.resonance.converged);
        assert!((report.cents - 100.0).abs() < 0.1);
        assert!(report.emission > 0.0);
    }

    #[test]
    fn emission_weight_adds_penalty() {
        let mut config = cylinder_config(true);
        let inst = Instrument::cylinder(300.0, 15.0, 22.0, true);
        let target = 4.0 * (300.0 + inst.flange_correction(&EndCorrections::default()));
        config.fingerings = vec![Fingering::new(
            NoteSpec::Frequency(SPEED_OF_SOUND / target),
            vec![],
        )];
        let plain = score(&config, &[target], &inst);
        config.weights.emission_weight = 1.0;
        let weighted = score(&config, &[target], &inst);
        // A small pipe radiates far less than it carries, so the log is negative.
        assert!(weighted > plain);
    }
}
