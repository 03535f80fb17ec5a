//! Bore designer: ties the encoding, constraints and tuning objective to the
//! pool optimizer.

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::concurrency::Evaluator;
use crate::error::Result;
use crate::instrument::Instrument;
use crate::waveguide::TransformChain;

use super::config::DesignerConfig;
use super::constraints::constraint_score;
use super::encoding::{initial_state_vec, unpack};
use super::objective::{fingering_report, score, FingeringReport};
use super::pool::improve_with;
use super::types::{ProgressUpdate, Score, Termination};

/// A finished design.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignOutcome {
    pub state_vec: Vec<f64>,
    pub instrument: Instrument,
    pub score: Score,
    pub evaluations: usize,
    pub termination: Termination,
    pub report: Vec<FingeringReport>,
}

/// Validated configuration plus the precomputed target wavelengths.
#[derive(Debug, Clone)]
pub struct Designer {
    config: Arc<DesignerConfig>,
    targets: Arc<Vec<f64>>,
    worker_program: Option<PathBuf>,
}

impl Designer {
    pub fn new(config: DesignerConfig) -> Result<Self> {
        config.validate()?;
        let targets = config
            .fingerings
            .iter()
            .map(|f| f.note.wavelength(config.transpose))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            config: Arc::new(config),
            targets: Arc::new(targets),
            worker_program: None,
        })
    }

    /// Score candidates in child processes running `program` (the
    /// `windbore-worker` binary) instead of on threads of this process.
    pub fn with_worker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker_program = Some(program.into());
        self
    }

    pub fn worker_program(&self) -> Option<&Path> {
        self.worker_program.as_deref()
    }

    pub fn config(&self) -> &DesignerConfig {
        &self.config
    }

    /// Target wavelength of each fingering, in mm.
    pub fn targets(&self) -> &[f64] {
        &self.targets
    }

    pub fn initial_state_vec(&self) -> Vec<f64> {
        initial_state_vec(&self.config)
    }

    pub fn unpack(&self, state_vec: &[f64]) -> Instrument {
        unpack(&self.config, state_vec)
    }

    pub fn constraint_score(&self, state_vec: &[f64]) -> f64 {
        constraint_score(&self.config, &self.unpack(state_vec))
    }

    pub fn score(&self, state_vec: &[f64]) -> f64 {
        score(&self.config, &self.targets, &self.unpack(state_vec))
    }

    /// Per-fingering detail for `inst`.
    pub fn report(&self, inst: &Instrument) -> Vec<FingeringReport> {
        let chain = self.config.patched(inst).prepare(&self.config.corrections);
        fingering_reports(&self.config, &chain, &self.targets)
    }

    /// Optimize from the configured initial design.
    pub fn design<F>(&self, on_progress: Option<F>) -> Result<DesignOutcome>
    where
        F: FnMut(ProgressUpdate),
    {
        self.design_from(self.initial_state_vec(), on_progress, None::<fn() -> bool>)
    }

    /// Optimize from `start`, checking `should_stop` before each proposal.
    pub fn design_from<F, Q>(
        &self,
        start: Vec<f64>,
        on_progress: Option<F>,
        should_stop: Option<Q>,
    ) -> Result<DesignOutcome>
    where
        F: FnMut(ProgressUpdate),
        Q: Fn() -> bool,
    {
        let constrainer = {
            let designer = self.clone();
            move |v: &[f64]| designer.constraint_score(v)
        };
        let evaluator = match &self.worker_program {
            Some(program) => Evaluator::process(program, serde_json::to_string(&*self.config)?),
            None => {
                let designer = self.clone();
                Evaluator::in_thread(move |v: &[f64]| designer.score(v))
            }
        };
        let outcome = improve_with(
            &self.config.name,
            constrainer,
            evaluator,
            start,
            &self.config.pool,
            on_progress,
            should_stop,
        )?;

        let instrument = self.unpack(&outcome.best.vector);
        let report = self.report(&instrument);
        Ok(DesignOutcome {
            state_vec: outcome.best.vector,
            instrument,
            score: outcome.best.score,
            evaluations: outcome.evaluations,
            termination: outcome.termination,
            report,
        })
    }
}

/// Report every fingering (parallel).
#[cfg(feature = "parallel")]
fn fingering_reports(
    config: &DesignerConfig,
    chain: &TransformChain,
    targets: &[f64],
) -> Vec<FingeringReport> {
    config
        .fingerings
        .par_iter()
        .zip(targets.par_iter())
        .map(|(fingering, &target)| fingering_report(config, chain, fingering, target))
        .collect()
}

/// Report every fingering (sequential).
#[cfg(not(feature = "parallel"))]
fn fingering_reports(
    config: &DesignerConfig,
    chain: &TransformChain,
    targets: &[f64],
) -> Vec<FingeringReport> {
    config
        .fingerings
        .iter()
        .zip(targets)
        .map(|(fingering, &target)| fingering_report(config, chain, fingering, target))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::optimization::config::Diameter;
    use crate::optimization::types::PoolParameters;
    use crate::types::Fingering;

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = DesignerConfig::three_hole_pipe();
        config.hole_angles.pop();
        assert!(matches!(Designer::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn targets_follow_transpose() {
        let config = DesignerConfig::three_hole_pipe();
        let plain = Designer::new(config.clone()).unwrap();
        let mut up = config;
        up.transpose += 12;
        let up = Designer::new(up).unwrap();
        for (a, b) in plain.targets().iter().zip(up.targets()) {
            assert!((a / b - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn report_covers_every_fingering() {
        let designer = Designer::new(DesignerConfig::straight_folk_flute()).unwrap();
        let inst = designer.unpack(&designer.initial_state_vec());
        let report = designer.report(&inst);
        assert_eq!(report.len(), designer.config().fingerings.len());
        for (entry, &target) in report.iter().zip(designer.targets()) {
            assert_eq!(entry.target_wavelength, target);
            assert!(entry.resonance.wavelength > 0.0);
        }
    }

    #[test]
    fn short_run_improves_a_plain_pipe() {
        // One open hole on an open pipe, two notes an octave-ish apart.
        let mut config = DesignerConfig::new(
            "test pipe",
            300.0,
            vec![Diameter::Same(14.0), Diameter::Same(14.0)],
            vec![Diameter::Same(20.0), Diameter::Same(20.0)],
            vec![10.0],
        )
        .with_fingerings(vec![
            Fingering::from_pattern("D5", &[1]),
            Fingering::from_pattern("G5", &[0]),
        ])
        .with_pool(PoolParameters::default().with_workers(1).with_seed(4));
        config.pool.max_stall = 400;
        config.pool.min_good_for_ftol = 50;
        config.pool.ftol = 1e-2;

        let designer = Designer::new(config).unwrap();
        let start = designer.initial_state_vec();
        let initial = designer.score(&start);
        let outcome = designer.design(None::<fn(ProgressUpdate)>).unwrap();
        assert!(outcome.score.is_feasible());
        assert!(outcome.score.objective <= initial);
        assert_eq!(outcome.report.len(), 2);
        assert_eq!(outcome.state_vec.len(), designer.config().state_len());
        assert!(serde_json::to_string(&outcome).is_ok());
    }
}
