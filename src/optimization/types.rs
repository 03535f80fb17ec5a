//! Type definitions for the pool optimizer.

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Constraint violation and objective value of one candidate.
///
/// Ordered lexicographically: any feasible candidate beats any infeasible
/// one, and feasible candidates compare by objective.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// Total constraint violation, exactly 0.0 when feasible.
    pub constraint: f64,
    /// Objective value; only meaningful when `constraint == 0.0`.
    pub objective: f64,
}

impl Score {
    pub fn new(constraint: f64, objective: f64) -> Self {
        Self {
            constraint,
            objective,
        }
    }

    /// Score for a candidate that failed its constraints; the objective is
    /// never computed.
    pub fn infeasible(constraint: f64) -> Self {
        Self::new(constraint, 0.0)
    }

    pub fn is_feasible(&self) -> bool {
        self.constraint == 0.0
    }

    /// Total order on `(constraint, objective)`.
    pub fn total_cmp(&self, other: &Self) -> Ordering {
        self.constraint
            .total_cmp(&other.constraint)
            .then_with(|| self.objective.total_cmp(&other.objective))
    }
}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.total_cmp(other))
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_feasible() {
            write!(f, "{:.4}", self.objective)
        } else {
            write!(f, "C={:.4}", self.constraint)
        }
    }
}

/// A parameter vector together with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub vector: Vec<f64>,
    pub score: Score,
}

impl Candidate {
    pub fn new(vector: Vec<f64>, score: Score) -> Self {
        Self { vector, score }
    }
}

/// Why the pool optimizer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// Every parameter's spread across the pool fell below `xtol`.
    ParameterSpan,
    /// Objective spread fell below `ftol` after enough accepted candidates.
    ObjectiveSpan,
    /// Too many feasible evaluations without a new best.
    Stalled,
    /// The caller asked to stop.
    Stopped,
}

/// Pool optimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolParameters {
    /// Pool size as a multiple of the vector length.
    pub pool_factor: f64,
    /// Objective spread tolerance.
    pub ftol: f64,
    /// Parameter spread tolerance.
    pub xtol: f64,
    /// Scale of the Gaussian noise added to proposals.
    pub initial_accuracy: f64,
    /// Accepted candidates required before `ftol` can end the run.
    pub min_good_for_ftol: usize,
    /// Feasible evaluations without improvement before giving up.
    pub max_stall: usize,
    /// Minimum time between monitor callbacks and status lines.
    pub monitor_interval: Duration,
    /// Worker threads evaluating candidates. 1 evaluates inline.
    pub workers: usize,
    /// Seed for reproducible runs; `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for PoolParameters {
    fn default() -> Self {
        Self {
            pool_factor: 5.0,
            ftol: 1e-4,
            xtol: 1e-6,
            initial_accuracy: 0.001,
            min_good_for_ftol: 5000,
            max_stall: 1_000_000,
            monitor_interval: Duration::from_secs(20),
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            seed: None,
        }
    }
}

impl PoolParameters {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_tolerances(mut self, xtol: f64, ftol: f64) -> Self {
        self.xtol = xtol;
        self.ftol = ftol;
        self
    }

    /// Target population size for a vector of `len` parameters.
    pub fn pool_size(&self, len: usize) -> usize {
        ((len as f64 * self.pool_factor) as usize).max(2)
    }
}

/// Snapshot handed to the monitor callback.
#[derive(Debug, Clone)]
pub struct ProgressUpdate<'a> {
    pub best: &'a Candidate,
    pub population: &'a [Candidate],
    pub evaluations: usize,
    pub n_good: usize,
    pub elapsed: Duration,
}

/// Result of a pool optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolOutcome {
    pub best: Candidate,
    /// Candidates scored, feasible or not.
    pub evaluations: usize,
    /// Candidates admitted to the pool.
    pub n_good: usize,
    pub termination: Termination,
}
