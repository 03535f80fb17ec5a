//! Population optimizer with an adaptive affine proposal.
//!
//! The pool starts from a single vector. Each step proposes a random affine
//! combination of the pool, scores it, and admits it if it is no worse than
//! the pool's `pool_size`-th best. The pool drifts toward better regions and
//! shrinks as it converges, so proposals scale themselves without any step
//! size parameter.
//!
//! With more than one worker, feasible proposals are scored by the worker
//! pool while the caller keeps proposing; infeasible proposals are always
//! scored inline since their objective is never computed. A scorer that
//! panics, or a worker process that dies, fails the run with
//! [`Error::Worker`](crate::Error::Worker).

use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::concurrency::worker::Connection;
use crate::concurrency::{Coordinator, Evaluator, Job, JobResult, Message, WorkerPool};
use crate::error::Result;

use super::proposal::make_update;
use super::types::{Candidate, PoolOutcome, PoolParameters, ProgressUpdate, Score, Termination};

/// Cutoff objective used while the pool is below its target size.
const OPEN_CUTOFF: f64 = 1e30;

struct PoolState<'p> {
    params: &'p PoolParameters,
    pool_size: usize,
    pool: Vec<Candidate>,
    best: Candidate,
    evaluations: usize,
    n_good: usize,
    n_real: usize,
    n_real_since_best: usize,
    started: Instant,
    last_report: Option<Instant>,
}

impl<'p> PoolState<'p> {
    fn new(params: &'p PoolParameters, start: Candidate) -> Self {
        Self {
            params,
            pool_size: params.pool_size(start.vector.len()),
            pool: vec![start.clone()],
            best: start,
            evaluations: 0,
            n_good: 0,
            n_real: 0,
            n_real_since_best: 0,
            started: Instant::now(),
            last_report: None,
        }
    }

    fn filling(&self) -> bool {
        self.pool.len() < self.pool_size
    }

    fn cutoff(&self) -> Score {
        let mut objectives: Vec<f64> = self.pool.iter().map(|c| c.score.objective).collect();
        objectives.sort_by(|a, b| a.total_cmp(b));
        let objective = objectives.get(self.pool_size).copied().unwrap_or(OPEN_CUTOFF);
        Score::new(self.best.score.constraint, objective)
    }

    /// Admit or reject one scored candidate and report whether the run has
    /// converged.
    fn consider(&mut self, candidate: Candidate) -> Option<Termination> {
        self.evaluations += 1;
        if candidate.score.is_feasible() {
            self.n_real += 1;
            self.n_real_since_best += 1;
        }

        let cutoff = self.cutoff();
        if candidate.score <= cutoff {
            self.pool.retain(|member| member.score <= cutoff);
            if candidate.score < self.best.score {
                self.best = candidate.clone();
                self.n_real_since_best = 0;
            }
            self.pool.push(candidate);
            self.n_good += 1;
        }

        if self.pool.len() >= self.pool_size && self.best.score.is_feasible() {
            if self.parameter_span() < self.params.xtol {
                return Some(Termination::ParameterSpan);
            }
            if self.n_good >= self.params.min_good_for_ftol && self.objective_span() < self.params.ftol {
                return Some(Termination::ObjectiveSpan);
            }
        }

        if self.n_real_since_best >= self.params.max_stall {
            warn!(
                tries = self.n_real_since_best,
                "no improvement, giving up"
            );
            return Some(Termination::Stalled);
        }
        None
    }

    fn parameter_span(&self) -> f64 {
        let dims = self.best.vector.len();
        (0..dims)
            .map(|i| {
                let (lo, hi) = self.pool.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), c| {
                    (lo.min(c.vector[i]), hi.max(c.vector[i]))
                });
                hi - lo
            })
            .fold(0.0, f64::max)
    }

    fn objective_span(&self) -> f64 {
        let worst = self
            .pool
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
            .map_or(self.best.score.objective, |c| c.score.objective);
        worst - self.best.score.objective
    }

    fn worst(&self) -> Score {
        self.pool
            .iter()
            .map(|c| c.score)
            .max_by(|a, b| a.total_cmp(b))
            .unwrap_or(self.best.score)
    }

    /// Log a status line and call the monitor, at most once per interval.
    fn report<F>(&mut self, comment: &str, on_progress: &mut Option<F>)
    where
        F: FnMut(ProgressUpdate),
    {
        let now = Instant::now();
        if let Some(last) = self.last_report {
            if now.duration_since(last) < self.params.monitor_interval {
                return;
            }
        }
        info!(
            "Optimizing {} best={} worst={} pool={} n_good={} n_real={} n={}",
            comment,
            self.best.score,
            self.worst(),
            self.pool.len(),
            self.n_good,
            self.n_real,
            self.evaluations
        );
        if self.best.score.is_feasible() {
            if let Some(progress) = on_progress.as_mut() {
                progress(ProgressUpdate {
                    best: &self.best,
                    population: &self.pool,
                    evaluations: self.evaluations,
                    n_good: self.n_good,
                    elapsed: self.started.elapsed(),
                });
            }
        }
        self.last_report = Some(Instant::now());
    }

    fn announce(&self) {
        info!(
            "{} parameters, pool size {}",
            self.best.vector.len(),
            self.pool_size
        );
    }

    fn finish(self, termination: Termination) -> PoolOutcome {
        PoolOutcome {
            best: self.best,
            evaluations: self.evaluations,
            n_good: self.n_good,
            termination,
        }
    }
}

fn rng_for(params: &PoolParameters) -> StdRng {
    match params.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn score_inline<C>(constrainer: &C, connection: &mut Connection, vector: &[f64]) -> Result<Score>
where
    C: Fn(&[f64]) -> f64,
{
    let constraint = constrainer(vector);
    if constraint > 0.0 {
        Ok(Score::infeasible(constraint))
    } else {
        match connection.run("inline", &Job::EvaluateCandidate { vector: vector.to_vec() })? {
            JobResult::Score(objective) => Ok(Score::new(0.0, objective)),
        }
    }
}

/// Minimise `scorer` subject to `constrainer` returning 0.0, starting from
/// `start`.
///
/// # Arguments
/// * `comment` - label used in status lines
/// * `constrainer` - total constraint violation, 0.0 when feasible
/// * `scorer` - objective, only called on feasible vectors
/// * `start` - initial vector
/// * `params` - pool settings; `workers > 1` scores on worker threads
/// * `on_progress` - optional callback, time-gated, only called once a
///   feasible best exists
/// * `should_stop` - optional callback checked before each proposal
///
/// # Returns
/// The best candidate seen and why the run ended, or the first worker
/// failure.
pub fn improve<C, S, F, Q>(
    comment: &str,
    constrainer: C,
    scorer: S,
    start: Vec<f64>,
    params: &PoolParameters,
    on_progress: Option<F>,
    should_stop: Option<Q>,
) -> Result<PoolOutcome>
where
    C: Fn(&[f64]) -> f64,
    S: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    F: FnMut(ProgressUpdate),
    Q: Fn() -> bool,
{
    improve_with(
        comment,
        constrainer,
        Evaluator::in_thread(scorer),
        start,
        params,
        on_progress,
        should_stop,
    )
}

/// [`improve`] with the objective behind an [`Evaluator`], e.g. worker
/// processes.
pub fn improve_with<C, F, Q>(
    comment: &str,
    constrainer: C,
    evaluator: Evaluator,
    start: Vec<f64>,
    params: &PoolParameters,
    on_progress: Option<F>,
    should_stop: Option<Q>,
) -> Result<PoolOutcome>
where
    C: Fn(&[f64]) -> f64,
    F: FnMut(ProgressUpdate),
    Q: Fn() -> bool,
{
    let coordinator = Coordinator::new(params.workers.max(1));
    let outcome = improve_on(
        &coordinator,
        comment,
        constrainer,
        evaluator,
        start,
        params,
        on_progress,
        should_stop,
    );
    coordinator.shutdown();
    outcome
}

/// [`improve_with`] on a caller-owned coordinator, which must have been
/// created on the calling thread. Serial runs never touch it.
#[allow(clippy::too_many_arguments)]
pub fn improve_on<C, F, Q>(
    coordinator: &Coordinator<Message>,
    comment: &str,
    constrainer: C,
    evaluator: Evaluator,
    start: Vec<f64>,
    params: &PoolParameters,
    mut on_progress: Option<F>,
    should_stop: Option<Q>,
) -> Result<PoolOutcome>
where
    C: Fn(&[f64]) -> f64,
    F: FnMut(ProgressUpdate),
    Q: Fn() -> bool,
{
    let mut rng = rng_for(params);
    let stopped = || should_stop.as_ref().is_some_and(|stop| stop());

    let (state, termination) = if params.workers <= 1 {
        let mut connection = evaluator.connect("inline")?;
        let start_score = score_inline(&constrainer, &mut connection, &start)?;
        let mut state = PoolState::new(params, Candidate::new(start, start_score));
        state.announce();

        let termination = loop {
            state.report(comment, &mut on_progress);
            if stopped() {
                break Termination::Stopped;
            }
            let vector = make_update(&state.pool, params.initial_accuracy, state.filling(), &mut rng);
            let score = score_inline(&constrainer, &mut connection, &vector)?;
            if let Some(termination) = state.consider(Candidate::new(vector, score)) {
                break termination;
            }
        };
        (state, termination)
    } else {
        let mut workers = WorkerPool::start(coordinator.clone(), params.workers, evaluator)?;
        let constraint = constrainer(&start);
        let start_score = if constraint > 0.0 {
            Score::infeasible(constraint)
        } else {
            workers.submit(start.clone())?;
            let (_, objective) = workers.next_result()?;
            Score::new(0.0, objective)
        };
        let mut state = PoolState::new(params, Candidate::new(start, start_score));
        state.announce();
        let mut done = None;

        while done.is_none() || workers.has_pending() {
            state.report(comment, &mut on_progress);
            if done.is_none() && stopped() {
                done = Some(Termination::Stopped);
                continue;
            }

            let candidate = if done.is_none() && workers.has_idle() {
                let vector = make_update(&state.pool, params.initial_accuracy, state.filling(), &mut rng);
                let constraint = constrainer(&vector);
                if constraint > 0.0 {
                    Candidate::new(vector, Score::infeasible(constraint))
                } else {
                    workers.submit(vector)?;
                    continue;
                }
            } else {
                let (vector, objective) = workers.next_result()?;
                Candidate::new(vector, Score::new(0.0, objective))
            };

            let termination = state.consider(candidate);
            if done.is_none() {
                done = termination;
            }
        }

        let completed = workers.finish()?;
        info!(completed, "workers finished");
        (state, done.unwrap_or(Termination::Stopped))
    };

    info!(
        "Optimized {} best={} after {} evaluations ({:?})",
        comment, state.best.score, state.evaluations, termination
    );
    Ok(state.finish(termination))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::cell::Cell;
    use std::time::Duration;

    fn quadratic(v: &[f64]) -> f64 {
        (v[0] - 0.3).powi(2) + (v[1] - 0.6).powi(2)
    }

    fn unit_box(v: &[f64]) -> f64 {
        v.iter().map(|&x| (-x).max(0.0) + (x - 1.0).max(0.0)).sum()
    }

    fn serial(seed: u64) -> PoolParameters {
        PoolParameters::default()
            .with_workers(1)
            .with_seed(seed)
            .with_tolerances(1e-6, 1e-9)
    }

    #[test]
    fn cutoff_is_open_until_the_pool_fills() {
        let params = serial(0);
        let mut state = PoolState::new(&params, Candidate::new(vec![0.0, 0.0], Score::new(0.0, 1.0)));
        assert_eq!(state.cutoff().objective, OPEN_CUTOFF);
        for i in 0..state.pool_size {
            state.consider(Candidate::new(vec![0.0, i as f64 * 0.1], Score::new(0.0, 2.0 + i as f64)));
        }
        assert_eq!(state.pool.len(), state.pool_size + 1);
        // Pool objectives are 1, 2, .., 11; the cutoff is the 11th smallest.
        assert_eq!(state.cutoff().objective, 11.0);
    }

    #[test]
    fn infeasible_candidates_are_rejected_once_feasible() {
        let params = serial(0);
        let mut state = PoolState::new(&params, Candidate::new(vec![0.5], Score::new(0.0, 1.0)));
        state.consider(Candidate::new(vec![2.0], Score::infeasible(1.0)));
        assert_eq!(state.pool.len(), 1);
        assert_eq!(state.evaluations, 1);
        assert_eq!(state.n_real, 0);
        assert_eq!(state.n_good, 0);
    }

    #[test]
    fn better_candidates_replace_the_best() {
        let params = serial(0);
        let mut state = PoolState::new(&params, Candidate::new(vec![0.5], Score::infeasible(3.0)));
        state.consider(Candidate::new(vec![0.4], Score::infeasible(1.0)));
        assert_eq!(state.best.score.constraint, 1.0);
        state.consider(Candidate::new(vec![0.3], Score::new(0.0, 7.0)));
        assert!(state.best.score.is_feasible());
        assert_eq!(state.n_real_since_best, 0);
    }

    #[test]
    fn stall_limit_ends_the_run() {
        let mut params = serial(0);
        params.max_stall = 3;
        let mut state = PoolState::new(&params, Candidate::new(vec![0.5], Score::new(0.0, 0.0)));
        assert_eq!(state.consider(Candidate::new(vec![0.6], Score::new(0.0, 1.0))), None);
        assert_eq!(state.consider(Candidate::new(vec![0.7], Score::new(0.0, 1.0))), None);
        assert_eq!(
            state.consider(Candidate::new(vec![0.8], Score::new(0.0, 1.0))),
            Some(Termination::Stalled)
        );
    }

    #[test]
    fn serial_run_finds_the_minimum() {
        let outcome = improve(
            "quadratic",
            unit_box,
            quadratic,
            vec![0.0, 0.0],
            &serial(5),
            None::<fn(ProgressUpdate)>,
            None::<fn() -> bool>,
        )
        .unwrap();
        let best = &outcome.best.vector;
        assert!((best[0] - 0.3).abs() < 1e-3, "{best:?}");
        assert!((best[1] - 0.6).abs() < 1e-3, "{best:?}");
        assert!(outcome.best.score.is_feasible());
        assert!(outcome.n_good <= outcome.evaluations);
    }

    #[test]
    fn seeded_runs_repeat() {
        let run = || {
            improve(
                "quadratic",
                unit_box,
                quadratic,
                vec![0.0, 0.0],
                &serial(17),
                None::<fn(ProgressUpdate)>,
                None::<fn() -> bool>,
            )
            .unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn monitor_sees_feasible_best() {
        let mut params = serial(3);
        params.monitor_interval = Duration::ZERO;
        let calls = Cell::new(0);
        improve(
            "quadratic",
            unit_box,
            quadratic,
            vec![0.0, 0.0],
            &params,
            Some(|update: ProgressUpdate| {
                assert!(update.best.score.is_feasible());
                assert!(!update.population.is_empty());
                calls.set(calls.get() + 1);
            }),
            None::<fn() -> bool>,
        )
        .unwrap();
        assert!(calls.get() > 0);
    }

    #[test]
    fn should_stop_interrupts() {
        let outcome = improve(
            "quadratic",
            unit_box,
            quadratic,
            vec![0.0, 0.0],
            &serial(1),
            None::<fn(ProgressUpdate)>,
            Some(|| true),
        )
        .unwrap();
        assert_eq!(outcome.termination, Termination::Stopped);
        assert_eq!(outcome.evaluations, 0);
        assert_eq!(outcome.best.vector, vec![0.0, 0.0]);
    }

    #[test]
    fn parallel_run_finds_the_minimum() {
        let params = PoolParameters::default()
            .with_workers(3)
            .with_seed(9)
            .with_tolerances(1e-6, 1e-9);
        let outcome = improve(
            "quadratic",
            unit_box,
            quadratic,
            vec![0.0, 0.0],
            &params,
            None::<fn(ProgressUpdate)>,
            None::<fn() -> bool>,
        )
        .unwrap();
        let best = &outcome.best.vector;
        assert!((best[0] - 0.3).abs() < 1e-3, "{best:?}");
        assert!((best[1] - 0.6).abs() < 1e-3, "{best:?}");
    }

    #[test]
    fn scorer_panic_fails_the_run() {
        let params = PoolParameters::default().with_workers(2).with_seed(2);
        let result = improve(
            "panicky",
            unit_box,
            |v: &[f64]| -> f64 {
                if v[0] > 0.0 {
                    panic!("scorer refused {v:?}");
                }
                0.0
            },
            vec![0.0, 0.0],
            &params,
            None::<fn(ProgressUpdate)>,
            None::<fn() -> bool>,
        );
        assert!(matches!(result, Err(Error::Worker(_))));
    }

    #[test]
    fn serial_scorer_panic_fails_the_run() {
        let result = improve(
            "panicky",
            unit_box,
            |v: &[f64]| -> f64 {
                if v[0] > 0.0 {
                    panic!("scorer refused {v:?}");
                }
                0.0
            },
            vec![0.0, 0.0],
            &serial(2),
            None::<fn(ProgressUpdate)>,
            None::<fn() -> bool>,
        );
        match result {
            Err(Error::Worker(fault)) => assert!(fault.message.contains("scorer refused")),
            other => panic!("expected worker fault, got {other:?}"),
        }
    }
}
