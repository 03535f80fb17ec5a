//! Thread and process coordination for parallel candidate evaluation.
//!
//! A [`Coordinator`] limits how many threads run at once, hands out
//! refcounted futures, and starts worker threads. [`WorkerPool`] builds the
//! optimizer's evaluation workers on top of it. Each worker either calls the
//! scorer itself or, with [`Evaluator::Process`], drives a child process
//! through [`ProcessEvaluator`] so that a crash in the objective stays out
//! of the caller's address space.
//!
//! # Example
//!
//! ```
//! use windbore::concurrency::{Coordinator, Evaluator, WorkerPool};
//!
//! let coordinator = Coordinator::new(2);
//! let evaluator = Evaluator::in_thread(|v: &[f64]| v[0] * v[0]);
//! let mut pool = WorkerPool::start(coordinator, 2, evaluator).unwrap();
//! pool.submit(vec![3.0]).unwrap();
//! let (vector, score) = pool.next_result().unwrap();
//! assert_eq!((vector[0], score), (3.0, 9.0));
//! assert_eq!(pool.finish().unwrap(), 1);
//! ```

pub mod coordinator;
pub mod future;
pub mod process;
pub mod worker;

pub use coordinator::Coordinator;
pub use future::{Delivery, FutureHandle, FutureId, WorkerFault};
pub use process::{serve, ProcessEvaluator};
pub use worker::{Evaluator, Job, JobResult, Message, Scorer, WorkerPool};
