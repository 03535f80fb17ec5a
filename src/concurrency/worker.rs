//! Long-lived evaluation workers and the messages they exchange.
//!
//! Each worker blocks on its inbox future. Delivering `Work` makes it run the
//! job and answer on the reply future with `Done`, which also carries the id
//! of the worker's next inbox. Delivering `Stop` ends the worker, whose
//! completion future then yields `Exited`.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};

use super::coordinator::Coordinator;
use super::future::{FutureHandle, FutureId, WorkerFault};
use super::process::ProcessEvaluator;

/// Objective function shared by every worker.
pub type Scorer = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// Unit of work a worker can run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Job {
    EvaluateCandidate { vector: Vec<f64> },
}

impl Job {
    pub fn run(&self, scorer: &Scorer) -> JobResult {
        match self {
            Job::EvaluateCandidate { vector } => JobResult::Score(scorer(vector)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum JobResult {
    Score(f64),
}

/// Everything that travels through worker futures.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Work { job: Job, reply: FutureId },
    Stop,
    Done { result: JobResult, inbox: FutureId },
    Exited { completed: usize },
}

/// Where workers run their jobs.
#[derive(Clone)]
pub enum Evaluator {
    /// Call the scorer on the worker thread. Unwinding panics become faults;
    /// an abort takes the whole process down.
    Thread(Scorer),
    /// Forward every job to a persistent child process running `program`,
    /// whose first input line is `config`. Any death of the child becomes a
    /// fault.
    Process { program: PathBuf, config: String },
}

impl Evaluator {
    pub fn in_thread<S>(scorer: S) -> Self
    where
        S: Fn(&[f64]) -> f64 + Send + Sync + 'static,
    {
        Evaluator::Thread(Arc::new(scorer))
    }

    pub fn process(program: impl Into<PathBuf>, config: impl Into<String>) -> Self {
        Evaluator::Process {
            program: program.into(),
            config: config.into(),
        }
    }

    /// Open a connection for one worker. Starts the child process for
    /// [`Evaluator::Process`].
    pub(crate) fn connect(&self, name: &str) -> Result<Connection> {
        match self {
            Evaluator::Thread(scorer) => Ok(Connection::Thread(Arc::clone(scorer))),
            Evaluator::Process { program, config } => {
                Ok(Connection::Process(ProcessEvaluator::spawn(name, program, config)?))
            }
        }
    }
}

impl From<Scorer> for Evaluator {
    fn from(scorer: Scorer) -> Self {
        Evaluator::Thread(scorer)
    }
}

/// One worker's live link to its evaluator.
pub(crate) enum Connection {
    Thread(Scorer),
    Process(ProcessEvaluator),
}

impl Connection {
    pub(crate) fn run(&mut self, name: &str, job: &Job) -> std::result::Result<JobResult, WorkerFault> {
        match self {
            Connection::Thread(scorer) => panic::catch_unwind(AssertUnwindSafe(|| job.run(scorer)))
                .map_err(|payload| WorkerFault::from_panic(name, payload)),
            Connection::Process(child) => match job {
                Job::EvaluateCandidate { vector } => child.evaluate(vector).map(JobResult::Score),
            },
        }
    }
}

fn worker_loop(
    name: &str,
    coordinator: &Coordinator<Message>,
    mut inbox: FutureHandle<Message>,
    connection: &mut Connection,
) -> Message {
    let mut completed = 0;
    loop {
        let message = match inbox.take() {
            Ok(message) => message,
            Err(Error::Shutdown) => break,
            Err(err) => {
                error!(worker = name, %err, "could not read inbox");
                break;
            }
        };
        match message {
            Message::Work { job, reply } => {
                let next = coordinator.new_future();
                match connection.run(name, &job) {
                    Ok(result) => {
                        let done = Message::Done {
                            result,
                            inbox: next.id(),
                        };
                        if !coordinator.deliver(reply, done) {
                            warn!(worker = name, %reply, "reply future dropped, stopping");
                            break;
                        }
                        completed += 1;
                        inbox = next;
                    }
                    Err(fault) => {
                        warn!(worker = name, message = %fault.message, "job failed");
                        if !coordinator.deliver_fault(reply, fault) {
                            warn!(worker = name, %reply, "reply future dropped before the fault");
                        }
                        break;
                    }
                }
            }
            Message::Stop => break,
            other => {
                error!(worker = name, message = ?other, "unexpected message in inbox, stopping");
                break;
            }
        }
    }
    debug!(worker = name, completed, "worker exiting");
    Message::Exited { completed }
}

struct Worker {
    completion: FutureHandle<Message>,
    thread: JoinHandle<()>,
}

/// A fixed set of evaluation workers fed through a [`Coordinator`].
pub struct WorkerPool {
    coordinator: Coordinator<Message>,
    workers: Vec<Worker>,
    idle: VecDeque<FutureId>,
    /// Submitted vectors, parallel to `replies`.
    submitted: Vec<Vec<f64>>,
    replies: Vec<FutureHandle<Message>>,
}

impl WorkerPool {
    /// Start `n` workers on `evaluator`. A plain [`Scorer`] runs on the
    /// worker threads themselves.
    pub fn start(coordinator: Coordinator<Message>, n: usize, evaluator: impl Into<Evaluator>) -> Result<Self> {
        let evaluator = evaluator.into();
        let mut pool = Self {
            coordinator,
            workers: Vec::with_capacity(n),
            idle: VecDeque::with_capacity(n),
            submitted: Vec::with_capacity(n),
            replies: Vec::with_capacity(n),
        };
        for i in 0..n {
            let name = format!("worker-{i}");
            let mut connection = match evaluator.connect(&name) {
                Ok(connection) => connection,
                Err(err) => {
                    pool.abort();
                    return Err(err);
                }
            };
            let inbox = pool.coordinator.new_future();
            pool.idle.push_back(inbox.id());
            let thread_name = name.clone();
            let spawned = pool.coordinator.spawn(&name, move |coordinator| {
                worker_loop(&thread_name, &coordinator, inbox, &mut connection)
            });
            match spawned {
                Ok((completion, thread)) => pool.workers.push(Worker { completion, thread }),
                Err(err) => {
                    pool.abort();
                    return Err(err);
                }
            }
        }
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn has_idle(&self) -> bool {
        !self.idle.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        !self.replies.is_empty()
    }

    /// Hand `vector` to the longest-idle worker.
    ///
    /// Fails with [`Error::Protocol`] when every worker is busy or the idle
    /// worker's inbox no longer exists.
    pub fn submit(&mut self, vector: Vec<f64>) -> Result<()> {
        let Some(inbox) = self.idle.pop_front() else {
            return Err(Error::Protocol("every worker is busy".to_string()));
        };
        let reply = self.coordinator.new_future();
        let job = Job::EvaluateCandidate {
            vector: vector.clone(),
        };
        let work = Message::Work {
            job,
            reply: reply.id(),
        };
        if !self.coordinator.deliver(inbox, work) {
            return Err(Error::Protocol(format!("worker inbox {inbox} no longer exists")));
        }
        self.submitted.push(vector);
        self.replies.push(reply);
        Ok(())
    }

    /// Wait for the earliest delivered result and return the candidate with
    /// its objective.
    pub fn next_result(&mut self) -> Result<(Vec<f64>, f64)> {
        let index = self.coordinator.wait_any(&self.replies)?;
        let vector = self.submitted.swap_remove(index);
        let reply = self.replies.swap_remove(index);
        match reply.take()? {
            Message::Done {
                result: JobResult::Score(objective),
                inbox,
            } => {
                self.idle.push_back(inbox);
                Ok((vector, objective))
            }
            other => Err(Error::Protocol(format!("expected Done, got {other:?}"))),
        }
    }

    /// Stop every idle worker and join all threads. Returns the number of
    /// jobs completed. Every reply must have been collected first.
    pub fn finish(mut self) -> Result<usize> {
        if !self.replies.is_empty() {
            return Err(Error::Protocol(format!(
                "{} replies still pending at finish",
                self.replies.len()
            )));
        }
        while let Some(inbox) = self.idle.pop_front() {
            if !self.coordinator.deliver(inbox, Message::Stop) {
                warn!(%inbox, "worker inbox gone before stop");
            }
        }
        let mut completed = 0;
        let mut first_error = None;
        for worker in self.workers.drain(..) {
            match worker.completion.take() {
                Ok(Message::Exited { completed: n }) => completed += n,
                Ok(other) => {
                    first_error.get_or_insert(Error::Protocol(format!("expected Exited, got {other:?}")));
                }
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
            if worker.thread.join().is_err() {
                first_error.get_or_insert(Error::Protocol("worker thread panicked".to_string()));
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(completed),
        }
    }

    /// Tear everything down after a failure: shut the coordinator down so
    /// blocked workers wake, then join them.
    pub fn abort(&mut self) {
        self.submitted.clear();
        self.replies.clear();
        self.idle.clear();
        self.coordinator.shutdown();
        for worker in self.workers.drain(..) {
            drop(worker.completion);
            let _ = worker.thread.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.abort();
        }
    }
}
