//! Candidate evaluation in child processes.
//!
//! A worker process reads one line of configuration on stdin, then one JSON
//! [`Job`] per line, and answers each with a JSON [`JobResult`] line on
//! stdout. The parent only ever sees the child's output, so a child that
//! dies mid-job, by abort as much as by panic, turns into a [`WorkerFault`]
//! while the parent keeps running.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use tracing::{debug, warn};

use crate::error::{Error, Result};

use super::future::WorkerFault;
use super::worker::{Job, JobResult};

/// Objective sent back when the evaluation is not a finite number, which
/// JSON cannot carry.
pub const NON_FINITE_SCORE: f64 = f64::MAX;

/// One persistent child process and its pipes.
pub struct ProcessEvaluator {
    name: String,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl ProcessEvaluator {
    /// Start `program` and send it `config` as its first input line.
    pub fn spawn(name: impl Into<String>, program: &Path, config: &str) -> Result<Self> {
        if config.contains('\n') {
            return Err(Error::Protocol("worker configuration must fit on one line".to_string()));
        }
        let name = name.into();
        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::Protocol(format!("{name}: child pipes were not captured")));
        };
        writeln!(stdin, "{config}")?;
        stdin.flush()?;
        debug!(worker = %name, pid = child.id(), program = %program.display(), "worker process started");
        Ok(Self {
            name,
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// OS process id of the child.
    pub fn id(&self) -> u32 {
        self.child.id()
    }

    /// Score one vector in the child.
    pub fn evaluate(&mut self, vector: &[f64]) -> std::result::Result<f64, WorkerFault> {
        let job = Job::EvaluateCandidate {
            vector: vector.to_vec(),
        };
        let line = serde_json::to_string(&job)
            .map_err(|err| WorkerFault::new(self.name.as_str(), format!("could not encode job: {err}")))?;

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(WorkerFault::new(self.name.as_str(), "worker process input is closed"));
        };
        if let Err(err) = writeln!(stdin, "{line}").and_then(|()| stdin.flush()) {
            return Err(self.died(&format!("refused input ({err})")));
        }

        let mut reply = String::new();
        match self.stdout.read_line(&mut reply) {
            Ok(0) => Err(self.died("closed its output")),
            Ok(_) => match serde_json::from_str::<JobResult>(&reply) {
                Ok(JobResult::Score(objective)) => Ok(objective),
                Err(err) => Err(WorkerFault::new(
                    self.name.as_str(),
                    format!("unreadable reply {:?}: {err}", reply.trim_end()),
                )),
            },
            Err(err) => Err(self.died(&format!("could not be read ({err})"))),
        }
    }

    /// Reap the child and describe how it went.
    fn died(&mut self, what: &str) -> WorkerFault {
        self.stdin = None;
        let status = match self.child.wait() {
            Ok(status) => status.to_string(),
            Err(err) => err.to_string(),
        };
        warn!(worker = %self.name, %status, "worker process died");
        WorkerFault::new(self.name.as_str(), format!("worker process {what}: {status}"))
    }
}

impl Drop for ProcessEvaluator {
    fn drop(&mut self) {
        // Closing stdin ends the child's job loop.
        self.stdin = None;
        match self.child.wait() {
            Ok(status) if !status.success() => {
                debug!(worker = %self.name, %status, "worker process exited")
            }
            Ok(_) => {}
            Err(err) => warn!(worker = %self.name, %err, "could not reap worker process"),
        }
    }
}

/// Child side of the protocol: read the configuration line, build a scorer
/// from it, then answer jobs until the input closes.
///
/// Returns the number of jobs answered.
pub fn serve<R, W, B, S>(mut input: R, mut output: W, build: B) -> Result<usize>
where
    R: BufRead,
    W: Write,
    B: FnOnce(&str) -> Result<S>,
    S: Fn(&[f64]) -> f64,
{
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(Error::Protocol("input closed before the configuration".to_string()));
    }
    let scorer = build(line.trim_end())?;

    let mut served = 0;
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        let job: Job = serde_json::from_str(&line)?;
        let result = match job {
            Job::EvaluateCandidate { vector } => {
                let objective = scorer(&vector);
                if objective.is_finite() {
                    JobResult::Score(objective)
                } else {
                    warn!(objective, "non-finite objective");
                    JobResult::Score(NON_FINITE_SCORE)
                }
            }
        };
        serde_json::to_writer(&mut output, &result)?;
        writeln!(output)?;
        output.flush()?;
        served += 1;
    }
    Ok(served)
}
