//! Evaluation worker process for `windbore::Designer::with_worker_program`.
//!
//! Reads a compact JSON `DesignerConfig` line on stdin, then scores one
//! candidate per line until stdin closes. Logs go to stderr; stdout carries
//! only replies.

use std::io;
use std::process::ExitCode;

use tracing::{error, info};
use windbore::concurrency::serve;
use windbore::{Designer, DesignerConfig};

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let served = serve(io::stdin().lock(), io::stdout().lock(), |config| {
        let designer = Designer::new(DesignerConfig::from_json(config)?)?;
        info!(name = %designer.config().name, "worker ready");
        Ok(move |vector: &[f64]| designer.score(vector))
    });
    match served {
        Ok(jobs) => {
            info!(jobs, "worker done");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(%err, "worker failed");
            ExitCode::FAILURE
        }
    }
}
