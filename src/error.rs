//! Crate-wide error type.

use thiserror::Error;

use crate::concurrency::WorkerFault;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid designer configuration: {0}")]
    Config(String),
    #[error("invalid note: {0}")]
    Note(String),
    #[error("worker failed: {0}")]
    Worker(#[from] WorkerFault),
    #[error("unexpected message: {0}")]
    Protocol(String),
    #[error("failed to (de)serialize configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("coordinator has shut down")]
    Shutdown,
    #[error("worker I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
