use std::io;

use thiserror::Error;

/// Errors raised by the executor itself, as opposed to failures of
/// individual jobs (see [`Failure`](crate::Failure)).
#[derive(Error, Debug)]
pub enum Error {
    #[error("worker count must be at least 1, got {0}")]
    InvalidWorkerCount(usize),

    #[error("executor is closed to new jobs")]
    ExecutorClosed,

    #[error("cancelled before all jobs completed")]
    Cancelled,

    #[error("timed out before all jobs completed")]
    TimedOut,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),

    #[error("worker #{worker} terminated abnormally")]
    WorkerLost { worker: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
