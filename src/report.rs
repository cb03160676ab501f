//! The outcome of a single job.

use std::fmt;

use thiserror::Error;

use crate::BoxError;

/// Identifies a submitted job within one executor.
///
/// Ids are handed out by [`Executor::submit`](crate::Executor::submit) in
/// submission order, starting at zero.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub(crate) u64);

impl JobId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

/// Why a job did not produce a value.
#[derive(Error, Debug)]
pub enum Failure {
    #[error("job failed: {0}")]
    Failed(#[source] BoxError),

    #[error("job panicked: {0}")]
    Panicked(String),

    /// The job was dequeued after cancellation and never ran.
    #[error("job skipped after cancellation")]
    Cancelled,
}

/// Exactly one of these is published for every submitted job.
#[derive(Debug)]
pub struct Report<P> {
    pub id: JobId,
    pub outcome: Result<P, Failure>,
}

impl<P> Report<P> {
    #[inline]
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    #[inline]
    pub fn into_result(self) -> Result<P, Failure> {
        self.outcome
    }
}
