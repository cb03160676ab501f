//! A fixed crew of worker threads that drains a batch of jobs and reports
//! exactly one result per job.
//!
//! ```
//! use crew_executor::{Executor, Task};
//!
//! let mut executor = Executor::<Task<u64>>::new(2)?;
//! for i in 1..=5u64 {
//!     executor.submit(Task::new(move || Ok(i * 2)))?;
//! }
//! let mut values = executor
//!     .collect()?
//!     .into_iter()
//!     .filter_map(|report| report.outcome.ok())
//!     .collect::<Vec<_>>();
//! values.sort();
//! assert_eq!(values, [2, 4, 6, 8, 10]);
//! # Ok::<(), crew_executor::Error>(())
//! ```

#[macro_use]
extern crate log;

pub use cancel::CancelToken;
pub use crew::{Capacity, Options, Progress};
pub use error::{Error, Result};
pub use executor::Executor;
pub use report::{Failure, JobId, Report};

mod cancel;
pub mod crew;
mod error;
mod executor;
mod report;

/// The error a job body may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The generic "job" that an executor's workers can perform.
///
/// A job is consumed by exactly one worker. Any state shared between jobs is
/// the caller's to synchronize.
pub trait Job: Send + 'static {
    type Product: Send + 'static;

    fn perform(self) -> std::result::Result<Self::Product, BoxError>;
}

/// A boxed closure that can be performed as a job.
///
/// This allows an executor to run any kind of job, at the cost of dynamic
/// invocation.
pub struct Task<P>(Box<dyn FnOnce() -> std::result::Result<P, BoxError> + Send>);

impl<P> Task<P> {
    #[inline]
    pub fn new<F>(f: F) -> Task<P>
    where
        F: FnOnce() -> std::result::Result<P, BoxError> + Send + 'static,
    {
        Task(Box::new(f))
    }
}

impl<P: Send + 'static> Job for Task<P> {
    type Product = P;

    #[inline]
    fn perform(self) -> std::result::Result<P, BoxError> {
        let Task(task) = self;
        task()
    }
}

// Allow closures to be converted to tasks automatically for convenience.
impl<P, F> From<F> for Task<P>
where
    F: FnOnce() -> std::result::Result<P, BoxError> + Send + 'static,
{
    #[inline]
    fn from(f: F) -> Task<P> {
        Task::new(f)
    }
}
