use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};

use crate::cancel::CancelToken;
use crate::crew::tracker::Tracker;
use crate::crew::worker::{ChannelWorker, Envelope};
use crate::crew::{Options, Progress};
use crate::error::{Error, Result};
use crate::report::{JobId, Report};
use crate::Job;

/// A fixed set of worker threads that performs one batch of jobs.
///
/// # Lifecycle
///
///   1. Construct with a worker count; exactly that many threads start.
///   2. `submit` jobs. Each gets a `JobId` and is queued for whichever
///      worker frees up next.
///   3. `close` the submission side.
///   4. `wait` for completion and read one `Report` per job from `results`,
///      or do both at once with `collect`.
///
/// An executor runs a single batch. Once closed it never accepts work again;
/// a new batch needs a new executor.
///
/// # Cancellation
///
/// Raising the executor's `CancelToken` closes it to new jobs, makes `wait`
/// return `Error::Cancelled` right away, and makes workers skip every job
/// they dequeue from then on. Skipped jobs still report, with
/// `Failure::Cancelled`. A job already running is never interrupted.
///
/// # Dropping
///
/// Dropping the executor closes the queue and joins every worker. Queued
/// jobs are still performed (or skipped, if cancelled) before the threads
/// exit, so a consumer holding a clone of `results` must keep reading if the
/// result sink is bounded.
pub struct Executor<J: Job> {
    options: Options,
    next_id: u64,
    jobs: Arc<Queue<J>>,
    results: Receiver<Report<J::Product>>,
    tracker: Arc<Tracker>,
    token: CancelToken,
    handles: Vec<(usize, thread::JoinHandle<()>)>,
}

/// The submission side of the job queue, shared with the cancel hook.
struct Queue<J> {
    sender: Mutex<Option<Sender<Envelope<J>>>>,
}

impl<J> Queue<J> {
    fn lock(&self) -> MutexGuard<'_, Option<Sender<Envelope<J>>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // drops the sender so workers exit once the queue drains
    fn close(&self, tracker: &Tracker) -> bool {
        let mut sender = self.lock();
        match sender.take() {
            Some(jobs) => {
                drop(jobs);
                tracker.close();
                true
            }
            None => false,
        }
    }
}

impl<J: Job> Executor<J> {
    /// Create an executor with `num_workers` threads and default options.
    pub fn new(num_workers: usize) -> Result<Executor<J>> {
        Executor::with_options(Options::with_workers(num_workers))
    }

    pub fn with_options(options: Options) -> Result<Executor<J>> {
        Executor::with_cancel(options, CancelToken::new())
    }

    /// Create an executor that gives up when `token` is raised.
    pub fn with_cancel(options: Options, token: CancelToken) -> Result<Executor<J>> {
        if options.num_workers == 0 {
            return Err(Error::InvalidWorkerCount(options.num_workers));
        }
        let (jobs_tx, jobs_rx) = options.queue.channel();
        let (results_tx, results_rx) = options.results.channel();
        let tracker = Arc::new(Tracker::new());

        let mut handles = Vec::with_capacity(options.num_workers);
        for id in 0..options.num_workers {
            let worker = ChannelWorker::hire(
                id,
                jobs_rx.clone(),
                results_tx.clone(),
                tracker.clone(),
                token.clone(),
            );
            let spawned = thread::Builder::new()
                .name(format!("crew-worker-{}", id))
                .spawn(move || worker.run());
            match spawned {
                Ok(handle) => handles.push((id, handle)),
                Err(e) => {
                    error!("failed to spawn worker #{}: {}", id, e);
                    // the started workers see a closed queue and exit
                    drop(jobs_tx);
                    let _ = join_workers(&mut handles);
                    return Err(Error::Spawn(e));
                }
            }
        }
        debug!("spawned {} workers", options.num_workers);

        let jobs = Arc::new(Queue {
            sender: Mutex::new(Some(jobs_tx)),
        });
        {
            let jobs = Arc::downgrade(&jobs);
            let tracker = Arc::downgrade(&tracker);
            token.on_cancel(move || {
                if let (Some(jobs), Some(tracker)) = (jobs.upgrade(), tracker.upgrade()) {
                    if jobs.close(&tracker) {
                        debug!("closed by cancellation");
                    }
                }
            });
        }

        Ok(Executor {
            options,
            next_id: 0,
            jobs,
            results: results_rx,
            tracker,
            token,
            handles,
        })
    }

    /// Add a job to the queue.
    ///
    /// Blocks while a bounded queue is full. Fails with
    /// `Error::ExecutorClosed` after `close`, or once the token is raised;
    /// in that case nothing is enqueued.
    pub fn submit<F>(&mut self, f: F) -> Result<JobId>
    where
        J: From<F>,
    {
        let id = JobId(self.next_id);
        // count under the queue lock, so a concurrent close cannot settle
        // the tracker before this job is accounted for
        let jobs = {
            let sender = self.jobs.lock();
            let jobs = sender.as_ref().ok_or(Error::ExecutorClosed)?.clone();
            self.tracker.submitted();
            jobs
        };
        // sent on a clone, so a blocked send never holds the lock
        if jobs.send(Envelope { id, job: J::from(f) }).is_err() {
            self.tracker.retract();
            error!("no worker left to receive {}", id);
            return Err(Error::ExecutorClosed);
        }
        self.next_id += 1;
        trace!("submitted {}", id);
        Ok(id)
    }

    /// Mark the end of submissions. Calling it again does nothing.
    pub fn close(&mut self) {
        if self.jobs.close(&self.tracker) {
            debug!("closed after {} jobs", self.next_id);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.jobs.lock().is_none()
    }

    /// A handle on the result sink.
    ///
    /// Reports arrive in completion order. Iteration ends once every worker
    /// has exited, which requires the executor to be closed or cancelled.
    pub fn results(&self) -> Receiver<Report<J::Product>> {
        self.results.clone()
    }

    pub fn progress(&self) -> Progress {
        self.tracker.progress()
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.token.clone()
    }

    /// Raise the cancel token, which also closes the executor.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn num_workers(&self) -> usize {
        self.options.num_workers
    }

    /// Block until every submitted job has reported.
    ///
    /// Completion can only be reached after `close`. Called on an open
    /// executor, this blocks until the token is raised from elsewhere; use
    /// `wait_timeout` when that is not guaranteed.
    pub fn wait(&self) -> Result<()> {
        self.settle(None)
    }

    /// Like `wait`, but gives up with `Error::TimedOut` after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<()> {
        self.settle(Some(timeout))
    }

    fn settle(&self, timeout: Option<Duration>) -> Result<()> {
        if self.tracker.is_settled() {
            return Ok(());
        }
        let deadline = match timeout {
            Some(timeout) => channel::after(timeout),
            None => channel::never(),
        };
        let interrupted = crossbeam::select! {
            recv(self.tracker.done()) -> _ => return Ok(()),
            recv(self.token.signal()) -> _ => Error::Cancelled,
            recv(deadline) -> _ => Error::TimedOut,
        };
        // completion wins a tie
        if self.tracker.is_settled() {
            Ok(())
        } else {
            Err(interrupted)
        }
    }

    /// Close, then gather every report. Blocks until all workers exit.
    ///
    /// After cancellation this still returns one report per job; jobs that
    /// never ran carry `Failure::Cancelled`.
    pub fn collect(mut self) -> Result<Vec<Report<J::Product>>> {
        self.close();
        let results = mem::replace(&mut self.results, channel::never());
        let reports = results.iter().collect();
        self.join()?;
        Ok(reports)
    }

    /// Close, then join every worker thread.
    pub fn shutdown(mut self) -> Result<()> {
        self.close();
        self.join()
    }

    fn join(&mut self) -> Result<()> {
        join_workers(&mut self.handles)
    }
}

// Join every handle, even after a failure; report the first lost worker.
fn join_workers(handles: &mut Vec<(usize, thread::JoinHandle<()>)>) -> Result<()> {
    let mut lost = None;
    for (id, handle) in handles.drain(..) {
        if let Err(e) = handle.join() {
            error!("while joining worker #{}: {:?}", id, e);
            lost.get_or_insert(Error::WorkerLost { worker: id });
        }
    }
    match lost {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// When an executor is dropped, let the workers finish the queue and stop.
impl<J: Job> Drop for Executor<J> {
    fn drop(&mut self) {
        self.close();
        // let workers publish into a bounded sink nobody reads
        drop(mem::replace(&mut self.results, channel::never()));
        let _ = self.join();
    }
}
