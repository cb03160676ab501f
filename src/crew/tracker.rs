//! Counts submissions against completions so a batch knows when it is done.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam::channel::{self, Receiver, Sender};

/// A snapshot of how far a batch has progressed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Progress {
    /// Jobs accepted by `submit`.
    pub submitted: u64,
    /// Reports published to the result sink.
    pub completed: u64,
    /// Whether the submission side has been closed.
    pub closed: bool,
    /// Worker threads that have not yet exited.
    pub live_workers: usize,
}

impl Progress {
    /// Jobs that are queued or executing.
    #[inline]
    pub fn outstanding(&self) -> u64 {
        self.submitted - self.completed
    }

    /// Closed, with a report published for every submitted job.
    #[inline]
    pub fn is_settled(&self) -> bool {
        self.closed && self.submitted == self.completed
    }
}

struct State {
    submitted: u64,
    completed: u64,
    closed: bool,
    live_workers: usize,
    // never sent on; dropping it disconnects `Tracker::done`
    settle: Option<Sender<()>>,
}

impl State {
    fn settle_if_done(&mut self) {
        if self.closed && self.completed == self.submitted && self.settle.take().is_some() {
            debug!("all {} jobs accounted for", self.completed);
        }
    }
}

/// The completion tracker shared by an executor and its workers.
///
/// A submission must be recorded before the job can reach a worker, and a
/// completion only after its report has been published. Under that ordering
/// `done` cannot disconnect while a report is still in flight.
pub(crate) struct Tracker {
    state: Mutex<State>,
    done: Receiver<()>,
}

impl Tracker {
    pub(crate) fn new() -> Tracker {
        let (settle, done) = channel::bounded(0);
        Tracker {
            state: Mutex::new(State {
                submitted: 0,
                completed: 0,
                closed: false,
                live_workers: 0,
                settle: Some(settle),
            }),
            done,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn submitted(&self) {
        let mut state = self.lock();
        debug_assert!(!state.closed, "submission recorded after close");
        state.submitted += 1;
    }

    /// Undo a `submitted` whose job never reached the queue.
    pub(crate) fn retract(&self) {
        let mut state = self.lock();
        assert!(
            state.submitted > state.completed,
            "retracted a submission that was never recorded"
        );
        state.submitted -= 1;
        state.settle_if_done();
    }

    /// Record one published report.
    ///
    /// # Panics
    ///
    /// If this would make completions outnumber submissions. That can only
    /// mean the executor's bookkeeping is corrupt.
    pub(crate) fn completed(&self) {
        let mut state = self.lock();
        if state.completed >= state.submitted {
            let (submitted, completed) = (state.submitted, state.completed);
            drop(state);
            panic!(
                "completion tracker underflow: {} completions for {} submissions",
                completed + 1,
                submitted
            );
        }
        state.completed += 1;
        state.settle_if_done();
    }

    pub(crate) fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.settle_if_done();
    }

    pub(crate) fn worker_hired(&self) {
        self.lock().live_workers += 1;
    }

    pub(crate) fn worker_exited(&self) {
        let mut state = self.lock();
        state.live_workers = state.live_workers.saturating_sub(1);
    }

    pub(crate) fn progress(&self) -> Progress {
        let state = self.lock();
        Progress {
            submitted: state.submitted,
            completed: state.completed,
            closed: state.closed,
            live_workers: state.live_workers,
        }
    }

    /// Disconnects once the submission side is closed and every submitted
    /// job has been completed.
    pub(crate) fn done(&self) -> &Receiver<()> {
        &self.done
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.lock().settle.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::Tracker;

    #[test]
    fn settles_only_after_close() {
        let tracker = Tracker::new();
        tracker.submitted();
        tracker.submitted();
        tracker.completed();
        tracker.completed();
        assert!(!tracker.is_settled());
        assert!(!tracker.progress().is_settled());
        tracker.close();
        assert!(tracker.is_settled());
        assert!(tracker.progress().is_settled());
        assert!(tracker.done().recv().is_err());
    }

    #[test]
    fn settles_on_last_completion_when_closed_early() {
        let tracker = Tracker::new();
        tracker.submitted();
        tracker.close();
        assert!(!tracker.is_settled());
        let progress = tracker.progress();
        assert!(progress.closed);
        assert!(!progress.is_settled());
        assert_eq!(progress.outstanding(), 1);
        tracker.completed();
        assert!(tracker.is_settled());
    }

    #[test]
    fn empty_batch_settles_on_close() {
        let tracker = Tracker::new();
        tracker.close();
        tracker.close();
        assert!(tracker.is_settled());
    }

    #[test]
    fn retract_restores_count() {
        let tracker = Tracker::new();
        tracker.submitted();
        tracker.retract();
        assert_eq!(tracker.progress().submitted, 0);
    }

    #[test]
    fn counts_workers() {
        let tracker = Tracker::new();
        tracker.worker_hired();
        tracker.worker_hired();
        tracker.worker_exited();
        assert_eq!(tracker.progress().live_workers, 1);
    }

    #[test]
    #[should_panic(expected = "completion tracker underflow")]
    fn extra_completion_panics() {
        let tracker = Tracker::new();
        tracker.submitted();
        tracker.completed();
        tracker.completed();
    }
}
