//! A worker that pulls jobs from a shared crossbeam channel.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender};

use super::tracker::Tracker;
use crate::cancel::CancelToken;
use crate::report::{Failure, JobId, Report};
use crate::Job;

/// A job on its way from `submit` to a worker.
pub(crate) struct Envelope<J> {
    pub(crate) id: JobId,
    pub(crate) job: J,
}

/// One member of the crew. Runs on its own thread until the job queue is
/// closed and drained.
pub(crate) struct ChannelWorker<J: Job> {
    id: usize,
    jobs: Receiver<Envelope<J>>,
    results: Sender<Report<J::Product>>,
    tracker: Arc<Tracker>,
    token: CancelToken,
}

impl<J: Job> ChannelWorker<J> {
    pub(crate) fn hire(
        id: usize,
        jobs: Receiver<Envelope<J>>,
        results: Sender<Report<J::Product>>,
        tracker: Arc<Tracker>,
        token: CancelToken,
    ) -> ChannelWorker<J> {
        tracker.worker_hired();
        ChannelWorker {
            id,
            jobs,
            results,
            tracker,
            token,
        }
    }

    pub(crate) fn run(self) {
        debug!("worker #{}: started", self.id);
        for Envelope { id, job } in self.jobs.iter() {
            let outcome = if self.token.is_cancelled() {
                trace!("worker #{}: skipping {} after cancellation", self.id, id);
                Err(Failure::Cancelled)
            } else {
                self.does(id, job)
            };
            // publish first, count second
            if self.results.send(Report { id, outcome }).is_err() {
                trace!("worker #{}: result sink dropped, discarding {}", self.id, id);
            }
            self.tracker.completed();
        }
        debug!("worker #{}: queue closed, exiting", self.id);
    }

    // the worker just acquired a job; panics are contained here
    fn does(&self, id: JobId, job: J) -> Result<J::Product, Failure> {
        trace!("worker #{}: performing {}", self.id, id);
        match catch_unwind(AssertUnwindSafe(|| job.perform())) {
            Ok(Ok(product)) => Ok(product),
            Ok(Err(e)) => {
                warn!("worker #{}: {} failed: {}", self.id, id, e);
                Err(Failure::Failed(e))
            }
            Err(payload) => {
                let message = panic_message(payload);
                error!("worker #{}: {} panicked: {}", self.id, id, message);
                Err(Failure::Panicked(message))
            }
        }
    }
}

impl<J: Job> Drop for ChannelWorker<J> {
    fn drop(&mut self) {
        self.tracker.worker_exited();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crossbeam::channel;

    use super::{panic_message, ChannelWorker, Envelope};
    use crate::cancel::CancelToken;
    use crate::crew::tracker::Tracker;
    use crate::report::{Failure, JobId};
    use crate::Task;

    #[test]
    fn extracts_panic_messages() {
        assert_eq!(panic_message(Box::new("static")), "static");
        assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
        assert_eq!(panic_message(Box::new(7u8)), "non-string panic payload");
    }

    #[test]
    fn drains_queue_and_reports_each_job() {
        let (jobs_tx, jobs_rx) = channel::unbounded();
        let (results_tx, results_rx) = channel::unbounded();
        let tracker = Arc::new(Tracker::new());
        let worker = ChannelWorker::<Task<u32>>::hire(
            0,
            jobs_rx,
            results_tx,
            tracker.clone(),
            CancelToken::new(),
        );
        assert_eq!(tracker.progress().live_workers, 1);

        for n in 0..3u32 {
            tracker.submitted();
            let job = Task::new(move || if n == 1 { Err("odd one out".into()) } else { Ok(n) });
            jobs_tx.send(Envelope { id: JobId(n as u64), job }).unwrap();
        }
        tracker.submitted();
        jobs_tx
            .send(Envelope {
                id: JobId(3),
                job: Task::new(|| panic!("boom")),
            })
            .unwrap();
        drop(jobs_tx);
        tracker.close();

        worker.run();

        let reports: Vec<_> = results_rx.iter().collect();
        assert_eq!(reports.len(), 4);
        assert_eq!(reports[0].outcome.as_ref().ok(), Some(&0));
        assert!(matches!(reports[1].outcome, Err(Failure::Failed(_))));
        assert_eq!(reports[2].outcome.as_ref().ok(), Some(&2));
        assert!(matches!(&reports[3].outcome, Err(Failure::Panicked(m)) if m == "boom"));
        assert!(tracker.is_settled());
        assert_eq!(tracker.progress().live_workers, 0);
    }

    #[test]
    fn skips_jobs_after_cancellation() {
        let (jobs_tx, jobs_rx) = channel::unbounded();
        let (results_tx, results_rx) = channel::unbounded();
        let tracker = Arc::new(Tracker::new());
        let token = CancelToken::new();
        let worker =
            ChannelWorker::<Task<()>>::hire(0, jobs_rx, results_tx, tracker.clone(), token.clone());

        tracker.submitted();
        jobs_tx
            .send(Envelope {
                id: JobId(0),
                job: Task::new(|| panic!("must not run")),
            })
            .unwrap();
        drop(jobs_tx);
        token.cancel();

        worker.run();

        let report = results_rx.recv().unwrap();
        assert!(matches!(report.outcome, Err(Failure::Cancelled)));
        assert_eq!(tracker.progress().completed, 1);
    }
}
