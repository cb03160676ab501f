//! The workers behind an executor and the options that size them.

use crossbeam::channel::{self, Receiver, Sender};

pub(crate) mod tracker;
pub(crate) mod worker;

pub use self::tracker::Progress;

/// How many items a channel may hold before senders block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Capacity {
    /// Senders block once this many items are waiting. `Bounded(0)` hands
    /// each item directly to a receiver.
    Bounded(usize),
    /// Senders never block; memory grows with a fast producer.
    Unbounded,
}

impl Capacity {
    pub(crate) fn channel<T>(self) -> (Sender<T>, Receiver<T>) {
        match self {
            Capacity::Bounded(n) => channel::bounded(n),
            Capacity::Unbounded => channel::unbounded(),
        }
    }
}

/// Parameters to adjust the size of the crew and the depth of its channels.
///
/// The job queue is bounded by default, so a producer that outpaces the
/// workers is throttled at `submit`. The result sink is unbounded by default,
/// so calling `wait` before draining results cannot deadlock; bound it to let
/// a slow consumer throttle the workers instead.
#[derive(Copy, Clone, Debug)]
pub struct Options {
    /// The number of workers to create in the pool.
    pub num_workers: usize,
    /// Depth of the job queue.
    pub queue: Capacity,
    /// Depth of the result sink.
    pub results: Capacity,
}

impl Options {
    /// Default options for an explicit number of workers.
    pub fn with_workers(num_workers: usize) -> Options {
        Options {
            num_workers,
            queue: Capacity::Bounded(num_workers),
            results: Capacity::Unbounded,
        }
    }

    pub fn queue_capacity(mut self, queue: Capacity) -> Options {
        self.queue = queue;
        self
    }

    pub fn result_capacity(mut self, results: Capacity) -> Options {
        self.results = results;
        self
    }
}

impl Default for Options {
    fn default() -> Options {
        Options::with_workers(num_cpus::get())
    }
}

#[cfg(test)]
mod tests {
    use super::{Capacity, Options};

    #[test]
    fn default_sizes_queue_to_crew() {
        let options = Options::default();
        assert!(options.num_workers >= 1);
        assert_eq!(options.queue, Capacity::Bounded(options.num_workers));
        assert_eq!(options.results, Capacity::Unbounded);
    }

    #[test]
    fn bounded_channel_applies_backpressure() {
        let (tx, rx) = Capacity::Bounded(1).channel::<u8>();
        tx.send(1).unwrap();
        assert!(tx.try_send(2).is_err());
        assert_eq!(rx.recv().unwrap(), 1);
        assert!(tx.try_send(2).is_ok());
    }
}
