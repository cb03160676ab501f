//! Cooperative cancellation shared between an executor, its workers and
//! whoever wants to give up on a batch.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam::channel::{self, Receiver, Sender};

/// A cloneable flag that, once raised, stays raised.
///
/// Workers check it between jobs, so a job that is already running always
/// finishes; nothing is interrupted mid-flight. Raising it closes every
/// executor built on it to new jobs, and threads blocked in
/// [`Executor::wait`](crate::Executor::wait) wake right away.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

type Hook = Box<dyn FnOnce() + Send>;

struct Inner {
    raised: AtomicBool,
    watch: Mutex<Watch>,
    signal: Receiver<()>,
}

struct Watch {
    // never sent on; dropping it disconnects `signal`
    trigger: Option<Sender<()>>,
    hooks: Vec<Hook>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        let (trigger, signal) = channel::bounded(0);
        CancelToken {
            inner: Arc::new(Inner {
                raised: AtomicBool::new(false),
                watch: Mutex::new(Watch {
                    trigger: Some(trigger),
                    hooks: Vec::new(),
                }),
                signal,
            }),
        }
    }

    fn watch(&self) -> MutexGuard<'_, Watch> {
        self.inner.watch.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raise the token. Calling this more than once has no further effect.
    pub fn cancel(&self) {
        self.inner.raised.store(true, Ordering::SeqCst);
        let (trigger, hooks) = {
            let mut watch = self.watch();
            (watch.trigger.take(), mem::take(&mut watch.hooks))
        };
        if trigger.is_some() {
            debug!("cancellation requested");
        }
        drop(trigger);
        // hooks run outside the lock; they may take locks of their own
        for hook in hooks {
            hook();
        }
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    /// Becomes ready (disconnected) once the token is raised.
    pub(crate) fn signal(&self) -> &Receiver<()> {
        &self.inner.signal
    }

    /// Run `hook` once when the token is raised, or now if it already is.
    pub(crate) fn on_cancel<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut watch = self.watch();
            if !self.is_cancelled() {
                watch.hooks.push(Box::new(hook));
                return;
            }
        }
        hook();
    }
}

impl Default for CancelToken {
    fn default() -> CancelToken {
        CancelToken::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use crossbeam::channel::RecvTimeoutError;

    use super::CancelToken;

    #[test]
    fn starts_lowered() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(
            token.signal().recv_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Timeout)
        );
    }

    #[test]
    fn clones_share_state_and_cancel_is_idempotent() {
        let token = CancelToken::new();
        let other = token.clone();
        other.cancel();
        other.cancel();
        assert!(token.is_cancelled());
        assert_eq!(
            token.signal().recv_timeout(Duration::from_millis(10)),
            Err(RecvTimeoutError::Disconnected)
        );
    }

    #[test]
    fn hooks_run_once_on_cancel() {
        let token = CancelToken::new();
        let fired = Arc::new(AtomicUsize::new(0));
        {
            let fired = fired.clone();
            token.on_cancel(move || {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        token.cancel();
        token.cancel();
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // registered after the fact: runs immediately
        let late = fired.clone();
        token.on_cancel(move || {
            late.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn wakes_blocked_waiter() {
        let token = CancelToken::new();
        let waiter = {
            let token = token.clone();
            thread::spawn(move || token.signal().recv().is_err())
        };
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(waiter.join().unwrap());
    }
}
