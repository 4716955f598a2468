//! Cancellation tokens (spec §5): a subscriber list triggered at most once,
//! plus a timer-driven convenience that fires the token on expiry.

use std::sync::Arc;

use parking_lot::Mutex;

struct Inner {
    fired: bool,
    subscribers: Vec<Box<dyn FnOnce() + Send>>,
}

/// A token that can be triggered exactly once; every subscriber registered
/// before (or racing) the trigger is called exactly once. Per spec §9's
/// Open Question, triggering an already-fired token is enforced as a
/// programming error rather than silently ignored.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<Mutex<Inner>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken {
            inner: Arc::new(Mutex::new(Inner {
                fired: false,
                subscribers: Vec::new(),
            })),
        }
    }

    /// Registers `cb` to run once this token is triggered. Runs `cb`
    /// immediately if the token already fired.
    pub fn subscribe(&self, cb: impl FnOnce() + Send + 'static) {
        let mut inner = self.inner.lock();
        if inner.fired {
            drop(inner);
            cb();
        } else {
            inner.subscribers.push(Box::new(cb));
        }
    }

    /// Triggers the token, running every subscriber exactly once.
    ///
    /// # Panics
    /// Panics if the token was already triggered — a cancellation source
    /// firing twice is a caller bug, not a condition to absorb silently.
    pub fn trigger(&self) {
        let subscribers = {
            let mut inner = self.inner.lock();
            assert!(!inner.fired, "CancellationToken triggered more than once");
            inner.fired = true;
            std::mem::take(&mut inner.subscribers)
        };
        for cb in subscribers {
            cb();
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.lock().fired
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Fires a `CancellationToken` after `duration`, via the given
/// `EventLoop`. The timer itself runs on the tokio runtime; the actual
/// trigger is marshalled back onto the loop through `post`.
pub fn cancel_after(
    event_loop: crate::event_loop::EventLoop,
    token: CancellationToken,
    duration: std::time::Duration,
) {
    tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        let _ = event_loop.post(move || {
            if !token.is_triggered() {
                token.trigger();
            }
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_run_once_on_trigger() {
        let token = CancellationToken::new();
        let count = Arc::new(Mutex::new(0));
        let c1 = count.clone();
        token.subscribe(move || *c1.lock() += 1);
        token.trigger();
        assert_eq!(*count.lock(), 1);
    }

    #[test]
    fn late_subscriber_runs_immediately() {
        let token = CancellationToken::new();
        token.trigger();
        let ran = Arc::new(Mutex::new(false));
        let r = ran.clone();
        token.subscribe(move || *r.lock() = true);
        assert!(*ran.lock());
    }

    #[test]
    #[should_panic]
    fn double_trigger_panics() {
        let token = CancellationToken::new();
        token.trigger();
        token.trigger();
    }
}
