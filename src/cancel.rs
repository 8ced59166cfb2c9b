//! Cooperative cancellation shared between an operation and whoever may
//! supersede it.
//!
//! A [`CancelToken`] is owned by the thread doing the work. Coordinators keep a
//! [`WeakCancelToken`], which stops resolving once the owning thread is gone.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Signal {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    fn fired(&self) -> MutexGuard<'_, bool> {
        // A poisoned flag is still a valid bool.
        self.fired.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Clone, Default)]
pub struct CancelToken {
    signal: Arc<Signal>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    /// Request cancellation. Firing twice is harmless.
    pub fn cancel(&self) {
        *self.signal.fired() = true;
        self.signal.cond.notify_all();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        *self.signal.fired()
    }

    /// Block for up to `timeout`. Returns `true` if cancelled in the meantime.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut fired = self.signal.fired();
        while !*fired {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            fired = match self.signal.cond.wait_timeout(fired, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    pub fn downgrade(&self) -> WeakCancelToken {
        WeakCancelToken {
            signal: Arc::downgrade(&self.signal),
        }
    }

    /// Whether both handles refer to the same signal.
    pub fn same_as(&self, other: &CancelToken) -> bool {
        Arc::ptr_eq(&self.signal, &other.signal)
    }
}

#[derive(Clone)]
pub struct WeakCancelToken {
    signal: Weak<Signal>,
}

impl WeakCancelToken {
    pub fn upgrade(&self) -> Option<CancelToken> {
        self.signal.upgrade().map(|signal| CancelToken { signal })
    }

    /// Fire the signal if the operation is still alive. Returns whether it was.
    pub fn cancel(&self) -> bool {
        match self.upgrade() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn refers_to(&self, token: &CancelToken) -> bool {
        Weak::ptr_eq(&self.signal, &Arc::downgrade(&token.signal))
    }
}
