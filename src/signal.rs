//! One-shot broadcast signal
//!
//! A [`Signal`] is fired at most once. Every [`SignalWait`] created from it
//! resolves with [`SignalOutcome::Triggered`] when it fires, including waits
//! created afterwards. If every `Signal` handle is dropped without firing,
//! pending waits resolve with [`SignalOutcome::Cancelled`].

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// How a wait on a signal ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalOutcome {
    Triggered,
    Cancelled,
}

struct SignalState {
    fired: bool,
    /// Live `Signal` handles.
    handles: usize,
    waiters: HashMap<u64, Waker>,
    next_key: u64,
}

impl SignalState {
    fn outcome(&self) -> Option<SignalOutcome> {
        if self.fired {
            Some(SignalOutcome::Triggered)
        } else if self.handles == 0 {
            Some(SignalOutcome::Cancelled)
        } else {
            None
        }
    }

    fn take_waiters(&mut self) -> Vec<Waker> {
        self.waiters.drain().map(|(_, waker)| waker).collect()
    }
}

/// Firing side of a one-shot broadcast signal.
pub struct Signal {
    state: Arc<Mutex<SignalState>>,
}

impl Signal {
    /// An unfired signal with one handle.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SignalState {
                fired: false,
                handles: 1,
                waiters: HashMap::new(),
                next_key: 0,
            })),
        }
    }

    /// Fire the signal, waking every waiter. Later calls do nothing.
    pub fn fire(&self) {
        let waiters = {
            let mut state = self.state.lock();
            if state.fired {
                return;
            }
            state.fired = true;
            state.take_waiters()
        };
        for waker in waiters {
            waker.wake();
        }
    }

    /// Whether [`fire`](Self::fire) has been called.
    pub fn is_fired(&self) -> bool {
        self.state.lock().fired
    }

    /// A future resolving once the signal fires or is abandoned.
    pub fn wait(&self) -> SignalWait {
        SignalWait {
            state: self.state.clone(),
            key: None,
        }
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Signal {
    fn clone(&self) -> Self {
        self.state.lock().handles += 1;
        Self {
            state: self.state.clone(),
        }
    }
}

impl Drop for Signal {
    fn drop(&mut self) {
        let waiters = {
            let mut state = self.state.lock();
            state.handles -= 1;
            if state.handles > 0 || state.fired {
                return;
            }
            state.take_waiters()
        };
        for waker in waiters {
            waker.wake();
        }
    }
}

/// Future returned by [`Signal::wait`].
pub struct SignalWait {
    state: Arc<Mutex<SignalState>>,
    key: Option<u64>,
}

impl SignalWait {
    /// Whether the signal has already fired.
    pub fn is_triggered(&self) -> bool {
        self.state.lock().fired
    }
}

impl Future for SignalWait {
    type Output = SignalOutcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut state = this.state.lock();

        if let Some(outcome) = state.outcome() {
            if let Some(key) = this.key.take() {
                state.waiters.remove(&key);
            }
            return Poll::Ready(outcome);
        }

        let key = match this.key {
            Some(key) => key,
            None => {
                let key = state.next_key;
                state.next_key += 1;
                this.key = Some(key);
                key
            }
        };
        state.waiters.insert(key, cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for SignalWait {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.state.lock().waiters.remove(&key);
        }
    }
}
