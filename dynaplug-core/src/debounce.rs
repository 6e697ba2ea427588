//! Leading-edge debounce.
//!
//! The first trigger arms the timer and schedules the action; triggers that
//! arrive while the timer is armed are absorbed. When the delay elapses the
//! timer returns to idle and the action runs exactly once. A burst of events
//! therefore fires one action, a fixed delay after the *first* event.
//!
//! An armed timer cannot be cancelled; it always fires.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Armed,
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    state: Arc<Mutex<TimerState>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: Arc::new(Mutex::new(TimerState::Idle)),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn state(&self) -> TimerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arms the timer and schedules `action` after the delay.
    ///
    /// Returns `false` when the timer was already armed; the trigger is then
    /// absorbed and `action` is dropped without running. Must be called from
    /// within a tokio runtime.
    pub fn trigger<F, Fut>(&self, action: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if *state == TimerState::Armed {
                return false;
            }
            *state = TimerState::Armed;
        }

        let state = Arc::clone(&self.state);
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            *state.lock().unwrap_or_else(PoisonError::into_inner) = TimerState::Idle;
            action().await;
        });
        true
    }
}
