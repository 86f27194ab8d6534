//! Single-shot, re-armable deadline.
//!
//! Polled from the capture session's `select!` loop, so it fires on the
//! same thread as every other session callback and never concurrently
//! with one.

use std::future::pending;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::{Instant, Sleep, sleep};

/// At most one outstanding deadline.
#[derive(Debug, Default)]
pub struct IdleTimer {
    deadline: Option<Pin<Box<Sleep>>>,
}

impl IdleTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a fire `after` from now, replacing any pending deadline.
    pub fn arm(&mut self, after: Duration) {
        match self.deadline.as_mut() {
            Some(sleep) => sleep.as_mut().reset(Instant::now() + after),
            None => self.deadline = Some(Box::pin(sleep(after))),
        }
    }

    /// Drop the pending deadline, if any. Idempotent.
    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// When the pending deadline will fire.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline.as_ref().map(|s| s.deadline())
    }

    /// Resolve when the armed deadline elapses, disarming the timer.
    ///
    /// Pending forever while disarmed. Cancel-safe: dropping the future
    /// before it resolves leaves the deadline armed.
    pub async fn fired(&mut self) {
        match self.deadline.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.deadline = None;
            }
            None => pending::<()>().await,
        }
    }
}
