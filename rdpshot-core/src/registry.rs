//! Live-session bookkeeping for the driver.
//!
//! Replaces a process-wide instance counter: the driver owns one
//! registry, registers each session before running it and terminates it
//! once its record is out. The loop stops when nothing is left alive.

use std::collections::HashSet;
use std::net::IpAddr;

use tracing::debug;

use crate::error::ShotError;

/// Identifier handed out by [`SessionRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// What the driver should do after a session terminates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Stop,
}

/// One line of the outcome log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub ip: IpAddr,
    pub port: u16,
    pub success: bool,
    pub summary: String,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    next_id: u64,
    live: HashSet<SessionId>,
    outcomes: Vec<Outcome>,
    stops: u32,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self) -> SessionId {
        self.next_id += 1;
        let id = SessionId(self.next_id);
        self.live.insert(id);
        debug!(%id, live = self.live.len(), "session registered");
        id
    }

    /// Record the outcome of `id` and tell the caller whether the loop
    /// has anything left to run.
    pub fn terminate(&mut self, id: SessionId, outcome: Outcome) -> Result<LoopControl, ShotError> {
        if !self.live.remove(&id) {
            return Err(ShotError::ProtocolViolation("session is not live"));
        }
        debug!(%id, live = self.live.len(), "session terminated: {}", outcome.summary);
        self.outcomes.push(outcome);

        if self.live.is_empty() {
            self.stops += 1;
            Ok(LoopControl::Stop)
        } else {
            Ok(LoopControl::Continue)
        }
    }

    pub fn live(&self) -> usize {
        self.live.len()
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    /// How many times the loop was told to stop.
    pub fn stops(&self) -> u32 {
        self.stops
    }
}
