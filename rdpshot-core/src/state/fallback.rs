//! Security fallback policy.
//!
//! Stateless: the session owns the single-use guard (its
//! [`SecurityMode`] can only be downgraded once), this only decides.

use crate::error::FailureReason;
use crate::rdp::types::SecurityMode;

/// What to do after a connection attempt failed or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Reconnect once with [`SecurityMode::Legacy`].
    RetryLegacy,
    /// Accept the failure.
    GiveUp,
}

/// Map the current mode and failure to a verdict.
pub fn decide(mode: SecurityMode, reason: &FailureReason) -> Verdict {
    match (mode, reason) {
        (SecurityMode::NegotiatedHigh, FailureReason::SecurityNegotiationFailed(_)) => {
            Verdict::RetryLegacy
        }
        _ => Verdict::GiveUp,
    }
}
