//! Connection lifecycle of a capture session.
//!
//! Provides a `ConnectionState` enum with validated transitions that
//! return `Result` instead of panicking.

use crate::error::ShotError;

// ── ConnectionState ──────────────────────────────────────────────

/// The current phase of a capture session's connection.
///
/// ```text
///  Connecting ──► Active ──► Closing ──► Terminated
///     ▲   │          │                       ▲
///     │   ▼          ▼                       │
///     └─ Retrying ◄──┘  (once, legacy mode)  │
///         any non-terminal state ────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// A connection attempt is outstanding. Initial state.
    #[default]
    Connecting,

    /// Connected; bitmap updates are being composed.
    Active,

    /// The first attempt failed on security negotiation; a legacy
    /// reconnect is about to be issued.
    Retrying,

    /// A protocol-level close has been requested.
    Closing,

    /// A result has been produced. Final.
    Terminated,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Active => write!(f, "Active"),
            Self::Retrying => write!(f, "Retrying"),
            Self::Closing => write!(f, "Closing"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

impl ConnectionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Active`.
    ///
    /// Valid from: `Connecting`.
    pub fn connected(&mut self) -> Result<(), ShotError> {
        match self {
            Self::Connecting => {
                *self = Self::Active;
                Ok(())
            }
            _ => Err(ShotError::ProtocolViolation(
                "cannot activate: not in Connecting state",
            )),
        }
    }

    /// Transition to `Retrying`.
    ///
    /// Valid from: `Connecting`, `Active`.
    pub fn begin_retry(&mut self) -> Result<(), ShotError> {
        match self {
            Self::Connecting | Self::Active => {
                *self = Self::Retrying;
                Ok(())
            }
            _ => Err(ShotError::ProtocolViolation(
                "cannot retry: not in Connecting or Active state",
            )),
        }
    }

    /// Transition back to `Connecting` for the fallback attempt.
    ///
    /// Valid from: `Retrying`.
    pub fn reconnect(&mut self) -> Result<(), ShotError> {
        match self {
            Self::Retrying => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(ShotError::ProtocolViolation(
                "cannot reconnect: not in Retrying state",
            )),
        }
    }

    /// Transition to `Closing`.
    ///
    /// Valid from: `Active`.
    pub fn begin_close(&mut self) -> Result<(), ShotError> {
        match self {
            Self::Active => {
                *self = Self::Closing;
                Ok(())
            }
            _ => Err(ShotError::ProtocolViolation(
                "cannot close: not in Active state",
            )),
        }
    }

    /// Transition to `Terminated`.
    ///
    /// Valid from any state except `Terminated` itself, which is what
    /// makes the terminal result exactly-once.
    pub fn terminate(&mut self) -> Result<(), ShotError> {
        match self {
            Self::Terminated => Err(ShotError::ProtocolViolation("session already terminated")),
            _ => {
                *self = Self::Terminated;
                Ok(())
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut state = ConnectionState::default();
        assert_eq!(state, ConnectionState::Connecting);

        state.connected().unwrap();
        assert!(state.is_active());

        state.begin_close().unwrap();
        assert_eq!(state, ConnectionState::Closing);

        state.terminate().unwrap();
        assert!(state.is_terminated());
    }

    #[test]
    fn retry_path() {
        let mut state = ConnectionState::Connecting;
        state.begin_retry().unwrap();
        assert_eq!(state, ConnectionState::Retrying);
        state.reconnect().unwrap();
        assert_eq!(state, ConnectionState::Connecting);
        state.connected().unwrap();
        assert!(state.is_active());
    }

    #[test]
    fn retry_from_active() {
        let mut state = ConnectionState::Active;
        state.begin_retry().unwrap();
        assert_eq!(state, ConnectionState::Retrying);
    }

    #[test]
    fn invalid_transitions() {
        let mut state = ConnectionState::Closing;
        assert!(state.begin_retry().is_err());
        assert!(state.connected().is_err());
        assert!(state.reconnect().is_err());

        let mut state = ConnectionState::Connecting;
        assert!(state.begin_close().is_err());
    }

    #[test]
    fn terminate_is_final() {
        let mut state = ConnectionState::Active;
        state.terminate().unwrap();
        assert!(state.terminate().is_err());
        assert!(state.connected().is_err());
        assert!(state.begin_close().is_err());
        assert!(state.is_terminated());
    }

    #[test]
    fn display_format() {
        assert_eq!(ConnectionState::Connecting.to_string(), "Connecting");
        assert_eq!(ConnectionState::Active.to_string(), "Active");
        assert_eq!(ConnectionState::Retrying.to_string(), "Retrying");
        assert_eq!(ConnectionState::Closing.to_string(), "Closing");
        assert_eq!(ConnectionState::Terminated.to_string(), "Terminated");
    }
}
