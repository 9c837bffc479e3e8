//! Lifecycle state machine of a [`MirrorSession`](super::MirrorSession).
//!
//! Transitions are validated and return `Result` instead of panicking.

use std::time::Instant;

use crate::error::MirrorError;

// ── SessionPhase ─────────────────────────────────────────────────

/// The current phase of a mirroring session.
///
/// ```text
///  Idle ──► Starting ──► Running ──► Stopping ──► Idle
///   ▲           │                       ▲
///   │           └───────────────────────┤   (failed start cleans up)
///   └───────────── (nothing acquired) ──┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// Nothing acquired. Initial and terminal state.
    #[default]
    Idle,

    /// Start protocol in progress.
    Starting,

    /// All three channels connected and their workers running.
    Running {
        /// When the session entered `Running`.
        since: Instant,
    },

    /// Stop protocol in progress.
    Stopping,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Starting => write!(f, "Starting"),
            Self::Running { .. } => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
        }
    }
}

impl SessionPhase {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// How long the session has been running; `None` in any other phase.
    pub fn running_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Running { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Idle`.
    pub fn begin_start(&mut self) -> Result<(), MirrorError> {
        match self {
            Self::Idle => {
                *self = Self::Starting;
                Ok(())
            }
            _ => Err(MirrorError::InvalidPhase("cannot start: session is not idle")),
        }
    }

    /// Valid from: `Starting`.
    pub fn complete_start(&mut self) -> Result<(), MirrorError> {
        match self {
            Self::Starting => {
                *self = Self::Running {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(MirrorError::InvalidPhase(
                "cannot complete start: session is not starting",
            )),
        }
    }

    /// Abandon a start that acquired nothing needing teardown.
    ///
    /// Valid from: `Starting`.
    pub fn abort_start(&mut self) -> Result<(), MirrorError> {
        match self {
            Self::Starting => {
                *self = Self::Idle;
                Ok(())
            }
            _ => Err(MirrorError::InvalidPhase(
                "cannot abort start: session is not starting",
            )),
        }
    }

    /// Valid from: `Starting`, `Running`.
    pub fn begin_stop(&mut self) -> Result<(), MirrorError> {
        match self {
            Self::Starting | Self::Running { .. } => {
                *self = Self::Stopping;
                Ok(())
            }
            _ => Err(MirrorError::InvalidPhase(
                "cannot stop: session is not starting or running",
            )),
        }
    }

    /// Valid from: `Stopping`.
    pub fn finish_stop(&mut self) -> Result<(), MirrorError> {
        match self {
            Self::Stopping => {
                *self = Self::Idle;
                Ok(())
            }
            _ => Err(MirrorError::InvalidPhase(
                "cannot finish stop: session is not stopping",
            )),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_lifecycle() {
        let mut phase = SessionPhase::Idle;

        phase.begin_start().unwrap();
        assert_eq!(phase, SessionPhase::Starting);

        phase.complete_start().unwrap();
        assert!(phase.is_running());
        assert!(phase.running_duration().is_some());

        phase.begin_stop().unwrap();
        assert_eq!(phase, SessionPhase::Stopping);

        phase.finish_stop().unwrap();
        assert!(phase.is_idle());
    }

    #[test]
    fn failed_start_paths() {
        let mut phase = SessionPhase::Idle;
        phase.begin_start().unwrap();
        phase.abort_start().unwrap();
        assert!(phase.is_idle());

        phase.begin_start().unwrap();
        phase.begin_stop().unwrap();
        phase.finish_stop().unwrap();
        assert!(phase.is_idle());
    }

    #[test]
    fn invalid_transitions() {
        let mut phase = SessionPhase::Running {
            since: Instant::now(),
        };
        assert!(phase.begin_start().is_err());
        assert!(phase.abort_start().is_err());

        let mut phase = SessionPhase::Idle;
        assert!(phase.complete_start().is_err());
        assert!(phase.begin_stop().is_err());
        assert!(phase.finish_stop().is_err());
    }

    #[test]
    fn display_format() {
        assert_eq!(SessionPhase::Idle.to_string(), "Idle");
        assert_eq!(SessionPhase::Starting.to_string(), "Starting");
        assert_eq!(
            SessionPhase::Running {
                since: Instant::now()
            }
            .to_string(),
            "Running"
        );
        assert_eq!(SessionPhase::Stopping.to_string(), "Stopping");
    }

    #[test]
    fn default_phase_is_idle() {
        assert!(SessionPhase::default().is_idle());
    }
}
