//! Mirroring session lifecycle state machine.
//!
//! Provides a `SessionPhase` enum that models the lifecycle of one
//! mirroring session, with validated transitions that return `Result`
//! instead of panicking.

use std::time::Instant;

use crate::error::MirrorError;

// ── SessionPhase ─────────────────────────────────────────────────

/// The current phase of a mirroring session.
///
/// ```text
///  Idle ──► Starting ──► Active ◄──┐ (hot-plug pause / resume)
///   ▲          │           │  └────┘
///   │          ▼           ▼
///   │        Failed ──► Stopping
///   └────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No session resources held. Initial / terminal state.
    #[default]
    Idle,

    /// Resolving, provisioning and binding.
    Starting,

    /// Capture is bound to a surface, or paused waiting for a display.
    Active {
        /// When the session first became active.
        since: Instant,
        /// The external display went away; waiting for the next one.
        paused: bool,
    },

    /// Teardown in progress.
    Stopping,

    /// The last start attempt failed.
    Failed {
        /// Human-readable reason shown to the user.
        reason: String,
    },
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Starting => write!(f, "Starting"),
            Self::Active { paused: false, .. } => write!(f, "Active"),
            Self::Active { paused: true, .. } => write!(f, "Active (paused)"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Failed { reason } => write!(f, "Failed: {reason}"),
        }
    }
}

impl SessionPhase {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_starting(&self) -> bool {
        matches!(self, Self::Starting)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active { .. })
    }

    /// Active but waiting for a replacement display.
    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Active { paused: true, .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// How long the session has been active.
    ///
    /// Returns `None` for any other phase.
    pub fn active_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Active { since, .. } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Starting`.
    ///
    /// Valid from: `Idle`, `Failed` (retry).
    pub fn begin_start(&mut self) -> Result<(), MirrorError> {
        match self {
            Self::Idle | Self::Failed { .. } => {
                *self = Self::Starting;
                Ok(())
            }
            _ => Err(MirrorError::InvalidTransition(
                "cannot start: session is not Idle or Failed",
            )),
        }
    }

    /// Transition to `Active`.
    ///
    /// Valid from: `Starting`.
    pub fn activate(&mut self) -> Result<(), MirrorError> {
        match self {
            Self::Starting => {
                *self = Self::Active {
                    since: Instant::now(),
                    paused: false,
                };
                Ok(())
            }
            _ => Err(MirrorError::InvalidTransition(
                "cannot activate: not in Starting state",
            )),
        }
    }

    /// Transition to `Failed`.
    ///
    /// Valid from: `Starting`.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), MirrorError> {
        match self {
            Self::Starting => {
                *self = Self::Failed {
                    reason: reason.into(),
                };
                Ok(())
            }
            _ => Err(MirrorError::InvalidTransition(
                "cannot fail: not in Starting state",
            )),
        }
    }

    /// Active → Active (paused): the bound display disappeared.
    pub fn pause(&mut self) -> Result<(), MirrorError> {
        match self {
            Self::Active { paused, .. } => {
                *paused = true;
                Ok(())
            }
            _ => Err(MirrorError::InvalidTransition(
                "cannot pause: not in Active state",
            )),
        }
    }

    /// Active (paused) → Active: rebound to a new display.
    pub fn resume(&mut self) -> Result<(), MirrorError> {
        match self {
            Self::Active { paused, .. } => {
                *paused = false;
                Ok(())
            }
            _ => Err(MirrorError::InvalidTransition(
                "cannot resume: not in Active state",
            )),
        }
    }

    /// Transition to `Stopping`.
    ///
    /// Valid from: `Starting`, `Active`, `Failed`.
    pub fn begin_stop(&mut self) -> Result<(), MirrorError> {
        match self {
            Self::Starting | Self::Active { .. } | Self::Failed { .. } => {
                *self = Self::Stopping;
                Ok(())
            }
            _ => Err(MirrorError::InvalidTransition(
                "cannot stop: not in Starting, Active or Failed state",
            )),
        }
    }

    /// Transition to `Idle`.
    ///
    /// Valid from: `Stopping`.
    pub fn finish_stop(&mut self) -> Result<(), MirrorError> {
        match self {
            Self::Stopping => {
                *self = Self::Idle;
                Ok(())
            }
            _ => Err(MirrorError::InvalidTransition(
                "cannot finish stop: not in Stopping state",
            )),
        }
    }

    /// Force-reset to `Idle` regardless of current state.
    pub fn force_idle(&mut self) {
        *self = Self::Idle;
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

        phase.activate().unwrap();
        assert!(phase.is_active());
        assert!(phase.active_duration().is_some());

        phase.begin_stop().unwrap();
        assert_eq!(phase, SessionPhase::Stopping);

        phase.finish_stop().unwrap();
        assert!(phase.is_idle());
    }

    #[test]
    fn failed_start_can_retry_or_stop() {
        let mut phase = SessionPhase::Starting;
        phase.fail("no external display").unwrap();
        assert!(phase.is_failed());
        phase.begin_start().unwrap();
        phase.fail("no external display").unwrap();
        phase.begin_stop().unwrap();
        phase.finish_stop().unwrap();
        assert!(phase.is_idle());
    }

    #[test]
    fn hot_plug_self_transition() {
        let mut phase = SessionPhase::Starting;
        phase.activate().unwrap();
        let before = phase.clone();
        phase.pause().unwrap();
        assert!(phase.is_paused());
        assert!(phase.is_active());
        phase.resume().unwrap();
        assert_eq!(phase, before);
    }

    #[test]
    fn invalid_start_when_active() {
        let mut phase = SessionPhase::Active {
            since: Instant::now(),
            paused: false,
        };
        assert!(phase.begin_start().is_err());
    }

    #[test]
    fn invalid_stop_from_idle() {
        let mut phase = SessionPhase::Idle;
        assert!(phase.begin_stop().is_err());
    }

    #[test]
    fn invalid_activate_from_idle() {
        let mut phase = SessionPhase::Idle;
        assert!(phase.activate().is_err());
        assert!(phase.pause().is_err());
    }

    #[test]
    fn stop_from_starting() {
        let mut phase = SessionPhase::Starting;
        phase.begin_stop().unwrap();
        phase.finish_stop().unwrap();
        assert!(phase.is_idle());
    }

    #[test]
    fn force_idle_from_any_state() {
        let mut phase = SessionPhase::Failed {
            reason: "x".into(),
        };
        phase.force_idle();
        assert!(phase.is_idle());
    }

    #[test]
    fn display_format() {
        assert_eq!(SessionPhase::Idle.to_string(), "Idle");
        assert_eq!(SessionPhase::Starting.to_string(), "Starting");
        assert_eq!(
            SessionPhase::Active {
                since: Instant::now(),
                paused: true
            }
            .to_string(),
            "Active (paused)"
        );
        assert_eq!(
            SessionPhase::Failed {
                reason: "no external display".into()
            }
            .to_string(),
            "Failed: no external display"
        );
    }

    #[test]
    fn default_phase_is_idle() {
        assert!(SessionPhase::default().is_idle());
    }
}
