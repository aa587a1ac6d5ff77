//! Observable session status.
//!
//! A snapshot of what a session is doing, published on a watch channel
//! every time the session's phase or resources change.

use std::fmt;

use crate::error::ErrorKind;
use crate::mirror::types::{ConnectionMode, SurfaceKind, TargetDisplay};
use crate::state::session::SessionPhase;

/// Point-in-time view of a mirroring session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatus {
    /// Current lifecycle phase.
    pub phase: SessionPhase,

    /// Mode of the current or last attempt.
    pub mode: Option<ConnectionMode>,

    /// Kind of the surface capture is rendering into, while bound.
    pub surface: Option<SurfaceKind>,

    /// Resolved sink, while bound.
    pub target: Option<TargetDisplay>,

    /// Terminal error of the last attempt. Cleared when a new attempt starts.
    pub last_error: Option<String>,

    pub error_kind: Option<ErrorKind>,

    /// Start and retry attempts made so far.
    pub attempts: u64,
}

impl SessionStatus {
    /// Whether the user can act on `last_error` with a retry.
    pub fn can_retry(&self) -> bool {
        self.phase.is_failed()
            && self
                .error_kind
                .is_some_and(|k| k != ErrorKind::GrantInvalid)
    }

    /// Bound and delivering frames.
    pub fn is_mirroring(&self) -> bool {
        self.phase.is_active() && !self.phase.is_paused() && self.surface.is_some()
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.phase)?;
        if let Some(mode) = self.mode {
            write!(f, " [{mode}]")?;
        }
        if let (Some(surface), Some(target)) = (self.surface, &self.target) {
            write!(f, " {surface} -> {}", target.describe())?;
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────
