//! Domain-specific error types for the mirroring core.
//!
//! All fallible operations return `Result<T, MirrorError>`.
//! No panics on platform failures. Every error is typed and either
//! recovered locally or surfaced through the session status feed.

use std::time::Duration;
use thiserror::Error;

use crate::platform::PlatformError;

/// The canonical error type for mirroring sessions.
#[derive(Debug, Error)]
pub enum MirrorError {
    // ── Resolution Errors ────────────────────────────────────────
    /// DirectWired mode found no presentation-capable external display.
    #[error("no external display")]
    NoExternalDisplay,

    // ── Provisioning Errors ──────────────────────────────────────
    /// A render surface could not be created.
    #[error("surface provisioning failed: {0}")]
    Provisioning(String),

    /// The presentation surface never signalled readiness.
    #[error("presentation surface not ready after {0:?}")]
    SurfaceNotReady(Duration),

    /// Attempted to release a surface that an active binding still targets.
    #[error("surface is still bound to a virtual display")]
    SurfaceInUse,

    // ── Binding Errors ───────────────────────────────────────────
    /// The platform rejected the virtual-display binding.
    #[error("virtual display binding failed: {0}")]
    Binding(#[source] PlatformError),

    // ── Grant Errors ─────────────────────────────────────────────
    /// The capture grant is missing, malformed or already consumed.
    #[error("capture grant invalid: {0}")]
    GrantInvalid(&'static str),

    // ── Lifecycle Errors ─────────────────────────────────────────
    /// A session transition was requested from the wrong phase.
    #[error("invalid session transition: {0}")]
    InvalidTransition(&'static str),

    /// The operation was interrupted by `stop()`.
    #[error("operation cancelled")]
    Cancelled,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    // ── Platform / Task Errors ───────────────────────────────────
    /// Any other platform failure.
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    /// A spawned task failed.
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

/// Coarse classification used for user-facing reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No qualifying sink; retryable by replugging.
    Resolution,
    /// Surface setup failed after any local fallback.
    Provisioning,
    /// The platform refused the virtual display.
    Binding,
    /// A fresh consent flow is required.
    GrantInvalid,
    /// Wrong phase for the requested operation.
    Lifecycle,
    /// Interrupted by stop.
    Cancelled,
    /// Everything else.
    Internal,
}

impl MirrorError {
    /// Map this error onto the reporting taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoExternalDisplay => ErrorKind::Resolution,
            Self::Provisioning(_) | Self::SurfaceNotReady(_) | Self::SurfaceInUse => {
                ErrorKind::Provisioning
            }
            Self::Binding(_) => ErrorKind::Binding,
            Self::GrantInvalid(_) => ErrorKind::GrantInvalid,
            Self::InvalidTransition(_) => ErrorKind::Lifecycle,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Timeout(_)
            | Self::ChannelClosed
            | Self::Platform(_)
            | Self::Task(_)
            | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether the user can retry without a new consent flow.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.kind(), ErrorKind::GrantInvalid | ErrorKind::Lifecycle)
    }
}

// ── TaskError ─────────────────────────────────────────────────────

/// Typed error for supervised background tasks.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The task was explicitly cancelled via `CancellationToken`.
    #[error("task was cancelled")]
    Cancelled,

    /// The task panicked; the supervisor isolated the failure.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// Generic task failure with a human-readable message.
    #[error("task failed: {0}")]
    Failed(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for MirrorError {
    fn from(s: String) -> Self {
        MirrorError::Other(s)
    }
}

impl From<&str> for MirrorError {
    fn from(s: &str) -> Self {
        MirrorError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for MirrorError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        MirrorError::ChannelClosed
    }
}
