//! # mirra-core
//!
//! Core library for the mirra screen-mirroring controller.
//!
//! This crate contains:
//! - **Platform seam**: object-safe traits for the display registry, surfaces,
//!   codec and screen capture, plus an in-process simulation (`platform::sim`)
//! - **Sink resolution**: `SinkResolver` and the per-mode `Route`
//! - **Surface provisioning**: `SurfaceProvisioner` and `RenderSurface`
//! - **Session**: `MirroringSession`, the start/stop/hot-plug state machine
//! - **Telemetry**: `FrameCadence` rolling-window FPS summaries
//! - **State**: `SessionPhase` transitions and the `SessionStatus` feed
//! - **Task**: `Supervisor` for isolated, cancellable background work
//! - **Error**: `MirrorError`, typed `thiserror` hierarchy

pub mod error;
pub mod flags;
pub mod mirror;
pub mod platform;
pub mod state;
pub mod task;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use error::{ErrorKind, MirrorError, TaskError};
pub use flags::VirtualDisplayFlags;
pub use mirror::{
    CadenceSummary, CaptureGrant, ConnectionMode, FrameCadence, MirroringSession, RenderSurface,
    Route, SessionConfiguration, SessionTuning, SettingsAccess, SinkResolver, StaticSettings,
    SurfaceKind, SurfaceProvisioner, TargetDisplay,
};
pub use platform::{Platform, PlatformError};
pub use state::{SessionPhase, SessionStatus};
pub use task::{Supervisor, TaskEvent, TaskEventSender};
