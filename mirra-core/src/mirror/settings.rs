//! Settings access injected into a session at construction.

use std::time::Duration;

use crate::mirror::provision::DEFAULT_READY_TIMEOUT;
use crate::mirror::resolver::DEFAULT_POLL_INTERVAL;
use crate::mirror::types::SessionConfiguration;

/// Timing knobs a session snapshots when it is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTuning {
    /// How long DirectWired waits for an adapter's display to enumerate.
    pub display_wait: Duration,
    /// Poll cadence of that wait.
    pub poll_interval: Duration,
    /// How long to wait for a presentation surface to become valid.
    pub surface_ready_timeout: Duration,
}

impl Default for SessionTuning {
    fn default() -> Self {
        Self {
            display_wait: Duration::from_secs(8),
            poll_interval: DEFAULT_POLL_INTERVAL,
            surface_ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

/// Read access to the persisted mirroring preferences.
pub trait SettingsAccess: Send + Sync {
    /// Configuration for the next session, from the stored preferences.
    fn session_configuration(&self) -> SessionConfiguration;

    fn tuning(&self) -> SessionTuning {
        SessionTuning::default()
    }
}

/// Fixed settings, for embedding and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticSettings {
    pub configuration: SessionConfiguration,
    pub tuning: SessionTuning,
}

impl StaticSettings {
    pub fn new(configuration: SessionConfiguration) -> Self {
        Self {
            configuration,
            tuning: SessionTuning::default(),
        }
    }

    #[must_use]
    pub fn with_tuning(mut self, tuning: SessionTuning) -> Self {
        self.tuning = tuning;
        self
    }
}

impl SettingsAccess for StaticSettings {
    fn session_configuration(&self) -> SessionConfiguration {
        self.configuration
    }

    fn tuning(&self) -> SessionTuning {
        self.tuning
    }
}
