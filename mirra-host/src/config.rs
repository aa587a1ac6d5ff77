//! Configuration and the persisted mirroring preferences.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use mirra_core::{ConnectionMode, SessionConfiguration, SessionTuning, SettingsAccess};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// The user's mirroring preferences.
    pub mirroring: MirroringConfig,
    /// Session timing.
    pub timing: TimingConfig,
    /// Simulated platform used in console mode.
    pub simulation: SimulationConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// The three persisted preferences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirroringConfig {
    /// `"DirectWired"`, `"PeerWireless"` or `"StandardWireless"`.
    pub connection_mode: ConnectionMode,
    pub low_latency: bool,
    pub hardware_encoding: bool,
}

/// Session timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// How long DirectWired waits for an adapter's display (milliseconds).
    pub display_wait_ms: u64,
    /// Poll interval of that wait (milliseconds).
    pub poll_interval_ms: u64,
    /// Presentation surface readiness timeout (milliseconds).
    pub surface_ready_timeout_ms: u64,
}

/// Console-mode simulated display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Attach an external display at startup.
    pub external_display: bool,
    pub width: u32,
    pub height: u32,
    pub refresh_rate: f32,
    /// Frames pumped per second into the bound surface.
    pub frame_rate: u32,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Optional log file path. If empty, logs to stderr.
    pub file: String,
    /// Also log each cadence summary as a JSON line.
    pub telemetry_json: bool,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            display_wait_ms: 8000,
            poll_interval_ms: 100,
            surface_ready_timeout_ms: 3000,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            external_display: true,
            width: 1920,
            height: 1080,
            refresh_rate: 60.0,
            frame_rate: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
            telemetry_json: false,
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl HostConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write this configuration to `path`.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    /// Write the default configuration to a file (for bootstrapping).
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        Self::default().save(path)
    }

    pub fn session_configuration(&self) -> SessionConfiguration {
        SessionConfiguration::new(self.mirroring.connection_mode)
            .with_low_latency(self.mirroring.low_latency)
            .with_hardware_encoding(self.mirroring.hardware_encoding)
    }

    /// Timing as session tuning. A zero poll interval is raised to 1 ms.
    pub fn tuning(&self) -> SessionTuning {
        SessionTuning {
            display_wait: Duration::from_millis(self.timing.display_wait_ms),
            poll_interval: Duration::from_millis(self.timing.poll_interval_ms.max(1)),
            surface_ready_timeout: Duration::from_millis(self.timing.surface_ready_timeout_ms),
        }
    }
}

// ── PreferenceStore ──────────────────────────────────────────────

/// File-backed settings handed to sessions.
///
/// Sessions read it when they are built; [`PreferenceStore::update`]
/// changes the preferences and writes the whole file back.
pub struct PreferenceStore {
    path: PathBuf,
    config: Mutex<HostConfig>,
}

impl PreferenceStore {
    pub fn new(path: impl Into<PathBuf>, config: HostConfig) -> Self {
        Self {
            path: path.into(),
            config: Mutex::new(config),
        }
    }

    /// Load from `path`, falling back to defaults.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = HostConfig::load(&path);
        Self::new(path, config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> HostConfig {
        self.config.lock().clone()
    }

    /// Change the mirroring preferences and persist them.
    ///
    /// Returns `Ok(false)` without touching the file when nothing changed.
    pub fn update(&self, f: impl FnOnce(&mut MirroringConfig)) -> std::io::Result<bool> {
        let snapshot = {
            let mut config = self.config.lock();
            let before = config.mirroring;
            f(&mut config.mirroring);
            if config.mirroring == before {
                return Ok(false);
            }
            config.clone()
        };
        snapshot.save(&self.path)?;
        tracing::info!(
            mode = %snapshot.mirroring.connection_mode,
            low_latency = snapshot.mirroring.low_latency,
            hardware_encoding = snapshot.mirroring.hardware_encoding,
            "preferences saved to {}",
            self.path.display()
        );
        Ok(true)
    }
}

impl SettingsAccess for PreferenceStore {
    fn session_configuration(&self) -> SessionConfiguration {
        self.config.lock().session_configuration()
    }

    fn tuning(&self) -> SessionTuning {
        self.config.lock().tuning()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = HostConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("connection_mode = \"DirectWired\""));
        assert!(text.contains("display_wait_ms = 8000"));
    }

    #[test]
    fn missing_sections_use_defaults() {
        let cfg: HostConfig = toml::from_str(
            r#"
            [mirroring]
            connection_mode = "PeerWireless"
            low_latency = true
            "#,
        )
        .unwrap();
        assert_eq!(cfg.mirroring.connection_mode, ConnectionMode::PeerWireless);
        assert!(cfg.mirroring.low_latency);
        assert!(!cfg.mirroring.hardware_encoding);
        assert_eq!(cfg.timing, TimingConfig::default());
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirra-host.toml");
        std::fs::write(&path, "[mirroring]\nconnection_mode = \"Bluetooth\"\n").unwrap();
        assert_eq!(HostConfig::load(&path), HostConfig::default());
        assert_eq!(
            HostConfig::load(&dir.path().join("absent.toml")),
            HostConfig::default()
        );
    }

    #[test]
    fn tuning_converts_milliseconds() {
        let mut cfg = HostConfig::default();
        cfg.timing.poll_interval_ms = 0;
        let tuning = cfg.tuning();
        assert_eq!(tuning.display_wait, Duration::from_secs(8));
        assert_eq!(tuning.poll_interval, Duration::from_millis(1));
        assert_eq!(tuning.surface_ready_timeout, Duration::from_secs(3));
    }

    #[test]
    fn store_update_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirra-host.toml");
        let store = PreferenceStore::open(&path);

        assert!(!store.update(|_| {}).unwrap());
        assert!(!path.exists());

        assert!(
            store
                .update(|m| {
                    m.connection_mode = ConnectionMode::StandardWireless;
                    m.hardware_encoding = true;
                })
                .unwrap()
        );

        let reloaded = HostConfig::load(&path);
        assert_eq!(
            reloaded.mirroring.connection_mode,
            ConnectionMode::StandardWireless
        );
        assert!(reloaded.mirroring.hardware_encoding);
        assert_eq!(
            store.session_configuration(),
            SessionConfiguration::new(ConnectionMode::StandardWireless)
                .with_hardware_encoding(true)
        );
    }
}
