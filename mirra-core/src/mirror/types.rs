//! Shared value types for the mirroring pipeline.
//!
//! These are created per start request (configuration, grant) or derived
//! during `start()` (target display). None of them is mutated in place.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::platform::{DeviceMetrics, DisplayId, DisplayInfo, DisplayMode};

// ── ConnectionMode ───────────────────────────────────────────────

/// How the screen reaches its sink. Chosen by the user and persisted by
/// its variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionMode {
    /// USB-C / DisplayPort Alt Mode, rendered straight onto the external display.
    #[default]
    DirectWired,
    /// WiFi Direct peer link, hardware encoded.
    PeerWireless,
    /// Miracast over the regular network, hardware encoded.
    StandardWireless,
}

impl ConnectionMode {
    /// All modes, in preference-list order.
    pub const ALL: [ConnectionMode; 3] = [
        ConnectionMode::DirectWired,
        ConnectionMode::PeerWireless,
        ConnectionMode::StandardWireless,
    ];

    /// Persisted name of the variant.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DirectWired => "DirectWired",
            Self::PeerWireless => "PeerWireless",
            Self::StandardWireless => "StandardWireless",
        }
    }

    pub const fn is_wireless(self) -> bool {
        matches!(self, Self::PeerWireless | Self::StandardWireless)
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown connection mode: {s}"))
    }
}

// ── SessionConfiguration ─────────────────────────────────────────

/// Immutable per-session configuration built from persisted preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionConfiguration {
    pub connection_mode: ConnectionMode,
    /// Smaller buffers, shorter I-frame interval, trusted-display fast path.
    pub low_latency: bool,
    /// Prefer a hardware encoder input surface for wireless modes.
    pub hardware_encoding: bool,
}

impl SessionConfiguration {
    pub fn new(connection_mode: ConnectionMode) -> Self {
        Self {
            connection_mode,
            low_latency: false,
            hardware_encoding: false,
        }
    }

    #[must_use]
    pub fn with_low_latency(mut self, low_latency: bool) -> Self {
        self.low_latency = low_latency;
        self
    }

    #[must_use]
    pub fn with_hardware_encoding(mut self, hardware_encoding: bool) -> Self {
        self.hardware_encoding = hardware_encoding;
        self
    }
}

// ── CaptureGrant ─────────────────────────────────────────────────

/// Result code the platform consent flow reports on approval.
pub const RESULT_OK: i32 = -1;

/// Opaque user consent to capture the screen.
///
/// Moved into the session on `start()`; the type system guarantees it is
/// handed over once. `Debug` deliberately hides the payload.
pub struct CaptureGrant {
    result_code: i32,
    data: Vec<u8>,
}

impl CaptureGrant {
    pub fn new(result_code: i32, data: Vec<u8>) -> Self {
        Self { result_code, data }
    }

    pub fn result_code(&self) -> i32 {
        self.result_code
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whether the consent flow approved the capture and left a payload.
    pub fn is_approved(&self) -> bool {
        self.result_code == RESULT_OK && !self.data.is_empty()
    }
}

impl fmt::Debug for CaptureGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureGrant")
            .field("result_code", &self.result_code)
            .field("data_len", &self.data.len())
            .finish()
    }
}

// ── TargetDisplay ────────────────────────────────────────────────

/// Resolved sink descriptor. Recomputed wholesale on every start and
/// hot-plug event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetDisplay {
    /// Platform display id, `None` when falling back to device metrics.
    pub display_id: Option<DisplayId>,
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
    pub is_external: bool,
    pub refresh_rate: f32,
}

impl TargetDisplay {
    /// Negotiate dimensions for a connected display: the highest refresh
    /// rate among the supported modes sharing the current resolution.
    pub fn from_display(info: &DisplayInfo) -> Self {
        let best = best_mode(&info.current_mode, &info.supported_modes);
        Self {
            display_id: Some(info.id),
            width: best.width,
            height: best.height,
            density_dpi: info.density_dpi,
            is_external: !info.is_default(),
            refresh_rate: best.refresh_rate,
        }
    }

    /// Fallback frame dimensions taken from the device's own display.
    pub fn from_device(metrics: &DeviceMetrics) -> Self {
        Self {
            display_id: None,
            width: metrics.width,
            height: metrics.height,
            density_dpi: metrics.density_dpi,
            is_external: false,
            refresh_rate: metrics.refresh_rate,
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "{}x{} @ {:.0}Hz ({} dpi{})",
            self.width,
            self.height,
            self.refresh_rate,
            self.density_dpi,
            if self.is_external { ", external" } else { "" }
        )
    }
}

fn best_mode(current: &DisplayMode, supported: &[DisplayMode]) -> DisplayMode {
    supported
        .iter()
        .filter(|m| m.width == current.width && m.height == current.height)
        .copied()
        .fold(*current, |best, m| {
            if m.refresh_rate > best.refresh_rate { m } else { best }
        })
}

// ── PixelFormat ──────────────────────────────────────────────────

/// Pixel layout of buffered image surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PixelFormat {
    /// 4 bytes per pixel: Red, Green, Blue, Alpha.
    Rgba8888,
    /// 2 bytes per pixel, lower fidelity.
    Rgb565,
}

// ── SurfaceKind ──────────────────────────────────────────────────

/// Which kind of render surface a session is currently driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SurfaceKind {
    Presentation,
    BufferedImage,
    EncoderInput,
}

impl fmt::Display for SurfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Presentation => write!(f, "presentation"),
            Self::BufferedImage => write!(f, "buffered-image"),
            Self::EncoderInput => write!(f, "encoder-input"),
        }
    }
}
