//! H.264 encoder profile for the wireless paths.
//!
//! Derives [`EncoderSettings`] from the target display and session
//! configuration, and provides the output sink encoded buffers go to.
//!
//! # Output sink
//!
//! No network transport exists yet: [`DiscardSink`] timestamps each encoded
//! buffer for telemetry and drops it. Encoder errors close the current
//! telemetry window instead of failing the session.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::mirror::telemetry::FrameCadence;
use crate::mirror::types::{SessionConfiguration, TargetDisplay};
use crate::platform::{EncoderCallback, EncoderEvent};

/// MIME type requested from the codec factory.
pub const H264_MIME: &str = "video/avc";

/// Lower bitrate bound in bits per second.
pub const MIN_BITRATE: u64 = 2_000_000;
/// Upper bitrate bound in bits per second.
pub const MAX_BITRATE: u64 = 40_000_000;
/// Encoder frame rate; fixed regardless of the sink's refresh rate.
pub const FRAME_RATE: u32 = 60;

/// Target bitrate: `clamp(w * h * 4 * m, 2 Mbps, 40 Mbps)` with `m = 2`
/// for low latency and `m = 4` otherwise.
pub fn target_bitrate(width: u32, height: u32, low_latency: bool) -> u64 {
    let multiplier = if low_latency { 2 } else { 4 };
    (u64::from(width) * u64::from(height) * 4 * multiplier).clamp(MIN_BITRATE, MAX_BITRATE)
}

// ── EncoderSettings ──────────────────────────────────────────────

/// Codec configuration for an encoder input surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderSettings {
    pub mime: &'static str,
    pub width: u32,
    pub height: u32,
    /// Bits per second.
    pub bitrate: u64,
    pub frame_rate: u32,
    /// Seconds between I-frames.
    pub i_frame_interval_secs: u32,
    /// Request the codec's realtime priority/profile.
    pub realtime: bool,
}

impl EncoderSettings {
    /// Settings for mirroring onto `target` under `config`.
    pub fn for_target(target: &TargetDisplay, config: &SessionConfiguration) -> Self {
        Self {
            mime: H264_MIME,
            width: target.width,
            height: target.height,
            bitrate: target_bitrate(target.width, target.height, config.low_latency),
            frame_rate: FRAME_RATE,
            i_frame_interval_secs: if config.low_latency { 1 } else { 2 },
            realtime: true,
        }
    }
}

// ── DiscardSink ──────────────────────────────────────────────────

/// Encoded-output sink that records cadence and drops the data.
#[derive(Clone)]
pub struct DiscardSink {
    cadence: FrameCadence,
    discarded: Arc<AtomicU64>,
    discarded_bytes: Arc<AtomicU64>,
}

impl DiscardSink {
    pub fn new(cadence: FrameCadence) -> Self {
        Self {
            cadence,
            discarded: Arc::new(AtomicU64::new(0)),
            discarded_bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handle one encoder event.
    pub fn accept(&self, event: EncoderEvent) {
        match event {
            EncoderEvent::Output {
                presentation_time_us,
                size,
                key_frame,
            } => {
                self.cadence.mark_frame();
                self.discarded.fetch_add(1, Ordering::Relaxed);
                self.discarded_bytes.fetch_add(size as u64, Ordering::Relaxed);
                trace!(presentation_time_us, size, key_frame, "encoded buffer discarded");
            }
            EncoderEvent::Error(cause) => self.cadence.on_error(&cause),
        }
    }

    /// Boxed callback suitable for [`VideoEncoder::set_output_callback`].
    ///
    /// [`VideoEncoder::set_output_callback`]: crate::platform::VideoEncoder::set_output_callback
    pub fn callback(&self) -> EncoderCallback {
        let sink = self.clone();
        Box::new(move |event| sink.accept(event))
    }

    /// Number of encoded buffers dropped so far.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    pub fn discarded_bytes(&self) -> u64 {
        self.discarded_bytes.load(Ordering::Relaxed)
    }
}

// ── Tests ────────────────────────────────────────────────────────
