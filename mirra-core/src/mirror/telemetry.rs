//! Frame-cadence telemetry.
//!
//! Tracks inter-frame deltas over a rolling one-second window and emits a
//! [`CadenceSummary`] (fps, min/avg/max delta) each time the window
//! expires. The last frame of an expired window becomes the anchor of the
//! next one, so no frame time is lost at window boundaries.
//!
//! Timestamps are nanoseconds on the tracker's own monotonic clock
//! ([`FrameCadence::now_nanos`]). Creating or resetting a tracker anchors
//! the window at the current instant, so the first frame after either is
//! already a counted delta.
//!
//! [`FrameCadence`] is a cheap cloneable handle. Frames arrive on the
//! platform's capture callback context while `reset()` comes from session
//! teardown; every mutation goes through one mutex.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Shortest window accepted by [`FrameCadence::with_window`].
pub const MIN_WINDOW: Duration = Duration::from_millis(1);

/// A single delivered frame. Only ever feeds the open window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSample {
    pub timestamp_nanos: i64,
}

/// One emitted window summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CadenceSummary {
    pub fps: f64,
    pub frames: u32,
    pub min_ms: f64,
    pub avg_ms: f64,
    pub max_ms: f64,
    pub window_ms: f64,
}

#[derive(Debug, Default)]
struct Window {
    start: i64,
    last: i64,
    frames: u32,
    min_delta: i64,
    max_delta: i64,
    total_delta: i64,
}

impl Window {
    fn anchored_at(ts: i64) -> Self {
        Self {
            start: ts,
            last: ts,
            ..Self::default()
        }
    }

    fn anchor(&mut self, ts: i64) {
        *self = Self {
            start: ts,
            last: ts,
            ..Self::default()
        };
    }

    fn record(&mut self, delta: i64) {
        if self.frames == 0 {
            self.min_delta = delta;
            self.max_delta = delta;
        } else {
            self.min_delta = self.min_delta.min(delta);
            self.max_delta = self.max_delta.max(delta);
        }
        self.frames += 1;
        self.total_delta += delta;
    }

    fn summarize(&self, elapsed: i64) -> CadenceSummary {
        let secs = elapsed as f64 / 1_000_000_000.0;
        CadenceSummary {
            fps: self.frames as f64 / secs,
            frames: self.frames,
            min_ms: self.min_delta as f64 / NANOS_PER_MILLI,
            avg_ms: self.total_delta as f64 / self.frames as f64 / NANOS_PER_MILLI,
            max_ms: self.max_delta as f64 / NANOS_PER_MILLI,
            window_ms: elapsed as f64 / NANOS_PER_MILLI,
        }
    }
}

struct Inner {
    window: Mutex<Window>,
    last_summary: Mutex<Option<CadenceSummary>>,
    window_len: i64,
    epoch: Instant,
    feed: broadcast::Sender<CadenceSummary>,
}

/// Rolling-window frame cadence tracker.
#[derive(Clone)]
pub struct FrameCadence {
    inner: Arc<Inner>,
}

impl FrameCadence {
    /// Create a tracker with a 1-second window.
    pub fn new() -> Self {
        Self::with_window(Duration::from_secs(1))
    }

    /// Create a tracker with a custom window duration, at least
    /// [`MIN_WINDOW`].
    pub fn with_window(window: Duration) -> Self {
        if window < MIN_WINDOW {
            warn!(?window, "cadence window too short, using {MIN_WINDOW:?}");
        }
        let window = window.max(MIN_WINDOW);
        let (feed, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(Inner {
                window: Mutex::new(Window::anchored_at(0)),
                last_summary: Mutex::new(None),
                window_len: window.as_nanos() as i64,
                epoch: Instant::now(),
                feed,
            }),
        }
    }

    /// Monotonic nanoseconds on this tracker's clock.
    pub fn now_nanos(&self) -> i64 {
        self.inner.epoch.elapsed().as_nanos() as i64
    }

    /// Record a frame delivered right now.
    pub fn mark_frame(&self) -> Option<CadenceSummary> {
        self.on_frame(self.now_nanos())
    }

    /// Record a frame delivered at `timestamp_nanos`.
    pub fn on_frame(&self, timestamp_nanos: i64) -> Option<CadenceSummary> {
        self.record(FrameSample { timestamp_nanos })
    }

    /// Add `sample` to the open window.
    ///
    /// Returns the summary if this sample closed the window.
    pub fn record(&self, sample: FrameSample) -> Option<CadenceSummary> {
        let timestamp_nanos = sample.timestamp_nanos;
        let summary = {
            let mut w = self.inner.window.lock();
            let delta = timestamp_nanos - w.last;
            if delta < 0 {
                debug!(delta, "out-of-order frame timestamp ignored");
                return None;
            }
            w.record(delta);
            w.last = timestamp_nanos;

            let elapsed = timestamp_nanos - w.start;
            if elapsed < self.inner.window_len {
                return None;
            }
            let summary = w.summarize(elapsed);
            w.anchor(timestamp_nanos);
            summary
        };

        info!(
            target: "mirra::cadence",
            frames = summary.frames,
            "{:.1} fps, frame delta min/avg/max {:.2}/{:.2}/{:.2} ms",
            summary.fps,
            summary.min_ms,
            summary.avg_ms,
            summary.max_ms
        );
        *self.inner.last_summary.lock() = Some(summary);
        // No subscribers is fine.
        let _ = self.inner.feed.send(summary);
        Some(summary)
    }

    /// Encoder/queue error: log it and start a fresh window.
    pub fn on_error(&self, cause: &str) {
        warn!(target: "mirra::cadence", "frame source error: {cause}");
        self.reset();
    }

    /// Drop the current window and start a new one now.
    pub fn reset(&self) {
        self.reset_at(self.now_nanos());
    }

    /// Drop the current window and anchor the next one at `timestamp_nanos`.
    pub fn reset_at(&self, timestamp_nanos: i64) {
        self.inner.window.lock().anchor(timestamp_nanos);
    }

    /// Frames counted in the open window.
    pub fn pending_frames(&self) -> u32 {
        self.inner.window.lock().frames
    }

    /// Most recently emitted summary.
    pub fn last_summary(&self) -> Option<CadenceSummary> {
        *self.inner.last_summary.lock()
    }

    /// Receive every summary emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<CadenceSummary> {
        self.inner.feed.subscribe()
    }
}

impl Default for FrameCadence {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME_NS: i64 = 16_670_000;

    /// Feed 60 frames spaced one 60 Hz interval apart, starting at `base`.
    fn feed_sixty(cadence: &FrameCadence, base: i64) -> Vec<CadenceSummary> {
        (1..=60)
            .filter_map(|i| cadence.on_frame(base + i * FRAME_NS))
            .collect()
    }

    fn assert_sixty_fps(s: &CadenceSummary) {
        assert!((s.fps - 60.0).abs() <= 0.5, "fps = {}", s.fps);
        for v in [s.min_ms, s.avg_ms, s.max_ms] {
            assert!((v - 16.67).abs() <= 1.0, "delta = {v}");
        }
    }

    #[test]
    fn sixty_frames_emit_one_summary() {
        let cadence = FrameCadence::new();
        let mut feed = cadence.subscribe();
        let base = cadence.now_nanos();

        let emitted = feed_sixty(&cadence, base);

        assert_eq!(emitted.len(), 1);
        assert_sixty_fps(&emitted[0]);
        assert_eq!(feed.try_recv().unwrap(), emitted[0]);
    }

    #[test]
    fn sixty_frames_after_reset_emit_one_summary() {
        let cadence = FrameCadence::new();
        feed_sixty(&cadence, cadence.now_nanos());
        cadence.on_frame(cadence.now_nanos() + 61 * FRAME_NS);

        cadence.reset();
        assert_eq!(cadence.pending_frames(), 0);
        let base = cadence.now_nanos();
        let emitted = feed_sixty(&cadence, base);

        assert_eq!(emitted.len(), 1);
        assert_sixty_fps(&emitted[0]);
    }

    #[test]
    fn window_below_one_second_stays_open() {
        let cadence = FrameCadence::new();
        cadence.reset_at(0);
        for i in 1..=59 {
            assert!(cadence.on_frame(i * FRAME_NS).is_none());
        }
        assert_eq!(cadence.pending_frames(), 59);
        assert!(cadence.last_summary().is_none());
    }

    #[test]
    fn first_frame_is_counted() {
        let cadence = FrameCadence::new();
        assert!(cadence.mark_frame().is_none());
        assert_eq!(cadence.pending_frames(), 1);
    }

    #[test]
    fn boundary_frame_anchors_next_window() {
        let cadence = FrameCadence::new();
        cadence.reset_at(0);
        for i in 1..=60 {
            cadence.on_frame(i * FRAME_NS);
        }
        // Next window starts at frame 60, so frame 61 is a normal delta.
        cadence.on_frame(61 * FRAME_NS);
        assert_eq!(cadence.pending_frames(), 1);
    }

    #[test]
    fn min_max_track_jitter() {
        let cadence = FrameCadence::new();
        cadence.reset_at(0);
        cadence.on_frame(10_000_000);
        cadence.on_frame(40_000_000);
        let s = cadence.on_frame(1_000_000_000).unwrap();
        assert_eq!(s.frames, 3);
        assert!((s.min_ms - 10.0).abs() < 1e-9);
        assert!((s.max_ms - 960.0).abs() < 1e-9);
    }

    #[test]
    fn error_resets_window() {
        let cadence = FrameCadence::new();
        cadence.reset_at(0);
        cadence.on_frame(FRAME_NS);
        cadence.on_frame(2 * FRAME_NS);
        cadence.on_error("codec reset");
        assert_eq!(cadence.pending_frames(), 0);
        cadence.mark_frame();
        assert_eq!(cadence.pending_frames(), 1);
    }

    #[test]
    fn out_of_order_frame_ignored() {
        let cadence = FrameCadence::new();
        cadence.reset_at(1_000);
        assert!(cadence.on_frame(500).is_none());
        assert_eq!(cadence.pending_frames(), 0);
    }

    #[test]
    fn zero_window_is_clamped() {
        let cadence = FrameCadence::with_window(Duration::ZERO);
        cadence.reset_at(0);
        assert!(cadence.on_frame(0).is_none());
        let s = cadence.on_frame(MIN_WINDOW.as_nanos() as i64).unwrap();
        assert!(s.fps.is_finite(), "fps = {}", s.fps);
        assert!(s.window_ms >= 1.0);
    }

    #[test]
    fn summary_serializes_as_json() {
        let cadence = FrameCadence::new();
        cadence.reset_at(0);
        let s = cadence.on_frame(1_000_000_000).unwrap();
        let json: serde_json::Value = serde_json::to_value(s).unwrap();
        assert_eq!(json["frames"], 1);
        assert_eq!(json["window_ms"], 1000.0);
    }

    #[test]
    fn concurrent_writers() {
        let cadence = FrameCadence::new();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = cadence.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        c.mark_frame();
                    }
                })
            })
            .collect();
        let resetter = {
            let c = cadence.clone();
            std::thread::spawn(move || {
                for _ in 0..50 {
                    c.reset();
                }
            })
        };
        for h in handles {
            h.join().unwrap();
        }
        resetter.join().unwrap();
        assert!(cadence.pending_frames() <= 1000);
    }
}
