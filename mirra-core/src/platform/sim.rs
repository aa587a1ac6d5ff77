//! In-process simulated platform.
//!
//! Backs the console host and the test suites. Every primitive records what
//! was asked of it so callers can assert on resource lifetimes, and a few
//! switches inject the faults a real device produces (late displays, codec
//! configuration failures, rejected trusted bindings).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::flags::VirtualDisplayFlags;
use crate::mirror::encoder::EncoderSettings;
use crate::mirror::types::{CaptureGrant, RESULT_OK, SurfaceKind};
use crate::platform::{
    CapturePlatform, DEFAULT_DISPLAY_ID, DeviceMetrics, DisplayEvent, DisplayId, DisplayInfo,
    DisplayMode, DisplayRegistry, EncoderCallback, EncoderEvent, Image, ImageDrain, ImageQueue,
    ImageQueueSettings, PendingPresentation, Platform, PlatformError, PresentationHost,
    ScreenCapture, SurfaceFactory, SurfaceHandle, VideoEncoder, VirtualDisplay,
    VirtualDisplayRequest,
};

/// Nominal spacing of pumped frames, 60 Hz.
const FRAME_INTERVAL_NANOS: i64 = 16_666_667;

// ── SimDisplays ──────────────────────────────────────────────────

struct DisplayTable {
    displays: Vec<DisplayInfo>,
    next_id: DisplayId,
    accessory: bool,
}

/// Display registry with a built-in panel and pluggable external sinks.
pub struct SimDisplays {
    table: Mutex<DisplayTable>,
    metrics: DeviceMetrics,
    events: broadcast::Sender<DisplayEvent>,
}

impl SimDisplays {
    /// A 1080x2400 60 Hz phone panel with nothing attached.
    pub fn new() -> Self {
        Self::with_metrics(DeviceMetrics {
            width: 1080,
            height: 2400,
            density_dpi: 420,
            refresh_rate: 60.0,
        })
    }

    pub fn with_metrics(metrics: DeviceMetrics) -> Self {
        let builtin = DisplayInfo {
            id: DEFAULT_DISPLAY_ID,
            name: "Built-in Screen".into(),
            presentation_capable: false,
            current_mode: DisplayMode {
                width: metrics.width,
                height: metrics.height,
                refresh_rate: metrics.refresh_rate,
            },
            supported_modes: vec![DisplayMode {
                width: metrics.width,
                height: metrics.height,
                refresh_rate: metrics.refresh_rate,
            }],
            density_dpi: metrics.density_dpi,
        };
        let (events, _) = broadcast::channel(32);
        Self {
            table: Mutex::new(DisplayTable {
                displays: vec![builtin],
                next_id: DEFAULT_DISPLAY_ID + 1,
                accessory: false,
            }),
            metrics,
            events,
        }
    }

    /// Plug in a presentation-capable display running at `refresh_rate`.
    pub fn connect_external(&self, width: u32, height: u32, refresh_rate: f32) -> DisplayId {
        let current = DisplayMode {
            width,
            height,
            refresh_rate: 60.0,
        };
        let mut supported = vec![current];
        if refresh_rate != 60.0 {
            supported.push(DisplayMode {
                refresh_rate,
                ..current
            });
        }
        self.connect("HDMI Screen", true, current, supported, 160)
    }

    /// Add a non-presentation display such as a developer overlay.
    pub fn connect_virtual(&self, width: u32, height: u32) -> DisplayId {
        let mode = DisplayMode {
            width,
            height,
            refresh_rate: 60.0,
        };
        self.connect("Overlay #1", false, mode, vec![mode], 240)
    }

    fn connect(
        &self,
        name: &str,
        presentation_capable: bool,
        current_mode: DisplayMode,
        supported_modes: Vec<DisplayMode>,
        density_dpi: u32,
    ) -> DisplayId {
        let id = {
            let mut table = self.table.lock();
            let id = table.next_id;
            table.next_id += 1;
            table.displays.push(DisplayInfo {
                id,
                name: name.to_string(),
                presentation_capable,
                current_mode,
                supported_modes,
                density_dpi,
            });
            id
        };
        debug!(id, name, "sim display connected");
        self.emit(DisplayEvent::Added(id));
        id
    }

    /// Connect an external display after `delay`, the way an Alt Mode
    /// adapter enumerates a moment after it is attached.
    pub fn connect_external_after(
        self: &Arc<Self>,
        delay: Duration,
        width: u32,
        height: u32,
        refresh_rate: f32,
    ) -> JoinHandle<DisplayId> {
        let displays = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            displays.connect_external(width, height, refresh_rate)
        })
    }

    /// Unplug display `id`. The built-in display cannot be removed.
    pub fn disconnect(&self, id: DisplayId) -> bool {
        if id == DEFAULT_DISPLAY_ID {
            return false;
        }
        let removed = {
            let mut table = self.table.lock();
            let before = table.displays.len();
            table.displays.retain(|d| d.id != id);
            table.displays.len() != before
        };
        if removed {
            debug!(id, "sim display disconnected");
            self.emit(DisplayEvent::Removed(id));
        }
        removed
    }

    pub fn set_accessory_attached(&self, attached: bool) {
        self.table.lock().accessory = attached;
    }

    /// Broadcast a raw registry event.
    pub fn emit(&self, event: DisplayEvent) {
        let _ = self.events.send(event);
    }
}

impl Default for SimDisplays {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplayRegistry for SimDisplays {
    fn displays(&self) -> Vec<DisplayInfo> {
        self.table.lock().displays.clone()
    }

    fn device_metrics(&self) -> DeviceMetrics {
        self.metrics
    }

    fn usb_accessory_attached(&self) -> bool {
        self.table.lock().accessory
    }

    fn subscribe(&self) -> broadcast::Receiver<DisplayEvent> {
        self.events.subscribe()
    }
}

// ── SimSurfaces ──────────────────────────────────────────────────

type DrainSlot = Arc<Mutex<Option<ImageDrain>>>;
type CallbackSlot = Arc<Mutex<Option<EncoderCallback>>>;

#[derive(Default)]
struct SurfaceShared {
    next_handle: AtomicU64,
    frame_clock: AtomicI64,

    drains: Mutex<HashMap<u64, (DrainSlot, ImageQueueSettings)>>,
    encoders: Mutex<HashMap<u64, CallbackSlot>>,
    held_ready: Mutex<Vec<(oneshot::Sender<SurfaceHandle>, SurfaceHandle)>>,

    fail_encoder_configure: AtomicBool,
    hold_encoder_configure: AtomicBool,
    hold_presentation_ready: AtomicBool,

    presentations_opened: AtomicUsize,
    presentations_dismissed: AtomicUsize,
    encoders_created: AtomicUsize,
    encoder_surfaces: AtomicUsize,
    encoders_released: AtomicUsize,
    queues_created: AtomicUsize,
    queues_closed: AtomicUsize,
    images_open: AtomicUsize,
}

impl SurfaceShared {
    fn allocate(&self) -> SurfaceHandle {
        SurfaceHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn next_timestamp(&self) -> i64 {
        self.frame_clock
            .fetch_add(FRAME_INTERVAL_NANOS, Ordering::SeqCst)
            + FRAME_INTERVAL_NANOS
    }
}

/// Surface factory recording every surface, codec and queue it hands out.
#[derive(Default)]
pub struct SimSurfaces {
    shared: Arc<SurfaceShared>,
}

impl SimSurfaces {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every encoder fail at `configure`.
    pub fn fail_encoder_configure(&self, fail: bool) {
        self.shared
            .fail_encoder_configure
            .store(fail, Ordering::SeqCst);
    }

    /// Block every encoder inside `configure` until released again, the way
    /// a busy codec driver stalls its caller.
    pub fn hold_encoder_configure(&self, hold: bool) {
        self.shared
            .hold_encoder_configure
            .store(hold, Ordering::SeqCst);
    }

    /// Keep presentation surfaces pending until [`Self::complete_presentations`].
    pub fn hold_presentation_ready(&self, hold: bool) {
        self.shared
            .hold_presentation_ready
            .store(hold, Ordering::SeqCst);
    }

    /// Resolve every held presentation. Returns how many were still awaited.
    pub fn complete_presentations(&self) -> usize {
        let held = std::mem::take(&mut *self.shared.held_ready.lock());
        held.into_iter()
            .filter_map(|(tx, handle)| tx.send(handle).ok())
            .count()
    }

    /// Deliver `count` frames into the surface behind `handle`.
    ///
    /// Image queues get one [`Image`] each; encoder input surfaces emit one
    /// encoded buffer each. Returns the number delivered, zero when no live
    /// drain or encoder owns the handle.
    pub fn pump_frames(&self, handle: SurfaceHandle, count: usize) -> usize {
        let raw = handle.raw();
        let drain = self.shared.drains.lock().get(&raw).cloned();
        if let Some((slot, settings)) = drain {
            let mut drain = slot.lock();
            let Some(drain) = drain.as_mut() else {
                return 0;
            };
            for _ in 0..count {
                self.shared.images_open.fetch_add(1, Ordering::SeqCst);
                let shared = Arc::clone(&self.shared);
                drain(Image::new(
                    self.shared.next_timestamp(),
                    settings.width,
                    settings.height,
                    settings.format,
                    move || {
                        shared.images_open.fetch_sub(1, Ordering::SeqCst);
                    },
                ));
            }
            return count;
        }

        let encoder = self.shared.encoders.lock().get(&raw).cloned();
        if let Some(slot) = encoder {
            let mut callback = slot.lock();
            let Some(callback) = callback.as_mut() else {
                return 0;
            };
            for i in 0..count {
                callback(EncoderEvent::Output {
                    presentation_time_us: self.shared.next_timestamp() / 1_000,
                    size: 4096,
                    key_frame: i % 60 == 0,
                });
            }
            return count;
        }
        0
    }

    /// Report a codec fault on the encoder behind `handle`.
    pub fn encoder_error(&self, handle: SurfaceHandle, cause: &str) -> bool {
        let slot = self.shared.encoders.lock().get(&handle.raw()).cloned();
        match slot.as_ref().map(|s| s.lock()) {
            Some(mut guard) => match guard.as_mut() {
                Some(callback) => {
                    callback(EncoderEvent::Error(cause.to_string()));
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    /// Surfaces handed out so far, by kind.
    pub fn surfaces_created(&self, kind: SurfaceKind) -> usize {
        let counter = match kind {
            SurfaceKind::Presentation => &self.shared.presentations_opened,
            SurfaceKind::BufferedImage => &self.shared.queues_created,
            SurfaceKind::EncoderInput => &self.shared.encoder_surfaces,
        };
        counter.load(Ordering::SeqCst)
    }

    /// Surfaces of any kind handed out so far.
    pub fn total_surfaces_created(&self) -> usize {
        [
            SurfaceKind::Presentation,
            SurfaceKind::BufferedImage,
            SurfaceKind::EncoderInput,
        ]
        .into_iter()
        .map(|kind| self.surfaces_created(kind))
        .sum()
    }

    pub fn presentations_dismissed(&self) -> usize {
        self.shared.presentations_dismissed.load(Ordering::SeqCst)
    }

    pub fn encoders_created(&self) -> usize {
        self.shared.encoders_created.load(Ordering::SeqCst)
    }

    pub fn encoders_released(&self) -> usize {
        self.shared.encoders_released.load(Ordering::SeqCst)
    }

    pub fn queues_closed(&self) -> usize {
        self.shared.queues_closed.load(Ordering::SeqCst)
    }

    /// Images delivered to a drain and not yet closed.
    pub fn images_open(&self) -> usize {
        self.shared.images_open.load(Ordering::SeqCst)
    }
}

impl SurfaceFactory for SimSurfaces {
    fn open_presentation(
        &self,
        display_id: DisplayId,
    ) -> Result<PendingPresentation, PlatformError> {
        let handle = self.shared.allocate();
        self.shared
            .presentations_opened
            .fetch_add(1, Ordering::SeqCst);
        let (tx, ready) = oneshot::channel();
        if self.shared.hold_presentation_ready.load(Ordering::SeqCst) {
            self.shared.held_ready.lock().push((tx, handle));
        } else {
            let _ = tx.send(handle);
        }
        debug!(display_id, surface = ?handle, "sim presentation opened");
        Ok(PendingPresentation {
            host: Box::new(SimPresentation {
                shared: Arc::clone(&self.shared),
                dismissed: false,
            }),
            ready,
        })
    }

    fn create_encoder(&self, mime: &str) -> Result<Box<dyn VideoEncoder>, PlatformError> {
        if mime != crate::mirror::encoder::H264_MIME {
            return Err(PlatformError::Unsupported(format!("no encoder for {mime}")));
        }
        self.shared.encoders_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimEncoder {
            shared: Arc::clone(&self.shared),
            callback: Arc::new(Mutex::new(None)),
            input: None,
            configured: false,
            released: false,
        }))
    }

    fn create_image_queue(
        &self,
        settings: &ImageQueueSettings,
    ) -> Result<Box<dyn ImageQueue>, PlatformError> {
        if settings.max_images == 0 {
            return Err(PlatformError::Failed("image queue needs at least one slot".into()));
        }
        let handle = self.shared.allocate();
        let drain: DrainSlot = Arc::new(Mutex::new(None));
        self.shared
            .drains
            .lock()
            .insert(handle.raw(), (Arc::clone(&drain), *settings));
        self.shared.queues_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimImageQueue {
            shared: Arc::clone(&self.shared),
            handle,
            drain,
            closed: false,
        }))
    }
}

struct SimPresentation {
    shared: Arc<SurfaceShared>,
    dismissed: bool,
}

impl PresentationHost for SimPresentation {
    fn dismiss(&mut self) -> Result<(), PlatformError> {
        if self.dismissed {
            return Err(PlatformError::Failed("presentation already dismissed".into()));
        }
        self.dismissed = true;
        self.shared
            .presentations_dismissed
            .fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct SimEncoder {
    shared: Arc<SurfaceShared>,
    callback: CallbackSlot,
    input: Option<SurfaceHandle>,
    configured: bool,
    released: bool,
}

impl VideoEncoder for SimEncoder {
    fn configure(&mut self, settings: &EncoderSettings) -> Result<(), PlatformError> {
        while self.shared.hold_encoder_configure.load(Ordering::SeqCst) {
            std::thread::sleep(Duration::from_millis(1));
        }
        if self.shared.fail_encoder_configure.load(Ordering::SeqCst) {
            return Err(PlatformError::Failed(format!(
                "codec rejected {}x{} @ {} bps",
                settings.width, settings.height, settings.bitrate
            )));
        }
        self.configured = true;
        Ok(())
    }

    fn create_input_surface(&mut self) -> Result<SurfaceHandle, PlatformError> {
        if !self.configured {
            return Err(PlatformError::Failed("encoder not configured".into()));
        }
        let handle = self.shared.allocate();
        self.shared
            .encoders
            .lock()
            .insert(handle.raw(), Arc::clone(&self.callback));
        self.shared.encoder_surfaces.fetch_add(1, Ordering::SeqCst);
        self.input = Some(handle);
        Ok(handle)
    }

    fn set_output_callback(&mut self, callback: EncoderCallback) {
        *self.callback.lock() = Some(callback);
    }

    fn start(&mut self) -> Result<(), PlatformError> {
        Ok(())
    }

    fn release_input_surface(&mut self) -> Result<(), PlatformError> {
        match self.input.take() {
            Some(handle) => {
                self.shared.encoders.lock().remove(&handle.raw());
                Ok(())
            }
            None => Err(PlatformError::Failed("no input surface".into())),
        }
    }

    fn stop(&mut self) -> Result<(), PlatformError> {
        Ok(())
    }

    fn release(&mut self) -> Result<(), PlatformError> {
        if self.released {
            return Ok(());
        }
        if let Some(handle) = self.input.take() {
            self.shared.encoders.lock().remove(&handle.raw());
        }
        self.callback.lock().take();
        self.released = true;
        self.shared.encoders_released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct SimImageQueue {
    shared: Arc<SurfaceShared>,
    handle: SurfaceHandle,
    drain: DrainSlot,
    closed: bool,
}

impl ImageQueue for SimImageQueue {
    fn surface(&self) -> SurfaceHandle {
        self.handle
    }

    fn set_on_image_available(&mut self, drain: ImageDrain) {
        *self.drain.lock() = Some(drain);
    }

    fn release_surface(&mut self) -> Result<(), PlatformError> {
        self.shared.drains.lock().remove(&self.handle.raw());
        Ok(())
    }

    fn close(&mut self) -> Result<(), PlatformError> {
        if self.closed {
            return Ok(());
        }
        self.drain.lock().take();
        self.closed = true;
        self.shared.queues_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── SimCapture ───────────────────────────────────────────────────

#[derive(Default)]
struct CaptureShared {
    trusted_unsupported: AtomicBool,
    reject_trusted: AtomicBool,
    reject_binding: AtomicBool,

    opened: AtomicUsize,
    stops: AtomicUsize,
    live: AtomicUsize,
    peak: AtomicUsize,
    bind_attempts: Mutex<Vec<VirtualDisplayFlags>>,

    next_display: AtomicU64,
    bound: Mutex<HashMap<u64, SurfaceHandle>>,
}

/// Capture platform that accepts any approved grant.
#[derive(Default)]
pub struct SimCapture {
    shared: Arc<CaptureShared>,
}

impl SimCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether projections advertise support for trusted virtual displays.
    pub fn set_trusted_supported(&self, supported: bool) {
        self.shared
            .trusted_unsupported
            .store(!supported, Ordering::SeqCst);
    }

    /// Reject bindings that carry the trusted flag with a permission error.
    pub fn reject_trusted(&self, reject: bool) {
        self.shared.reject_trusted.store(reject, Ordering::SeqCst);
    }

    /// Reject every binding.
    pub fn reject_binding(&self, reject: bool) {
        self.shared.reject_binding.store(reject, Ordering::SeqCst);
    }

    /// Projections opened from grants.
    pub fn projections_opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Calls to [`ScreenCapture::stop`] across all projections.
    pub fn stops(&self) -> usize {
        self.shared.stops.load(Ordering::SeqCst)
    }

    /// Virtual displays currently alive.
    pub fn live_displays(&self) -> usize {
        self.shared.live.load(Ordering::SeqCst)
    }

    /// Highest number of virtual displays alive at the same time.
    pub fn peak_live_displays(&self) -> usize {
        self.shared.peak.load(Ordering::SeqCst)
    }

    /// Flags of every binding attempt, rejected ones included.
    pub fn bind_attempts(&self) -> Vec<VirtualDisplayFlags> {
        self.shared.bind_attempts.lock().clone()
    }

    /// Surfaces targeted by live virtual displays.
    pub fn bound_surfaces(&self) -> Vec<SurfaceHandle> {
        self.shared.bound.lock().values().copied().collect()
    }
}

impl CapturePlatform for SimCapture {
    fn open(&self, grant: CaptureGrant) -> Result<Box<dyn ScreenCapture>, PlatformError> {
        if !grant.is_approved() {
            return Err(PlatformError::PermissionDenied(
                "screen capture consent not granted".into(),
            ));
        }
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimProjection {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct SimProjection {
    shared: Arc<CaptureShared>,
}

impl ScreenCapture for SimProjection {
    fn supports_trusted_displays(&self) -> bool {
        !self.shared.trusted_unsupported.load(Ordering::SeqCst)
    }

    fn create_virtual_display(
        &self,
        request: &VirtualDisplayRequest,
    ) -> Result<Box<dyn VirtualDisplay>, PlatformError> {
        self.shared.bind_attempts.lock().push(request.flags);
        if self.shared.reject_binding.load(Ordering::SeqCst) {
            return Err(PlatformError::Failed("virtual display rejected".into()));
        }
        if request.flags.contains(VirtualDisplayFlags::TRUSTED)
            && self.shared.reject_trusted.load(Ordering::SeqCst)
        {
            return Err(PlatformError::PermissionDenied(
                "trusted virtual displays need CAPTURE_VIDEO_OUTPUT".into(),
            ));
        }
        let live = self.shared.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.peak.fetch_max(live, Ordering::SeqCst);
        let id = self.shared.next_display.fetch_add(1, Ordering::SeqCst);
        self.shared.bound.lock().insert(id, request.surface);
        debug!(
            name = %request.name,
            surface = ?request.surface,
            live,
            "sim virtual display created"
        );
        Ok(Box::new(SimVirtualDisplay {
            shared: Arc::clone(&self.shared),
            id,
            released: false,
        }))
    }

    fn stop(&self) -> Result<(), PlatformError> {
        self.shared.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct SimVirtualDisplay {
    shared: Arc<CaptureShared>,
    id: u64,
    released: bool,
}

impl VirtualDisplay for SimVirtualDisplay {
    fn release(&mut self) -> Result<(), PlatformError> {
        if !self.released {
            self.released = true;
            self.shared.bound.lock().remove(&self.id);
            self.shared.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

// ── SimPlatform ──────────────────────────────────────────────────

/// The three simulated collaborators, kept typed for inspection.
#[derive(Clone, Default)]
pub struct SimPlatform {
    pub displays: Arc<SimDisplays>,
    pub surfaces: Arc<SimSurfaces>,
    pub capture: Arc<SimCapture>,
}

impl SimPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Type-erased bundle for a session.
    pub fn platform(&self) -> Platform {
        Platform::new(
            Arc::clone(&self.displays) as Arc<dyn DisplayRegistry>,
            Arc::clone(&self.surfaces) as Arc<dyn SurfaceFactory>,
            Arc::clone(&self.capture) as Arc<dyn CapturePlatform>,
        )
    }

    /// Deliver `count` frames into every surface a virtual display
    /// currently targets. Returns the total delivered.
    pub fn pump_frames(&self, count: usize) -> usize {
        self.capture
            .bound_surfaces()
            .into_iter()
            .map(|handle| self.surfaces.pump_frames(handle, count))
            .sum()
    }

    /// An approved consent grant.
    pub fn grant() -> CaptureGrant {
        CaptureGrant::new(RESULT_OK, b"sim-projection-token".to_vec())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::types::PixelFormat;

    #[test]
    fn displays_connect_and_disconnect() {
        let displays = SimDisplays::new();
        let mut events = displays.subscribe();
        let id = displays.connect_external(1920, 1080, 120.0);
        assert_eq!(displays.displays().len(), 2);
        assert!(displays.disconnect(id));
        assert!(!displays.disconnect(id));
        assert!(!displays.disconnect(DEFAULT_DISPLAY_ID));
        assert_eq!(events.try_recv().unwrap(), DisplayEvent::Added(id));
        assert_eq!(events.try_recv().unwrap(), DisplayEvent::Removed(id));
    }

    #[test]
    fn capture_tracks_live_and_peak() {
        let capture = SimCapture::new();
        let projection = capture.open(SimPlatform::grant()).unwrap();
        let request = VirtualDisplayRequest {
            name: "t".into(),
            width: 10,
            height: 10,
            density_dpi: 160,
            surface: SurfaceHandle::new(1),
            flags: VirtualDisplayFlags::PRESENTATION,
        };
        let mut a = projection.create_virtual_display(&request).unwrap();
        let mut b = projection.create_virtual_display(&request).unwrap();
        a.release().unwrap();
        a.release().unwrap();
        b.release().unwrap();
        assert_eq!(capture.live_displays(), 0);
        assert_eq!(capture.peak_live_displays(), 2);
        assert_eq!(capture.bind_attempts().len(), 2);
    }

    #[test]
    fn denied_grant_is_refused() {
        let capture = SimCapture::new();
        assert!(capture.open(CaptureGrant::new(0, vec![1])).is_err());
        assert_eq!(capture.projections_opened(), 0);
    }

    #[test]
    fn pump_into_queue_without_drain_delivers_nothing() {
        let surfaces = SimSurfaces::new();
        let queue = surfaces
            .create_image_queue(&ImageQueueSettings {
                width: 4,
                height: 4,
                format: PixelFormat::Rgb565,
                max_images: 2,
            })
            .unwrap();
        assert_eq!(surfaces.pump_frames(queue.surface(), 3), 0);
        assert_eq!(surfaces.pump_frames(SurfaceHandle::new(999), 3), 0);
    }
}
