//! Platform seam: display registry, surfaces, codec and screen capture.
//!
//! Every OS primitive the mirroring core touches sits behind one of the
//! object-safe traits below. Implementations must be callable from any
//! thread; callbacks they invoke (image drains, encoder output) run on the
//! platform's own callback context.
//!
//! # Handles
//!
//! Drawable surfaces cross the seam as opaque [`SurfaceHandle`]s. Only the
//! surface provisioner and the virtual display binding ever hold one.

pub mod sim;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, oneshot};

use crate::flags::VirtualDisplayFlags;
use crate::mirror::encoder::EncoderSettings;
use crate::mirror::types::{CaptureGrant, PixelFormat};

// ── PlatformError ────────────────────────────────────────────────

/// Failure reported by a platform primitive.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlatformError {
    /// The caller lacks a permission the request needs.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The primitive does not exist on this device.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Any other failure.
    #[error("{0}")]
    Failed(String),
}

// ── Displays ─────────────────────────────────────────────────────

pub type DisplayId = u32;

/// Id of the device's own built-in display.
pub const DEFAULT_DISPLAY_ID: DisplayId = 0;

/// A resolution + refresh rate pair a display can run at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayMode {
    pub width: u32,
    pub height: u32,
    pub refresh_rate: f32,
}

/// A connected display as reported by the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayInfo {
    pub id: DisplayId,
    pub name: String,
    /// Flagged by the platform as able to host a presentation.
    pub presentation_capable: bool,
    pub current_mode: DisplayMode,
    pub supported_modes: Vec<DisplayMode>,
    pub density_dpi: u32,
}

impl DisplayInfo {
    pub fn is_default(&self) -> bool {
        self.id == DEFAULT_DISPLAY_ID
    }
}

/// Metrics of the device's own display.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceMetrics {
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
    pub refresh_rate: f32,
}

/// Display hot-plug notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayEvent {
    Added(DisplayId),
    Removed(DisplayId),
    Changed(DisplayId),
}

impl DisplayEvent {
    pub fn display_id(&self) -> DisplayId {
        match *self {
            Self::Added(id) | Self::Removed(id) | Self::Changed(id) => id,
        }
    }
}

/// Read-only view of the platform's display registry.
pub trait DisplayRegistry: Send + Sync {
    /// All currently connected displays, default display included.
    fn displays(&self) -> Vec<DisplayInfo>;

    fn device_metrics(&self) -> DeviceMetrics;

    /// A USB accessory (e.g. an Alt Mode adapter) is attached, whether or
    /// not its display has enumerated yet.
    fn usb_accessory_attached(&self) -> bool;

    /// Subscribe to hot-plug events for every display id.
    fn subscribe(&self) -> broadcast::Receiver<DisplayEvent>;
}

// ── Surfaces ─────────────────────────────────────────────────────

/// Opaque reference to a platform drawable surface.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(u64);

impl SurfaceHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub(crate) fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for SurfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SurfaceHandle(#{})", self.0)
    }
}

/// Window hosted on an external display.
pub trait PresentationHost: Send {
    /// Tear the window down; its surface becomes invalid.
    fn dismiss(&mut self) -> Result<(), PlatformError>;
}

/// A presentation whose surface has not been created yet.
///
/// `ready` resolves exactly once, from the platform's UI context, with the
/// surface the presentation draws into. It is dropped without a value if
/// the display goes away first.
pub struct PendingPresentation {
    pub host: Box<dyn PresentationHost>,
    pub ready: oneshot::Receiver<SurfaceHandle>,
}

/// Event emitted by a running encoder on its callback context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderEvent {
    Output {
        presentation_time_us: i64,
        size: usize,
        key_frame: bool,
    },
    Error(String),
}

pub type EncoderCallback = Box<dyn FnMut(EncoderEvent) + Send>;

/// Hardware video encoder fed through an input surface.
pub trait VideoEncoder: Send {
    fn configure(&mut self, settings: &EncoderSettings) -> Result<(), PlatformError>;
    fn create_input_surface(&mut self) -> Result<SurfaceHandle, PlatformError>;
    fn set_output_callback(&mut self, callback: EncoderCallback);
    fn start(&mut self) -> Result<(), PlatformError>;
    fn release_input_surface(&mut self) -> Result<(), PlatformError>;
    fn stop(&mut self) -> Result<(), PlatformError>;
    fn release(&mut self) -> Result<(), PlatformError>;
}

/// Parameters of a bounded image reader queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageQueueSettings {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub max_images: u32,
}

/// A frame buffer acquired from an [`ImageQueue`]. Dropping it closes it
/// and returns the slot to the queue.
pub struct Image {
    pub timestamp_nanos: i64,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl Image {
    pub fn new(
        timestamp_nanos: i64,
        width: u32,
        height: u32,
        format: PixelFormat,
        on_close: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            timestamp_nanos,
            width,
            height,
            format,
            on_close: Some(Box::new(on_close)),
        }
    }

    pub fn close(mut self) {
        self.release_slot();
    }

    fn release_slot(&mut self) {
        if let Some(close) = self.on_close.take() {
            close();
        }
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.release_slot();
    }
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("timestamp_nanos", &self.timestamp_nanos)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish()
    }
}

/// Drain callback invoked with each acquired image.
pub type ImageDrain = Box<dyn FnMut(Image) + Send>;

/// Bounded queue of decoded frame buffers exposing a producer surface.
pub trait ImageQueue: Send {
    fn surface(&self) -> SurfaceHandle;
    fn set_on_image_available(&mut self, drain: ImageDrain);
    fn release_surface(&mut self) -> Result<(), PlatformError>;
    fn close(&mut self) -> Result<(), PlatformError>;
}

/// Creates the three kinds of drawable surface.
pub trait SurfaceFactory: Send + Sync {
    fn open_presentation(&self, display_id: DisplayId)
    -> Result<PendingPresentation, PlatformError>;
    fn create_encoder(&self, mime: &str) -> Result<Box<dyn VideoEncoder>, PlatformError>;
    fn create_image_queue(
        &self,
        settings: &ImageQueueSettings,
    ) -> Result<Box<dyn ImageQueue>, PlatformError>;
}

// ── Capture ──────────────────────────────────────────────────────

/// Parameters of a virtual display binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualDisplayRequest {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub density_dpi: u32,
    pub surface: SurfaceHandle,
    pub flags: VirtualDisplayFlags,
}

/// A live capture-to-surface route.
pub trait VirtualDisplay: Send {
    fn release(&mut self) -> Result<(), PlatformError>;
}

/// Screen capture projection obtained from a consent grant.
pub trait ScreenCapture: Send + Sync {
    /// Whether the process may request [`VirtualDisplayFlags::TRUSTED`].
    fn supports_trusted_displays(&self) -> bool;

    fn create_virtual_display(
        &self,
        request: &VirtualDisplayRequest,
    ) -> Result<Box<dyn VirtualDisplay>, PlatformError>;

    /// Release the underlying capture resource.
    fn stop(&self) -> Result<(), PlatformError>;
}

/// Turns consent grants into capture projections.
pub trait CapturePlatform: Send + Sync {
    fn open(&self, grant: CaptureGrant) -> Result<Box<dyn ScreenCapture>, PlatformError>;
}

// ── Platform ─────────────────────────────────────────────────────

/// The platform collaborators injected into a session.
#[derive(Clone)]
pub struct Platform {
    pub displays: Arc<dyn DisplayRegistry>,
    pub surfaces: Arc<dyn SurfaceFactory>,
    pub capture: Arc<dyn CapturePlatform>,
}

impl Platform {
    pub fn new(
        displays: Arc<dyn DisplayRegistry>,
        surfaces: Arc<dyn SurfaceFactory>,
        capture: Arc<dyn CapturePlatform>,
    ) -> Self {
        Self {
            displays,
            surfaces,
            capture,
        }
    }
}
