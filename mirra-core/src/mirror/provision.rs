//! Output surface provisioning.
//!
//! Produces the drawable a session binds its capture to:
//!
//! | Route                              | Surface                    |
//! |------------------------------------|----------------------------|
//! | Direct                             | [`PresentationSurface`]    |
//! | Wireless, hardware encoding        | [`EncoderInputSurface`]    |
//! | Wireless, no encoder / setup fails | [`BufferedImageSurface`]   |
//!
//! Release order inside a surface is: drawable surface, then codec or
//! queue, then presentation host. A surface refuses to release while a
//! virtual display binding still holds its lease.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MirrorError, TaskError};
use crate::mirror::encoder::{DiscardSink, EncoderSettings};
use crate::mirror::resolver::Route;
use crate::mirror::telemetry::FrameCadence;
use crate::mirror::types::{PixelFormat, SessionConfiguration, SurfaceKind, TargetDisplay};
use crate::platform::{
    DisplayId, Image, ImageQueue, ImageQueueSettings, PendingPresentation, PlatformError,
    PresentationHost, SurfaceFactory, SurfaceHandle, VideoEncoder,
};

/// Default time to wait for a presentation surface to become valid.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(3);

/// Run one teardown step; faults are logged and never propagated.
pub(crate) fn guarded(step: &str, result: Result<(), PlatformError>) {
    match result {
        Ok(()) => debug!("teardown: {step}"),
        Err(e) => warn!("teardown fault in {step}: {e}"),
    }
}

// ── SurfaceLease ─────────────────────────────────────────────────

/// Marks a surface as targeted by a live virtual display.
#[derive(Debug, Clone, Default)]
pub(crate) struct SurfaceLease(Arc<AtomicBool>);

impl SurfaceLease {
    pub(crate) fn acquire(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn release(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_held(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ── Surfaces ─────────────────────────────────────────────────────

/// Full-bounds surface hosted on an external display.
pub struct PresentationSurface {
    host: Box<dyn PresentationHost>,
    handle: SurfaceHandle,
    display_id: DisplayId,
    lease: SurfaceLease,
    released: bool,
}

impl PresentationSurface {
    pub fn display_id(&self) -> DisplayId {
        self.display_id
    }

    fn release(&mut self) {
        debug!(surface = ?self.handle, "presentation surface invalidated");
        guarded("presentation host", self.host.dismiss());
    }
}

/// Bounded queue of frame buffers drained as soon as they arrive.
pub struct BufferedImageSurface {
    queue: Box<dyn ImageQueue>,
    handle: SurfaceHandle,
    settings: ImageQueueSettings,
    lease: SurfaceLease,
    released: bool,
}

impl BufferedImageSurface {
    pub fn settings(&self) -> &ImageQueueSettings {
        &self.settings
    }

    fn release(&mut self) {
        guarded("image queue surface", self.queue.release_surface());
        guarded("image queue", self.queue.close());
    }
}

/// Input surface of a running hardware encoder.
pub struct EncoderInputSurface {
    encoder: Box<dyn VideoEncoder>,
    handle: SurfaceHandle,
    settings: EncoderSettings,
    sink: DiscardSink,
    lease: SurfaceLease,
    released: bool,
}

impl EncoderInputSurface {
    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }

    pub fn sink(&self) -> &DiscardSink {
        &self.sink
    }

    fn release(&mut self) {
        guarded("encoder input surface", self.encoder.release_input_surface());
        release_encoder(self.encoder.as_mut());
    }
}

/// The one drawable a session renders into.
pub enum RenderSurface {
    Presentation(PresentationSurface),
    BufferedImage(BufferedImageSurface),
    EncoderInput(EncoderInputSurface),
}

impl RenderSurface {
    pub fn kind(&self) -> SurfaceKind {
        match self {
            Self::Presentation(_) => SurfaceKind::Presentation,
            Self::BufferedImage(_) => SurfaceKind::BufferedImage,
            Self::EncoderInput(_) => SurfaceKind::EncoderInput,
        }
    }

    pub(crate) fn handle(&self) -> SurfaceHandle {
        match self {
            Self::Presentation(s) => s.handle,
            Self::BufferedImage(s) => s.handle,
            Self::EncoderInput(s) => s.handle,
        }
    }

    pub(crate) fn lease(&self) -> &SurfaceLease {
        match self {
            Self::Presentation(s) => &s.lease,
            Self::BufferedImage(s) => &s.lease,
            Self::EncoderInput(s) => &s.lease,
        }
    }

    fn released_flag(&mut self) -> &mut bool {
        match self {
            Self::Presentation(s) => &mut s.released,
            Self::BufferedImage(s) => &mut s.released,
            Self::EncoderInput(s) => &mut s.released,
        }
    }

    pub fn is_released(&self) -> bool {
        match self {
            Self::Presentation(s) => s.released,
            Self::BufferedImage(s) => s.released,
            Self::EncoderInput(s) => s.released,
        }
    }

    /// Whether a virtual display still targets this surface.
    pub fn is_bound(&self) -> bool {
        self.lease().is_held()
    }

    /// Release the surface and the resources behind it.
    ///
    /// Idempotent. Fails with [`MirrorError::SurfaceInUse`] while a binding
    /// still targets it; individual platform faults are logged only.
    pub fn release(&mut self) -> Result<(), MirrorError> {
        if self.is_released() {
            return Ok(());
        }
        if self.is_bound() {
            return Err(MirrorError::SurfaceInUse);
        }
        match self {
            Self::Presentation(s) => s.release(),
            Self::BufferedImage(s) => s.release(),
            Self::EncoderInput(s) => s.release(),
        }
        *self.released_flag() = true;
        info!(kind = %self.kind(), "render surface released");
        Ok(())
    }
}

impl Drop for RenderSurface {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("render surface dropped while still bound: {e}");
        }
    }
}

impl std::fmt::Debug for RenderSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSurface")
            .field("kind", &self.kind())
            .field("handle", &self.handle())
            .field("released", &self.is_released())
            .finish()
    }
}

// ── SurfaceProvisioner ───────────────────────────────────────────

/// Builds render surfaces for a resolved route.
#[derive(Clone)]
pub struct SurfaceProvisioner {
    factory: Arc<dyn SurfaceFactory>,
    cadence: FrameCadence,
    ready_timeout: Duration,
}

impl SurfaceProvisioner {
    pub fn new(factory: Arc<dyn SurfaceFactory>, cadence: FrameCadence) -> Self {
        Self {
            factory,
            cadence,
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_ready_timeout(mut self, ready_timeout: Duration) -> Self {
        self.ready_timeout = ready_timeout;
        self
    }

    /// Provision the surface `route` calls for.
    ///
    /// Encoder failures fall back to a buffered image surface; every other
    /// failure is returned. `cancel` interrupts the presentation readiness
    /// wait and encoder preparation without leaking what was acquired.
    pub async fn provision(
        &self,
        route: &Route,
        config: &SessionConfiguration,
        cancel: &CancellationToken,
    ) -> Result<RenderSurface, MirrorError> {
        match route {
            Route::Direct { display } => self.presentation(display, cancel).await,
            Route::Wireless { target, .. } if config.hardware_encoding => {
                match self.encoder_input(target, config, cancel).await {
                    Err(MirrorError::Cancelled) => Err(MirrorError::Cancelled),
                    Err(e) => {
                        warn!("encoder setup failed, using buffered image surface: {e}");
                        self.buffered_image(target, config)
                    }
                    ok => ok,
                }
            }
            Route::Wireless { target, .. } => self.buffered_image(target, config),
        }
    }

    /// Release `surface`. See [`RenderSurface::release`].
    pub fn release(&self, surface: &mut RenderSurface) -> Result<(), MirrorError> {
        surface.release()
    }

    async fn presentation(
        &self,
        display: &TargetDisplay,
        cancel: &CancellationToken,
    ) -> Result<RenderSurface, MirrorError> {
        let display_id = display.display_id.ok_or_else(|| {
            MirrorError::Provisioning("presentation target has no platform display".into())
        })?;
        let PendingPresentation { mut host, ready } = self
            .factory
            .open_presentation(display_id)
            .map_err(|e| MirrorError::Provisioning(format!("presentation: {e}")))?;

        debug!(display_id, "waiting for presentation surface");
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(MirrorError::Cancelled),
            ready = tokio::time::timeout(self.ready_timeout, ready) => match ready {
                Ok(Ok(handle)) => Ok(handle),
                Ok(Err(_)) => Err(MirrorError::Provisioning(
                    "display went away before the presentation surface was ready".into(),
                )),
                Err(_) => Err(MirrorError::SurfaceNotReady(self.ready_timeout)),
            },
        };

        match outcome {
            Ok(handle) => {
                info!(display_id, surface = ?handle, "presentation surface ready");
                Ok(RenderSurface::Presentation(PresentationSurface {
                    host,
                    handle,
                    display_id,
                    lease: SurfaceLease::default(),
                    released: false,
                }))
            }
            Err(e) => {
                guarded("presentation host", host.dismiss());
                Err(e)
            }
        }
    }

    async fn encoder_input(
        &self,
        target: &TargetDisplay,
        config: &SessionConfiguration,
        cancel: &CancellationToken,
    ) -> Result<RenderSurface, MirrorError> {
        let settings = EncoderSettings::for_target(target, config);
        info!(
            width = settings.width,
            height = settings.height,
            bitrate = settings.bitrate,
            i_frame_interval = settings.i_frame_interval_secs,
            "preparing hardware encoder"
        );

        let sink = DiscardSink::new(self.cadence.clone());
        let factory = Arc::clone(&self.factory);
        let job_settings = settings.clone();
        let job_sink = sink.clone();
        // Codec configuration blocks on the driver.
        let mut job = tokio::task::spawn_blocking(move || {
            prepare_encoder(factory.as_ref(), &job_settings, &job_sink)
        });

        let joined = tokio::select! {
            _ = cancel.cancelled() => None,
            joined = &mut job => Some(joined),
        };

        let Some(joined) = joined else {
            // Let preparation finish off-thread, then release what it built.
            tokio::spawn(async move {
                if let Ok(Ok((mut encoder, _))) = job.await {
                    release_encoder(encoder.as_mut());
                }
            });
            return Err(MirrorError::Cancelled);
        };

        let (encoder, handle) =
            joined.map_err(|e| MirrorError::Task(TaskError::Panicked(e.to_string())))??;
        Ok(RenderSurface::EncoderInput(EncoderInputSurface {
            encoder,
            handle,
            settings,
            sink,
            lease: SurfaceLease::default(),
            released: false,
        }))
    }

    fn buffered_image(
        &self,
        target: &TargetDisplay,
        config: &SessionConfiguration,
    ) -> Result<RenderSurface, MirrorError> {
        let settings = image_queue_settings(target, config);
        let mut queue = self
            .factory
            .create_image_queue(&settings)
            .map_err(|e| MirrorError::Provisioning(format!("image queue: {e}")))?;

        let cadence = self.cadence.clone();
        queue.set_on_image_available(Box::new(move |image: Image| {
            cadence.mark_frame();
            image.close();
        }));

        let handle = queue.surface();
        info!(
            width = settings.width,
            height = settings.height,
            format = ?settings.format,
            depth = settings.max_images,
            "buffered image surface ready"
        );
        Ok(RenderSurface::BufferedImage(BufferedImageSurface {
            queue,
            handle,
            settings,
            lease: SurfaceLease::default(),
            released: false,
        }))
    }
}

/// Queue depth 2 for low latency, else 4; RGBA only when the hardware
/// encoding flag is set.
pub fn image_queue_settings(
    target: &TargetDisplay,
    config: &SessionConfiguration,
) -> ImageQueueSettings {
    ImageQueueSettings {
        width: target.width,
        height: target.height,
        format: if config.hardware_encoding {
            PixelFormat::Rgba8888
        } else {
            PixelFormat::Rgb565
        },
        max_images: if config.low_latency { 2 } else { 4 },
    }
}

fn prepare_encoder(
    factory: &dyn SurfaceFactory,
    settings: &EncoderSettings,
    sink: &DiscardSink,
) -> Result<(Box<dyn VideoEncoder>, SurfaceHandle), MirrorError> {
    let mut encoder = factory
        .create_encoder(settings.mime)
        .map_err(|e| MirrorError::Provisioning(format!("create encoder: {e}")))?;
    match start_encoder(encoder.as_mut(), settings, sink) {
        Ok(handle) => Ok((encoder, handle)),
        Err(e) => {
            release_encoder(encoder.as_mut());
            Err(MirrorError::Provisioning(format!("encoder setup: {e}")))
        }
    }
}

fn start_encoder(
    encoder: &mut dyn VideoEncoder,
    settings: &EncoderSettings,
    sink: &DiscardSink,
) -> Result<SurfaceHandle, PlatformError> {
    encoder.configure(settings)?;
    let handle = encoder.create_input_surface()?;
    encoder.set_output_callback(sink.callback());
    encoder.start()?;
    Ok(handle)
}

fn release_encoder(encoder: &mut dyn VideoEncoder) {
    guarded("encoder stop", encoder.stop());
    guarded("encoder release", encoder.release());
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::types::ConnectionMode;
    use crate::platform::sim::SimSurfaces;

    fn wireless(width: u32, height: u32) -> Route {
        Route::Wireless {
            mode: ConnectionMode::PeerWireless,
            target: TargetDisplay {
                display_id: None,
                width,
                height,
                density_dpi: 320,
                is_external: false,
                refresh_rate: 60.0,
            },
        }
    }

    fn provisioner(surfaces: &Arc<SimSurfaces>) -> SurfaceProvisioner {
        SurfaceProvisioner::new(
            Arc::clone(surfaces) as Arc<dyn SurfaceFactory>,
            FrameCadence::new(),
        )
    }

    #[test]
    fn queue_settings_follow_flags() {
        let target = wireless(1280, 720).target().clone();
        let low = SessionConfiguration::new(ConnectionMode::PeerWireless).with_low_latency(true);
        let s = image_queue_settings(&target, &low);
        assert_eq!(s.max_images, 2);
        assert_eq!(s.format, PixelFormat::Rgb565);

        let hw =
            SessionConfiguration::new(ConnectionMode::PeerWireless).with_hardware_encoding(true);
        let s = image_queue_settings(&target, &hw);
        assert_eq!(s.max_images, 4);
        assert_eq!(s.format, PixelFormat::Rgba8888);
    }

    #[tokio::test]
    async fn wireless_with_encoder() {
        let surfaces = Arc::new(SimSurfaces::new());
        let config =
            SessionConfiguration::new(ConnectionMode::PeerWireless).with_hardware_encoding(true);
        let mut surface = provisioner(&surfaces)
            .provision(&wireless(1920, 1080), &config, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(surface.kind(), SurfaceKind::EncoderInput);
        surface.release().unwrap();
        assert_eq!(surfaces.encoders_released(), 1);
    }

    #[tokio::test]
    async fn encoder_failure_falls_back() {
        let surfaces = Arc::new(SimSurfaces::new());
        surfaces.fail_encoder_configure(true);
        let config =
            SessionConfiguration::new(ConnectionMode::PeerWireless).with_hardware_encoding(true);
        let surface = provisioner(&surfaces)
            .provision(&wireless(1920, 1080), &config, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(surface.kind(), SurfaceKind::BufferedImage);
        // The half-configured encoder was released.
        assert_eq!(surfaces.encoders_released(), 1);
    }

    #[tokio::test]
    async fn wireless_without_encoder_buffers() {
        let surfaces = Arc::new(SimSurfaces::new());
        let config = SessionConfiguration::new(ConnectionMode::StandardWireless);
        let surface = provisioner(&surfaces)
            .provision(&wireless(1080, 2400), &config, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(surface.kind(), SurfaceKind::BufferedImage);
        assert_eq!(surfaces.encoders_created(), 0);
    }

    #[tokio::test]
    async fn release_is_idempotent_and_respects_lease() {
        let surfaces = Arc::new(SimSurfaces::new());
        let config = SessionConfiguration::new(ConnectionMode::StandardWireless);
        let mut surface = provisioner(&surfaces)
            .provision(&wireless(640, 480), &config, &CancellationToken::new())
            .await
            .unwrap();

        surface.lease().acquire();
        assert!(matches!(surface.release(), Err(MirrorError::SurfaceInUse)));
        assert!(!surface.is_released());

        surface.lease().release();
        surface.release().unwrap();
        surface.release().unwrap();
        assert_eq!(surfaces.queues_closed(), 1);
    }

    #[tokio::test]
    async fn drained_images_feed_cadence() {
        let surfaces = Arc::new(SimSurfaces::new());
        let cadence = FrameCadence::new();
        let p = SurfaceProvisioner::new(
            Arc::clone(&surfaces) as Arc<dyn SurfaceFactory>,
            cadence.clone(),
        );
        let config = SessionConfiguration::new(ConnectionMode::PeerWireless);
        let surface = p
            .provision(&wireless(640, 480), &config, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(surfaces.pump_frames(surface.handle(), 5), 5);
        assert_eq!(cadence.pending_frames(), 5);
        // Every delivered image was closed by the drain.
        assert_eq!(surfaces.images_open(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn presentation_not_ready_times_out() {
        let surfaces = Arc::new(SimSurfaces::new());
        surfaces.hold_presentation_ready(true);
        let p = provisioner(&surfaces).with_ready_timeout(Duration::from_millis(200));
        let route = Route::Direct {
            display: TargetDisplay {
                display_id: Some(3),
                width: 1920,
                height: 1080,
                density_dpi: 160,
                is_external: true,
                refresh_rate: 60.0,
            },
        };
        let config = SessionConfiguration::new(ConnectionMode::DirectWired);
        let err = p
            .provision(&route, &config, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::SurfaceNotReady(_)));
        assert_eq!(surfaces.presentations_dismissed(), 1);
    }
}
