//! Mirroring session: the lifecycle state machine.
//!
//! A session owns, at most one of each, the capture projection opened from
//! the user's grant, the resolved [`Route`], the [`RenderSurface`] and the
//! [`VirtualDisplayBinding`] between them.
//!
//! # Serialization
//!
//! Every operation that touches those resources runs under one async lock.
//! `stop()` first cancels the in-flight attempt (bounded display wait,
//! presentation readiness, encoder preparation) and the hot-plug watcher,
//! then takes the lock, so it never waits behind a long start. A `start()`
//! supersedes whatever ran before it the same way.
//!
//! # Hot-plug
//!
//! DirectWired sessions run a supervised watcher. Removing the bound display
//! tears down binding and surface and leaves the session Active but paused;
//! the next presentation-capable display to appear is bound with the same
//! capture projection. The hot-plug feed is taken before sink resolution,
//! so a removal racing the start is still seen. A lagged feed re-reads the
//! registry instead.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ErrorKind, MirrorError};
use crate::mirror::binding::VirtualDisplayBinding;
use crate::mirror::provision::{RenderSurface, SurfaceProvisioner, guarded};
use crate::mirror::resolver::{Hotplug, HotplugEvents, Route, SinkResolver};
use crate::mirror::settings::{SessionTuning, SettingsAccess};
use crate::mirror::telemetry::FrameCadence;
use crate::mirror::types::{CaptureGrant, ConnectionMode, SessionConfiguration};
use crate::platform::{CapturePlatform, DisplayId, Platform, PlatformError, ScreenCapture};
use crate::state::{SessionPhase, SessionStatus};
use crate::task::Supervisor;

// ── SessionState ─────────────────────────────────────────────────

/// Resources held by a session. Field order is release order on drop.
#[derive(Default)]
struct SessionState {
    binding: Option<VirtualDisplayBinding>,
    surface: Option<RenderSurface>,
    route: Option<Route>,
    projection: Option<Box<dyn ScreenCapture>>,

    phase: SessionPhase,
    config: Option<SessionConfiguration>,
    last_error: Option<(ErrorKind, String)>,
    attempts: u64,
}

impl SessionState {
    /// Release binding and surface, keeping the projection.
    fn release_output(&mut self) {
        if let Some(mut binding) = self.binding.take() {
            binding.release();
        }
        if let Some(mut surface) = self.surface.take() {
            if let Err(e) = surface.release() {
                warn!("teardown fault in render surface: {e}");
            }
        }
        self.route = None;
    }

    /// Release everything. The projection is stopped at most once.
    fn release_all(&mut self) {
        self.release_output();
        if let Some(projection) = self.projection.take() {
            guarded("capture projection", projection.stop());
        }
    }

    fn record_error(&mut self, e: &MirrorError) {
        self.last_error = Some((e.kind(), e.to_string()));
    }

    fn snapshot(&self) -> SessionStatus {
        SessionStatus {
            phase: self.phase.clone(),
            mode: self.config.map(|c| c.connection_mode),
            surface: self.surface.as_ref().map(RenderSurface::kind),
            target: self.route.as_ref().map(|r| r.target().clone()),
            last_error: self.last_error.as_ref().map(|(_, msg)| msg.clone()),
            error_kind: self.last_error.as_ref().map(|(kind, _)| *kind),
            attempts: self.attempts,
        }
    }
}

impl Drop for SessionState {
    fn drop(&mut self) {
        if self.projection.is_some() {
            warn!("mirroring session dropped without stop, releasing resources");
        }
        self.release_all();
    }
}

// ── Shared ───────────────────────────────────────────────────────

struct Shared {
    capture: Arc<dyn CapturePlatform>,
    settings: Arc<dyn SettingsAccess>,
    tuning: SessionTuning,
    resolver: SinkResolver,
    provisioner: SurfaceProvisioner,
    cadence: FrameCadence,
    status: watch::Sender<SessionStatus>,

    /// Cancels the in-flight start, retry or watcher.
    attempt: parking_lot::Mutex<CancellationToken>,
    stop_requested: AtomicBool,
    watcher: parking_lot::Mutex<Option<Supervisor>>,

    state: Mutex<SessionState>,
}

impl Shared {
    fn publish(&self, state: &SessionState) {
        self.status.send_replace(state.snapshot());
    }

    /// Cancel the previous attempt and hand out a token for a new one.
    fn begin_attempt(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = std::mem::replace(&mut *self.attempt.lock(), token.clone());
        previous.cancel();
        self.stop_requested.store(false, Ordering::SeqCst);
        token
    }

    async fn shutdown_watcher(&self) {
        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher {
            watcher.shutdown().await;
        }
    }

    fn open_projection(&self, grant: CaptureGrant) -> Result<Box<dyn ScreenCapture>, MirrorError> {
        if !grant.is_approved() {
            return Err(MirrorError::GrantInvalid(
                "screen capture consent was not granted",
            ));
        }
        self.capture.open(grant).map_err(|e| match e {
            PlatformError::PermissionDenied(reason) => {
                warn!("capture projection refused: {reason}");
                MirrorError::GrantInvalid("capture platform refused the grant")
            }
            other => MirrorError::Platform(other),
        })
    }

    /// Resolve, provision and bind.
    async fn attempt(
        &self,
        state: &mut SessionState,
        config: &SessionConfiguration,
        cancel: &CancellationToken,
    ) -> Result<(), MirrorError> {
        let route = self
            .resolver
            .resolve_route(config.connection_mode, self.tuning.display_wait, cancel)
            .await?;
        self.bind_route(state, route, config, cancel).await
    }

    /// Provision a surface for `route` and bind the projection to it.
    async fn bind_route(
        &self,
        state: &mut SessionState,
        route: Route,
        config: &SessionConfiguration,
        cancel: &CancellationToken,
    ) -> Result<(), MirrorError> {
        let projection = state
            .projection
            .as_deref()
            .ok_or(MirrorError::GrantInvalid("capture grant already consumed"))?;

        let surface = self.provisioner.provision(&route, config, cancel).await?;
        if cancel.is_cancelled() {
            // Dropping the unbound surface releases it.
            return Err(MirrorError::Cancelled);
        }
        let binding = VirtualDisplayBinding::bind(projection, &route, &surface, config)?;

        state.binding = Some(binding);
        state.surface = Some(surface);
        state.route = Some(route);
        Ok(())
    }

    /// Apply the outcome of a start or retry attempt to the phase.
    fn settle(
        self: &Arc<Self>,
        state: &mut SessionState,
        cancel: &CancellationToken,
        events: HotplugEvents,
        outcome: Result<(), MirrorError>,
    ) -> Result<(), MirrorError> {
        match outcome {
            Ok(()) => {
                state.phase.activate()?;
                self.cadence.reset();
                if let (Some(route), Some(surface)) = (&state.route, &state.surface) {
                    info!(
                        mode = %route.mode(),
                        surface = %surface.kind(),
                        target = %route.target().describe(),
                        "mirroring session active"
                    );
                }
                if matches!(state.route, Some(Route::Direct { .. })) {
                    self.spawn_watcher(cancel, events);
                }
                self.publish(state);
                Ok(())
            }
            Err(MirrorError::Cancelled) => {
                // Whoever cancelled tears the attempt down.
                info!("session start cancelled");
                Err(MirrorError::Cancelled)
            }
            Err(e) => {
                error!(kind = ?e.kind(), "mirroring session failed: {e}");
                state.record_error(&e);
                state.phase.fail(e.to_string())?;
                self.publish(state);
                Err(e)
            }
        }
    }

    /// Walk Starting/Active/Failed down to Idle, releasing everything.
    fn teardown(&self, state: &mut SessionState) {
        if let Err(e) = state.phase.begin_stop() {
            warn!("{e}");
        }
        self.publish(state);

        state.release_all();
        self.cadence.reset();
        state.last_error = None;

        if state.phase.finish_stop().is_err() {
            state.phase.force_idle();
        }
        info!("mirroring session stopped");
        self.publish(state);
    }

    // ── Hot-plug ─────────────────────────────────────────────────

    fn spawn_watcher(self: &Arc<Self>, cancel: &CancellationToken, mut events: HotplugEvents) {
        let mut supervisor = Supervisor::new(cancel.child_token());
        let shared = Arc::clone(self);
        supervisor.spawn("hotplug-watcher", move |token| async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = events.next() => event,
                };
                let Some(event) = event else { break };
                shared.on_hotplug(event, &token).await;
            }
            Ok(())
        });
        *self.watcher.lock() = Some(supervisor);
    }

    async fn on_hotplug(&self, event: Hotplug, cancel: &CancellationToken) {
        let mut state = tokio::select! {
            _ = cancel.cancelled() => return,
            state = self.state.lock() => state,
        };
        if self.stop_requested.load(Ordering::SeqCst) || cancel.is_cancelled() {
            debug!(?event, "hot-plug ignored, stop requested");
            return;
        }
        if !state.phase.is_active() {
            return;
        }
        match event {
            Hotplug::Removed(id) => self.on_display_removed(&mut state, id),
            Hotplug::Added(id) => {
                if !state.phase.is_paused() {
                    debug!(display_id = id, "display added while bound, ignored");
                    return;
                }
                self.rebind(&mut state, cancel).await;
            }
            Hotplug::Resync => self.resync(&mut state, cancel).await,
        }
    }

    /// Compare the registry against the bound route after missed events.
    async fn resync(&self, state: &mut SessionState, cancel: &CancellationToken) {
        let bound = match &state.route {
            Some(Route::Direct { display }) => display.display_id,
            _ => None,
        };
        if let Some(id) = bound.filter(|id| !self.resolver.is_connected(*id)) {
            self.on_display_removed(state, id);
        }
        if state.phase.is_paused() {
            self.rebind(state, cancel).await;
        }
    }

    fn on_display_removed(&self, state: &mut SessionState, id: DisplayId) {
        let bound = matches!(
            &state.route,
            Some(Route::Direct { display }) if display.display_id == Some(id)
        );
        if !bound {
            debug!(display_id = id, "unrelated display removed");
            return;
        }
        info!(display_id = id, "external display removed, session paused");
        state.release_output();
        self.cadence.reset();
        if let Err(e) = state.phase.pause() {
            warn!("{e}");
        }
        self.publish(state);
    }

    /// Bind a paused session to the first presentation display available.
    async fn rebind(&self, state: &mut SessionState, cancel: &CancellationToken) {
        let Some(config) = state.config else { return };
        let Some(sink) = self.resolver.resolve(ConnectionMode::DirectWired) else {
            debug!("no presentation sink to rebind to");
            return;
        };

        let sink_name = sink.describe();
        info!(target = %sink_name, "external display added, rebinding");
        state.last_error = None;
        match self
            .bind_route(state, Route::Direct { display: sink }, &config, cancel)
            .await
        {
            Ok(()) => {
                if let Err(e) = state.phase.resume() {
                    warn!("{e}");
                }
                self.cadence.reset();
                info!("mirroring resumed on new display");
            }
            Err(MirrorError::Cancelled) => debug!("rebind cancelled"),
            Err(e) => {
                error!(kind = ?e.kind(), "rebind failed, awaiting next display: {e}");
                state.record_error(&e);
            }
        }
        self.publish(state);
    }
}

// ── MirroringSession ─────────────────────────────────────────────

/// One mirroring session and the platform collaborators it drives.
pub struct MirroringSession {
    shared: Arc<Shared>,
}

impl MirroringSession {
    /// Build an idle session. Settings are read once, here.
    pub fn new(platform: Platform, settings: Arc<dyn SettingsAccess>) -> Self {
        let tuning = settings.tuning();
        let cadence = FrameCadence::new();
        let resolver = SinkResolver::with_poll_interval(platform.displays, tuning.poll_interval);
        let provisioner = SurfaceProvisioner::new(platform.surfaces, cadence.clone())
            .with_ready_timeout(tuning.surface_ready_timeout);
        let (status, _) = watch::channel(SessionStatus::default());

        Self {
            shared: Arc::new(Shared {
                capture: platform.capture,
                settings,
                tuning,
                resolver,
                provisioner,
                cadence,
                status,
                attempt: parking_lot::Mutex::new(CancellationToken::new()),
                stop_requested: AtomicBool::new(false),
                watcher: parking_lot::Mutex::new(None),
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    /// Start mirroring with `config`, consuming `grant`.
    ///
    /// Any previous session on this instance is torn down first. Returns
    /// once the binding is live or the attempt has failed; failures also
    /// land on the status feed as a single `Failed` transition.
    pub async fn start(
        &self,
        config: SessionConfiguration,
        grant: CaptureGrant,
    ) -> Result<(), MirrorError> {
        let shared = &self.shared;
        let cancel = shared.begin_attempt();
        shared.shutdown_watcher().await;

        let mut state = shared.state.lock().await;
        if !state.phase.is_idle() {
            info!(phase = %state.phase, "superseding previous session");
            shared.teardown(&mut state);
        }

        state.phase.begin_start()?;
        state.config = Some(config);
        state.last_error = None;
        state.attempts += 1;
        shared.publish(&state);
        let events = shared.resolver.hotplug();
        info!(
            mode = %config.connection_mode,
            low_latency = config.low_latency,
            hardware_encoding = config.hardware_encoding,
            "starting mirroring session"
        );

        let outcome = match shared.open_projection(grant) {
            Ok(projection) => {
                state.projection = Some(projection);
                shared.attempt(&mut state, &config, &cancel).await
            }
            Err(e) => Err(e),
        };
        shared.settle(&mut state, &cancel, events, outcome)
    }

    /// Start with the configuration the injected settings hold.
    pub async fn start_from_settings(&self, grant: CaptureGrant) -> Result<(), MirrorError> {
        let config = self.shared.settings.session_configuration();
        self.start(config, grant).await
    }

    /// Re-run a failed start with the capture projection still held.
    ///
    /// Fails with [`MirrorError::GrantInvalid`] when the failure left no
    /// projection behind; a new consent is needed then.
    pub async fn retry(&self) -> Result<(), MirrorError> {
        let shared = &self.shared;
        // Leaves an in-flight start alone; checked again under the lock.
        if !shared.status.borrow().phase.is_failed() {
            return Err(MirrorError::InvalidTransition(
                "retry is only possible after a failed start",
            ));
        }
        let cancel = shared.begin_attempt();
        let mut state = shared.state.lock().await;

        if !state.phase.is_failed() {
            return Err(MirrorError::InvalidTransition(
                "retry is only possible after a failed start",
            ));
        }
        if state.projection.is_none() {
            return Err(MirrorError::GrantInvalid(
                "no capture grant held, a new consent is required",
            ));
        }
        let Some(config) = state.config else {
            return Err(MirrorError::InvalidTransition("no configuration to retry"));
        };

        state.phase.begin_start()?;
        state.last_error = None;
        state.attempts += 1;
        shared.publish(&state);
        info!(attempt = state.attempts, "retrying mirroring session");

        let events = shared.resolver.hotplug();
        let outcome = shared.attempt(&mut state, &config, &cancel).await;
        shared.settle(&mut state, &cancel, events, outcome)
    }

    /// Stop mirroring and release everything, in order: binding, surface
    /// (with its codec or queue and presentation host), capture projection.
    ///
    /// Safe from any phase and idempotent; a call on an idle session does
    /// nothing. Individual release faults are logged, never returned.
    pub async fn stop(&self) {
        let shared = &self.shared;
        shared.stop_requested.store(true, Ordering::SeqCst);
        shared.attempt.lock().cancel();
        shared.shutdown_watcher().await;

        let mut state = shared.state.lock().await;
        if state.phase.is_idle() {
            debug!("stop: session already idle");
            return;
        }
        shared.teardown(&mut state);
    }

    /// Watch the session's status.
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status.subscribe()
    }

    /// The most recently published status.
    pub fn current_status(&self) -> SessionStatus {
        self.shared.status.borrow().clone()
    }

    /// Frame-cadence telemetry for surfaces this session provisions.
    pub fn cadence(&self) -> FrameCadence {
        self.shared.cadence.clone()
    }

    pub fn tuning(&self) -> SessionTuning {
        self.shared.tuning
    }
}

impl Drop for MirroringSession {
    fn drop(&mut self) {
        // Lets the watcher exit so the session state can drop and release.
        self.shared.attempt.lock().cancel();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::settings::StaticSettings;
    use crate::mirror::types::SurfaceKind;
    use crate::platform::sim::SimPlatform;

    fn session(sim: &SimPlatform) -> MirroringSession {
        MirroringSession::new(sim.platform(), Arc::new(StaticSettings::default()))
    }

    #[tokio::test]
    async fn wireless_start_and_stop() {
        let sim = SimPlatform::new();
        let session = session(&sim);
        session
            .start(
                SessionConfiguration::new(ConnectionMode::StandardWireless),
                SimPlatform::grant(),
            )
            .await
            .unwrap();

        let status = session.current_status();
        assert!(status.is_mirroring());
        assert_eq!(status.surface, Some(SurfaceKind::BufferedImage));
        assert_eq!(sim.capture.live_displays(), 1);

        session.stop().await;
        assert!(session.current_status().phase.is_idle());
        assert_eq!(sim.capture.live_displays(), 0);
        assert_eq!(sim.capture.stops(), 1);
        assert_eq!(sim.surfaces.queues_closed(), 1);
    }

    #[tokio::test]
    async fn denied_grant_fails_without_retry() {
        let sim = SimPlatform::new();
        let session = session(&sim);
        let err = session
            .start(
                SessionConfiguration::new(ConnectionMode::PeerWireless),
                CaptureGrant::new(0, Vec::new()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::GrantInvalid(_)));
        assert!(!session.current_status().can_retry());
        assert!(matches!(
            session.retry().await,
            Err(MirrorError::GrantInvalid(_))
        ));
        assert_eq!(sim.capture.projections_opened(), 0);
    }

    #[tokio::test]
    async fn retry_from_active_is_rejected() {
        let sim = SimPlatform::new();
        let session = session(&sim);
        session
            .start(
                SessionConfiguration::new(ConnectionMode::PeerWireless),
                SimPlatform::grant(),
            )
            .await
            .unwrap();
        assert!(matches!(
            session.retry().await,
            Err(MirrorError::InvalidTransition(_))
        ));
        session.stop().await;
    }

    #[tokio::test]
    async fn retry_leaves_pending_start_alone() {
        let sim = SimPlatform::new();
        sim.displays.connect_external(1920, 1080, 60.0);
        sim.surfaces.hold_presentation_ready(true);
        let session = session(&sim);

        let config = SessionConfiguration::new(ConnectionMode::DirectWired);
        let (started, ()) = tokio::join!(session.start(config, SimPlatform::grant()), async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            assert!(matches!(
                session.retry().await,
                Err(MirrorError::InvalidTransition(_))
            ));
            assert_eq!(sim.surfaces.complete_presentations(), 1);
        });

        started.unwrap();
        assert!(session.current_status().is_mirroring());
        session.stop().await;
    }

    #[tokio::test]
    async fn restart_supersedes_previous_session() {
        let sim = SimPlatform::new();
        let session = session(&sim);
        let config = SessionConfiguration::new(ConnectionMode::PeerWireless);
        session.start(config, SimPlatform::grant()).await.unwrap();
        session.start(config, SimPlatform::grant()).await.unwrap();

        assert_eq!(sim.capture.stops(), 1);
        assert_eq!(sim.capture.live_displays(), 1);
        assert_eq!(sim.capture.peak_live_displays(), 1);
        assert_eq!(session.current_status().attempts, 2);
        session.stop().await;
        assert_eq!(sim.capture.stops(), 2);
    }

    #[tokio::test]
    async fn dropping_session_releases_resources() {
        let sim = SimPlatform::new();
        {
            let session = session(&sim);
            session
                .start(
                    SessionConfiguration::new(ConnectionMode::PeerWireless),
                    SimPlatform::grant(),
                )
                .await
                .unwrap();
        }
        assert_eq!(sim.capture.live_displays(), 0);
        assert_eq!(sim.capture.stops(), 1);
    }
}
