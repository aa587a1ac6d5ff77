//! Sink resolution.
//!
//! Picks the display a session should render to and turns the user's
//! [`ConnectionMode`] into a [`Route`], the tagged value the provisioner
//! and the binding step match on.
//!
//! Absence of a qualifying display is an ordinary `None`; only the
//! DirectWired route turns it into [`MirrorError::NoExternalDisplay`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::MirrorError;
use crate::mirror::types::{ConnectionMode, TargetDisplay};
use crate::platform::{DEFAULT_DISPLAY_ID, DisplayEvent, DisplayId, DisplayRegistry};

/// Default polling cadence of [`SinkResolver::await_external_display`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ── Route ────────────────────────────────────────────────────────

/// Resolved mirroring route, carrying the mode-specific target.
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    /// Render straight onto an external presentation display.
    Direct { display: TargetDisplay },
    /// Encode (or buffer) frames sized to `target`. The target is a
    /// connected non-default display if one exists, else the device itself.
    Wireless {
        mode: ConnectionMode,
        target: TargetDisplay,
    },
}

impl Route {
    pub fn target(&self) -> &TargetDisplay {
        match self {
            Route::Direct { display } => display,
            Route::Wireless { target, .. } => target,
        }
    }

    pub fn mode(&self) -> ConnectionMode {
        match self {
            Route::Direct { .. } => ConnectionMode::DirectWired,
            Route::Wireless { mode, .. } => *mode,
        }
    }
}

// ── SinkResolver ─────────────────────────────────────────────────

/// Enumerates the display registry and classifies candidate sinks.
#[derive(Clone)]
pub struct SinkResolver {
    registry: Arc<dyn DisplayRegistry>,
    poll_interval: Duration,
}

impl SinkResolver {
    pub fn new(registry: Arc<dyn DisplayRegistry>) -> Self {
        Self::with_poll_interval(registry, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_poll_interval(registry: Arc<dyn DisplayRegistry>, poll_interval: Duration) -> Self {
        Self {
            registry,
            poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Find a sink for `mode`.
    ///
    /// - DirectWired: the first presentation-capable non-default display.
    /// - Wireless: any connected non-default display (dev/test sinks).
    pub fn resolve(&self, mode: ConnectionMode) -> Option<TargetDisplay> {
        let displays = self.registry.displays();
        let found = match mode {
            ConnectionMode::DirectWired => displays
                .iter()
                .find(|d| !d.is_default() && d.presentation_capable),
            ConnectionMode::PeerWireless | ConnectionMode::StandardWireless => {
                displays.iter().find(|d| !d.is_default())
            }
        };
        debug!(
            %mode,
            candidates = displays.len(),
            found = ?found.map(|d| &d.name),
            "sink resolution"
        );
        found.map(TargetDisplay::from_display)
    }

    /// Whether display `id` is still in the registry.
    pub fn is_connected(&self, id: DisplayId) -> bool {
        self.registry.displays().iter().any(|d| d.id == id)
    }

    /// The device's own metrics as a target.
    pub fn device_target(&self) -> TargetDisplay {
        TargetDisplay::from_device(&self.registry.device_metrics())
    }

    /// An adapter is attached but its display may not have enumerated yet.
    pub fn external_display_pending(&self) -> bool {
        self.registry.usb_accessory_attached()
    }

    /// Poll for an external presentation display until `timeout` elapses.
    ///
    /// Returns `None` on timeout or when `cancel` fires. Never returns
    /// before the deadline unless a display shows up or the wait is
    /// cancelled; overshoots it by at most one poll interval.
    pub async fn await_external_display(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Option<TargetDisplay> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(display) = self.resolve(ConnectionMode::DirectWired) {
                return Some(display);
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(?timeout, "no external display before deadline");
                return None;
            }
            let nap = self.poll_interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("external display wait cancelled");
                    return None;
                }
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    /// Resolve the route for `mode`, waiting up to `wait` for a late
    /// DirectWired display when an adapter is already attached.
    pub async fn resolve_route(
        &self,
        mode: ConnectionMode,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<Route, MirrorError> {
        match mode {
            ConnectionMode::DirectWired => {
                let found = match self.resolve(mode) {
                    Some(found) => Some(found),
                    None if self.external_display_pending() => {
                        info!(?wait, "adapter attached, waiting for its display");
                        self.await_external_display(wait, cancel).await
                    }
                    None => None,
                };
                if cancel.is_cancelled() {
                    return Err(MirrorError::Cancelled);
                }
                let sink = found.ok_or(MirrorError::NoExternalDisplay)?;
                info!(target = %sink.describe(), "external display resolved");
                Ok(Route::Direct { display: sink })
            }
            ConnectionMode::PeerWireless | ConnectionMode::StandardWireless => {
                let target = self.resolve(mode).unwrap_or_else(|| self.device_target());
                info!(%mode, target = %target.describe(), "wireless target resolved");
                Ok(Route::Wireless { mode, target })
            }
        }
    }

    /// Hot-plug feed filtered to non-default displays.
    pub fn hotplug(&self) -> HotplugEvents {
        HotplugEvents {
            rx: self.registry.subscribe(),
        }
    }
}

// ── HotplugEvents ────────────────────────────────────────────────

/// One hot-plug notification for a non-default display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hotplug {
    Added(DisplayId),
    Removed(DisplayId),
    /// Events were dropped. The registry has to be re-read.
    Resync,
}

/// Display add/remove notifications for non-default displays only.
///
/// Subscribing buffers events from that moment on, so take the feed before
/// resolving a sink to see every change to it.
pub struct HotplugEvents {
    rx: broadcast::Receiver<DisplayEvent>,
}

impl HotplugEvents {
    /// Next notification, or `None` once the registry goes away.
    pub async fn next(&mut self) -> Option<Hotplug> {
        loop {
            match self.rx.recv().await {
                Ok(DisplayEvent::Changed(_)) => continue,
                Ok(event) if event.display_id() == DEFAULT_DISPLAY_ID => continue,
                Ok(DisplayEvent::Added(id)) => return Some(Hotplug::Added(id)),
                Ok(DisplayEvent::Removed(id)) => return Some(Hotplug::Removed(id)),
                Err(RecvError::Lagged(n)) => {
                    warn!("hot-plug feed lagged, {n} events skipped");
                    return Some(Hotplug::Resync);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::sim::SimDisplays;

    fn resolver(displays: &Arc<SimDisplays>) -> SinkResolver {
        SinkResolver::new(Arc::clone(displays) as Arc<dyn DisplayRegistry>)
    }

    #[test]
    fn no_displays_resolves_none() {
        let displays = Arc::new(SimDisplays::new());
        let r = resolver(&displays);
        for mode in ConnectionMode::ALL {
            assert!(r.resolve(mode).is_none());
        }
    }

    #[test]
    fn direct_wired_requires_presentation_capable() {
        let displays = Arc::new(SimDisplays::new());
        displays.connect_virtual(1920, 1080);
        let r = resolver(&displays);
        assert!(r.resolve(ConnectionMode::DirectWired).is_none());
        assert!(r.resolve(ConnectionMode::PeerWireless).is_some());
    }

    #[test]
    fn first_of_many_externals() {
        let displays = Arc::new(SimDisplays::new());
        let first = displays.connect_external(2560, 1440, 144.0);
        displays.connect_external(1920, 1080, 60.0);
        let target = resolver(&displays)
            .resolve(ConnectionMode::DirectWired)
            .unwrap();
        assert_eq!(target.display_id, Some(first));
        assert_eq!(target.refresh_rate, 144.0);
    }

    #[tokio::test]
    async fn wireless_route_falls_back_to_device() {
        let displays = Arc::new(SimDisplays::new());
        let route = resolver(&displays)
            .resolve_route(
                ConnectionMode::StandardWireless,
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let target = route.target();
        assert!(!target.is_external);
        assert_eq!(target.display_id, None);
        assert_eq!(route.mode(), ConnectionMode::StandardWireless);
    }

    #[tokio::test]
    async fn direct_route_without_display_fails() {
        let displays = Arc::new(SimDisplays::new());
        let err = resolver(&displays)
            .resolve_route(
                ConnectionMode::DirectWired,
                Duration::from_secs(1),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::NoExternalDisplay));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_times_out_within_one_poll() {
        let displays = Arc::new(SimDisplays::new());
        let r = resolver(&displays);
        let start = Instant::now();
        let found = r
            .await_external_display(Duration::from_millis(500), &CancellationToken::new())
            .await;
        let waited = start.elapsed();
        assert!(found.is_none());
        assert!(waited >= Duration::from_millis(500), "waited {waited:?}");
        assert!(waited <= Duration::from_millis(600), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_sees_late_display() {
        let displays = Arc::new(SimDisplays::new());
        let r = resolver(&displays);
        let late = Arc::clone(&displays);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            late.connect_external(1920, 1080, 60.0);
        });
        let found = r
            .await_external_display(Duration::from_secs(5), &CancellationToken::new())
            .await;
        assert!(found.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_is_cancellable() {
        let displays = Arc::new(SimDisplays::new());
        let r = resolver(&displays);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            trigger.cancel();
        });
        let start = Instant::now();
        assert!(r.await_external_display(Duration::from_secs(10), &cancel).await.is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn hotplug_filters_default_and_changes() {
        let displays = Arc::new(SimDisplays::new());
        let mut events = resolver(&displays).hotplug();
        displays.emit(DisplayEvent::Changed(DEFAULT_DISPLAY_ID));
        displays.emit(DisplayEvent::Added(DEFAULT_DISPLAY_ID));
        let id = displays.connect_external(1920, 1080, 60.0);
        assert_eq!(events.next().await, Some(Hotplug::Added(id)));
    }

    #[tokio::test]
    async fn lagged_feed_asks_for_resync() {
        let displays = Arc::new(SimDisplays::new());
        let r = resolver(&displays);
        let mut events = r.hotplug();
        let id = displays.connect_external(1920, 1080, 60.0);
        for _ in 0..64 {
            displays.emit(DisplayEvent::Changed(id));
        }
        displays.disconnect(id);

        assert_eq!(events.next().await, Some(Hotplug::Resync));
        assert_eq!(events.next().await, Some(Hotplug::Removed(id)));
        assert!(!r.is_connected(id));
    }
}
