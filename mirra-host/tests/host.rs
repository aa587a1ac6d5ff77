//! Host-level tests: commands sent through a [`HostHandle`] against the
//! simulated platform.

use std::sync::Arc;
use std::time::{Duration, Instant};

use mirra_core::platform::sim::SimPlatform;
use mirra_core::{
    ConnectionMode, MirrorError, SessionConfiguration, SessionStatus, SessionTuning,
    StaticSettings, SurfaceKind,
};
use mirra_host::config::{HostConfig, PreferenceStore};
use mirra_host::service::{HostHandle, SessionHost};
use tokio::sync::watch;
use tokio::task::JoinHandle;

fn settings(mode: ConnectionMode) -> Arc<StaticSettings> {
    let tuning = SessionTuning {
        display_wait: Duration::from_millis(200),
        poll_interval: Duration::from_millis(20),
        surface_ready_timeout: Duration::from_secs(1),
    };
    Arc::new(StaticSettings::new(SessionConfiguration::new(mode)).with_tuning(tuning))
}

/// DirectWired behind an attached adapter whose display never shows up.
fn waiting_host(sim: &SimPlatform) -> (HostHandle, JoinHandle<Result<(), MirrorError>>) {
    sim.displays.set_accessory_attached(true);
    let tuning = SessionTuning {
        display_wait: Duration::from_secs(30),
        poll_interval: Duration::from_millis(20),
        surface_ready_timeout: Duration::from_secs(1),
    };
    let settings = StaticSettings::new(SessionConfiguration::new(ConnectionMode::DirectWired))
        .with_tuning(tuning);
    let (host, handle) = SessionHost::new(sim.platform(), Arc::new(settings));
    (handle, tokio::spawn(host.run()))
}

fn spawn_host(
    sim: &SimPlatform,
    mode: ConnectionMode,
) -> (HostHandle, JoinHandle<Result<(), MirrorError>>) {
    let (host, handle) = SessionHost::new(sim.platform(), settings(mode));
    (handle, tokio::spawn(host.run()))
}

async fn wait_until(
    rx: &mut watch::Receiver<SessionStatus>,
    what: &str,
    pred: impl FnMut(&SessionStatus) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .expect("host status closed");
}

async fn finish(handle: &HostHandle, run: JoinHandle<Result<(), MirrorError>>) {
    handle.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("host did not stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn start_reaches_mirroring() {
    let sim = SimPlatform::new();
    sim.displays.connect_external(1920, 1080, 60.0);
    let (handle, run) = spawn_host(&sim, ConnectionMode::DirectWired);
    let mut status = handle.status();

    handle.start(SimPlatform::grant()).await.unwrap();
    wait_until(&mut status, "mirroring", SessionStatus::is_mirroring).await;
    assert_eq!(
        status.borrow().surface,
        Some(SurfaceKind::Presentation)
    );

    finish(&handle, run).await;
    assert_eq!(sim.capture.stops(), 1);
    assert_eq!(sim.capture.live_displays(), 0);
}

#[tokio::test]
async fn second_start_stops_prior_session() {
    let sim = SimPlatform::new();
    let (handle, run) = spawn_host(&sim, ConnectionMode::PeerWireless);

    handle.start(SimPlatform::grant()).await.unwrap();
    handle.start(SimPlatform::grant()).await.unwrap();
    finish(&handle, run).await;

    assert_eq!(sim.capture.projections_opened(), 2);
    assert_eq!(sim.capture.stops(), 2);
    assert_eq!(sim.capture.peak_live_displays(), 1);
}

#[tokio::test]
async fn retry_after_plugging_display() {
    let sim = SimPlatform::new();
    let (handle, run) = spawn_host(&sim, ConnectionMode::DirectWired);
    let mut status = handle.status();

    handle.start(SimPlatform::grant()).await.unwrap();
    wait_until(&mut status, "failure", |s| s.phase.is_failed()).await;
    assert!(status.borrow().can_retry());

    sim.displays.connect_external(1920, 1080, 60.0);
    handle.retry().await.unwrap();
    wait_until(&mut status, "mirroring", SessionStatus::is_mirroring).await;
    assert_eq!(status.borrow().attempts, 2);

    finish(&handle, run).await;
    assert_eq!(sim.capture.projections_opened(), 1);
    assert_eq!(sim.capture.stops(), 1);
}

#[tokio::test]
async fn stop_then_shutdown_stops_once() {
    let sim = SimPlatform::new();
    let (handle, run) = spawn_host(&sim, ConnectionMode::StandardWireless);
    let mut status = handle.status();

    handle.start(SimPlatform::grant()).await.unwrap();
    wait_until(&mut status, "mirroring", SessionStatus::is_mirroring).await;

    handle.stop().await.unwrap();
    wait_until(&mut status, "idle", |s| s.phase.is_idle()).await;
    assert_eq!(sim.capture.stops(), 1);

    finish(&handle, run).await;
    assert_eq!(sim.capture.stops(), 1);
}

#[tokio::test]
async fn preference_store_drives_new_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(PreferenceStore::new(
        dir.path().join("mirra-host.toml"),
        HostConfig::default(),
    ));
    store
        .update(|m| m.connection_mode = ConnectionMode::PeerWireless)
        .unwrap();

    let sim = SimPlatform::new();
    let (host, handle) = SessionHost::new(sim.platform(), store.clone());
    let run = tokio::spawn(host.run());
    let mut status = handle.status();

    handle.start(SimPlatform::grant()).await.unwrap();
    wait_until(&mut status, "mirroring", SessionStatus::is_mirroring).await;
    assert_eq!(status.borrow().mode, Some(ConnectionMode::PeerWireless));
    assert_eq!(status.borrow().surface, Some(SurfaceKind::BufferedImage));

    finish(&handle, run).await;
}

#[tokio::test]
async fn stop_interrupts_display_wait() {
    let sim = SimPlatform::new();
    let (handle, run) = waiting_host(&sim);
    let mut status = handle.status();

    handle.start(SimPlatform::grant()).await.unwrap();
    wait_until(&mut status, "starting", |s| s.phase.is_starting()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stopped = Instant::now();
    handle.stop().await.unwrap();
    wait_until(&mut status, "idle", |s| s.phase.is_idle()).await;
    assert!(stopped.elapsed() < Duration::from_secs(2), "took {:?}", stopped.elapsed());
    assert_eq!(sim.capture.stops(), 1);
    assert_eq!(sim.surfaces.total_surfaces_created(), 0);

    finish(&handle, run).await;
    assert_eq!(sim.capture.stops(), 1);
}

#[tokio::test]
async fn shutdown_interrupts_display_wait() {
    let sim = SimPlatform::new();
    let (handle, run) = waiting_host(&sim);
    let mut status = handle.status();

    handle.start(SimPlatform::grant()).await.unwrap();
    wait_until(&mut status, "starting", |s| s.phase.is_starting()).await;

    let stopped = Instant::now();
    handle.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("host kept waiting for the display")
        .unwrap()
        .unwrap();
    assert!(stopped.elapsed() < Duration::from_secs(2));
    assert_eq!(sim.capture.stops(), 1);
    assert_eq!(sim.capture.live_displays(), 0);
}
