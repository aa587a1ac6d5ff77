//! Session host core logic.
//!
//! Owns at most one mirroring session at a time and relays start, stop
//! and retry commands to it. Each session gets a small supervisor for the
//! tasks that mirror its status and telemetry outward, and for the start
//! or retry in flight. Attempts never run inline in the command loop, so
//! a stop or shutdown reaches a session that is still waiting on its sink.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use mirra_core::{
    CaptureGrant, MirrorError, MirroringSession, Platform, SessionStatus, SettingsAccess,
    Supervisor,
};

/// Commands accepted by [`SessionHost::run`].
#[derive(Debug)]
pub enum HostCommand {
    /// Stop any running session, then start a new one with `grant`.
    Start { grant: CaptureGrant },
    Stop,
    Retry,
    Shutdown,
}

// ── HostHandle ───────────────────────────────────────────────────

/// Cloneable sender side of a running host.
#[derive(Clone)]
pub struct HostHandle {
    tx: mpsc::Sender<HostCommand>,
    status: watch::Receiver<SessionStatus>,
}

impl HostHandle {
    pub async fn send(&self, command: HostCommand) -> Result<(), MirrorError> {
        self.tx.send(command).await?;
        Ok(())
    }

    pub async fn start(&self, grant: CaptureGrant) -> Result<(), MirrorError> {
        self.send(HostCommand::Start { grant }).await
    }

    pub async fn stop(&self) -> Result<(), MirrorError> {
        self.send(HostCommand::Stop).await
    }

    pub async fn retry(&self) -> Result<(), MirrorError> {
        self.send(HostCommand::Retry).await
    }

    pub async fn shutdown(&self) -> Result<(), MirrorError> {
        self.send(HostCommand::Shutdown).await
    }

    /// Status of whichever session the host currently runs.
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }
}

// ── SessionHost ──────────────────────────────────────────────────

struct ActiveSession {
    session: Arc<MirroringSession>,
    tasks: Supervisor,
}

/// The top-level session host.
pub struct SessionHost {
    platform: Platform,
    settings: Arc<dyn SettingsAccess>,
    telemetry_json: bool,
    current: Option<ActiveSession>,
    commands: mpsc::Receiver<HostCommand>,
    status: watch::Sender<SessionStatus>,
    running: Arc<AtomicBool>,
}

impl SessionHost {
    /// Create a host and the handle used to command it.
    pub fn new(platform: Platform, settings: Arc<dyn SettingsAccess>) -> (Self, HostHandle) {
        let (tx, commands) = mpsc::channel(16);
        let (status, status_rx) = watch::channel(SessionStatus::default());
        let host = Self {
            platform,
            settings,
            telemetry_json: false,
            current: None,
            commands,
            status,
            running: Arc::new(AtomicBool::new(false)),
        };
        (
            host,
            HostHandle {
                tx,
                status: status_rx,
            },
        )
    }

    /// Log every cadence summary as a JSON line as well.
    #[must_use]
    pub fn with_telemetry_json(mut self, enabled: bool) -> Self {
        self.telemetry_json = enabled;
        self
    }

    /// Obtain a handle that can be used to stop the host from another
    /// task, e.g. a ctrl-c handler.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Process commands until `Shutdown`, a closed channel or the stop
    /// handle. The current session is stopped on the way out.
    pub async fn run(mut self) -> Result<(), MirrorError> {
        self.running.store(true, Ordering::SeqCst);
        info!("session host running");

        while self.running.load(Ordering::SeqCst) {
            let command = tokio::select! {
                command = self.commands.recv() => command,
                _ = Self::wait_for_stop(&self.running) => break,
            };
            let Some(command) = command else {
                debug!("command channel closed");
                break;
            };
            match command {
                HostCommand::Start { grant } => self.start(grant).await,
                HostCommand::Stop => self.stop_session().await,
                HostCommand::Retry => self.retry(),
                HostCommand::Shutdown => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        self.stop_session().await;
        self.running.store(false, Ordering::SeqCst);
        info!("session host stopped");
        Ok(())
    }

    /// Whether the host loop is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── Internal ─────────────────────────────────────────────────

    async fn start(&mut self, grant: CaptureGrant) {
        // The capture grant is exclusive to one session.
        self.stop_session().await;

        let session = Arc::new(MirroringSession::new(
            self.platform.clone(),
            Arc::clone(&self.settings),
        ));
        let mut tasks = self.supervise(&session);
        let runner = Arc::clone(&session);
        tasks.spawn("session-start", move |token| async move {
            let outcome = attempt(&runner, token, runner.start_from_settings(grant)).await;
            match outcome {
                Ok(()) => info!("session started"),
                Err(MirrorError::Cancelled) => debug!("session start cancelled"),
                Err(e) => error!(kind = ?e.kind(), "session start failed: {e}"),
            }
            Ok(())
        });
        self.current = Some(ActiveSession { session, tasks });
    }

    fn retry(&mut self) {
        let Some(current) = self.current.as_mut() else {
            warn!("retry requested with no session");
            return;
        };
        if current.session.current_status().phase.is_starting() {
            warn!("retry requested while an attempt is in progress");
            return;
        }
        let runner = Arc::clone(&current.session);
        current.tasks.spawn("session-retry", move |token| async move {
            match attempt(&runner, token, runner.retry()).await {
                Ok(()) => info!("session retry succeeded"),
                Err(MirrorError::Cancelled) => debug!("session retry cancelled"),
                Err(e) => error!(kind = ?e.kind(), "session retry failed: {e}"),
            }
            Ok(())
        });
    }

    /// Stop the current session, exactly once.
    async fn stop_session(&mut self) {
        let Some(ActiveSession { session, tasks }) = self.current.take() else {
            return;
        };
        // A pending attempt stops the session itself when cancelled.
        tasks.shutdown().await;
        session.stop().await;
        self.status.send_replace(session.current_status());
    }

    /// Relay the session's status and telemetry to the host's consumers.
    fn supervise(&self, session: &MirroringSession) -> Supervisor {
        let mut tasks = Supervisor::new(CancellationToken::new());

        let mut status_rx = session.status();
        let status_tx = self.status.clone();
        tasks.spawn("status-relay", move |token| async move {
            loop {
                let status = status_rx.borrow_and_update().clone();
                info!(target: "mirra::status", "{status}");
                status_tx.send_replace(status);
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = status_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            Ok(())
        });

        let mut summaries = session.cadence().subscribe();
        let json = self.telemetry_json;
        tasks.spawn("cadence-report", move |token| async move {
            loop {
                let summary = tokio::select! {
                    _ = token.cancelled() => break,
                    summary = summaries.recv() => summary,
                };
                match summary {
                    Ok(summary) if json => match serde_json::to_string(&summary) {
                        Ok(line) => info!(target: "mirra::telemetry", "{line}"),
                        Err(e) => warn!("cadence summary not serializable: {e}"),
                    },
                    Ok(_) => {}
                    Err(RecvError::Lagged(n)) => debug!("cadence report lagged by {n}"),
                    Err(RecvError::Closed) => break,
                }
            }
            Ok(())
        });

        tasks
    }

    /// Poll `running` until it becomes `false`.
    async fn wait_for_stop(running: &Arc<AtomicBool>) {
        loop {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}

/// Drive a start or retry to completion. If `token` fires first the session
/// is stopped alongside it, which cancels whatever the attempt waits on.
async fn attempt<F>(
    session: &MirroringSession,
    token: CancellationToken,
    run: F,
) -> Result<(), MirrorError>
where
    F: Future<Output = Result<(), MirrorError>>,
{
    tokio::pin!(run);
    tokio::select! {
        outcome = &mut run => outcome,
        _ = token.cancelled() => {
            let (outcome, ()) = tokio::join!(&mut run, session.stop());
            outcome
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
