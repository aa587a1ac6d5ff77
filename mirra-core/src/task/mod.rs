//! Supervised background tasks.
//!
//! A [`Supervisor`] owns a set of named tasks that share one cancellation
//! token. A task that fails or panics is reported as a [`TaskEvent`] and
//! its siblings keep running; `shutdown()` cancels and joins all of them.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{MirrorError, TaskError};

pub type TaskEventSender = mpsc::Sender<TaskEvent>;

/// How a supervised task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Finished(String),
    Cancelled(String),
    Failed(String, String),
    Panicked(String, String),
}

impl TaskEvent {
    pub fn name(&self) -> &str {
        match self {
            Self::Finished(name)
            | Self::Cancelled(name)
            | Self::Failed(name, _)
            | Self::Panicked(name, _) => name,
        }
    }

    /// The failure as a [`TaskError`], `None` for clean exits.
    pub fn error(&self) -> Option<TaskError> {
        match self {
            Self::Finished(_) => None,
            Self::Cancelled(_) => Some(TaskError::Cancelled),
            Self::Failed(_, e) => Some(TaskError::Failed(e.clone())),
            Self::Panicked(_, e) => Some(TaskError::Panicked(e.clone())),
        }
    }
}

struct SupervisedTask {
    name: String,
    handle: JoinHandle<()>,
}

/// Owner of a group of cancellable background tasks.
pub struct Supervisor {
    token: CancellationToken,
    tasks: Vec<SupervisedTask>,
    events_tx: TaskEventSender,
    events_rx: Option<mpsc::Receiver<TaskEvent>>,
}

impl Supervisor {
    /// Tasks are cancelled when `token` (or [`Self::shutdown`]) fires.
    pub fn new(token: CancellationToken) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        Self {
            token,
            tasks: Vec::new(),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Spawn `f` as a named task. `f` receives a child token it should
    /// watch to exit promptly on shutdown.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), MirrorError>> + Send + 'static,
    {
        let name = name.into();
        let token = self.token.child_token();
        let events = self.events_tx.clone();
        let fut = f(token.clone());
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let event = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) if token.is_cancelled() => TaskEvent::Cancelled(task_name),
                Ok(Ok(())) => TaskEvent::Finished(task_name),
                Ok(Err(MirrorError::Cancelled)) => TaskEvent::Cancelled(task_name),
                Ok(Err(e)) => {
                    warn!(task = %task_name, "supervised task failed: {e}");
                    TaskEvent::Failed(task_name, e.to_string())
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(task = %task_name, "supervised task panicked: {message}");
                    TaskEvent::Panicked(task_name, message)
                }
            };
            debug!(task = event.name(), ?event, "supervised task ended");
            // Nobody listening is fine.
            let _ = events.try_send(event);
        });

        self.tasks.push(SupervisedTask { name, handle });
    }

    /// Take the event receiver. Returns `None` after the first call.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TaskEvent>> {
        self.events_rx.take()
    }

    pub fn clone_tx(&self) -> TaskEventSender {
        self.events_tx.clone()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Names of tasks that have not finished yet.
    pub fn running(&self) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| !t.handle.is_finished())
            .map(|t| t.name.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Cancel every task and wait for all of them to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        let names: Vec<String> = self.tasks.iter().map(|t| t.name.clone()).collect();
        let results = join_all(self.tasks.into_iter().map(|t| t.handle)).await;
        for (name, result) in names.iter().zip(results) {
            if let Err(e) = result {
                warn!(task = %name, "supervised task did not join cleanly: {e}");
            }
        }
        debug!(tasks = names.len(), "supervisor shut down");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ── Tests ────────────────────────────────────────────────────────
