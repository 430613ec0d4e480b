//! Async driver around the single-threaded engine.
//!
//! One tokio task owns the `Session`. Commands, auth changes and scheduler
//! deadlines are handled one at a time inside a `select!` loop, and every
//! handled event publishes a fresh snapshot on a watch channel.

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::engine::EngineDeps;
use crate::error::EngineError;
use crate::models::{DayReport, EngineSnapshot, Task, TaskDraft, TaskId, UserId, Visibility};
use crate::session::{AuthProvider, Session};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Reply<T> = oneshot::Sender<Result<T, EngineError>>;

#[derive(Debug)]
pub enum Command {
    Start { task_id: TaskId, reply: Reply<()> },
    Stop { reply: Reply<()> },
    CompleteDay { reply: Reply<DayReport> },
    SaveTask { draft: TaskDraft, reply: Reply<Task> },
    DeleteTask { task_id: TaskId, reply: Reply<()> },
    SetVisibility { visibility: Visibility, reply: Reply<()> },
    Shutdown { reply: Reply<()> },
}

/// Cloneable front door to the engine task
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<Command>,
    snapshots: watch::Receiver<Option<EngineSnapshot>>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)?
    }

    pub async fn start(&self, task_id: TaskId) -> Result<(), EngineError> {
        self.request(|reply| Command::Start { task_id, reply }).await
    }

    pub async fn stop(&self) -> Result<(), EngineError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub async fn complete_day(&self) -> Result<DayReport, EngineError> {
        self.request(|reply| Command::CompleteDay { reply }).await
    }

    pub async fn save_task(&self, draft: TaskDraft) -> Result<Task, EngineError> {
        self.request(|reply| Command::SaveTask { draft, reply }).await
    }

    pub async fn delete_task(&self, task_id: TaskId) -> Result<(), EngineError> {
        self.request(|reply| Command::DeleteTask { task_id, reply }).await
    }

    pub async fn set_visibility(&self, visibility: Visibility) -> Result<(), EngineError> {
        self.request(|reply| Command::SetVisibility { visibility, reply }).await
    }

    /// Suspend-style exit: a running timer is recorded as suspended
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    /// Latest published snapshot (None while signed out)
    pub fn snapshot(&self) -> Option<EngineSnapshot> {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<EngineSnapshot>> {
        self.snapshots.clone()
    }
}

/// Spawn the engine task on the current tokio runtime.
pub fn spawn(
    deps: EngineDeps,
    config: EngineConfig,
    auth: &dyn AuthProvider,
) -> (EngineHandle, JoinHandle<()>) {
    let clock = Arc::clone(&deps.clock);
    let mut session = Session::new(deps, config);
    let mut auth_rx = auth.subscribe();
    let initial: Option<UserId> = auth_rx.borrow_and_update().clone();
    session.switch_user(initial);

    let (tx, rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());
    let join = tokio::spawn(drive(session, rx, auth_rx, snapshot_tx, clock));
    (
        EngineHandle {
            tx,
            snapshots: snapshot_rx,
        },
        join,
    )
}

async fn drive(
    mut session: Session,
    mut rx: mpsc::UnboundedReceiver<Command>,
    mut auth_rx: watch::Receiver<Option<UserId>>,
    snapshot_tx: watch::Sender<Option<EngineSnapshot>>,
    clock: Arc<dyn Clock>,
) {
    let mut auth_open = true;
    info!("[SERVICE] Engine task started");
    loop {
        let deadline = session.next_deadline_ms();
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(cmd) => {
                    if !handle(&mut session, &snapshot_tx, cmd) {
                        break;
                    }
                }
                None => {
                    debug!("[SERVICE] All handles dropped, shutting down");
                    session.shutdown();
                    break;
                }
            },
            changed = auth_rx.changed(), if auth_open => {
                if changed.is_err() {
                    warn!("[SERVICE] Auth provider closed, keeping current session");
                    auth_open = false;
                } else {
                    let user = auth_rx.borrow_and_update().clone();
                    session.switch_user(user);
                }
            }
            _ = sleep_until(deadline, clock.as_ref()) => {
                session.run_due();
            }
        }
        snapshot_tx.send_replace(session.snapshot());
    }
    info!("[SERVICE] Engine task stopped");
}

async fn sleep_until(deadline_ms: Option<i64>, clock: &dyn Clock) {
    match deadline_ms {
        Some(deadline) => {
            let wait = deadline.saturating_sub(clock.now_millis()).max(0);
            tokio::time::sleep(Duration::from_millis(wait as u64)).await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Reply only after the snapshot reflecting the command is published
fn respond<T>(
    session: &Session,
    snapshots: &watch::Sender<Option<EngineSnapshot>>,
    reply: Reply<T>,
    result: Result<T, EngineError>,
) {
    snapshots.send_replace(session.snapshot());
    let _ = reply.send(result);
}

/// Apply one command. Returns false once the engine has shut down.
fn handle(
    session: &mut Session,
    snapshots: &watch::Sender<Option<EngineSnapshot>>,
    cmd: Command,
) -> bool {
    match cmd {
        Command::Start { task_id, reply } => {
            let result = session.engine_mut().and_then(|e| e.start(task_id));
            respond(session, snapshots, reply, result);
        }
        Command::Stop { reply } => {
            let result = session.engine_mut().and_then(|e| e.stop());
            respond(session, snapshots, reply, result);
        }
        Command::CompleteDay { reply } => {
            let result = session.engine_mut().map(|e| e.complete_day());
            respond(session, snapshots, reply, result);
        }
        Command::SaveTask { draft, reply } => {
            let result = session.engine_mut().and_then(|e| e.save_task(draft));
            respond(session, snapshots, reply, result);
        }
        Command::DeleteTask { task_id, reply } => {
            let result = session.engine_mut().and_then(|e| e.delete_task(task_id));
            respond(session, snapshots, reply, result);
        }
        Command::SetVisibility { visibility, reply } => {
            let result = session.engine_mut().map(|e| e.set_visibility(visibility));
            respond(session, snapshots, reply, result);
        }
        Command::Shutdown { reply } => {
            session.shutdown();
            respond(session, snapshots, reply, Ok(()));
            return false;
        }
    }
    true
}
