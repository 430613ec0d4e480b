//! Session Context: one `TimerEngine` per signed-in user.
//!
//! The engine is created on sign-in and torn down on sign-out or user switch,
//! so no task data of one user can leak into another user's session.

use crate::config::EngineConfig;
use crate::engine::{EngineDeps, TimerEngine};
use crate::error::EngineError;
use crate::models::{EngineSnapshot, UserId};
use tokio::sync::watch;
use tracing::info;

/// Source of the current user identity
pub trait AuthProvider: Send + Sync {
    fn current_user(&self) -> Option<UserId>;
    /// Receiver that observes every sign-in / sign-out
    fn subscribe(&self) -> watch::Receiver<Option<UserId>>;
}

/// Простейший провайдер: пользователь задаётся явно (CLI / тесты)
#[derive(Debug)]
pub struct AuthState {
    tx: watch::Sender<Option<UserId>>,
}

impl AuthState {
    pub fn new(initial: Option<UserId>) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn sign_in(&self, user_id: impl Into<UserId>) {
        let user_id = user_id.into();
        info!("[SESSION] Sign-in: {}", user_id);
        self.tx.send_replace(Some(user_id));
    }

    pub fn sign_out(&self) {
        info!("[SESSION] Sign-out");
        self.tx.send_replace(None);
    }
}

impl AuthProvider for AuthState {
    fn current_user(&self) -> Option<UserId> {
        self.tx.borrow().clone()
    }

    fn subscribe(&self) -> watch::Receiver<Option<UserId>> {
        self.tx.subscribe()
    }
}

pub struct Session {
    deps: EngineDeps,
    config: EngineConfig,
    engine: Option<TimerEngine>,
}

impl Session {
    pub fn new(deps: EngineDeps, config: EngineConfig) -> Self {
        Self {
            deps,
            config,
            engine: None,
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.engine.as_ref().map(|e| e.user_id())
    }

    /// Переключение пользователя. Тот же пользователь - no-op.
    pub fn switch_user(&mut self, user_id: Option<UserId>) {
        if self.user_id() == user_id.as_deref() {
            return;
        }
        if let Some(mut previous) = self.engine.take() {
            info!("[SESSION] Tearing down engine of {}", previous.user_id());
            previous.close();
        }
        if let Some(user_id) = user_id {
            info!("[SESSION] Loading engine for {}", user_id);
            self.engine = Some(TimerEngine::load(
                user_id,
                self.deps.clone(),
                self.config.clone(),
            ));
        }
    }

    pub fn engine(&self) -> Option<&TimerEngine> {
        self.engine.as_ref()
    }

    pub fn engine_mut(&mut self) -> Result<&mut TimerEngine, EngineError> {
        self.engine.as_mut().ok_or(EngineError::NoActiveUser)
    }

    pub fn next_deadline_ms(&self) -> Option<i64> {
        self.engine.as_ref().and_then(TimerEngine::next_deadline_ms)
    }

    pub fn run_due(&mut self) -> usize {
        self.engine.as_mut().map_or(0, TimerEngine::run_due)
    }

    pub fn snapshot(&self) -> Option<EngineSnapshot> {
        self.engine.as_ref().map(TimerEngine::snapshot)
    }

    /// App exit: the engine records a suspension if a timer is running
    pub fn shutdown(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            engine.shutdown();
        }
    }
}
