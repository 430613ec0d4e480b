use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
pub mod clock;
pub mod codec;
pub mod commands;
pub mod config;
mod database;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod ipc;
pub mod models;
pub mod progress;
pub mod scheduler;
pub mod service;
pub mod session;
pub mod summary;
use crate::clock::SystemClock;
use crate::commands::{envelope, execute, parse_command, HostCommand};
use crate::config::AppConfig;
use crate::engine::EngineDeps;
use crate::gateway::MemoryStore;
use crate::session::{AuthProvider, AuthState};
pub use database::Database;
pub use engine::TimerEngine;
pub use error::{EngineError, StoreError};


/// Открыть БД. При повреждении файла - переименовать его в бэкап и создать заново.
/// Returns the store and whether a recovery happened.
pub fn open_database(db_path: &Path) -> Result<(Arc<Database>, bool), StoreError> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            StoreError::Unavailable(format!(
                "Failed to create data directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }
    let path_str = db_path.to_str().ok_or_else(|| {
        StoreError::Unavailable(format!(
            "Database path contains invalid UTF-8: {}",
            db_path.display()
        ))
    })?;

    match Database::new(path_str) {
        Ok(db) => Ok((Arc::new(db), false)),
        Err(e) => {
            let err_str = e.to_string();
            let is_corruption = err_str.contains("corrupt")
                || err_str.contains("integrity")
                || err_str.contains("not a database");
            if !is_corruption || !db_path.exists() {
                return Err(e);
            }
            let backup_path = db_path.with_extension(format!(
                "db.corrupted.{}",
                chrono::Utc::now().timestamp()
            ));
            std::fs::rename(db_path, &backup_path).map_err(|rename_e| {
                warn!("[DB] Failed to rename corrupted DB to {:?}: {}", backup_path, rename_e);
                StoreError::Unavailable(format!("Database corrupted and could not backup: {}", e))
            })?;
            info!("[DB] Corrupted DB backed up to {:?}, starting fresh", backup_path);
            Ok((Arc::new(Database::new(path_str)?), true))
        }
    }
}

/// Host entry point: stdin commands in, JSON lines out.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    // По умолчанию info (если RUST_LOG не задан). Логи в stderr, stdout занят JSON.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_env();
    info!("[HOST] Starting with store {}", config.db_path.display());

    let clock = Arc::new(SystemClock);
    let deps = match open_database(&config.db_path) {
        Ok((db, recovered)) => {
            if recovered {
                println!("{}", envelope(ipc::events::DB_RECOVERED, serde_json::Value::Null));
            }
            EngineDeps::new(db.clone(), db, clock)
        }
        Err(e) => {
            // Graceful degradation: работаем в памяти, данные не переживут перезапуск
            error!("[DB] Failed to open database: {}. Running with in-memory store", e);
            let memory = Arc::new(MemoryStore::new());
            EngineDeps::new(memory.clone(), memory, clock)
        }
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(host_loop(deps, config))
}

async fn host_loop(
    deps: EngineDeps,
    config: AppConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let auth = AuthState::new(config.initial_user.clone());
    let (handle, join) = service::spawn(deps, config.engine.clone(), &auth);
    if let Some(user) = auth.current_user() {
        info!("[SESSION] Auto sign-in as {}", user);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                info!("[HOST] Interrupted");
                None
            }
        };
        let Some(line) = line else {
            break;
        };
        let command = match parse_command(&line) {
            Ok(Some(HostCommand::Quit)) => break,
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                println!("{}", envelope(ipc::events::ERROR, serde_json::json!(e)));
                continue;
            }
        };
        match execute(command, &handle, &auth).await {
            Ok((event, payload)) => println!("{}", envelope(event, payload)),
            Err(e) => println!("{}", envelope(ipc::events::ERROR, serde_json::json!(e))),
        }
    }

    // Выход = уход в фон: запущенный таймер досчитается при следующем запуске
    if let Err(e) = handle.shutdown().await {
        warn!("[HOST] Engine already stopped: {}", e);
    }
    if let Err(e) = join.await {
        error!("[HOST] Engine task failed: {}", e);
    }
    info!("[HOST] Bye");
    Ok(())
}
