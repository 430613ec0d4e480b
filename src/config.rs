use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

/// Настройки движка таймеров
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Tick period (1 second in production)
    pub tick_period_ms: u64,
    /// Write elapsed_seconds to the store every N ticks (1 = every tick)
    pub persist_every_ticks: u32,
    /// Periodic progress upsert interval
    pub progress_flush_secs: u64,
    /// Upper bound for background time credited on foreground
    pub max_background_credit_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: 1000,
            persist_every_ticks: 1,
            progress_flush_secs: 5 * 60,
            max_background_credit_secs: 24 * 60 * 60,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            tick_period_ms: env_or("UPTIME_TICK_MS", defaults.tick_period_ms).max(1),
            persist_every_ticks: env_or("UPTIME_PERSIST_EVERY_TICKS", defaults.persist_every_ticks)
                .max(1),
            progress_flush_secs: env_or("UPTIME_PROGRESS_FLUSH_SECS", defaults.progress_flush_secs)
                .max(1),
            max_background_credit_secs: env_or(
                "UPTIME_MAX_BACKGROUND_CREDIT_SECS",
                defaults.max_background_credit_secs,
            ),
        }
    }
}

/// Host-level configuration (store location, optional auto-login)
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub initial_user: Option<String>,
    pub engine: EngineConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("uptime.db"),
            initial_user: None,
            engine: EngineConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let db_path = std::env::var("UPTIME_DB_PATH")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| AppConfig::default().db_path);
        let initial_user = std::env::var("UPTIME_USER")
            .ok()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty());
        Self {
            db_path,
            initial_user,
            engine: EngineConfig::from_env(),
        }
    }
}

fn env_or<T: FromStr + Copy + std::fmt::Display>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("[CONFIG] Invalid value for {}: '{}', using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
