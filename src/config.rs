//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

/// Client-side sync configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the backend, including the `/api` prefix.
    pub api_base_url: String,
    /// Path of the local libSQL database file.
    pub db_path: PathBuf,
    /// Bound on every remote mutation and on the bulk sync call.
    pub request_timeout: Duration,
    /// Bound on each round-trip to the background store worker.
    pub store_timeout: Duration,
    /// Interval between liveness probes.
    pub health_interval: Duration,
    /// Bound on a single liveness probe.
    pub health_timeout: Duration,
    /// How long a successful sync status is shown before returning to idle.
    pub success_reset: Duration,
    /// How long a failed sync status is shown before returning to idle.
    pub error_reset: Duration,
    /// Drain the pending queue automatically when connectivity comes back.
    pub auto_sync_on_reconnect: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3001/api".to_string(),
            db_path: PathBuf::from("./data/todo-sync.db"),
            request_timeout: Duration::from_secs(5),
            store_timeout: Duration::from_secs(5),
            health_interval: Duration::from_secs(30),
            health_timeout: Duration::from_secs(3),
            success_reset: Duration::from_secs(3),
            error_reset: Duration::from_secs(5),
            auto_sync_on_reconnect: true,
        }
    }
}

impl SyncConfig {
    /// Build from `TODO_SYNC_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let api_base_url = std::env::var("TODO_SYNC_API_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_base_url);

        let db_path = std::env::var("TODO_SYNC_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.db_path);

        let auto_sync_on_reconnect = std::env::var("TODO_SYNC_AUTO_SYNC")
            .ok()
            .map(|s| !matches!(s.trim(), "0" | "false" | "no" | "off"))
            .unwrap_or(defaults.auto_sync_on_reconnect);

        Self {
            api_base_url,
            db_path,
            request_timeout: env_millis("TODO_SYNC_REQUEST_TIMEOUT_MS")
                .unwrap_or(defaults.request_timeout),
            store_timeout: env_millis("TODO_SYNC_STORE_TIMEOUT_MS")
                .unwrap_or(defaults.store_timeout),
            health_interval: std::env::var("TODO_SYNC_HEALTH_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs: &u64| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.health_interval),
            health_timeout: env_millis("TODO_SYNC_HEALTH_TIMEOUT_MS")
                .unwrap_or(defaults.health_timeout),
            success_reset: defaults.success_reset,
            error_reset: defaults.error_reset,
            auto_sync_on_reconnect,
        }
    }
}

/// Backend server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3001 }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let port: u16 = std::env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3001);
        Self { port }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_bounds() {
        let config = SyncConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.store_timeout, Duration::from_secs(5));
        assert_eq!(config.health_interval, Duration::from_secs(30));
        assert_eq!(config.health_timeout, Duration::from_secs(3));
        assert!(config.auto_sync_on_reconnect);
    }

    #[test]
    fn invalid_millis_fall_back() {
        // SAFETY: No other test reads this variable.
        unsafe { std::env::set_var("TODO_SYNC_TEST_BOGUS_MS", "soon") };
        assert!(env_millis("TODO_SYNC_TEST_BOGUS_MS").is_none());
        unsafe { std::env::set_var("TODO_SYNC_TEST_BOGUS_MS", "0") };
        assert!(env_millis("TODO_SYNC_TEST_BOGUS_MS").is_none());
        unsafe { std::env::set_var("TODO_SYNC_TEST_BOGUS_MS", "250") };
        assert_eq!(
            env_millis("TODO_SYNC_TEST_BOGUS_MS"),
            Some(Duration::from_millis(250))
        );
        unsafe { std::env::remove_var("TODO_SYNC_TEST_BOGUS_MS") };
    }

    #[test]
    fn server_default_port() {
        assert_eq!(ServerConfig::default().port, 3001);
    }
}
