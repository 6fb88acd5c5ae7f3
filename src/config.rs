//! Server configuration with serde support and code defaults.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Process-wide options recognized by the matchmaker and room runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    /// Address advertised in room listings so clients can reconnect to the
    /// owning process directly.
    pub public_address: Option<String>,
    /// Enables presence snapshot/restore across restarts.
    pub dev_mode: bool,
    /// If false, the process exits without draining rooms.
    pub gracefully_shutdown: bool,
    /// Excludes unresponsive processes from matchmaking after an IPC timeout.
    pub health_checks: bool,
    /// Seconds a reserved seat is held before being reaped.
    pub seat_reservation_seconds: u64,
    /// Delta-state broadcast cadence in milliseconds.
    pub patch_rate_ms: u64,
    /// Default simulation tick cadence in milliseconds.
    pub simulation_interval_ms: u64,
    /// Upper bound a create-path follower waits on the rendezvous list.
    pub max_concurrent_create_wait_secs: u64,
    /// Close code sent to clients during graceful shutdown.
    pub shutdown_close_code: u16,
    pub logging: LoggingConfig,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            public_address: None,
            dev_mode: false,
            gracefully_shutdown: true,
            health_checks: true,
            seat_reservation_seconds: 15,
            patch_rate_ms: 50,
            simulation_interval_ms: 16,
            max_concurrent_create_wait_secs: 5,
            shutdown_close_code: crate::protocol::WS_CLOSE_CONSENTED,
            logging: LoggingConfig::default(),
        }
    }
}

impl ServerOptions {
    pub fn seat_reservation_time(&self) -> Duration {
        Duration::from_secs(self.seat_reservation_seconds)
    }

    pub fn patch_rate(&self) -> Duration {
        Duration::from_millis(self.patch_rate_ms.max(1))
    }

    pub fn simulation_interval(&self) -> Duration {
        Duration::from_millis(self.simulation_interval_ms.max(1))
    }

    pub fn max_concurrent_create_wait(&self) -> Duration {
        Duration::from_secs(self.max_concurrent_create_wait_secs.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level directive; falls back to `RUST_LOG`, then "info".
    pub level: Option<String>,
    pub format: LogFormat,
    pub enable_file_logging: bool,
    pub dir: String,
    pub filename: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: LogFormat::Text,
            enable_file_logging: false,
            dir: "logs".to_string(),
            filename: "server.log".to_string(),
        }
    }
}
