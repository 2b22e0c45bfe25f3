use std::path::PathBuf;

use clap::Parser;

/// Terminal server configuration. Every field has a CLI flag and an
/// environment-variable fallback, the pattern used throughout this
/// repository's reverse-proxy ancestry.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct Config {
    /// Address to bind the HTTP/WebSocket listener on.
    #[arg(long, env = "TERMHUB_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to bind the HTTP/WebSocket listener on.
    #[arg(long, env = "TERMHUB_PORT", default_value_t = 7070)]
    pub port: u16,

    /// Optional Unix socket path; when set, the server also (or instead,
    /// depending on deployment) listens there.
    #[arg(long, env = "TERMHUB_UNIX_SOCKET")]
    pub unix_socket: Option<PathBuf>,

    /// Directory for persisted state: session secret, notifications,
    /// transcripts, users/groups/templates.
    #[arg(long, env = "TERMHUB_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Disable authentication entirely; every request acts as `default_username`.
    #[arg(long, env = "TERMHUB_AUTH_DISABLED", default_value_t = false)]
    pub auth_disabled: bool,

    /// Identity used for every request when auth is disabled.
    #[arg(long, env = "TERMHUB_DEFAULT_USERNAME", default_value = "default")]
    pub default_username: String,

    /// Session cookie lifetime, in seconds.
    #[arg(long, env = "TERMHUB_COOKIE_TTL_SECS", default_value_t = 24 * 3600)]
    pub cookie_ttl_secs: u64,

    /// Notification retention cap, in days.
    #[arg(long, env = "TERMHUB_NOTIFICATION_RETENTION_DAYS", default_value_t = 30)]
    pub notification_retention_days: u64,

    /// Notification retention cap, in item count per user.
    #[arg(long, env = "TERMHUB_NOTIFICATION_RETENTION_COUNT", default_value_t = 500)]
    pub notification_retention_count: usize,

    /// Notification persist-debounce window, in milliseconds.
    #[arg(long, env = "TERMHUB_NOTIFICATION_DEBOUNCE_MS", default_value_t = 400)]
    pub notification_debounce_ms: u64,

    /// Service proxy: requests allowed per session per window.
    #[arg(long, env = "TERMHUB_PROXY_RATE_LIMIT", default_value_t = 120)]
    pub proxy_rate_limit_per_minute: u32,

    /// Service proxy: time to first byte before a request is aborted, in seconds.
    #[arg(long, env = "TERMHUB_PROXY_FIRST_BYTE_TIMEOUT_SECS", default_value_t = 15)]
    pub proxy_first_byte_timeout_secs: u64,

    /// Size of the in-memory per-session output ring, in bytes.
    #[arg(long, env = "TERMHUB_HISTORY_RING_BYTES", default_value_t = 1 << 20)]
    pub history_ring_bytes: usize,

    /// Bounded time the runtime waits for PTY output to drain on termination, in milliseconds.
    #[arg(long, env = "TERMHUB_DRAIN_TIMEOUT_MS", default_value_t = 250)]
    pub drain_timeout_ms: u64,
}

impl Config {
    pub fn users_path(&self) -> PathBuf {
        self.data_dir.join("users.json")
    }

    pub fn groups_path(&self) -> PathBuf {
        self.data_dir.join("groups.json")
    }

    pub fn templates_path(&self) -> PathBuf {
        self.data_dir.join("templates.json")
    }

    pub fn secret_path(&self) -> PathBuf {
        self.data_dir.join("session-secret.key")
    }

    pub fn notifications_path(&self) -> PathBuf {
        self.data_dir.join("notifications.json")
    }

    pub fn transcripts_dir(&self) -> PathBuf {
        self.data_dir.join("transcripts")
    }
}
