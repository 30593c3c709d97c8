use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

const DEFAULT_WS_PORT: u16 = 4500;
const DEFAULT_REST_PORT: u16 = 4501;
const DEFAULT_MAX_MEMBERS: i64 = 10;
const DEFAULT_INVITE_EXPIRY_DAYS: i64 = 7;
/// Hard cap on a single file upload (50 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_data_dir() -> PathBuf {
    dirs_home()
        .map(|h| h.join(".collabd"))
        .unwrap_or_else(|| PathBuf::from(".collabd"))
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Optional overrides read from `{data_dir}/config.toml`.
#[derive(Debug, Default, Deserialize)]
struct TomlConfig {
    port: Option<u16>,
    rest_port: Option<u16>,
    log: Option<String>,
    bind_address: Option<String>,
    default_max_members: Option<i64>,
    invite_expiry_days: Option<i64>,
    max_upload_bytes: Option<u64>,
    slow_query_ms: Option<u64>,
}

fn load_toml(data_dir: &Path) -> Option<TomlConfig> {
    let path = data_dir.join("config.toml");
    let text = std::fs::read_to_string(&path).ok()?;
    match toml::from_str(&text) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            warn!(path = %path.display(), err = %e, "invalid config.toml — ignoring");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Realtime WebSocket port.
    pub port: u16,
    /// REST API port.
    pub rest_port: u16,
    /// Data directory for the SQLite database and uploaded files.
    pub data_dir: PathBuf,
    pub log: String,
    /// Bind address for both servers (default: 127.0.0.1).
    pub bind_address: String,
    /// Default `max_members` for new workspaces when the caller omits it.
    pub default_max_members: i64,
    /// Wall-clock invite lifetime; expiry is checked lazily at accept time.
    pub invite_expiry_days: i64,
    pub max_upload_bytes: u64,
    /// Queries slower than this are logged at WARN. 0 disables.
    pub slow_query_ms: u64,
}

impl ServerConfig {
    /// Build config from CLI/env args + optional TOML file.
    ///
    /// Priority (highest to lowest):
    ///   1. CLI / env — passed as `Some(value)` from clap
    ///   2. TOML file at `{data_dir}/config.toml`
    ///   3. Built-in defaults
    pub fn new(
        port: Option<u16>,
        rest_port: Option<u16>,
        data_dir: Option<PathBuf>,
        log: Option<String>,
    ) -> Self {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        let toml = load_toml(&data_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_WS_PORT);
        let rest_port = rest_port.or(toml.rest_port).unwrap_or(DEFAULT_REST_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());
        let bind_address = std::env::var("COLLABD_BIND")
            .ok()
            .filter(|s| !s.is_empty())
            .or(toml.bind_address)
            .unwrap_or_else(default_bind_address);

        Self {
            port,
            rest_port,
            data_dir,
            log,
            bind_address,
            default_max_members: toml.default_max_members.unwrap_or(DEFAULT_MAX_MEMBERS),
            invite_expiry_days: toml.invite_expiry_days.unwrap_or(DEFAULT_INVITE_EXPIRY_DAYS),
            max_upload_bytes: toml.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            slow_query_ms: toml.slow_query_ms.unwrap_or(0),
        }
    }

    /// Root directory for uploaded file blobs.
    pub fn upload_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    /// Per-workspace upload directory.
    pub fn workspace_upload_dir(&self, workspace_id: i64) -> PathBuf {
        self.upload_dir().join(format!("workspace_{workspace_id}"))
    }
}
