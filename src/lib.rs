pub mod activity;
pub mod chat;
pub mod config;
pub mod error;
pub mod files;
pub mod identity;
pub mod progress;
pub mod realtime;
pub mod rest;
pub mod storage;
pub mod workspace;

use std::sync::Arc;

use activity::ActivityLog;
use config::ServerConfig;
use realtime::rooms::RoomRegistry;
use storage::Storage;

/// Shared application state passed to every REST handler and realtime
/// connection. Constructed once at startup — no process-wide mutable state.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub storage: Arc<Storage>,
    /// Workspace-id → connection map for realtime fan-out.
    pub rooms: Arc<RoomRegistry>,
    /// Append-only activity recorder; every write also fans out `new_activity`.
    pub activity: Arc<ActivityLog>,
    pub started_at: std::time::Instant,
}

impl AppContext {
    pub fn new(config: Arc<ServerConfig>, storage: Arc<Storage>) -> Self {
        let rooms = Arc::new(RoomRegistry::new());
        let activity = Arc::new(ActivityLog::new(storage.clone(), rooms.clone()));
        Self {
            config,
            storage,
            rooms,
            activity,
            started_at: std::time::Instant::now(),
        }
    }
}
