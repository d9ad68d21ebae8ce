//! Application state shared across routes

use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::game::{SessionHandle, SessionStats};
use crate::ws::ClientHub;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub session: SessionHandle,
    pub hub: Arc<ClientHub>,
    pub telemetry: Arc<SessionStats>,
    started_at: Instant,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        session: SessionHandle,
        hub: Arc<ClientHub>,
        telemetry: Arc<SessionStats>,
    ) -> Self {
        Self {
            config,
            session,
            hub,
            telemetry,
            started_at: Instant::now(),
        }
    }

    /// Seconds since the server started
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
