//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::lobby::LobbyRegistry;
use crate::session::{GatewayHandle, SessionGateway};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub gateway: GatewayHandle,
}

impl AppState {
    /// Build state plus the gateway task the caller must spawn
    pub fn new(config: Config) -> (Self, SessionGateway) {
        let config = Arc::new(config);
        let registry = LobbyRegistry::new(config.terrain_settings());
        let (gateway, handle) = SessionGateway::new(registry, config.reconnect_grace);

        let state = Self {
            config,
            gateway: handle,
        };

        (state, gateway)
    }
}
