//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::session::gateway::DEFAULT_RECONNECT_GRACE;
use crate::terrain::TerrainSettings;
use crate::util::rate_limit::DEFAULT_INPUT_RATE_LIMIT;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS, comma-separated; `*` allows any
    pub client_origin: String,
    /// Heightmap grid side length
    pub heightmap_size: usize,
    /// Terrain side length in world units
    pub terrain_world_size: f64,
    /// Max inbound frames per second per connection
    pub input_rate_limit: u32,
    /// How long a player dropped mid-match can reclaim their record
    pub reconnect_grace: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port.trim()),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let heightmap_size: usize = parse_or(&lookup, "HEIGHTMAP_SIZE", 512)?;
        if heightmap_size < 2 {
            return Err(ConfigError::Invalid("HEIGHTMAP_SIZE"));
        }

        let terrain_world_size: f64 = parse_or(&lookup, "TERRAIN_WORLD_SIZE", 2000.0)?;
        if !(terrain_world_size.is_finite() && terrain_world_size > 0.0) {
            return Err(ConfigError::Invalid("TERRAIN_WORLD_SIZE"));
        }

        let input_rate_limit: u32 = parse_or(&lookup, "INPUT_RATE_LIMIT", DEFAULT_INPUT_RATE_LIMIT)?;
        if input_rate_limit == 0 {
            return Err(ConfigError::Invalid("INPUT_RATE_LIMIT"));
        }

        let reconnect_grace_secs: u64 =
            parse_or(&lookup, "RECONNECT_GRACE_SECS", DEFAULT_RECONNECT_GRACE.as_secs())?;

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            client_origin: lookup("CLIENT_ORIGIN").unwrap_or_else(|| "*".to_string()),
            heightmap_size,
            terrain_world_size,
            input_rate_limit,
            reconnect_grace: Duration::from_secs(reconnect_grace_secs),
        })
    }

    /// Terrain parameters for newly created lobbies
    pub fn terrain_settings(&self) -> TerrainSettings {
        TerrainSettings {
            size: self.heightmap_size,
            world_size: self.terrain_world_size,
            ..Default::default()
        }
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
