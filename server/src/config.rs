//! Server configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum inbound frame size in bytes
    pub max_message_size: usize,
    /// WebSocket ping interval in seconds
    pub ws_ping_interval: u64,
    /// Depth of each connection's outbound queue
    pub outbound_buffer: usize,
    /// How long a send may wait for space in a recipient's queue
    pub send_timeout_ms: u64,
    /// Maximum total WebSocket connections (0 = unlimited)
    pub max_connections: usize,
    /// Maximum WebSocket connections per IP address (0 = unlimited)
    pub max_connections_per_ip: usize,
    /// Comma-separated list of allowed CORS origins (empty = permissive)
    pub cors_origins: Option<String>,
    /// Bearer token for /admin/* endpoints (None = endpoints hidden)
    pub admin_token: Option<String>,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = ServerConfig {
            host: lookup("DHC_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_var(&lookup, "DHC_PORT", "8080")?,
            max_message_size: parse_var(&lookup, "DHC_MAX_MESSAGE_SIZE", "65536")?,
            ws_ping_interval: parse_var(&lookup, "DHC_WS_PING_INTERVAL", "30")?,
            outbound_buffer: parse_var(&lookup, "DHC_OUTBOUND_BUFFER", "64")?,
            send_timeout_ms: parse_var(&lookup, "DHC_SEND_TIMEOUT_MS", "2000")?,
            max_connections: parse_var(&lookup, "DHC_MAX_CONNECTIONS", "2000")?,
            max_connections_per_ip: parse_var(&lookup, "DHC_MAX_CONNECTIONS_PER_IP", "10")?,
            cors_origins: lookup("DHC_CORS_ORIGINS"),
            admin_token: lookup("DHC_ADMIN_TOKEN"),
        };

        // mpsc::channel panics on a zero capacity
        if config.outbound_buffer == 0 {
            anyhow::bail!("DHC_OUTBOUND_BUFFER must be at least 1");
        }

        Ok(config)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None).expect("defaults are valid")
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .unwrap_or_else(|| default.to_string())
        .parse()
        .with_context(|| format!("Invalid {}", key))
}
