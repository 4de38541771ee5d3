use clap::Parser;
use htr_common::types;
use std::collections::HashSet;
use std::net::SocketAddr;

/// CLI arguments for the relay server.
#[derive(Parser, Debug, Clone)]
#[command(name = "htrs")]
#[command(about = "HTR tunnel relay server")]
#[command(version)]
pub struct Args {
    /// Socket address to listen on. A reverse proxy in front terminates TLS
    /// and routes `*.<base-domain>` here.
    #[arg(long, default_value = "127.0.0.1:8080", env = "HTRS_LISTEN")]
    pub listen: SocketAddr,
    /// Comma-separated shared secrets accepted at the upgrade handshake.
    #[arg(long, env = "HTRS_SECRETS", value_delimiter = ',')]
    pub secrets: Vec<String>,
    /// Wildcard-resolved base domain under which tunnels are served.
    #[arg(long, default_value = "", env = "HTRS_BASE_DOMAIN")]
    pub base_domain: String,
    /// Maximum concurrently attached tunnels.
    #[arg(long, default_value = "10", env = "HTRS_MAX_TUNNELS")]
    pub max_tunnels: usize,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Socket address to listen on.
    pub listen: SocketAddr,
    /// Accepted shared secrets.
    pub secrets: HashSet<String>,
    /// Base domain under which tunnels are served.
    pub base_domain: String,
    /// Maximum concurrently attached tunnels.
    pub max_tunnels: usize,
    /// Seconds between heartbeat pings on each control channel.
    pub heartbeat_interval: u64,
    /// Seconds a proxied request may wait for its tunnel-response.
    pub request_timeout: u64,
}

impl RelayConfig {
    /// Validates the configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        if self.secrets.is_empty() || self.secrets.iter().any(String::is_empty) {
            return Err("secrets must contain at least one non-empty secret".to_string());
        }

        if self.base_domain.is_empty() {
            return Err("base_domain must not be empty".to_string());
        }
        if self
            .base_domain
            .chars()
            .any(|c| c == '/' || c == ':' || c.is_whitespace())
        {
            return Err("base_domain must be a bare DNS name".to_string());
        }

        if self.max_tunnels == 0 {
            return Err("max_tunnels must be greater than 0".to_string());
        }
        if self.max_tunnels > 10_000 {
            return Err("max_tunnels exceeds reasonable limit (10,000)".to_string());
        }

        if self.heartbeat_interval == 0 {
            return Err("heartbeat_interval must be greater than 0".to_string());
        }
        if self.request_timeout == 0 {
            return Err("request_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl From<Args> for RelayConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            secrets: args.secrets.into_iter().collect(),
            base_domain: args.base_domain.to_ascii_lowercase(),
            max_tunnels: args.max_tunnels,
            heartbeat_interval: types::HEARTBEAT_INTERVAL_SECS,
            request_timeout: types::REQUEST_TIMEOUT_SECS,
        }
    }
}
