use clap::Parser;
use htr_common::{subdomain, types};

/// CLI arguments for the agent.
#[derive(Parser, Debug, Clone)]
#[command(name = "htrc")]
#[command(about = "HTR tunnel agent")]
#[command(version)]
pub struct Args {
    /// Relay base URL (`http(s)://` or `ws(s)://`).
    #[arg(long, default_value = "", env = "HTRC_RELAY")]
    pub relay: String,
    /// Shared secret presented at the upgrade handshake.
    #[arg(long, default_value = "", env = "HTRC_SECRET")]
    pub secret: String,
    /// Port of the local HTTP origin to expose.
    #[arg(long, default_value = "0", env = "HTRC_LOCAL_PORT")]
    pub local_port: u16,
    /// Host of the local HTTP origin.
    #[arg(long, default_value = "localhost", env = "HTRC_LOCAL_HOST")]
    pub local_host: String,
    /// Preferred subdomain label to request from the relay.
    #[arg(long, env = "HTRC_SUBDOMAIN")]
    pub subdomain: Option<String>,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Relay base URL.
    pub relay: String,
    /// Shared secret.
    pub secret: String,
    /// Local origin host.
    pub local_host: String,
    /// Local origin port.
    pub local_port: u16,
    /// Preferred subdomain label, if any.
    pub subdomain: Option<String>,
}

impl AgentConfig {
    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated constraint.
    pub fn validate(&self) -> Result<(), String> {
        if self.secret.is_empty() {
            return Err("secret must not be empty".to_string());
        }
        if self.local_port == 0 {
            return Err("local_port must be a valid port".to_string());
        }
        if self.local_host.is_empty() {
            return Err("local_host must not be empty".to_string());
        }
        if !["ws://", "wss://", "http://", "https://"]
            .iter()
            .any(|scheme| self.relay.starts_with(scheme))
        {
            return Err(format!(
                "relay URL must start with ws(s):// or http(s)://, got '{}'",
                self.relay
            ));
        }
        if let Some(label) = &self.subdomain {
            if !subdomain::is_valid_label(label) {
                return Err(format!("'{label}' is not a valid subdomain label"));
            }
        }
        Ok(())
    }

    /// WebSocket URL of the relay's control-channel endpoint.
    #[must_use]
    pub fn channel_url(&self) -> String {
        let base = self.relay.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else {
            base.to_owned()
        };
        format!("{base}{}", types::CONTROL_PATH)
    }

    /// Base URL of the local origin every tunnel-request is forwarded to.
    #[must_use]
    pub fn origin_url(&self) -> String {
        format!("http://{}:{}", self.local_host, self.local_port)
    }
}

impl From<Args> for AgentConfig {
    fn from(args: Args) -> Self {
        Self {
            relay: args.relay,
            secret: args.secret,
            local_host: args.local_host,
            local_port: args.local_port,
            subdomain: args.subdomain,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AgentConfig {
        AgentConfig {
            relay: "https://tunnel.test.local".to_string(),
            secret: "sk_test_key_123".to_string(),
            local_host: "localhost".to_string(),
            local_port: 3000,
            subdomain: None,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn empty_secret_is_fatal() {
        let mut c = valid_config();
        c.secret.clear();
        assert!(c.validate().unwrap_err().contains("secret"));
    }

    #[test]
    fn zero_port_is_fatal() {
        let mut c = valid_config();
        c.local_port = 0;
        assert!(c.validate().unwrap_err().contains("local_port"));
    }

    #[test]
    fn unknown_relay_scheme_is_fatal() {
        let mut c = valid_config();
        c.relay = "ftp://tunnel.test.local".to_string();
        assert!(c.validate().unwrap_err().contains("relay URL"));
    }

    #[test]
    fn invalid_preferred_subdomain_is_fatal() {
        let mut c = valid_config();
        c.subdomain = Some("Not Valid".to_string());
        assert!(c.validate().is_err());
    }

    #[test]
    fn channel_url_maps_http_schemes_to_websocket() {
        let mut c = valid_config();
        assert_eq!(c.channel_url(), "wss://tunnel.test.local/tunnel");

        c.relay = "http://127.0.0.1:8080/".to_string();
        assert_eq!(c.channel_url(), "ws://127.0.0.1:8080/tunnel");

        c.relay = "ws://127.0.0.1:8080".to_string();
        assert_eq!(c.channel_url(), "ws://127.0.0.1:8080/tunnel");
    }

    #[test]
    fn origin_url_targets_the_local_service() {
        let c = valid_config();
        assert_eq!(c.origin_url(), "http://localhost:3000");
    }
}
