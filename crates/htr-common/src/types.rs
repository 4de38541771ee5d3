//! Core protocol constants for HTR.

/// Fixed path on the relay that upgrades to the control channel.
pub const CONTROL_PATH: &str = "/tunnel";

/// Header carrying the agent's shared secret during the upgrade handshake.
pub const AUTH_HEADER: &str = "x-api-key";

/// Header carrying the agent's preferred subdomain label, if any.
pub const SUBDOMAIN_HEADER: &str = "x-subdomain";

/// Maximum accepted public request body size in bytes (10 MiB).
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Seconds a proxied request may wait for its tunnel-response.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Seconds between heartbeat pings on a control channel. A channel that
/// misses two consecutive intervals is considered dead.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Default maximum number of concurrently attached tunnels.
pub const DEFAULT_MAX_TUNNELS: usize = 10;

/// Reconnection backoff parameters used by the agent.
pub mod reconnect {
    /// Delay before the first reconnect attempt, in seconds.
    pub const BASE_DELAY_SECS: u64 = 1;
    /// Multiplier applied to the delay after each failed attempt.
    pub const FACTOR: u32 = 2;
    /// Attempts before the agent gives up and surfaces a terminal close.
    pub const MAX_ATTEMPTS: u32 = 5;
}
