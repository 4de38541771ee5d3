//! HTR agent — holds one outbound control channel to a relay and proxies
//! framed requests into a local HTTP origin.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Fixed-schedule exponential backoff for reconnection.
pub mod backoff;
/// CLI parsing and agent configuration.
pub mod config;
/// Error types for agent operations.
pub mod error;
/// Forwarding of framed requests to the local origin.
pub mod forward;
/// Control-channel lifecycle: connect, receive loop, reconnect, close.
pub mod tunnel;

pub use tunnel::{ConnStatus, Tunnel, TunnelEvent};
