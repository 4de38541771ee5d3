use thiserror::Error;

/// Errors that can occur during relay server operation.
#[derive(Error, Debug)]
pub enum HtrsError {
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Control-channel transport error.
    #[error("channel error: {0}")]
    Channel(#[from] axum::Error),
    /// The agent missed two consecutive heartbeat intervals.
    #[error("heartbeat expired")]
    HeartbeatExpired,
}
