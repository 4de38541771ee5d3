use htr_common::frame::FrameError;
use thiserror::Error;

/// Errors that can occur during agent operation.
#[derive(Error, Debug)]
pub enum HtrcError {
    /// Invalid agent configuration.
    #[error("configuration error: {0}")]
    Config(String),
    /// Control-channel transport failure, including rejected handshakes.
    #[error("websocket error: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    /// Local origin HTTP failure.
    #[error("origin error: {0}")]
    Origin(#[from] reqwest::Error),
    /// Frame encoding or decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    /// The relay violated the channel protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
}
