//! HTR control-channel frame serialization and parsing.
//!
//! Each frame is one self-delimited JSON document sent as a WebSocket text
//! message. The `type` field names the variant; request and response bodies
//! travel as base64 of the raw bytes, with an absent body encoded as an
//! explicit `null` (a zero-length body is `null`, never `""`).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// An HTTP request captured at the relay's ingress, addressed to one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequestRecord {
    /// Correlation id, a canonical UUID string.
    pub id: String,
    /// HTTP method, uppercase.
    pub method: String,
    /// Path plus query string, as received.
    pub path: String,
    /// Flattened header map; multi-valued headers joined with ", ".
    pub headers: HashMap<String, String>,
    /// Base64 of the request body, or `null` when the body is empty.
    pub body: Option<String>,
}

/// The agent's reply to one [`HttpRequestRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponseRecord {
    /// Correlation id echoed from the request.
    pub id: String,
    /// HTTP status code from the origin (or synthesized by the agent).
    pub status: u16,
    /// Flattened header map; multi-valued headers joined with ", ".
    pub headers: HashMap<String, String>,
    /// Base64 of the response body, or `null` when the body is empty.
    pub body: Option<String>,
}

/// A parsed HTR control-channel frame.
///
/// Directionality: `tunnel-assigned`, `tunnel-request`, `tunnel-error` and
/// `ping` flow relay→agent; `tunnel-response` and `pong` flow agent→relay.
/// A frame observed in the wrong direction is ignored by the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// First frame on a channel: the relay's identity grant.
    #[serde(rename = "tunnel-assigned")]
    TunnelAssigned {
        /// The assigned tunnel id.
        subdomain: String,
        /// Canonical public URL, `https://<subdomain>.<baseDomain>`.
        url: String,
    },
    /// A public HTTP request forwarded to the agent.
    #[serde(rename = "tunnel-request")]
    TunnelRequest {
        /// The captured request.
        request: HttpRequestRecord,
    },
    /// The agent's reply to a forwarded request.
    #[serde(rename = "tunnel-response")]
    TunnelResponse {
        /// The captured response.
        response: HttpResponseRecord,
    },
    /// An asynchronous tunnel-level error report from the relay.
    #[serde(rename = "tunnel-error")]
    TunnelError {
        /// Human-readable description.
        message: String,
    },
    /// Relay-to-agent liveness probe.
    #[serde(rename = "ping")]
    Ping,
    /// Agent-to-relay liveness reply.
    #[serde(rename = "pong")]
    Pong,
}

/// Errors that can occur while decoding frames or their bodies.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The text was not a valid frame, or carried an unknown `type`.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    /// A `body` field was not valid base64.
    #[error("invalid body encoding: {0}")]
    Body(#[from] base64::DecodeError),
}

impl Frame {
    /// Creates a `TunnelAssigned` frame.
    #[must_use]
    pub fn assigned(subdomain: &str, url: &str) -> Self {
        Self::TunnelAssigned {
            subdomain: subdomain.to_owned(),
            url: url.to_owned(),
        }
    }

    /// Creates a `TunnelRequest` frame.
    #[must_use]
    pub const fn request(request: HttpRequestRecord) -> Self {
        Self::TunnelRequest { request }
    }

    /// Creates a `TunnelResponse` frame.
    #[must_use]
    pub const fn response(response: HttpResponseRecord) -> Self {
        Self::TunnelResponse { response }
    }

    /// Creates a `TunnelError` frame with the given message.
    #[must_use]
    pub fn error(message: &str) -> Self {
        Self::TunnelError {
            message: message.to_owned(),
        }
    }

    /// Parses one frame from WebSocket text.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Malformed`] for invalid JSON or an unknown
    /// discriminant. Callers drop the frame and keep the channel open.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        serde_json::from_str(text).map_err(FrameError::Malformed)
    }

    /// Serializes this frame into WebSocket text.
    #[must_use]
    pub fn serialize(&self) -> String {
        serde_json::to_string(self).expect("frame serializes")
    }

    /// Short name of the frame's discriminant, for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::TunnelAssigned { .. } => "tunnel-assigned",
            Self::TunnelRequest { .. } => "tunnel-request",
            Self::TunnelResponse { .. } => "tunnel-response",
            Self::TunnelError { .. } => "tunnel-error",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

/// Encodes a body for transport. Empty input becomes `None`, which
/// serializes as the explicit `null` marker.
#[must_use]
pub fn encode_body(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        None
    } else {
        Some(BASE64.encode(bytes))
    }
}

/// Decodes a transported body back into raw bytes. `None` is the empty body.
///
/// # Errors
///
/// Returns [`FrameError::Body`] when the text is not valid base64.
pub fn decode_body(body: Option<&str>) -> Result<Vec<u8>, FrameError> {
    match body {
        None => Ok(Vec::new()),
        Some(text) => Ok(BASE64.decode(text)?),
    }
}
