use crate::config::AgentConfig;
use crate::error::HtrcError;
use htr_common::frame::{self, HttpRequestRecord, HttpResponseRecord};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Forwards framed requests to the configured local origin.
#[derive(Clone)]
pub struct Forwarder {
    http: Client,
    origin: String,
}

impl Forwarder {
    /// Creates a forwarder targeting the configured origin.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &AgentConfig) -> Result<Self, HtrcError> {
        Ok(Self {
            http: Client::builder().build()?,
            origin: config.origin_url(),
        })
    }

    /// Executes one framed request against the origin.
    ///
    /// Never fails: origin-side I/O errors are translated into a 502
    /// response record so the public caller always receives a reply.
    pub async fn forward(&self, request: HttpRequestRecord) -> HttpResponseRecord {
        let id = request.id.clone();
        match self.try_forward(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "origin request failed");
                error_response(&id, &e.to_string())
            }
        }
    }

    async fn try_forward(
        &self,
        request: HttpRequestRecord,
    ) -> Result<HttpResponseRecord, HtrcError> {
        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|_| HtrcError::Protocol(format!("invalid method '{}'", request.method)))?;
        let url = format!("{}{}", self.origin, request.path);
        let body = frame::decode_body(request.body.as_deref())?;

        debug!(method = %method, url = %url, "forwarding to origin");

        // Host is rewritten by the client from the origin URL; hop-by-hop
        // headers must not leak through the tunnel.
        let mut builder = self.http.request(method, url).body(body);
        for (name, value) in &request.headers {
            if is_skipped_header(name) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = flatten_headers(response.headers());
        let bytes = response.bytes().await?;

        Ok(HttpResponseRecord {
            id: request.id,
            status,
            headers,
            body: frame::encode_body(&bytes),
        })
    }
}

/// Headers dropped before forwarding to the origin.
pub fn is_skipped_header(name: &str) -> bool {
    name.eq_ignore_ascii_case("host")
        || name.eq_ignore_ascii_case("connection")
        || name.eq_ignore_ascii_case("upgrade")
}

/// Flattens origin response headers into the wire shape; multi-valued
/// headers are joined with ", ".
fn flatten_headers(headers: &HeaderMap) -> HashMap<String, String> {
    let mut flat: HashMap<String, String> = HashMap::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else { continue };
        flat.entry(name.as_str().to_owned())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_owned());
    }
    flat
}

fn error_response(id: &str, message: &str) -> HttpResponseRecord {
    let body = serde_json::json!({ "error": message }).to_string();
    HttpResponseRecord {
        id: id.to_owned(),
        status: 502,
        headers: HashMap::from([(
            "content-type".to_owned(),
            "application/json".to_owned(),
        )]),
        body: frame::encode_body(body.as_bytes()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn hop_by_hop_and_host_headers_are_skipped() {
        assert!(is_skipped_header("Host"));
        assert!(is_skipped_header("connection"));
        assert!(is_skipped_header("UPGRADE"));
        assert!(!is_skipped_header("content-type"));
        assert!(!is_skipped_header("authorization"));
    }

    #[test]
    fn flatten_joins_repeated_headers() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));

        let flat = flatten_headers(&headers);
        assert_eq!(flat["set-cookie"], "a=1, b=2");
    }

    #[test]
    fn error_response_is_a_json_502() {
        let record = error_response("some-id", "connection refused");
        assert_eq!(record.status, 502);
        assert_eq!(record.id, "some-id");
        let body = frame::decode_body(record.body.as_deref()).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(parsed["error"]
            .as_str()
            .unwrap()
            .contains("connection refused"));
    }
}
