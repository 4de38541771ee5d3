use crate::channel;
use crate::metrics::{counters, histograms};
use crate::server::RelayState;
use axum::body::{to_bytes, Body};
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use htr_common::frame::{self, HttpRequestRecord, HttpResponseRecord};
use htr_common::{subdomain, types, Frame};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;
use uuid::Uuid;

/// Catch-all entry point: dispatches every request by Host header, serving
/// the operational surface on the base domain and proxying everything that
/// addresses a tunnel subdomain.
pub async fn handle(State(state): State<Arc<RelayState>>, req: Request) -> Response {
    if state.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Server shutting down").into_response();
    }

    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    match subdomain::extract(host, &state.config.base_domain) {
        Some(sub) => proxy(state, sub, req).await,
        None => operational(state, req).await,
    }
}

/// The base-domain surface: control-channel handshake, health, banner.
async fn operational(state: Arc<RelayState>, req: Request) -> Response {
    match req.uri().path() {
        types::CONTROL_PATH => handshake(state, req).await,
        "/health" => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "tunnels": state.registry.len(),
                "maxTunnels": state.config.max_tunnels,
            })),
        )
            .into_response(),
        _ => (
            StatusCode::OK,
            format!(
                "HTR tunnel relay\n\nRequests to <subdomain>.{} are proxied to the \
                 agent attached under that subdomain.\n",
                state.config.base_domain
            ),
        )
            .into_response(),
    }
}

/// Admission gate and WebSocket upgrade for one agent.
async fn handshake(state: Arc<RelayState>, req: Request) -> Response {
    let secret = req
        .headers()
        .get(types::AUTH_HEADER)
        .and_then(|v| v.to_str().ok());
    if !secret.is_some_and(|s| state.config.secrets.contains(s)) {
        counters::admissions_total("unauthorized");
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }

    if state.registry.len() >= state.config.max_tunnels {
        counters::admissions_total("capacity");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": "Max tunnel limit reached",
                "limit": state.config.max_tunnels,
            })),
        )
            .into_response();
    }

    let preferred = req
        .headers()
        .get(types::SUBDOMAIN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let (mut parts, _body) = req.into_parts();
    match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(ws) => ws.on_upgrade(move |socket| channel::run(socket, state, preferred)),
        Err(rejection) => rejection.into_response(),
    }
}

/// Forwards one public request through the addressed tunnel and writes the
/// correlated response back.
async fn proxy(state: Arc<RelayState>, sub: String, req: Request) -> Response {
    let Some(handle) = state.registry.get(&sub) else {
        counters::requests_failed_total("unknown_subdomain");
        return (
            StatusCode::NOT_FOUND,
            Json(json!({
                "error": format!("Tunnel '{sub}' not found"),
                "subdomain": sub,
            })),
        )
            .into_response();
    };

    if !handle.is_open() {
        counters::requests_failed_total("closed");
        state.registry.remove_if(&sub, handle.connected_at);
        return (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": "Tunnel channel is closed",
                "subdomain": sub,
            })),
        )
            .into_response();
    }

    let method = req.method().as_str().to_owned();
    let path = req
        .uri()
        .path_and_query()
        .map_or_else(|| "/".to_owned(), |pq| pq.as_str().to_owned());
    let headers = flatten_headers(req.headers());

    let Ok(body) = to_bytes(req.into_body(), types::MAX_BODY_BYTES).await else {
        counters::requests_failed_total("oversize");
        return (
            StatusCode::PAYLOAD_TOO_LARGE,
            [(header::CONNECTION, "close")],
            Json(json!({"error": "Request body exceeds the 10 MiB limit"})),
        )
            .into_response();
    };

    let id = Uuid::new_v4();
    let record = HttpRequestRecord {
        id: id.to_string(),
        method,
        path,
        headers,
        body: frame::encode_body(&body),
    };

    let started = std::time::Instant::now();
    let reply = state.pending.insert(id);

    if handle.tx.send(Frame::request(record)).await.is_err() {
        state.pending.remove(&id);
        state.registry.remove_if(&sub, handle.connected_at);
        counters::requests_failed_total("closed");
        return (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "error": "Tunnel channel is closed",
                "subdomain": sub,
            })),
        )
            .into_response();
    }

    match timeout(Duration::from_secs(state.config.request_timeout), reply).await {
        Ok(Ok(response)) => {
            counters::requests_proxied_total();
            histograms::proxy_latency_seconds(started.elapsed().as_secs_f64());
            build_response(&response)
        }
        Ok(Err(_)) => {
            counters::requests_failed_total("closed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": "Tunnel connection lost", "subdomain": sub})),
            )
                .into_response()
        }
        Err(_) => {
            state.pending.remove(&id);
            counters::requests_failed_total("timeout");
            debug!(subdomain = %sub, id = %id, "proxied request timed out");
            (
                StatusCode::GATEWAY_TIMEOUT,
                Json(json!({
                    "error": "Tunnel did not respond in time",
                    "subdomain": sub,
                })),
            )
                .into_response()
        }
    }
}

/// Flattens a header map into the wire shape; multi-valued headers are
/// joined with ", ".
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

/// Materializes an agent's response record as the public HTTP reply. The
/// hop-by-hop `transfer-encoding` header is dropped; everything else passes
/// through verbatim.
fn build_response(record: &HttpResponseRecord) -> Response {
    let status = StatusCode::from_u16(record.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let body = match frame::decode_body(record.body.as_deref()) {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(error = %e, "tunnel-response carried an undecodable body");
            return (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": "Tunnel response body was not valid base64"})),
            )
                .into_response();
        }
    };

    let mut builder = Response::builder().status(status);
    for (name, value) in &record.headers {
        if name.eq_ignore_ascii_case("transfer-encoding") {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}
