use crate::error::HtrsError;
use crate::metrics::{counters, gauges};
use crate::registry::TunnelHandle;
use crate::server::RelayState;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use htr_common::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Duration, Instant};
use tracing::{debug, info, warn};

/// Frames queued per channel before ingress senders are backpressured.
const CHANNEL_DEPTH: usize = 256;

type WsSink = SplitSink<WebSocket, Message>;
type WsRecv = SplitStream<WebSocket>;

/// Drives one admitted control channel to completion.
///
/// Claims a tunnel id, emits the `tunnel-assigned` grant, then relays
/// frames until the agent disconnects, the heartbeat expires, or the
/// server shuts down. Every exit path removes the registry entry and ends
/// the heartbeat with the loop that owns it.
pub async fn run(socket: WebSocket, state: Arc<RelayState>, preferred: Option<String>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut deliver_rx) = mpsc::channel::<Frame>(CHANNEL_DEPTH);
    let handle = TunnelHandle::new(tx);
    let alive = Arc::clone(&handle.alive);
    let connected_at = handle.connected_at;

    // The claim is re-checked against the cap here, post-upgrade: two
    // handshakes may both pass the pre-upgrade check in the same instant.
    let Some(id) = state.registry.claim(
        preferred.as_deref(),
        handle,
        state.config.max_tunnels,
    ) else {
        counters::admissions_total("capacity");
        let error = Frame::error("Max tunnel limit reached");
        let _ = ws_tx.send(Message::Text(error.serialize().into())).await;
        let _ = ws_tx.close().await;
        return;
    };

    counters::admissions_total("admitted");
    gauges::inc_tunnels_active();

    let url = format!("https://{}.{}", id, state.config.base_domain);
    info!(subdomain = %id, url = %url, "tunnel attached");

    let assigned = Frame::assigned(&id, &url);
    let result = match ws_tx.send(Message::Text(assigned.serialize().into())).await {
        Ok(()) => {
            let mut shutdown = state.shutdown_rx();
            message_loop(
                &mut ws_tx,
                &mut ws_rx,
                &mut deliver_rx,
                &state,
                &alive,
                &mut shutdown,
            )
            .await
        }
        Err(e) => Err(HtrsError::Channel(e)),
    };

    state.registry.remove_if(&id, connected_at);
    gauges::dec_tunnels_active();

    match result {
        Ok(()) => info!(subdomain = %id, "tunnel detached"),
        Err(HtrsError::HeartbeatExpired) => {
            warn!(subdomain = %id, "tunnel removed after missed heartbeats");
        }
        Err(e) => debug!(subdomain = %id, error = %e, "tunnel channel closed"),
    }
    let _ = ws_tx.close().await;
}

/// Relays frames in both directions and drives the heartbeat.
///
/// Pending requests addressed to this tunnel are not failed on exit; each
/// runs to its own timeout.
async fn message_loop(
    ws_tx: &mut WsSink,
    ws_rx: &mut WsRecv,
    deliver_rx: &mut mpsc::Receiver<Frame>,
    state: &RelayState,
    alive: &AtomicBool,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), HtrsError> {
    let period = Duration::from_secs(state.config.heartbeat_interval);
    let mut heartbeat = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => handle_frame(text.as_str(), state, alive),
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {} // binary and transport ping/pong are not protocol frames
                    Some(Err(e)) => return Err(HtrsError::Channel(e)),
                }
            }
            Some(frame) = deliver_rx.recv() => {
                ws_tx
                    .send(Message::Text(frame.serialize().into()))
                    .await
                    .map_err(HtrsError::Channel)?;
            }
            _ = heartbeat.tick() => {
                if !alive.swap(false, Ordering::SeqCst) {
                    return Err(HtrsError::HeartbeatExpired);
                }
                ws_tx
                    .send(Message::Text(Frame::Ping.serialize().into()))
                    .await
                    .map_err(HtrsError::Channel)?;
            }
            _ = shutdown.changed() => return Ok(()),
        }
    }
}

fn handle_frame(text: &str, state: &RelayState, alive: &AtomicBool) {
    match Frame::parse(text) {
        Ok(Frame::Pong) => alive.store(true, Ordering::SeqCst),
        Ok(Frame::TunnelResponse { response }) => {
            let id = response.id.clone();
            if !state.pending.resolve(&id, response) {
                debug!(id = %id, "correlation miss, dropping response");
            }
        }
        Ok(other) => debug!(frame = other.name(), "ignoring misdirected frame"),
        Err(e) => warn!(error = %e, "discarding unparseable frame"),
    }
}
