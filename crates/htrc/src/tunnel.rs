use crate::backoff::ReconnectSchedule;
use crate::config::AgentConfig;
use crate::error::HtrcError;
use crate::forward::Forwarder;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use htr_common::types::{self, reconnect};
use htr_common::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsRecv = SplitStream<WsStream>;

/// Frames queued toward the relay before forwarding tasks are backpressured.
const OUTBOX_DEPTH: usize = 64;
/// Events buffered per subscriber before older ones are dropped.
const EVENT_DEPTH: usize = 64;

/// Connection status of the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnStatus {
    /// Not connected to the relay.
    Disconnected,
    /// A (re)connection attempt is in progress.
    Connecting,
    /// Assigned and proxying.
    Connected,
}

/// Asynchronous notifications surfaced by a [`Tunnel`].
#[derive(Debug, Clone)]
pub enum TunnelEvent {
    /// One proxy round-trip completed.
    Request {
        /// HTTP method of the public request.
        method: String,
        /// Path plus query of the public request.
        path: String,
        /// Status returned to the relay.
        status: u16,
    },
    /// A recoverable failure: a relay-reported tunnel error, a lost
    /// channel, or a failed reconnect attempt.
    Error(String),
    /// Terminal teardown; emitted exactly once.
    Closed,
}

/// The relay's identity grant for this agent.
#[derive(Debug, Clone)]
pub struct Assignment {
    /// Assigned tunnel id.
    pub subdomain: String,
    /// Public URL serving this tunnel.
    pub url: String,
}

#[derive(Debug)]
struct Shared {
    closed: AtomicBool,
    close_notify: Notify,
    // Reassignment on reconnect makes these observable, mutable state.
    assignment: RwLock<Assignment>,
}

impl Shared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn assignment(&self) -> Assignment {
        self.assignment
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_assignment(&self, assignment: Assignment) {
        *self
            .assignment
            .write()
            .unwrap_or_else(PoisonError::into_inner) = assignment;
    }
}

/// A live tunnel: one control channel with automatic reconnection.
#[derive(Debug)]
pub struct Tunnel {
    shared: Arc<Shared>,
    events: broadcast::Sender<TunnelEvent>,
    status: watch::Receiver<ConnStatus>,
}

impl Tunnel {
    /// Connects to the relay and waits for the identity grant.
    ///
    /// The tunnel is returned only once `tunnel-assigned` has been
    /// received; any earlier failure (network, non-switching status,
    /// protocol violation) surfaces here and leaves nothing behind.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid configuration or a failed handshake.
    pub async fn connect(config: AgentConfig) -> Result<Self, HtrcError> {
        config.validate().map_err(HtrcError::Config)?;
        let forwarder = Forwarder::new(&config)?;

        let (ws, assignment) = open_channel(&config, config.subdomain.as_deref()).await?;
        info!(subdomain = %assignment.subdomain, url = %assignment.url, "tunnel established");

        let shared = Arc::new(Shared {
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
            assignment: RwLock::new(assignment),
        });
        let (events, _) = broadcast::channel(EVENT_DEPTH);
        let (status_tx, status) = watch::channel(ConnStatus::Connected);

        tokio::spawn(manager(
            Arc::clone(&shared),
            config,
            forwarder,
            events.clone(),
            status_tx,
            ws,
        ));

        Ok(Self {
            shared,
            events,
            status,
        })
    }

    /// Currently assigned tunnel id. May change across reconnects.
    #[must_use]
    pub fn subdomain(&self) -> String {
        self.shared.assignment().subdomain
    }

    /// Current public URL. May change across reconnects.
    #[must_use]
    pub fn url(&self) -> String {
        self.shared.assignment().url
    }

    /// Subscribes to tunnel events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<TunnelEvent> {
        self.events.subscribe()
    }

    /// Watches the connection status.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<ConnStatus> {
        self.status.clone()
    }

    /// Whether the tunnel has been closed, by the caller or terminally.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Closes the tunnel and suppresses reconnection. Idempotent: the
    /// second and later calls are no-ops. In-flight origin calls finish;
    /// their results are dropped.
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::SeqCst) {
            self.shared.close_notify.notify_waiters();
        }
    }
}

/// Builds and performs the upgrade, then waits for the identity grant.
async fn open_channel(
    config: &AgentConfig,
    preferred: Option<&str>,
) -> Result<(WsStream, Assignment), HtrcError> {
    let mut request = config
        .channel_url()
        .into_client_request()
        .map_err(HtrcError::Connect)?;

    let secret = config
        .secret
        .parse::<HeaderValue>()
        .map_err(|_| HtrcError::Config("secret is not a valid header value".to_string()))?;
    request.headers_mut().insert(types::AUTH_HEADER, secret);

    if let Some(label) = preferred {
        let label = label
            .parse::<HeaderValue>()
            .map_err(|_| HtrcError::Config(format!("'{label}' is not a valid header value")))?;
        request.headers_mut().insert(types::SUBDOMAIN_HEADER, label);
    }

    let (mut ws, _response) = connect_async(request).await.map_err(HtrcError::Connect)?;

    // The first frame must be the identity grant.
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => {
                return match Frame::parse(&text) {
                    Ok(Frame::TunnelAssigned { subdomain, url }) => {
                        Ok((ws, Assignment { subdomain, url }))
                    }
                    Ok(other) => Err(HtrcError::Protocol(format!(
                        "expected tunnel-assigned, got {}",
                        other.name()
                    ))),
                    Err(e) => Err(HtrcError::Frame(e)),
                };
            }
            Some(Ok(Message::Ping(data))) => {
                let _ = ws.send(Message::Pong(data)).await;
            }
            Some(Ok(Message::Close(_))) | None => {
                return Err(HtrcError::Protocol(
                    "channel closed before assignment".to_string(),
                ));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(HtrcError::Connect(e)),
        }
    }
}

/// Owns the channel across its whole life: drives it, reconnects with
/// backoff when it drops, and emits the terminal close exactly once.
async fn manager(
    shared: Arc<Shared>,
    config: AgentConfig,
    forwarder: Forwarder,
    events: broadcast::Sender<TunnelEvent>,
    status_tx: watch::Sender<ConnStatus>,
    mut ws: WsStream,
) {
    loop {
        status_tx.send_replace(ConnStatus::Connected);
        let reason = drive_channel(ws, &shared, &forwarder, &events).await;
        status_tx.send_replace(ConnStatus::Disconnected);

        if shared.is_closed() {
            break;
        }

        warn!(reason = %reason, "control channel lost");
        let _ = events.send(TunnelEvent::Error(format!("control channel lost: {reason}")));

        match reconnect(&shared, &config, &events, &status_tx).await {
            Some(reopened) => ws = reopened,
            None => break,
        }
    }

    shared.closed.store(true, Ordering::SeqCst);
    status_tx.send_replace(ConnStatus::Disconnected);
    let _ = events.send(TunnelEvent::Closed);
    info!("tunnel closed");
}

/// Runs the reconnection schedule. Returns the reopened channel, or `None`
/// when the caller closed the tunnel or the schedule is exhausted.
async fn reconnect(
    shared: &Arc<Shared>,
    config: &AgentConfig,
    events: &broadcast::Sender<TunnelEvent>,
    status_tx: &watch::Sender<ConnStatus>,
) -> Option<WsStream> {
    let mut schedule = ReconnectSchedule::new(
        Duration::from_secs(reconnect::BASE_DELAY_SECS),
        reconnect::FACTOR,
        reconnect::MAX_ATTEMPTS,
    );

    loop {
        let Some(delay) = schedule.next_delay() else {
            warn!("reconnection attempts exhausted, giving up");
            return None;
        };

        debug!(delay_s = delay.as_secs(), "waiting before reconnect");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = shared.close_notify.notified() => return None,
        }
        if shared.is_closed() {
            return None;
        }

        status_tx.send_replace(ConnStatus::Connecting);

        // Reuse the assigned id so the public URL is regained when possible.
        let preferred = shared.assignment().subdomain;
        match open_channel(config, Some(&preferred)).await {
            Ok((ws, assignment)) => {
                if assignment.subdomain != preferred {
                    warn!(
                        old = %preferred,
                        new = %assignment.subdomain,
                        "relay assigned a different subdomain"
                    );
                }
                info!(url = %assignment.url, "reconnected");
                shared.set_assignment(assignment);
                return Some(ws);
            }
            Err(e) => {
                warn!(error = %e, "reconnect attempt failed");
                let _ = events.send(TunnelEvent::Error(format!("reconnect failed: {e}")));
                status_tx.send_replace(ConnStatus::Disconnected);
            }
        }
    }
}

/// Relays frames on one open channel until it drops or the caller closes.
/// Returns a short reason for logging.
async fn drive_channel(
    ws: WsStream,
    shared: &Arc<Shared>,
    forwarder: &Forwarder,
    events: &broadcast::Sender<TunnelEvent>,
) -> String {
    let (mut ws_tx, mut ws_rx) = ws.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Frame>(OUTBOX_DEPTH);

    loop {
        if shared.is_closed() {
            return finish_closed(&mut ws_tx).await;
        }

        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, forwarder, events, &out_tx);
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if ws_tx.send(Message::Pong(data)).await.is_err() {
                            return "transport closed".to_string();
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        return "channel closed by relay".to_string();
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return format!("transport error: {e}"),
                }
            }
            Some(frame) = out_rx.recv() => {
                if ws_tx.send(Message::Text(frame.serialize())).await.is_err() {
                    return "transport closed".to_string();
                }
            }
            () = shared.close_notify.notified() => {
                return finish_closed(&mut ws_tx).await;
            }
        }
    }
}

async fn finish_closed(ws_tx: &mut WsSink) -> String {
    let _ = ws_tx.send(Message::Close(None)).await;
    "closed by caller".to_string()
}

fn handle_frame(
    text: &str,
    forwarder: &Forwarder,
    events: &broadcast::Sender<TunnelEvent>,
    out_tx: &mpsc::Sender<Frame>,
) {
    match Frame::parse(text) {
        Ok(Frame::TunnelRequest { request }) => {
            // Each request runs on its own task so a slow origin never
            // stalls the receive loop or other requests.
            let forwarder = forwarder.clone();
            let events = events.clone();
            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                let method = request.method.clone();
                let path = request.path.clone();
                let response = forwarder.forward(request).await;
                let _ = events.send(TunnelEvent::Request {
                    method,
                    path,
                    status: response.status,
                });
                // Dropped without a receiver when the channel is gone.
                let _ = out_tx.send(Frame::response(response)).await;
            });
        }
        Ok(Frame::Ping) => {
            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                let _ = out_tx.send(Frame::Pong).await;
            });
        }
        Ok(Frame::TunnelError { message }) => {
            warn!(message = %message, "relay reported a tunnel error");
            let _ = events.send(TunnelEvent::Error(message));
        }
        Ok(other) => debug!(frame = other.name(), "ignoring misdirected frame"),
        Err(e) => debug!(error = %e, "discarding unparseable frame"),
    }
}
