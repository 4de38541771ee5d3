use futures_util::{SinkExt, StreamExt};
use htr_common::frame::{self, HttpResponseRecord};
use htr_common::types;
use htr_common::Frame;
use htrs::config::RelayConfig;
use htrs::server::RelayState;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

pub const TEST_SECRET: &str = "sk_test_key_123";
pub const TEST_DOMAIN: &str = "tunnel.test.local";

pub fn test_config() -> RelayConfig {
    RelayConfig {
        listen: "127.0.0.1:0".parse().unwrap(),
        secrets: HashSet::from([TEST_SECRET.to_string()]),
        base_domain: TEST_DOMAIN.to_string(),
        max_tunnels: 10,
        heartbeat_interval: 30,
        request_timeout: 30,
    }
}

pub async fn start_relay() -> (SocketAddr, Arc<RelayState>) {
    start_relay_with(test_config()).await
}

pub async fn start_relay_with(config: RelayConfig) -> (SocketAddr, Arc<RelayState>) {
    let (addr, state, _signal) = start_relay_with_signal(config).await;
    (addr, state)
}

/// Starts a relay whose graceful shutdown fires when the returned sender
/// is used (or dropped at the end of the test).
pub async fn start_relay_with_signal(
    config: RelayConfig,
) -> (SocketAddr, Arc<RelayState>, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(RelayState::new(config));
    let (signal_tx, signal_rx) = oneshot::channel();

    let state_clone = state.clone();
    tokio::spawn(async move {
        let signal = async move {
            let _ = signal_rx.await;
        };
        if let Err(e) = htrs::run(listener, state_clone, signal).await {
            eprintln!("relay error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (addr, state, signal_tx)
}

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;
type WsRecv = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

/// A handcrafted agent speaking raw frames over the control channel.
#[derive(Debug)]
pub struct TestAgent {
    pub ws_tx: WsSink,
    pub ws_rx: WsRecv,
    pub subdomain: String,
    pub url: String,
}

impl TestAgent {
    pub async fn connect(addr: &SocketAddr, secret: &str, preferred: Option<&str>) -> Self {
        Self::try_connect(addr, secret, preferred)
            .await
            .expect("handshake should succeed")
    }

    pub async fn try_connect(
        addr: &SocketAddr,
        secret: &str,
        preferred: Option<&str>,
    ) -> Result<Self, WsError> {
        let mut req = format!("ws://{addr}{}", types::CONTROL_PATH)
            .into_client_request()
            .unwrap();
        req.headers_mut()
            .insert(types::AUTH_HEADER, secret.parse().unwrap());
        if let Some(label) = preferred {
            req.headers_mut()
                .insert(types::SUBDOMAIN_HEADER, label.parse().unwrap());
        }

        let (ws, _) = tokio_tungstenite::connect_async(req).await?;
        let (ws_tx, ws_rx) = ws.split();
        let mut agent = Self {
            ws_tx,
            ws_rx,
            subdomain: String::new(),
            url: String::new(),
        };

        match agent.recv_frame().await {
            Frame::TunnelAssigned { subdomain, url } => {
                agent.subdomain = subdomain;
                agent.url = url;
            }
            other => panic!("expected tunnel-assigned, got {other:?}"),
        }
        Ok(agent)
    }

    pub async fn send_frame(&mut self, frame: Frame) {
        self.ws_tx
            .send(Message::Text(frame.serialize()))
            .await
            .unwrap();
    }

    pub async fn respond(&mut self, id: &str, status: u16, headers: &[(&str, &str)], body: &[u8]) {
        let response = HttpResponseRecord {
            id: id.to_string(),
            status,
            headers: headers
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<HashMap<_, _>>(),
            body: frame::encode_body(body),
        };
        self.send_frame(Frame::response(response)).await;
    }

    pub async fn recv_frame(&mut self) -> Frame {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(5), self.ws_rx.next())
                .await
                .expect("timeout waiting for frame")
                .expect("stream ended")
                .unwrap();
            match msg {
                Message::Text(text) => return Frame::parse(&text).unwrap(),
                Message::Ping(_) | Message::Pong(_) => {}
                other => panic!("expected text frame, got {other:?}"),
            }
        }
    }

    pub async fn recv_frame_timeout(&mut self, timeout: Duration) -> Option<Frame> {
        tokio::time::timeout(timeout, self.recv_frame()).await.ok()
    }

    /// Receive the next tunnel-request, replying pong to any interleaved
    /// heartbeat pings.
    pub async fn recv_request(&mut self) -> htr_common::frame::HttpRequestRecord {
        loop {
            match self.recv_frame().await {
                Frame::TunnelRequest { request } => return request,
                Frame::Ping => self.send_frame(Frame::Pong).await,
                other => panic!("expected tunnel-request, got {other:?}"),
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.ws_tx.send(Message::Close(None)).await;
    }
}

pub fn host_for(sub: &str) -> String {
    format!("{sub}.{TEST_DOMAIN}")
}

pub fn public_client() -> reqwest::Client {
    reqwest::Client::new()
}
