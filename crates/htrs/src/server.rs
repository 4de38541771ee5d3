use crate::config::RelayConfig;
use crate::error::HtrsError;
use crate::ingress;
use crate::pending::PendingRequests;
use crate::registry::Registry;
use htr_common::frame::HttpResponseRecord;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

/// Shared state for the relay server.
#[derive(Debug)]
pub struct RelayState {
    /// Subdomain → control-channel registry.
    pub registry: Registry,
    /// Requests awaiting their tunnel-response.
    pub pending: PendingRequests,
    /// Runtime relay configuration.
    pub config: RelayConfig,
    shutdown: watch::Sender<bool>,
}

impl RelayState {
    /// Creates fresh state around the given configuration.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            registry: Registry::new(),
            pending: PendingRequests::new(),
            config,
            shutdown,
        }
    }

    /// A receiver that resolves when shutdown begins. Each control channel
    /// holds one so its select loop can exit promptly.
    #[must_use]
    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Whether shutdown has begun. Ingress refuses new work once set.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Begins graceful teardown: every channel loop exits (cancelling its
    /// heartbeat and closing its socket), and the pending table is drained
    /// with 503 replies.
    pub fn begin_shutdown(&self) {
        let _ = self.shutdown.send(true);
        self.pending.drain_with(shutdown_response);
        info!("drained pending requests, channels closing");
    }
}

fn shutdown_response(id: Uuid) -> HttpResponseRecord {
    HttpResponseRecord {
        id: id.to_string(),
        status: 503,
        headers: HashMap::from([("content-type".to_owned(), "text/plain".to_owned())]),
        body: htr_common::frame::encode_body(b"Server shutting down"),
    }
}

/// Builds the relay's router: one catch-all handler dispatching on the Host
/// header, with the control-channel upgrade on its fixed path.
#[must_use]
pub fn router(state: Arc<RelayState>) -> axum::Router {
    axum::Router::new()
        .fallback(ingress::handle)
        .with_state(state)
}

/// Serves the relay until `signal` resolves, then tears down gracefully:
/// stop accepting, close every channel, drain pending replies with 503.
///
/// # Errors
///
/// Returns an error if serving fails at the I/O layer.
pub async fn run<F>(
    listener: TcpListener,
    state: Arc<RelayState>,
    signal: F,
) -> Result<(), HtrsError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let local_addr = listener.local_addr().map_err(HtrsError::Io)?;
    info!(
        "relay listening on {} for *.{}",
        local_addr, state.config.base_domain
    );

    let teardown = {
        let state = Arc::clone(&state);
        async move {
            signal.await;
            info!("shutdown signal received");
            state.begin_shutdown();
        }
    };

    axum::serve(listener, router(state))
        .with_graceful_shutdown(teardown)
        .await
        .map_err(HtrsError::Io)
}
