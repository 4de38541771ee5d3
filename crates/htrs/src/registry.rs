use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use htr_common::subdomain;
use htr_common::Frame;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;

/// Handle held in the registry — used to queue frames onto one control
/// channel and to observe its liveness.
#[derive(Clone, Debug)]
pub struct TunnelHandle {
    /// Frame queue drained by the channel's writer half.
    pub tx: mpsc::Sender<Frame>,
    /// Set by each pong, cleared by each heartbeat tick.
    pub alive: Arc<AtomicBool>,
    /// Instant this channel attached (guards removals across reattach).
    pub connected_at: Instant,
}

impl TunnelHandle {
    /// Creates a handle marked alive, attached now.
    #[must_use]
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self {
            tx,
            alive: Arc::new(AtomicBool::new(true)),
            connected_at: Instant::now(),
        }
    }

    /// Whether the channel behind this handle can still accept frames.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Concurrent subdomain → control-channel registry.
///
/// Claiming is serialized by a dedicated lock so that the tunnel count can
/// never exceed the configured cap, even under concurrent handshakes; all
/// other operations take only the map's own shard locks.
#[derive(Debug, Default)]
pub struct Registry {
    tunnels: DashMap<String, TunnelHandle>,
    admission: Mutex<()>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims a tunnel id for `handle`, or `None` if the registry is full.
    ///
    /// The preferred label is used when it is syntactically valid and
    /// currently unclaimed; otherwise an 8-character label is minted,
    /// re-rolling on the (rare) collision.
    pub fn claim(
        &self,
        preferred: Option<&str>,
        handle: TunnelHandle,
        max_tunnels: usize,
    ) -> Option<String> {
        let _guard = self
            .admission
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        if self.tunnels.len() >= max_tunnels {
            return None;
        }

        if let Some(label) = preferred {
            if subdomain::is_valid_label(label) && self.try_insert(label, handle.clone()) {
                return Some(label.to_owned());
            }
        }

        loop {
            let label = subdomain::mint_label();
            if self.try_insert(&label, handle.clone()) {
                return Some(label);
            }
        }
    }

    fn try_insert(&self, id: &str, handle: TunnelHandle) -> bool {
        match self.tunnels.entry(id.to_owned()) {
            Entry::Vacant(entry) => {
                entry.insert(handle);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    /// Looks up the handle attached under `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<TunnelHandle> {
        self.tunnels.get(id).map(|entry| entry.value().clone())
    }

    /// Removes the entry only if it still belongs to the channel attached at
    /// `connected_at`. A reattached channel under the same id is left alone.
    pub fn remove_if(&self, id: &str, connected_at: Instant) {
        self.tunnels
            .remove_if(id, |_k, v| v.connected_at == connected_at);
    }

    /// Number of attached tunnels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    /// Returns `true` if no tunnel is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }
}
