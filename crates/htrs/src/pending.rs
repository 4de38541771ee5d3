use dashmap::DashMap;
use htr_common::frame::HttpResponseRecord;
use tokio::sync::oneshot;
use uuid::Uuid;

/// Correlation table mapping in-flight request ids to their reply writers.
///
/// Every entry leaves the table exactly once: on the first matching
/// response, on timeout, or in the shutdown drain. Whoever removes the
/// entry owns the oneshot, so at most one response is ever delivered per
/// correlation id.
#[derive(Debug, Default)]
pub struct PendingRequests {
    entries: DashMap<Uuid, oneshot::Sender<HttpResponseRecord>>,
}

impl PendingRequests {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a fresh correlation id and returns the reply receiver.
    #[must_use]
    pub fn insert(&self, id: Uuid) -> oneshot::Receiver<HttpResponseRecord> {
        let (tx, rx) = oneshot::channel();
        self.entries.insert(id, tx);
        rx
    }

    /// Delivers a response to the matching entry, removing it.
    ///
    /// Returns `false` on a correlation miss: an unknown, already-resolved,
    /// or timed-out id, or one that is not a UUID at all.
    pub fn resolve(&self, id: &str, response: HttpResponseRecord) -> bool {
        let Ok(id) = Uuid::parse_str(id) else {
            return false;
        };
        match self.entries.remove(&id) {
            // An ingress that hung up early drops its receiver; the entry
            // is still dismissed.
            Some((_, tx)) => {
                let _ = tx.send(response);
                true
            }
            None => false,
        }
    }

    /// Abandons an entry (timeout path). A late response becomes a miss.
    pub fn remove(&self, id: &Uuid) {
        self.entries.remove(id);
    }

    /// Empties the table, completing every entry with the response produced
    /// by `make_response` for its id.
    pub fn drain_with<F>(&self, make_response: F)
    where
        F: Fn(Uuid) -> HttpResponseRecord,
    {
        let ids: Vec<Uuid> = self.entries.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, tx)) = self.entries.remove(&id) {
                let _ = tx.send(make_response(id));
            }
        }
    }

    /// Number of requests currently awaiting a response.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is in flight.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
