//! Counters and gauges recorded through the `metrics` facade.
//!
//! No exporter is installed here: the relay's public HTTP surface is the
//! health endpoint plus proxied traffic. A deployment that scrapes these
//! installs its own recorder before starting the server.

/// Tunnel count gauges.
pub mod gauges {
    /// Increment the attached-tunnels gauge.
    pub fn inc_tunnels_active() {
        metrics::gauge!("htr_tunnels_active").increment(1.0);
    }

    /// Decrement the attached-tunnels gauge.
    pub fn dec_tunnels_active() {
        metrics::gauge!("htr_tunnels_active").decrement(1.0);
    }
}

/// Event counters.
pub mod counters {
    /// Record a handshake attempt with the given outcome label.
    pub fn admissions_total(outcome: &'static str) {
        metrics::counter!("htr_admissions_total", "outcome" => outcome).increment(1);
    }

    /// Increment the successfully proxied requests counter.
    pub fn requests_proxied_total() {
        metrics::counter!("htr_requests_proxied_total").increment(1);
    }

    /// Increment the failed-requests counter with the given reason label.
    pub fn requests_failed_total(reason: &'static str) {
        metrics::counter!("htr_requests_failed_total", "reason" => reason).increment(1);
    }
}

/// Latency histograms.
pub mod histograms {
    /// Record one proxied round-trip latency in seconds.
    pub fn proxy_latency_seconds(value: f64) {
        metrics::histogram!("htr_proxy_latency_seconds").record(value);
    }
}
