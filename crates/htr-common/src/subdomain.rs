//! Tunnel-id (subdomain) validation, minting, and Host-header matching.
//!
//! A tunnel id doubles as a DNS label under the relay's base domain, so the
//! accepted syntax is the DNS label rule: 3 to 63 characters of lowercase
//! ASCII letters, digits, and hyphens, starting and ending with a letter or
//! digit. Relay-minted ids are always 8 random lowercase alphanumerics.

use rand::Rng;

/// Minimum accepted label length.
pub const MIN_LEN: usize = 3;
/// Maximum accepted label length (DNS label limit).
pub const MAX_LEN: usize = 63;
/// Length of relay-minted labels.
pub const MINTED_LEN: usize = 8;

const MINT_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Returns `true` if `label` is acceptable as an externally-requested
/// tunnel id.
#[must_use]
pub fn is_valid_label(label: &str) -> bool {
    if label.len() < MIN_LEN || label.len() > MAX_LEN {
        return false;
    }
    let bytes = label.as_bytes();
    if bytes[0] == b'-' || bytes[bytes.len() - 1] == b'-' {
        return false;
    }
    bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
}

/// Mints a fresh random label of [`MINTED_LEN`] lowercase alphanumerics.
///
/// Uniqueness against the registry is the caller's concern; collisions are
/// handled by re-rolling.
#[must_use]
pub fn mint_label() -> String {
    let mut rng = rand::thread_rng();
    (0..MINTED_LEN)
        .map(|_| MINT_CHARSET[rng.gen_range(0..MINT_CHARSET.len())] as char)
        .collect()
}

/// Extracts the hostname from a Host header value, stripping any port.
#[must_use]
pub fn hostname(host_header: &str) -> &str {
    host_header.split(':').next().unwrap_or("")
}

/// Resolves the tunnel subdomain addressed by a Host header, if any.
///
/// Returns `None` when the hostname is the base domain itself, is empty, or
/// is unrelated to the base domain; all three are the "no subdomain" case
/// served by the relay's operational surface.
#[must_use]
pub fn extract(host_header: &str, base_domain: &str) -> Option<String> {
    let host = hostname(host_header).to_ascii_lowercase();
    let base = base_domain.to_ascii_lowercase();
    if host.is_empty() || host == base {
        return None;
    }
    host.strip_suffix(&format!(".{base}"))
        .filter(|sub| !sub.is_empty())
        .map(ToOwned::to_owned)
}
