use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use uuid::Uuid;

/// Compute a deterministic fallback `dedup_key` for an alert that arrived
/// without a caller-supplied one (§4.3): a hash of
/// `(tenant_id, component_id, category, summary-fingerprint)`.
///
/// The summary is fingerprinted rather than hashed verbatim so that minor
/// wording drift in repeat arrivals (timestamps, counts embedded in free
/// text) still collapses to the same key — the fingerprint keeps only the
/// alphabetic tokens, lowercased and sorted.
pub fn fallback_dedup_key(tenant_id: &str, component_id: &str, category: &str, summary: &str) -> String {
    let fingerprint = summary_fingerprint(summary);
    let mut hasher = DefaultHasher::new();
    tenant_id.hash(&mut hasher);
    component_id.hash(&mut hasher);
    category.hash(&mut hasher);
    fingerprint.hash(&mut hasher);
    format!("auto-{:016x}", hasher.finish())
}

fn summary_fingerprint(summary: &str) -> String {
    let mut tokens: Vec<String> = summary
        .split_whitespace()
        .map(|w| w.chars().filter(|c| c.is_alphabetic()).collect::<String>().to_lowercase())
        .filter(|w| !w.is_empty())
        .collect();
    tokens.sort();
    tokens.join(" ")
}

/// New random signal id, used when an adapter maps a provider event and
/// no natural idempotent id exists (§4.2 signal mapping).
pub fn new_signal_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_dedup_key_is_stable_across_minor_wording_drift() {
        let a = fallback_dedup_key("t1", "api", "latency", "p99 latency high: 842ms");
        let b = fallback_dedup_key("t1", "api", "latency", "latency high p99: 910ms");
        assert_eq!(a, b);
    }

    #[test]
    fn fallback_dedup_key_differs_across_components() {
        let a = fallback_dedup_key("t1", "api", "latency", "latency high");
        let b = fallback_dedup_key("t1", "db", "latency", "latency high");
        assert_ne!(a, b);
    }
}
