use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use ep_common::cache::TtlKeySet;
use ep_common::envelope::SignalEnvelope;

/// Dedup key for an inbound signal (§4.1 stage 5): `signal_id` is the
/// idempotency key per §3's `SignalEnvelope` invariant ("unique within the
/// deduplication window"), scoped by `tenant_id` since uniqueness is only
/// promised per tenant.
pub fn dedup_key(envelope: &SignalEnvelope) -> String {
    format!("{}|{}", envelope.tenant_id, envelope.signal_id)
}

/// Per-tenant dedup window, backed by a TTL key set. One instance is
/// shared across a pipeline's lifetime; the default window matches
/// `Config::dedup_window_hours`.
pub struct DedupGate {
    seen: TtlKeySet<String>,
}

impl DedupGate {
    pub fn new(window: Duration) -> Self {
        Self {
            seen: TtlKeySet::new(window),
        }
    }

    /// Returns true if this envelope is a duplicate within the window and
    /// should be rejected with `CoreError::Duplicate`.
    pub fn is_duplicate(&self, envelope: &SignalEnvelope) -> bool {
        self.seen.check_and_insert(dedup_key(envelope))
    }
}

/// Advisory per-`(producer_id, signal_type)` sequence tracker (§4.1 stage
/// 6). Best-effort ordering only: an out-of-order `sequence_no` attaches a
/// warning to the result, it never rejects the envelope.
#[derive(Default)]
pub struct SequenceTracker {
    last_seen: Mutex<HashMap<(String, String), i64>>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `sequence_no` for `(producer_id, signal_type)` and returns
    /// `true` if it arrived out of order relative to the last one observed.
    pub fn observe(&self, producer_id: &str, signal_type: &str, sequence_no: i64) -> bool {
        let key = (producer_id.to_string(), signal_type.to_string());
        let mut guard = self.last_seen.lock().expect("sequence tracker mutex poisoned");
        let out_of_order = matches!(guard.get(&key), Some(last) if sequence_no < *last);
        let entry = guard.entry(key).or_insert(sequence_no);
        if sequence_no > *entry {
            *entry = sequence_no;
        }
        out_of_order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ep_common::envelope::{Environment, SignalKind};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn envelope(correlation_id: Option<&str>) -> SignalEnvelope {
        SignalEnvelope {
            signal_id: Uuid::new_v4().to_string(),
            tenant_id: "tenant-a".to_string(),
            environment: Environment::Prod,
            producer_id: "producer-1".to_string(),
            signal_kind: SignalKind::Event,
            signal_type: "pr_opened".to_string(),
            occurred_at: Utc::now(),
            ingested_at: Utc::now(),
            payload: BTreeMap::new(),
            schema_version: "1.0.0".to_string(),
            actor_id: None,
            correlation_id: correlation_id.map(str::to_string),
            trace_id: None,
            span_id: None,
            resource: None,
            sequence_no: None,
        }
    }

    #[test]
    fn second_delivery_with_same_signal_id_is_duplicate() {
        let gate = DedupGate::new(Duration::from_secs(3600));
        let e = envelope(Some("corr-1"));
        assert!(!gate.is_duplicate(&e));
        assert!(gate.is_duplicate(&e));
    }

    #[test]
    fn different_signal_ids_are_not_duplicates() {
        let gate = DedupGate::new(Duration::from_secs(3600));
        assert!(!gate.is_duplicate(&envelope(Some("corr-1"))));
        assert!(!gate.is_duplicate(&envelope(Some("corr-2"))));
    }

    #[test]
    fn sequence_tracker_flags_regression_but_not_first_or_advancing() {
        let tracker = SequenceTracker::new();
        assert!(!tracker.observe("producer-1", "pr_opened", 5));
        assert!(!tracker.observe("producer-1", "pr_opened", 6));
        assert!(tracker.observe("producer-1", "pr_opened", 3));
        assert!(!tracker.observe("producer-1", "pr_opened", 7));
    }

    #[test]
    fn sequence_tracker_scopes_by_producer_and_signal_type() {
        let tracker = SequenceTracker::new();
        assert!(!tracker.observe("producer-1", "pr_opened", 10));
        assert!(!tracker.observe("producer-2", "pr_opened", 1));
        assert!(!tracker.observe("producer-1", "issue_created", 1));
    }
}
