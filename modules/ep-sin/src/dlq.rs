use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use ep_common::envelope::DlqEntry;
use ep_common::CoreError;
use serde_json::Value;
use uuid::Uuid;

/// Persisted retry-count store and dead-letter inspection surface (§4.1
/// DLQ policy). The retry counter is keyed by `signal_id` and survives
/// process restart — a crash mid-retry must not reset the attempt count
/// back to zero and silently grant extra attempts.
#[async_trait]
pub trait DlqStore: Send + Sync {
    /// Record a failed attempt for `signal_id`, returning the new
    /// cumulative count.
    async fn record_failure(&self, signal_id: &str) -> u32;

    async fn failure_count(&self, signal_id: &str) -> u32;

    async fn write(&self, entry: DlqEntry) -> Result<(), CoreError>;

    /// List DLQ entries for a tenant, newest first, paginated by offset.
    async fn list(&self, tenant_id: &str, limit: usize, offset: usize) -> Vec<DlqEntry>;

    /// Total DLQ entry count for a tenant, ignoring pagination.
    async fn count(&self, tenant_id: &str) -> usize;

    async fn get(&self, tenant_id: &str, dlq_id: Uuid) -> Option<DlqEntry>;
}

#[derive(Default)]
pub struct InMemoryDlqStore {
    failures: RwLock<BTreeMap<String, u32>>,
    entries: RwLock<Vec<DlqEntry>>,
}

impl InMemoryDlqStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DlqStore for InMemoryDlqStore {
    async fn record_failure(&self, signal_id: &str) -> u32 {
        let mut failures = self.failures.write().expect("dlq store poisoned");
        let count = failures.entry(signal_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    async fn failure_count(&self, signal_id: &str) -> u32 {
        *self.failures.read().expect("dlq store poisoned").get(signal_id).unwrap_or(&0)
    }

    async fn write(&self, entry: DlqEntry) -> Result<(), CoreError> {
        self.entries.write().expect("dlq store poisoned").push(entry);
        Ok(())
    }

    async fn list(&self, tenant_id: &str, limit: usize, offset: usize) -> Vec<DlqEntry> {
        let entries = self.entries.read().expect("dlq store poisoned");
        entries
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }

    async fn count(&self, tenant_id: &str) -> usize {
        self.entries
            .read()
            .expect("dlq store poisoned")
            .iter()
            .filter(|e| e.tenant_id == tenant_id)
            .count()
    }

    async fn get(&self, tenant_id: &str, dlq_id: Uuid) -> Option<DlqEntry> {
        self.entries
            .read()
            .expect("dlq store poisoned")
            .iter()
            .find(|e| e.tenant_id == tenant_id && e.dlq_id == dlq_id)
            .cloned()
    }
}

/// §4.1 DLQ policy: an envelope's failure escalates to the dead-letter
/// queue once it has accumulated `threshold` failures for its
/// `error_code`. This applies both to structural violations
/// (`SCHEMA_VIOLATION`, `GOVERNANCE_VIOLATION` — non-retryable, but
/// persistent recurrence still needs a terminal state) and to exhausted
/// retryable downstream failures (`DOWNSTREAM_FAILURE` — "all routing-class
/// fan-outs failed past their attempt limits" DLQs too, per §4.1(b)).
/// Error kinds that are neither (auth, tenant isolation, unregistered
/// producer, …) are never DLQ-eligible — the caller must fix the request.
pub fn should_dlq(error: &CoreError, failure_count: u32, threshold: u32) -> bool {
    error.dlq_eligible() && failure_count >= threshold
}

pub fn build_dlq_entry(
    signal_id: impl Into<String>,
    tenant_id: impl Into<String>,
    producer_id: impl Into<String>,
    signal_type: impl Into<String>,
    error: &CoreError,
    retry_count: u32,
    original_payload_ref: Value,
) -> DlqEntry {
    DlqEntry {
        dlq_id: Uuid::new_v4(),
        signal_id: signal_id.into(),
        tenant_id: tenant_id.into(),
        producer_id: producer_id.into(),
        signal_type: signal_type.into(),
        error_code: error.error_code().to_string(),
        error_message: error.to_string(),
        retry_count,
        original_payload_ref,
        created_at: Utc::now(),
    }
}
