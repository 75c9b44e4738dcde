use std::sync::Arc;

use chrono::Utc;
use ep_common::envelope::{IngestResult, SignalEnvelope};
use ep_common::CoreError;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::contract::{missing_required_fields, normalize_payload, ContractStore};
use crate::dedup::{DedupGate, SequenceTracker};
use crate::dlq::{build_dlq_entry, should_dlq, DlqStore};
use crate::error::SinError;
use crate::governance::{apply_governance, GovernanceRules};
use crate::producer_registry::{authorize_producer, ProducerStore};
use crate::routing::{fan_out, RoutingConsumer};

pub const MAX_BATCH_SIZE: usize = 1000;

/// Wires every stage of §4.1 into a single `ingest` entry point:
/// 1. tenant scoping (caller-asserted, verified on every store lookup)
/// 2. producer authorization
/// 3. contract field presence
/// 4. governance (PII/secrets)
/// 5. dedup
/// 6. sequence_no ordering warning (non-fatal)
/// 7. field mapping / unit conversion normalization
/// 8-9. routing classification + fan-out
/// 10. DLQ escalation on persistent failure
pub struct SinPipeline {
    pub contracts: Arc<dyn ContractStore>,
    pub producers: Arc<dyn ProducerStore>,
    pub dlq: Arc<dyn DlqStore>,
    pub dedup: Arc<DedupGate>,
    pub sequence: Arc<SequenceTracker>,
    pub governance: GovernanceRules,
    pub consumers: Vec<Arc<dyn RoutingConsumer>>,
    pub dlq_failure_threshold: u32,
    pub routing_max_attempts: u32,
}

impl SinPipeline {
    pub async fn ingest_batch(&self, batch: Vec<SignalEnvelope>, tenant_id: &str) -> Result<Vec<IngestResult>, SinError> {
        if batch.len() > MAX_BATCH_SIZE {
            return Err(SinError::BatchTooLarge(batch.len(), MAX_BATCH_SIZE));
        }

        let mut results = Vec::with_capacity(batch.len());
        for envelope in batch {
            results.push(self.ingest_one(envelope, tenant_id).await);
        }
        Ok(results)
    }

    async fn ingest_one(&self, mut envelope: SignalEnvelope, tenant_id: &str) -> IngestResult {
        if envelope.tenant_id != tenant_id {
            warn!(
                signal_id = %envelope.signal_id,
                asserted_tenant = %tenant_id,
                envelope_tenant = %envelope.tenant_id,
                "tenant isolation violation on ingest"
            );
            return IngestResult::rejected(
                envelope.signal_id,
                CoreError::TenantIsolationViolation(envelope.tenant_id.clone()).error_code(),
                "envelope tenant_id does not match asserted tenant",
            );
        }

        let registration = match self.producers.get(tenant_id, &envelope.producer_id).await {
            Some(r) => r,
            None => {
                return IngestResult::rejected(
                    envelope.signal_id,
                    CoreError::ProducerNotRegistered(envelope.producer_id.clone()).error_code(),
                    "producer not registered for tenant",
                )
            }
        };

        if let Err(e) = authorize_producer(&registration, envelope.signal_kind, &envelope.signal_type) {
            return self.reject_or_dlq(envelope, e).await;
        }

        let contract_version = registration
            .contract_versions
            .get(&envelope.signal_type)
            .cloned()
            .unwrap_or_else(|| envelope.schema_version.clone());

        let contract = match self.contracts.get(&envelope.signal_type, &contract_version).await {
            Some(c) => c,
            None => {
                let err = CoreError::SchemaViolation(format!(
                    "no contract published for {}@{}",
                    envelope.signal_type, contract_version
                ));
                return self.reject_or_dlq(envelope, err).await;
            }
        };

        let missing = missing_required_fields(&contract, &envelope.payload);
        if !missing.is_empty() {
            let err = CoreError::SchemaViolation(format!("missing required fields: {}", missing.join(", ")));
            return self.reject_or_dlq(envelope, err).await;
        }

        let governed = apply_governance(&contract, &self.governance, &envelope.payload);
        if let Some(violation) = governed.violation {
            let err = CoreError::GovernanceViolation(violation);
            return self.reject_or_dlq(envelope, err).await;
        }
        envelope.payload = governed.payload;

        if self.dedup.is_duplicate(&envelope) {
            return IngestResult::rejected(envelope.signal_id, CoreError::Duplicate.error_code(), "duplicate signal");
        }

        let out_of_order = match envelope.sequence_no {
            Some(seq) => self.sequence.observe(&envelope.producer_id, &envelope.signal_type, seq),
            None => false,
        };

        envelope.payload = normalize_payload(&contract, &envelope.payload);
        envelope.ingested_at = Utc::now();

        let mut result = IngestResult::accepted(envelope.signal_id.clone());
        for warning in governed.warnings {
            result = result.with_warning(warning);
        }
        if out_of_order {
            result = result.with_warning("out_of_order: sequence_no regressed for this producer/signal_type".to_string());
        }

        let failures = fan_out(&envelope, &self.consumers, self.routing_max_attempts).await;
        if !failures.is_empty() {
            let worst = failures
                .into_iter()
                .find(|e| e.dlq_eligible())
                .unwrap_or(CoreError::DownstreamFailure("routing fan-out failed".to_string()));
            return self.reject_or_dlq(envelope, worst).await;
        }

        info!(signal_id = %envelope.signal_id, tenant_id = %tenant_id, "signal accepted");
        result
    }

    async fn reject_or_dlq(&self, envelope: SignalEnvelope, error: CoreError) -> IngestResult {
        let attempts = self.dlq.record_failure(&envelope.signal_id).await;

        if should_dlq(&error, attempts, self.dlq_failure_threshold) {
            let entry = build_dlq_entry(
                envelope.signal_id.clone(),
                envelope.tenant_id.clone(),
                envelope.producer_id.clone(),
                envelope.signal_type.clone(),
                &error,
                attempts,
                Value::Object(envelope.payload.clone().into_iter().collect()),
            );
            let dlq_id = entry.dlq_id;
            if let Err(store_err) = self.dlq.write(entry).await {
                warn!(signal_id = %envelope.signal_id, error = %store_err, "failed to persist dlq entry");
            }
            return IngestResult::dlq(envelope.signal_id, error.error_code(), error.to_string(), dlq_id);
        }

        IngestResult::rejected(envelope.signal_id, error.error_code(), error.to_string())
    }
}

pub fn new_signal_id() -> String {
    Uuid::new_v4().to_string()
}
