use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use ep_common::envelope::{ProducerRegistration, ProducerStatus};
use ep_common::CoreError;

/// Lookup and mutation surface for producer registrations (§4.1 stage 2,
/// §3). `register` rejects a duplicate `(tenant_id, producer_id)` rather
/// than silently overwriting it — a producer's contract/plane assignment
/// only changes through an explicit status transition or re-registration
/// with a bumped version, never an upsert.
#[async_trait]
pub trait ProducerStore: Send + Sync {
    async fn get(&self, tenant_id: &str, producer_id: &str) -> Option<ProducerRegistration>;
    async fn register(&self, registration: ProducerRegistration) -> Result<(), CoreError>;
    async fn set_status(&self, tenant_id: &str, producer_id: &str, status: ProducerStatus) -> Result<(), CoreError>;
}

#[derive(Default)]
pub struct InMemoryProducerStore {
    producers: RwLock<BTreeMap<(String, String), ProducerRegistration>>,
}

impl InMemoryProducerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProducerStore for InMemoryProducerStore {
    async fn get(&self, tenant_id: &str, producer_id: &str) -> Option<ProducerRegistration> {
        self.producers
            .read()
            .expect("producer store poisoned")
            .get(&(tenant_id.to_string(), producer_id.to_string()))
            .cloned()
    }

    async fn register(&self, registration: ProducerRegistration) -> Result<(), CoreError> {
        let key = (registration.tenant_id.clone(), registration.producer_id.clone());
        let mut producers = self.producers.write().expect("producer store poisoned");
        if producers.contains_key(&key) {
            return Err(CoreError::Duplicate);
        }
        producers.insert(key, registration);
        Ok(())
    }

    async fn set_status(&self, tenant_id: &str, producer_id: &str, status: ProducerStatus) -> Result<(), CoreError> {
        let key = (tenant_id.to_string(), producer_id.to_string());
        let mut producers = self.producers.write().expect("producer store poisoned");
        let registration = producers
            .get_mut(&key)
            .ok_or_else(|| CoreError::ProducerNotRegistered(format!("{tenant_id}/{producer_id}")))?;
        registration.status = status;
        registration.updated_at = Utc::now();
        Ok(())
    }
}

/// Stage 2 check: producer must exist, be active, and its
/// `(signal_kind, signal_type)` must be allowed (§4.1, §9).
pub fn authorize_producer(
    registration: &ProducerRegistration,
    kind: ep_common::envelope::SignalKind,
    signal_type: &str,
) -> Result<(), CoreError> {
    if registration.status != ProducerStatus::Active {
        return Err(CoreError::ProducerNotRegistered(registration.producer_id.clone()));
    }
    if !registration.allowed_signal_kinds.contains(&kind) {
        return Err(CoreError::SignalKindNotAllowed(format!("{kind:?}")));
    }
    if !registration.allowed_signal_types.iter().any(|t| t == signal_type) {
        return Err(CoreError::SignalTypeNotAllowed(signal_type.to_string()));
    }
    Ok(())
}
