use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ep_common::alert_types::Incident;
use ep_common::CoreError;
use uuid::Uuid;

/// Lookup and mutation surface for incidents (§4.3 correlation, §3).
/// `list_open_since` is the correlation-window scan: open incidents for a
/// tenant whose `opened_at` is no older than the cutoff.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn get(&self, tenant_id: &str, incident_id: Uuid) -> Option<Incident>;
    async fn list_open_since(&self, tenant_id: &str, cutoff: DateTime<Utc>) -> Vec<Incident>;
    async fn upsert(&self, incident: Incident) -> Result<(), CoreError>;
}

#[derive(Default)]
pub struct InMemoryIncidentStore {
    incidents: RwLock<BTreeMap<(String, Uuid), Incident>>,
}

impl InMemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IncidentStore for InMemoryIncidentStore {
    async fn get(&self, tenant_id: &str, incident_id: Uuid) -> Option<Incident> {
        self.incidents
            .read()
            .expect("incident store poisoned")
            .get(&(tenant_id.to_string(), incident_id))
            .cloned()
    }

    async fn list_open_since(&self, tenant_id: &str, cutoff: DateTime<Utc>) -> Vec<Incident> {
        self.incidents
            .read()
            .expect("incident store poisoned")
            .values()
            .filter(|i| {
                i.tenant_id == tenant_id
                    && i.status != ep_common::alert_types::IncidentStatus::Resolved
                    && i.opened_at >= cutoff
            })
            .cloned()
            .collect()
    }

    async fn upsert(&self, incident: Incident) -> Result<(), CoreError> {
        self.incidents
            .write()
            .expect("incident store poisoned")
            .insert((incident.tenant_id.clone(), incident.incident_id), incident);
        Ok(())
    }
}
