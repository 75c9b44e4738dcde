use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use ep_common::alert_types::{Alert, AlertStatus, Severity};
use ep_common::CoreError;
use uuid::Uuid;

/// Filter criteria for `alerts/search` (§6 ingress surface). Every field
/// is optional; an absent field does not constrain the result. `tenant_id`
/// is mandatory at the call site (enforced by the caller, not this
/// struct), never by an empty-means-everyone filter.
#[derive(Debug, Clone, Default)]
pub struct AlertSearchFilter {
    pub component_id: Option<String>,
    pub category: Option<String>,
    pub severity: Option<Severity>,
    pub status: Option<AlertStatus>,
    pub limit: usize,
    pub offset: usize,
}

/// Lookup and mutation surface for alerts (§4.3 ingestion & dedup, §3).
/// `get_by_dedup_key` is the merge-detection lookup; callers must re-run
/// `Alert::refresh_snooze` on anything read through here before trusting
/// its `status`, since snooze expiry is evaluated lazily on read.
#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn get(&self, tenant_id: &str, alert_id: Uuid) -> Option<Alert>;
    async fn get_by_dedup_key(&self, tenant_id: &str, dedup_key: &str) -> Option<Alert>;
    async fn upsert(&self, alert: Alert) -> Result<(), CoreError>;

    /// Tenant-scoped paginated search (§6 `POST alerts/search`). Newest
    /// `started_at` first.
    async fn search(&self, tenant_id: &str, filter: &AlertSearchFilter) -> Vec<Alert>;
}

#[derive(Default)]
pub struct InMemoryAlertStore {
    by_id: RwLock<BTreeMap<(String, Uuid), Alert>>,
    by_dedup_key: RwLock<BTreeMap<(String, String), Uuid>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn get(&self, tenant_id: &str, alert_id: Uuid) -> Option<Alert> {
        self.by_id
            .read()
            .expect("alert store poisoned")
            .get(&(tenant_id.to_string(), alert_id))
            .cloned()
    }

    async fn get_by_dedup_key(&self, tenant_id: &str, dedup_key: &str) -> Option<Alert> {
        let id = *self
            .by_dedup_key
            .read()
            .expect("alert store poisoned")
            .get(&(tenant_id.to_string(), dedup_key.to_string()))?;
        self.get(tenant_id, id).await
    }

    async fn upsert(&self, alert: Alert) -> Result<(), CoreError> {
        let tenant_key = (alert.tenant_id.clone(), alert.alert_id);
        let dedup_key = (alert.tenant_id.clone(), alert.dedup_key.clone());
        self.by_dedup_key.write().expect("alert store poisoned").insert(dedup_key, alert.alert_id);
        self.by_id.write().expect("alert store poisoned").insert(tenant_key, alert);
        Ok(())
    }

    async fn search(&self, tenant_id: &str, filter: &AlertSearchFilter) -> Vec<Alert> {
        let mut matches: Vec<Alert> = self
            .by_id
            .read()
            .expect("alert store poisoned")
            .values()
            .filter(|a| a.tenant_id == tenant_id)
            .filter(|a| filter.component_id.as_deref().map_or(true, |c| c == a.component_id))
            .filter(|a| filter.category.as_deref().map_or(true, |c| c == a.category))
            .filter(|a| filter.severity.map_or(true, |s| s == a.severity))
            .filter(|a| filter.status.map_or(true, |s| s == a.status))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        let limit = if filter.limit == 0 { matches.len() } else { filter.limit };
        matches.into_iter().skip(filter.offset).take(limit).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ep_common::alert_types::{AlertStatus, Severity};

    fn alert(dedup_key: &str) -> Alert {
        Alert {
            alert_id: Uuid::new_v4(),
            tenant_id: "tenant-a".to_string(),
            source_module: "sin".to_string(),
            component_id: "api".to_string(),
            severity: Severity::P2,
            category: "latency".to_string(),
            summary: "p99 high".to_string(),
            labels: BTreeMap::new(),
            started_at: Utc::now(),
            ended_at: None,
            last_seen_at: Utc::now(),
            dedup_key: dedup_key.to_string(),
            incident_id: None,
            status: AlertStatus::Open,
            snoozed_until: None,
            automation_hooks: vec![],
            escalation_policy_id: None,
            plane: None,
        }
    }

    #[tokio::test]
    async fn upsert_then_get_by_dedup_key_round_trips() {
        let store = InMemoryAlertStore::new();
        let a = alert("dk-1");
        let id = a.alert_id;
        store.upsert(a).await.unwrap();
        let found = store.get_by_dedup_key("tenant-a", "dk-1").await.unwrap();
        assert_eq!(found.alert_id, id);
    }

    #[tokio::test]
    async fn cross_tenant_dedup_lookup_misses() {
        let store = InMemoryAlertStore::new();
        store.upsert(alert("dk-1")).await.unwrap();
        assert!(store.get_by_dedup_key("tenant-b", "dk-1").await.is_none());
    }

    #[tokio::test]
    async fn search_filters_by_severity_and_excludes_other_tenants() {
        let store = InMemoryAlertStore::new();
        store.upsert(alert("dk-1")).await.unwrap();
        let mut other = alert("dk-2");
        other.severity = Severity::P0;
        store.upsert(other).await.unwrap();
        let mut cross_tenant = alert("dk-3");
        cross_tenant.tenant_id = "tenant-b".to_string();
        store.upsert(cross_tenant).await.unwrap();

        let results = store
            .search(
                "tenant-a",
                &AlertSearchFilter {
                    severity: Some(Severity::P0),
                    limit: 10,
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].severity, Severity::P0);
    }
}
