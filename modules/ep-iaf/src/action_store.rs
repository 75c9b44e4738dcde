use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use ep_common::action_types::{ActionStatus, NormalisedAction};
use ep_common::CoreError;
use uuid::Uuid;

/// Persistence for `NormalisedAction`, uniquely keyed by `(tenant_id,
/// idempotency_key)` (§3 invariant, §8 "action idempotency"). `insert_new`
/// must be atomic with respect to concurrent callers racing the same key —
/// the in-memory store below serializes through its single write lock;
/// a Postgres-backed store would rely on the `(idempotency_key, tenant_id)
/// UNIQUE` index from §6.
#[async_trait]
pub trait ActionStore: Send + Sync {
    /// Insert a new action with `status = processing`, or return the
    /// existing action if `(tenant_id, idempotency_key)` was already seen.
    /// The caller distinguishes "I created it" from "it already existed"
    /// via the returned `bool`.
    async fn insert_or_get_existing(&self, action: NormalisedAction) -> (NormalisedAction, bool);

    async fn mark_completed(&self, action_id: Uuid, response_payload: serde_json::Value) -> Result<(), CoreError>;

    async fn mark_failed(&self, action_id: Uuid, reason: &str) -> Result<(), CoreError>;

    async fn get(&self, tenant_id: &str, action_id: Uuid) -> Option<NormalisedAction>;
}

#[derive(Default)]
pub struct InMemoryActionStore {
    by_key: RwLock<BTreeMap<(String, String), Uuid>>,
    actions: RwLock<BTreeMap<Uuid, NormalisedAction>>,
}

impl InMemoryActionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ActionStore for InMemoryActionStore {
    async fn insert_or_get_existing(&self, action: NormalisedAction) -> (NormalisedAction, bool) {
        let key = (action.tenant_id.clone(), action.idempotency_key.clone());
        let mut by_key = self.by_key.write().expect("action store poisoned");

        if let Some(existing_id) = by_key.get(&key) {
            let actions = self.actions.read().expect("action store poisoned");
            return (actions.get(existing_id).expect("dangling action index").clone(), false);
        }

        by_key.insert(key, action.action_id);
        self.actions
            .write()
            .expect("action store poisoned")
            .insert(action.action_id, action.clone());
        (action, true)
    }

    async fn mark_completed(&self, action_id: Uuid, response_payload: serde_json::Value) -> Result<(), CoreError> {
        let mut actions = self.actions.write().expect("action store poisoned");
        let action = actions
            .get_mut(&action_id)
            .ok_or_else(|| CoreError::NotFound(action_id.to_string()))?;
        action.status = ActionStatus::Completed;
        action.response_payload = Some(response_payload);
        action.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_failed(&self, action_id: Uuid, reason: &str) -> Result<(), CoreError> {
        let mut actions = self.actions.write().expect("action store poisoned");
        let action = actions
            .get_mut(&action_id)
            .ok_or_else(|| CoreError::NotFound(action_id.to_string()))?;
        action.status = ActionStatus::Failed;
        action.response_payload = Some(serde_json::json!({ "error": reason }));
        action.updated_at = Utc::now();
        Ok(())
    }

    async fn get(&self, tenant_id: &str, action_id: Uuid) -> Option<NormalisedAction> {
        self.actions
            .read()
            .expect("action store poisoned")
            .get(&action_id)
            .filter(|a| a.tenant_id == tenant_id)
            .cloned()
    }
}
