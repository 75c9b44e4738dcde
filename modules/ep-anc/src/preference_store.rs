use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use ep_common::alert_types::NotificationPreference;
use ep_common::CoreError;

/// Per-user dispatch preferences (§2 "Preferences", §4.3 fatigue control).
#[async_trait]
pub trait NotificationPreferenceStore: Send + Sync {
    async fn get(&self, tenant_id: &str, target_id: &str) -> Option<NotificationPreference>;
    async fn upsert(&self, preference: NotificationPreference) -> Result<(), CoreError>;
}

#[derive(Default)]
pub struct InMemoryNotificationPreferenceStore {
    preferences: RwLock<BTreeMap<(String, String), NotificationPreference>>,
}

impl InMemoryNotificationPreferenceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationPreferenceStore for InMemoryNotificationPreferenceStore {
    async fn get(&self, tenant_id: &str, target_id: &str) -> Option<NotificationPreference> {
        self.preferences
            .read()
            .expect("preference store poisoned")
            .get(&(tenant_id.to_string(), target_id.to_string()))
            .cloned()
    }

    async fn upsert(&self, preference: NotificationPreference) -> Result<(), CoreError> {
        self.preferences
            .write()
            .expect("preference store poisoned")
            .insert((preference.tenant_id.clone(), preference.target_id.clone()), preference);
        Ok(())
    }
}
