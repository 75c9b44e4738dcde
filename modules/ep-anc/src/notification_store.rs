use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ep_common::alert_types::{Notification, NotificationStatus};
use ep_common::CoreError;
use uuid::Uuid;

/// Lookup and mutation surface for notifications (§4.3 escalation +
/// dispatch, §3). Escalation steps 2..N and retry attempts are both driven
/// off rows in this store rather than a separate timer table — a step k's
/// schedule is a stub row (`escalation_step = Some(k)`, `status =
/// pending`) and a dispatch retry is a live row whose `next_attempt_at` is
/// in the past, per the "next_attempt_at on a stub notification" wording
/// in §4.3.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn get(&self, tenant_id: &str, notification_id: Uuid) -> Option<Notification>;
    async fn create(&self, notification: Notification) -> Result<(), CoreError>;
    async fn update(&self, notification: Notification) -> Result<(), CoreError>;

    /// Stub rows representing a not-yet-executed escalation step whose
    /// `next_attempt_at` has arrived.
    async fn list_due_escalation_steps(&self, now: DateTime<Utc>) -> Vec<Notification>;

    /// Live notifications in `pending` whose retry `next_attempt_at` has
    /// arrived.
    async fn list_due_retries(&self, now: DateTime<Utc>) -> Vec<Notification>;

    /// Notifications dispatched for `incident_id` since `since`, used by
    /// the incident-suppression fatigue rule.
    async fn list_by_incident_since(&self, tenant_id: &str, incident_id: Uuid, since: DateTime<Utc>) -> Vec<Notification>;
}

#[derive(Default)]
pub struct InMemoryNotificationStore {
    notifications: RwLock<BTreeMap<(String, Uuid), Notification>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn get(&self, tenant_id: &str, notification_id: Uuid) -> Option<Notification> {
        self.notifications
            .read()
            .expect("notification store poisoned")
            .get(&(tenant_id.to_string(), notification_id))
            .cloned()
    }

    async fn create(&self, notification: Notification) -> Result<(), CoreError> {
        self.notifications
            .write()
            .expect("notification store poisoned")
            .insert((notification.tenant_id.clone(), notification.notification_id), notification);
        Ok(())
    }

    async fn update(&self, notification: Notification) -> Result<(), CoreError> {
        self.notifications
            .write()
            .expect("notification store poisoned")
            .insert((notification.tenant_id.clone(), notification.notification_id), notification);
        Ok(())
    }

    async fn list_due_escalation_steps(&self, now: DateTime<Utc>) -> Vec<Notification> {
        self.notifications
            .read()
            .expect("notification store poisoned")
            .values()
            .filter(|n| {
                n.escalation_step.is_some()
                    && n.status == NotificationStatus::Pending
                    && n.next_attempt_at.map(|t| t <= now).unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    async fn list_due_retries(&self, now: DateTime<Utc>) -> Vec<Notification> {
        self.notifications
            .read()
            .expect("notification store poisoned")
            .values()
            .filter(|n| {
                n.escalation_step.is_none()
                    && n.status == NotificationStatus::Pending
                    && n.attempts > 0
                    && n.next_attempt_at.map(|t| t <= now).unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    async fn list_by_incident_since(&self, tenant_id: &str, incident_id: Uuid, since: DateTime<Utc>) -> Vec<Notification> {
        self.notifications
            .read()
            .expect("notification store poisoned")
            .values()
            .filter(|n| n.tenant_id == tenant_id && n.incident_id == Some(incident_id) && n.created_at >= since)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub(escalation_step: Option<u32>, status: NotificationStatus, next_attempt_at: Option<DateTime<Utc>>, attempts: u32) -> Notification {
        Notification {
            notification_id: Uuid::new_v4(),
            tenant_id: "tenant-a".to_string(),
            alert_id: Uuid::new_v4(),
            incident_id: None,
            target_id: "user-1".to_string(),
            channel: ep_common::alert_types::Channel::Email,
            status,
            attempts,
            next_attempt_at,
            failure_reason: None,
            policy_id: None,
            escalation_step,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn due_escalation_steps_excludes_not_yet_due() {
        let store = InMemoryNotificationStore::new();
        let now = Utc::now();
        store.create(stub(Some(2), NotificationStatus::Pending, Some(now - chrono::Duration::seconds(1)), 0)).await.unwrap();
        store.create(stub(Some(3), NotificationStatus::Pending, Some(now + chrono::Duration::hours(1)), 0)).await.unwrap();
        let due = store.list_due_escalation_steps(now).await;
        assert_eq!(due.len(), 1);
    }

    #[tokio::test]
    async fn due_retries_requires_escalation_step_none_and_attempts_positive() {
        let store = InMemoryNotificationStore::new();
        let now = Utc::now();
        store.create(stub(None, NotificationStatus::Pending, Some(now - chrono::Duration::seconds(1)), 1)).await.unwrap();
        store.create(stub(Some(2), NotificationStatus::Pending, Some(now - chrono::Duration::seconds(1)), 0)).await.unwrap();
        let due = store.list_due_retries(now).await;
        assert_eq!(due.len(), 1);
    }
}
