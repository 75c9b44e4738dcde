use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::alert_store::AlertStore;
use crate::dispatch::DispatchService;
use crate::notification_store::NotificationStore;

/// Periodic sweep of notifications in `pending` whose retry
/// `next_attempt_at` has arrived (§4.3 dispatch step 3, §5 background
/// worker #3: "Notification retry worker — periodic sweep of
/// notifications in pending with ready next_attempt_at; dispatches
/// retries"). Distinct from `EscalationScheduler`: this worker re-drives
/// an already-created Notification through another `attempt_dispatch`,
/// it does not create new rows from a policy step.
pub struct NotificationRetryWorker {
    pub alerts: Arc<dyn AlertStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub dispatch: Arc<DispatchService>,
    pub worker_pool_size: usize,
    pub tick_interval: StdDuration,
}

impl NotificationRetryWorker {
    pub fn new(alerts: Arc<dyn AlertStore>, notifications: Arc<dyn NotificationStore>, dispatch: Arc<DispatchService>) -> Self {
        Self {
            alerts,
            notifications,
            dispatch,
            worker_pool_size: 16,
            tick_interval: StdDuration::from_secs(15),
        }
    }

    /// Returns the number of retries attempted this tick.
    pub async fn tick(&self) -> usize {
        let due = self.notifications.list_due_retries(Utc::now()).await;
        let semaphore = Arc::new(Semaphore::new(self.worker_pool_size));
        let mut handles = Vec::new();

        for notification in due {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
            let alerts = self.alerts.clone();
            let dispatch = self.dispatch.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let alert = match alerts.get(&notification.tenant_id, notification.alert_id).await {
                    Some(a) => a,
                    None => {
                        warn!(alert_id = %notification.alert_id, "retry due for notification whose alert no longer exists");
                        return;
                    }
                };
                if let Err(e) = dispatch.attempt_dispatch(alert, notification.clone()).await {
                    warn!(notification_id = %notification.notification_id, error = %e, "notification retry attempt failed");
                }
            }));
        }

        let total = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "retry worker task panicked");
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert_store::InMemoryAlertStore;
    use crate::collaborators::RecordingChannelDispatcher;
    use crate::preference_store::InMemoryNotificationPreferenceStore;
    use crate::stream::EventStreamBroker;
    use ep_common::alert_types::{Alert, AlertStatus, Channel, Notification, NotificationStatus, Severity};
    use ep_common::policy::{FallbackPolicy, RetryPolicy, RetryRule};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn alert() -> Alert {
        Alert {
            alert_id: Uuid::new_v4(),
            tenant_id: "tenant-a".to_string(),
            source_module: "anc".to_string(),
            component_id: "api".to_string(),
            severity: Severity::P1,
            category: "latency".to_string(),
            summary: "p99 high".to_string(),
            labels: BTreeMap::new(),
            started_at: Utc::now(),
            ended_at: None,
            last_seen_at: Utc::now(),
            dedup_key: "dk-1".to_string(),
            incident_id: None,
            status: AlertStatus::Open,
            snoozed_until: None,
            automation_hooks: vec![],
            escalation_policy_id: None,
            plane: None,
        }
    }

    #[tokio::test]
    async fn due_retry_is_redispatched_and_succeeds() {
        use crate::notification_store::InMemoryNotificationStore;

        let alerts = Arc::new(InMemoryAlertStore::new());
        let notifications = Arc::new(InMemoryNotificationStore::new());
        let dispatcher = Arc::new(RecordingChannelDispatcher::new());
        let dispatch = Arc::new(DispatchService {
            notifications: notifications.clone(),
            preferences: Arc::new(InMemoryNotificationPreferenceStore::new()),
            channels: dispatcher.clone(),
            stream: Arc::new(EventStreamBroker::new(64)),
            retry_policy: RetryPolicy {
                defaults: RetryRule { max_attempts: 3, backoff_intervals_secs: vec![1, 1, 1] },
                by_channel: BTreeMap::new(),
                by_severity: BTreeMap::new(),
            },
            fallback_policy: FallbackPolicy { defaults: vec![Channel::Email], by_severity: BTreeMap::new() },
        });

        let a = alert();
        alerts.upsert(a.clone()).await.unwrap();

        let notification = Notification {
            notification_id: Uuid::new_v4(),
            tenant_id: a.tenant_id.clone(),
            alert_id: a.alert_id,
            incident_id: None,
            target_id: "user-1".to_string(),
            channel: Channel::Sms,
            status: NotificationStatus::Pending,
            attempts: 1,
            next_attempt_at: Some(Utc::now() - chrono::Duration::seconds(1)),
            failure_reason: None,
            policy_id: None,
            escalation_step: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        notifications.create(notification).await.unwrap();

        let worker = NotificationRetryWorker::new(alerts, notifications, dispatch);
        let attempted = worker.tick().await;
        assert_eq!(attempted, 1);
        assert_eq!(dispatcher.sent().len(), 1);
    }
}
