use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use ep_common::alert_types::{Alert, Channel, Notification, NotificationStatus};
use ep_common::policy::{FallbackPolicy, RetryPolicy};
use tracing::{info, warn};
use uuid::Uuid;

use crate::collaborators::ChannelDispatcher;
use crate::error::AncError;
use crate::fatigue::preference_allows;
use crate::notification_store::NotificationStore;
use crate::preference_store::NotificationPreferenceStore;
use crate::stream::{EventStreamBroker, StreamEvent};

/// Creates and dispatches notifications per §4.3 "Notification dispatch".
/// Owns the retry/fallback state machine; the escalation scheduler and the
/// retry worker both funnel through `create_and_dispatch` /
/// `attempt_dispatch` so the rules only live in one place.
pub struct DispatchService {
    pub notifications: Arc<dyn NotificationStore>,
    pub preferences: Arc<dyn NotificationPreferenceStore>,
    pub channels: Arc<dyn ChannelDispatcher>,
    pub stream: Arc<EventStreamBroker>,
    pub retry_policy: RetryPolicy,
    pub fallback_policy: FallbackPolicy,
}

impl DispatchService {
    /// Creates one Notification for `(target_id, channel)` and attempts
    /// its first delivery immediately (§4.3 escalation step execution:
    /// "creates one Notification per (target, channel) and dispatches
    /// immediately").
    pub async fn create_and_dispatch(&self, alert: &Alert, target_id: &str, channel: Channel, policy_id: Option<String>) -> Result<(), AncError> {
        let now = Utc::now();
        let notification = Notification {
            notification_id: Uuid::new_v4(),
            tenant_id: alert.tenant_id.clone(),
            alert_id: alert.alert_id,
            incident_id: alert.incident_id,
            target_id: target_id.to_string(),
            channel,
            status: NotificationStatus::Pending,
            attempts: 0,
            next_attempt_at: None,
            failure_reason: None,
            policy_id,
            escalation_step: None,
            created_at: now,
            updated_at: now,
        };
        self.notifications.create(notification.clone()).await?;
        self.attempt_dispatch(alert.clone(), notification).await
    }

    /// Runs one delivery attempt for an existing notification row,
    /// applying the preference gate first and the retry/fallback ladder
    /// on failure (§4.3 steps 1-5). Boxed so the fallback branch can
    /// recurse into `create_and_dispatch` without an infinitely-sized
    /// future type.
    pub fn attempt_dispatch<'a>(&'a self, alert: Alert, notification: Notification) -> Pin<Box<dyn std::future::Future<Output = Result<(), AncError>> + Send + 'a>> {
        Box::pin(async move {
            let mut notification = notification;
            let now = Utc::now();

            if let Some(pref) = self.preferences.get(&notification.tenant_id, &notification.target_id).await {
                if !preference_allows(&pref, notification.channel, alert.severity, now) {
                    notification.status = NotificationStatus::Cancelled;
                    notification.failure_reason = Some("quiet_hours_or_preference".to_string());
                    notification.updated_at = now;
                    self.notifications.update(notification.clone()).await?;
                    self.stream.publish(StreamEvent::notification_cancelled(&notification));
                    return Ok(());
                }
            }

            match self.channels.send(&notification).await {
                Ok(()) => {
                    notification.status = NotificationStatus::Sent;
                    notification.updated_at = now;
                    self.notifications.update(notification.clone()).await?;
                    info!(notification_id = %notification.notification_id, channel = ?notification.channel, "notification sent");
                    self.stream.publish(StreamEvent::notification_sent(&notification));
                    Ok(())
                }
                Err(e) => {
                    notification.attempts += 1;
                    let rule = self.retry_policy.rule_for(notification.channel, alert.severity);

                    if notification.attempts < rule.max_attempts {
                        let delay = rule.backoff_for_attempt(notification.attempts);
                        notification.next_attempt_at = Some(now + chrono::Duration::seconds(delay as i64));
                        notification.updated_at = now;
                        warn!(notification_id = %notification.notification_id, error = %e, attempts = notification.attempts, "dispatch failed, scheduled retry");
                        self.notifications.update(notification).await?;
                        return Ok(());
                    }

                    let fallback_channels = self.fallback_policy.channels_for(alert.severity, notification.channel);
                    match fallback_channels.first() {
                        Some(next_channel) => {
                            notification.status = NotificationStatus::Failed;
                            notification.failure_reason = Some("exhausted_retries_fallback_created".to_string());
                            notification.updated_at = now;
                            let target_id = notification.target_id.clone();
                            let policy_id = notification.policy_id.clone();
                            self.notifications.update(notification).await?;
                            self.create_and_dispatch(&alert, &target_id, *next_channel, policy_id).await
                        }
                        None => {
                            notification.status = NotificationStatus::Failed;
                            notification.failure_reason = Some("exhausted_retries_no_fallback".to_string());
                            notification.updated_at = now;
                            self.notifications.update(notification.clone()).await?;
                            self.stream.publish(StreamEvent::notification_failed(&notification));
                            Ok(())
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::RecordingChannelDispatcher;
    use crate::notification_store::InMemoryNotificationStore;
    use crate::preference_store::InMemoryNotificationPreferenceStore;
    use ep_common::alert_types::Severity;
    use ep_common::policy::{FallbackPolicy, RetryPolicy, RetryRule};
    use std::collections::BTreeMap;

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
            status: ep_common::alert_types::AlertStatus::Open,
            snoozed_until: None,
            automation_hooks: vec![],
            escalation_policy_id: None,
            plane: None,
        }
    }

    fn service(channels: Arc<dyn ChannelDispatcher>) -> DispatchService {
        DispatchService {
            notifications: Arc::new(InMemoryNotificationStore::new()),
            preferences: Arc::new(InMemoryNotificationPreferenceStore::new()),
            channels,
            stream: Arc::new(EventStreamBroker::new(64)),
            retry_policy: RetryPolicy {
                defaults: RetryRule { max_attempts: 1, backoff_intervals_secs: vec![1] },
                by_channel: BTreeMap::new(),
                by_severity: BTreeMap::new(),
            },
            fallback_policy: FallbackPolicy { defaults: vec![Channel::Email], by_severity: BTreeMap::new() },
        }
    }

    #[tokio::test]
    async fn successful_send_marks_notification_sent() {
        let dispatcher = Arc::new(RecordingChannelDispatcher::new());
        let svc = service(dispatcher.clone());
        svc.create_and_dispatch(&alert(), "user-1", Channel::Sms, None).await.unwrap();
        assert_eq!(dispatcher.sent().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_creates_fallback_notification() {
        let dispatcher = Arc::new(RecordingChannelDispatcher::failing([Channel::Sms]));
        let svc = service(dispatcher.clone());
        svc.create_and_dispatch(&alert(), "user-1", Channel::Sms, None).await.unwrap();
        // Sms always fails; with max_attempts=1 the first failure exhausts retries and a fallback to Email should fire and succeed.
        let sent = dispatcher.sent();
        assert!(sent.iter().any(|(c, _)| *c == Channel::Email));
    }
}
