use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ep_common::alert_types::{Alert, Notification, Severity};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

/// Idle subscribers receive a synthesized `heartbeat` event after this long
/// without a matching event (§4.3 "Event stream").
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// One event on the alert stream (§4.3, §6 "Event stream (SSE)"). `alert`
/// carries the full canonical Alert for the `alert.*` event types; the
/// `notification.*` event types carry `notification` instead — an
/// enrichment over the baseline enumerated `event_type` set, surfaced on
/// the same broker so operators can observe dispatch outcomes without a
/// separate feed (§1.2 ambient observability).
#[derive(Debug, Clone, Serialize)]
pub struct StreamEvent {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub tenant_id: String,
    #[serde(skip)]
    pub component_id: Option<String>,
    #[serde(skip)]
    pub category: Option<String>,
    #[serde(skip)]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alert: Option<Alert>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
}

impl StreamEvent {
    fn from_alert(event_type: &str, alert: &Alert) -> Self {
        Self {
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            tenant_id: alert.tenant_id.clone(),
            component_id: Some(alert.component_id.clone()),
            category: Some(alert.category.clone()),
            severity: Some(alert.severity),
            alert: Some(alert.clone()),
            notification: None,
        }
    }

    pub fn alert_created(alert: &Alert) -> Self {
        Self::from_alert("alert.created", alert)
    }

    pub fn alert_updated(alert: &Alert) -> Self {
        Self::from_alert("alert.updated", alert)
    }

    pub fn alert_acknowledged(alert: &Alert) -> Self {
        Self::from_alert("alert.acknowledged", alert)
    }

    pub fn alert_resolved(alert: &Alert) -> Self {
        Self::from_alert("alert.resolved", alert)
    }

    pub fn alert_snoozed(alert: &Alert) -> Self {
        Self::from_alert("alert.snoozed", alert)
    }

    pub fn alert_unsnoozed(alert: &Alert) -> Self {
        Self::from_alert("alert.unsnoozed", alert)
    }

    fn from_notification(event_type: &str, notification: &Notification) -> Self {
        Self {
            event_type: event_type.to_string(),
            timestamp: Utc::now(),
            tenant_id: notification.tenant_id.clone(),
            component_id: None,
            category: None,
            severity: None,
            alert: None,
            notification: Some(notification.clone()),
        }
    }

    pub fn notification_sent(notification: &Notification) -> Self {
        Self::from_notification("notification.sent", notification)
    }

    pub fn notification_cancelled(notification: &Notification) -> Self {
        Self::from_notification("notification.cancelled", notification)
    }

    pub fn notification_failed(notification: &Notification) -> Self {
        Self::from_notification("notification.failed", notification)
    }

    pub fn heartbeat() -> Self {
        Self {
            event_type: "heartbeat".to_string(),
            timestamp: Utc::now(),
            tenant_id: String::new(),
            component_id: None,
            category: None,
            severity: None,
            alert: None,
            notification: None,
        }
    }

    fn is_heartbeat(&self) -> bool {
        self.event_type == "heartbeat"
    }
}

/// Subscription filter (§4.3, §6: query params accept comma-separated
/// lists). An empty set on any field means "no restriction" for that
/// field. `heartbeat` always passes regardless of the other criteria.
#[derive(Debug, Clone, Default)]
pub struct StreamFilter {
    pub tenant_ids: BTreeSet<String>,
    pub component_ids: BTreeSet<String>,
    pub categories: BTreeSet<String>,
    pub severities: BTreeSet<Severity>,
    pub event_types: BTreeSet<String>,
}

impl StreamFilter {
    pub fn matches(&self, event: &StreamEvent) -> bool {
        if event.is_heartbeat() {
            return true;
        }
        if !self.tenant_ids.is_empty() && !self.tenant_ids.contains(&event.tenant_id) {
            return false;
        }
        if !self.component_ids.is_empty() {
            match &event.component_id {
                Some(c) if self.component_ids.contains(c) => {}
                _ => return false,
            }
        }
        if !self.categories.is_empty() {
            match &event.category {
                Some(c) if self.categories.contains(c) => {}
                _ => return false,
            }
        }
        if !self.severities.is_empty() {
            match event.severity {
                Some(s) if self.severities.contains(&s) => {}
                _ => return false,
            }
        }
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        true
    }
}

/// Fan-out broker for the alert/notification stream (§4.3 "Event stream").
/// Backed by a `tokio::sync::broadcast` channel, which gives the bounded
/// drop-oldest queue required here: a slow subscriber that falls more
/// than `capacity` events behind loses the oldest ones rather than
/// blocking the publisher (§5 "stream subscriber sends (bounded)" is the
/// one blocking point allowed here, and only up to that bound).
pub struct EventStreamBroker {
    sender: broadcast::Sender<Arc<StreamEvent>>,
}

impl EventStreamBroker {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: StreamEvent) {
        // No active subscribers is not an error; the event is simply dropped.
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self, filter: StreamFilter) -> StreamSubscription {
        StreamSubscription {
            receiver: self.sender.subscribe(),
            filter,
        }
    }
}

/// One subscriber's view of the broker: a `broadcast::Receiver` paired
/// with its own filter. Publish order is preserved per subscriber, so
/// events for the same `alert_id` are delivered in causal (FIFO) order
/// (§5 "Ordering").
pub struct StreamSubscription {
    receiver: broadcast::Receiver<Arc<StreamEvent>>,
    filter: StreamFilter,
}

impl StreamSubscription {
    /// Waits for the next event matching this subscription's filter,
    /// synthesizing a `heartbeat` if none arrives within 30s (§4.3 "Idle
    /// subscribers receive a heartbeat event every 30s").
    pub async fn next_event(&mut self) -> Arc<StreamEvent> {
        loop {
            match tokio::time::timeout(HEARTBEAT_INTERVAL, self.receiver.recv()).await {
                Ok(Ok(event)) => {
                    if self.filter.matches(&event) {
                        return event;
                    }
                }
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    warn!(skipped, "stream subscriber lagged, oldest events dropped");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => return Arc::new(StreamEvent::heartbeat()),
                Err(_elapsed) => return Arc::new(StreamEvent::heartbeat()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn alert(tenant_id: &str) -> Alert {
        Alert {
            alert_id: uuid::Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
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

    #[tokio::test]
    async fn subscriber_receives_matching_event() {
        let broker = EventStreamBroker::new(16);
        let mut sub = broker.subscribe(StreamFilter {
            tenant_ids: BTreeSet::from(["tenant-a".to_string()]),
            ..Default::default()
        });
        broker.publish(StreamEvent::alert_created(&alert("tenant-a")));
        let event = sub.next_event().await;
        assert_eq!(event.event_type, "alert.created");
    }

    #[tokio::test]
    async fn subscriber_filters_out_other_tenants() {
        let broker = EventStreamBroker::new(16);
        let mut sub = broker.subscribe(StreamFilter {
            tenant_ids: BTreeSet::from(["tenant-a".to_string()]),
            ..Default::default()
        });
        broker.publish(StreamEvent::alert_created(&alert("tenant-b")));
        broker.publish(StreamEvent::alert_created(&alert("tenant-a")));
        let event = sub.next_event().await;
        assert_eq!(event.tenant_id, "tenant-a");
    }

    #[tokio::test]
    async fn idle_subscriber_gets_heartbeat() {
        let broker = EventStreamBroker::new(16);
        let mut sub = broker.subscribe(StreamFilter::default());
        tokio::time::pause();
        let handle = tokio::spawn(async move { sub.next_event().await });
        tokio::time::advance(HEARTBEAT_INTERVAL + Duration::from_secs(1)).await;
        let event = handle.await.unwrap();
        assert_eq!(event.event_type, "heartbeat");
    }
}
