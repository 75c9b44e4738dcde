use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use ep_common::alert_types::{Alert, AlertStatus, IncidentStatus, Notification, NotificationStatus};
use ep_common::error::Outcome;
use ep_common::policy::{EscalationStep, PolicyStore};
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::alert_store::AlertStore;
use crate::collaborators::IdentityClient;
use crate::dispatch::DispatchService;
use crate::error::AncError;
use crate::incident_store::IncidentStore;
use crate::notification_store::NotificationStore;
use crate::routing::resolve_routing;

/// Periodic sweep of stub notifications whose scheduled escalation step is
/// due (§4.3 "Escalation", §5 background worker #2: "periodic (default
/// 30s) sweep ... dispatched to an escalation worker pool"). A stub row
/// only records *that* step k is due for an alert; the worker re-resolves
/// targets fresh at execution time rather than trusting a stale snapshot,
/// since routing/identity state may have changed since step 1 scheduled it.
pub struct EscalationScheduler {
    pub alerts: Arc<dyn AlertStore>,
    pub incidents: Arc<dyn IncidentStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub dispatch: Arc<DispatchService>,
    pub identity: Arc<dyn IdentityClient>,
    pub policy: Arc<PolicyStore>,
    pub worker_pool_size: usize,
    pub tick_interval: StdDuration,
}

impl EscalationScheduler {
    pub fn new(
        alerts: Arc<dyn AlertStore>,
        incidents: Arc<dyn IncidentStore>,
        notifications: Arc<dyn NotificationStore>,
        dispatch: Arc<DispatchService>,
        identity: Arc<dyn IdentityClient>,
        policy: Arc<PolicyStore>,
    ) -> Self {
        Self {
            alerts,
            incidents,
            notifications,
            dispatch,
            identity,
            policy,
            worker_pool_size: 16,
            tick_interval: StdDuration::from_secs(30),
        }
    }

    /// Run a single sweep: execute every due step, up to `worker_pool_size`
    /// concurrently. Returns the number of stub rows claimed this tick
    /// (aborted steps still count as claimed — the abort itself is not an
    /// error, §4.3 "Abort is silent").
    pub async fn tick(&self) -> usize {
        let due = self.notifications.list_due_escalation_steps(Utc::now()).await;
        let semaphore = Arc::new(Semaphore::new(self.worker_pool_size));
        let mut handles = Vec::new();

        for stub in due {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
            let this = self.clone_refs();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                this.execute_step(stub).await
            }));
        }

        let total = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "escalation worker task panicked");
            }
        }
        total
    }

    fn clone_refs(&self) -> EscalationWorker {
        EscalationWorker {
            alerts: self.alerts.clone(),
            incidents: self.incidents.clone(),
            dispatch: self.dispatch.clone(),
            identity: self.identity.clone(),
            policy: self.policy.clone(),
        }
    }

    /// Schedules step `order` for `alert` to fire at `now + delay_seconds`
    /// by persisting a stub Notification (§4.3: "next_attempt_at on a stub
    /// notification"). The stub's `target_id`/`channel` are placeholders —
    /// this row is a scheduling marker, not itself dispatched; the real
    /// per-(target, channel) notifications are created when the worker
    /// claims it.
    pub async fn schedule_step(&self, alert: &Alert, step: &EscalationStep) -> Result<(), AncError> {
        let now = Utc::now();
        let stub = Notification {
            notification_id: Uuid::new_v4(),
            tenant_id: alert.tenant_id.clone(),
            alert_id: alert.alert_id,
            incident_id: alert.incident_id,
            target_id: "__escalation_step__".to_string(),
            channel: step.channels.first().copied().unwrap_or(ep_common::alert_types::Channel::Email),
            status: NotificationStatus::Pending,
            attempts: 0,
            next_attempt_at: Some(now + chrono::Duration::seconds(step.delay_seconds as i64)),
            failure_reason: None,
            policy_id: None,
            escalation_step: Some(step.order),
            created_at: now,
            updated_at: now,
        };
        self.notifications.create(stub).await.map_err(AncError::Core)
    }
}

struct EscalationWorker {
    alerts: Arc<dyn AlertStore>,
    incidents: Arc<dyn IncidentStore>,
    dispatch: Arc<DispatchService>,
    identity: Arc<dyn IdentityClient>,
    policy: Arc<PolicyStore>,
}

impl EscalationWorker {
    async fn execute_step(&self, mut stub: Notification) {
        let step_order = match stub.escalation_step {
            Some(k) => k,
            None => return,
        };

        // Claim the stub immediately so a concurrent tick never double-fires
        // the same step (§5 "parallel execution of steps for the same alert
        // is forbidden").
        stub.status = NotificationStatus::Sent;
        stub.updated_at = Utc::now();
        if let Err(e) = self.dispatch.notifications.update(stub.clone()).await {
            warn!(notification_id = %stub.notification_id, error = %e, "failed to claim escalation step stub");
            return;
        }

        let mut alert = match self.alerts.get(&stub.tenant_id, stub.alert_id).await {
            Some(a) => a,
            None => {
                warn!(alert_id = %stub.alert_id, "escalation step fired for unknown alert, skipping");
                return;
            }
        };
        alert.refresh_snooze(Utc::now());

        if alert.status == AlertStatus::Resolved || alert.status == AlertStatus::Snoozed {
            info!(alert_id = %alert.alert_id, step = step_order, status = ?alert.status, "escalation step aborted, alert not active");
            return;
        }

        let policy = self.policy.load_full();
        let plan = match alert.escalation_policy_id.as_deref().and_then(|id| policy.escalation.policies.get(id)) {
            Some(plan) => plan,
            None => {
                warn!(alert_id = %alert.alert_id, "escalation step fired but alert has no bound escalation policy");
                return;
            }
        };

        if alert.status == AlertStatus::Acknowledged && !plan.continue_after_ack {
            info!(alert_id = %alert.alert_id, step = step_order, "escalation step aborted, alert acknowledged");
            return;
        }

        if let Some(incident_id) = alert.incident_id {
            if let Some(incident) = self.incidents.get(&alert.tenant_id, incident_id).await {
                if incident.status == IncidentStatus::Mitigated {
                    info!(alert_id = %alert.alert_id, step = step_order, "escalation step aborted, incident mitigated");
                    return;
                }
            }
        }

        let step = match plan.steps.iter().find(|s| s.order == step_order) {
            Some(s) => s,
            None => {
                warn!(alert_id = %alert.alert_id, step = step_order, "no escalation step with this order in the bound plan");
                return;
            }
        };

        let targets = resolve_step_targets(&alert, step, &policy, &self.identity).await;
        for target_id in &targets {
            for channel in &step.channels {
                if let Err(e) = self.dispatch.create_and_dispatch(&alert, target_id, *channel, step.target_group_id.clone()).await {
                    warn!(alert_id = %alert.alert_id, step = step_order, error = %e, "escalation step dispatch failed for one target/channel");
                }
            }
        }
    }
}

/// Resolves the concrete target ids for one escalation step (§4.3): an
/// explicit `target_group_id` is expanded through identity; otherwise the
/// step falls back to whatever the general routing resolution (§4.3
/// "Routing") would pick for this alert. Shared by the scheduler (steps
/// 2..N) and the ingest path (step 1, which fires immediately).
pub async fn resolve_step_targets(alert: &Alert, step: &EscalationStep, policy: &ep_common::policy::PolicyBundle, identity: &Arc<dyn IdentityClient>) -> Vec<String> {
    match &step.target_group_id {
        Some(group) => match identity.expand_target(&alert.tenant_id, group).await {
            Outcome::Ok(ids) => ids,
            Outcome::Degraded { reason } => {
                warn!(group = %group, reason = %reason, "identity expansion degraded for escalation step, using template unchanged");
                vec![group.clone()]
            }
        },
        None => resolve_routing(alert, &policy.routing, identity).await.targets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert_store::InMemoryAlertStore;
    use crate::collaborators::{PassthroughIdentityClient, RecordingChannelDispatcher};
    use crate::incident_store::InMemoryIncidentStore;
    use crate::notification_store::InMemoryNotificationStore;
    use crate::preference_store::InMemoryNotificationPreferenceStore;
    use crate::stream::EventStreamBroker;
    use ep_common::alert_types::{Channel, Severity};
    use ep_common::policy::{EscalationPlan, FallbackPolicy, PolicyBundle, RetryPolicy};
    use std::collections::BTreeMap;

    fn alert(escalation_policy_id: &str) -> Alert {
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
            escalation_policy_id: Some(escalation_policy_id.to_string()),
            plane: None,
        }
    }

    fn plan(continue_after_ack: bool) -> EscalationPlan {
        EscalationPlan {
            continue_after_ack,
            steps: vec![
                EscalationStep { order: 1, delay_seconds: 0, channels: vec![Channel::Sms], target_group_id: None },
                EscalationStep { order: 2, delay_seconds: 300, channels: vec![Channel::Voice], target_group_id: None },
            ],
        }
    }

    fn harness(continue_after_ack: bool) -> (EscalationScheduler, Arc<InMemoryAlertStore>, Arc<InMemoryNotificationStore>, Arc<RecordingChannelDispatcher>) {
        let alerts = Arc::new(InMemoryAlertStore::new());
        let incidents = Arc::new(InMemoryIncidentStore::new());
        let notifications = Arc::new(InMemoryNotificationStore::new());
        let dispatcher = Arc::new(RecordingChannelDispatcher::new());
        let dispatch = Arc::new(DispatchService {
            notifications: notifications.clone(),
            preferences: Arc::new(InMemoryNotificationPreferenceStore::new()),
            channels: dispatcher.clone(),
            stream: Arc::new(EventStreamBroker::new(64)),
            retry_policy: RetryPolicy::default(),
            fallback_policy: FallbackPolicy::default(),
        });
        let identity = Arc::new(PassthroughIdentityClient);
        let mut bundle = PolicyBundle::default();
        bundle.escalation.policies.insert("escalation-1".to_string(), plan(continue_after_ack));
        let policy = Arc::new(PolicyStore::new(bundle));

        let scheduler = EscalationScheduler::new(alerts.clone(), incidents, notifications.clone(), dispatch, identity, policy);
        (scheduler, alerts, notifications, dispatcher)
    }

    #[tokio::test]
    async fn due_step_dispatches_to_its_configured_channel() {
        let (scheduler, alerts, notifications, dispatcher) = harness(true);
        let a = alert("escalation-1");
        alerts.upsert(a.clone()).await.unwrap();
        let mut stub = Notification {
            notification_id: Uuid::new_v4(),
            tenant_id: a.tenant_id.clone(),
            alert_id: a.alert_id,
            incident_id: None,
            target_id: "__escalation_step__".to_string(),
            channel: Channel::Voice,
            status: NotificationStatus::Pending,
            attempts: 0,
            next_attempt_at: Some(Utc::now() - chrono::Duration::seconds(1)),
            failure_reason: None,
            policy_id: None,
            escalation_step: Some(2),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        notifications.create(stub.clone()).await.unwrap();
        stub.escalation_step = Some(2);

        let polled = scheduler.tick().await;
        assert_eq!(polled, 1);
        assert!(dispatcher.sent().iter().any(|(c, _)| *c == Channel::Voice));
    }

    #[tokio::test]
    async fn acknowledged_alert_without_continue_after_ack_aborts_step() {
        let (scheduler, alerts, notifications, dispatcher) = harness(false);
        let mut a = alert("escalation-1");
        a.status = AlertStatus::Acknowledged;
        alerts.upsert(a.clone()).await.unwrap();
        notifications
            .create(Notification {
                notification_id: Uuid::new_v4(),
                tenant_id: a.tenant_id.clone(),
                alert_id: a.alert_id,
                incident_id: None,
                target_id: "__escalation_step__".to_string(),
                channel: Channel::Voice,
                status: NotificationStatus::Pending,
                attempts: 0,
                next_attempt_at: Some(Utc::now() - chrono::Duration::seconds(1)),
                failure_reason: None,
                policy_id: None,
                escalation_step: Some(2),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        scheduler.tick().await;
        assert!(dispatcher.sent().is_empty(), "acknowledged alert without continue_after_ack must abort step 2");
    }

    #[tokio::test]
    async fn resolved_alert_aborts_step_silently() {
        let (scheduler, alerts, notifications, dispatcher) = harness(true);
        let mut a = alert("escalation-1");
        a.status = AlertStatus::Resolved;
        alerts.upsert(a.clone()).await.unwrap();
        notifications
            .create(Notification {
                notification_id: Uuid::new_v4(),
                tenant_id: a.tenant_id.clone(),
                alert_id: a.alert_id,
                incident_id: None,
                target_id: "__escalation_step__".to_string(),
                channel: Channel::Voice,
                status: NotificationStatus::Pending,
                attempts: 0,
                next_attempt_at: Some(Utc::now() - chrono::Duration::seconds(1)),
                failure_reason: None,
                policy_id: None,
                escalation_step: Some(2),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        scheduler.tick().await;
        assert!(dispatcher.sent().is_empty());
    }
}
