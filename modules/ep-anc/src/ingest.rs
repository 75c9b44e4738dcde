use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use ep_common::alert_types::{Alert, AlertStatus, IncidentStatus, Severity};
use ep_common::ids::fallback_dedup_key;
use ep_common::policy::PolicyBundle;
use ep_common::CoreError;
use tracing::{info, warn};
use uuid::Uuid;

use crate::alert_store::AlertStore;
use crate::collaborators::IdentityClient;
use crate::correlation::{correlate, open_incident_for, CorrelationDecision};
use crate::dispatch::DispatchService;
use crate::error::AncError;
use crate::escalation::{resolve_step_targets, EscalationScheduler};
use crate::fatigue::{self, FatigueGate};
use crate::incident_store::IncidentStore;
use crate::notification_store::NotificationStore;
use crate::routing::resolve_routing;
use crate::stream::{EventStreamBroker, StreamEvent};

/// Caller-supplied fields for a new alert arrival (§4.3 "Ingestion &
/// dedup"). Everything computed by the core (`alert_id`, `status`,
/// `last_seen_at`, ...) is filled in by `AlertIngestService::ingest`.
#[derive(Debug, Clone)]
pub struct AlertIngestRequest {
    pub tenant_id: String,
    pub source_module: String,
    pub component_id: String,
    pub severity: Severity,
    pub category: String,
    pub summary: String,
    pub labels: BTreeMap<String, String>,
    pub dedup_key: Option<String>,
    pub escalation_policy_id: Option<String>,
    pub plane: Option<String>,
}

/// Wires dedup, correlation, fatigue control, routing, and escalation
/// kickoff into one entry point for inbound alerts (§4.3), plus the
/// lifecycle transitions (`acknowledge`, `resolve`, `snooze`, `mitigate`)
/// operators drive afterward. Every mutation also publishes a
/// `StreamEvent` (§4.3 "Each transition emits a stream event").
pub struct AlertIngestService {
    pub alerts: Arc<dyn AlertStore>,
    pub incidents: Arc<dyn IncidentStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub dispatch: Arc<DispatchService>,
    pub escalation: Arc<EscalationScheduler>,
    pub identity: Arc<dyn IdentityClient>,
    pub policy: Arc<ep_common::policy::PolicyStore>,
    pub fatigue: FatigueGate,
    pub stream: Arc<EventStreamBroker>,
}

impl AlertIngestService {
    pub async fn ingest(&self, req: AlertIngestRequest) -> Result<Alert, AncError> {
        let now = Utc::now();
        let policy = self.policy.load_full();
        let dedup_key = req
            .dedup_key
            .clone()
            .unwrap_or_else(|| fallback_dedup_key(&req.tenant_id, &req.component_id, &req.category, &req.summary));

        if let Some(mut existing) = self.alerts.get_by_dedup_key(&req.tenant_id, &dedup_key).await {
            existing.refresh_snooze(now);
            let window = policy.dedup.window_minutes(&req.category, req.severity);
            if now.signed_duration_since(existing.last_seen_at) <= ChronoDuration::minutes(window as i64) {
                existing.last_seen_at = now;
                existing.summary = req.summary;
                if req.severity.is_upgrade_from(existing.severity) {
                    existing.severity = req.severity;
                }
                for (k, v) in req.labels {
                    existing.labels.insert(k, v);
                }
                self.alerts.upsert(existing.clone()).await.map_err(AncError::Core)?;
                info!(alert_id = %existing.alert_id, "alert arrival merged into existing open alert");
                self.stream.publish(StreamEvent::alert_updated(&existing));
                return Ok(existing);
            }
        }

        let mut alert = Alert {
            alert_id: Uuid::new_v4(),
            tenant_id: req.tenant_id,
            source_module: req.source_module,
            component_id: req.component_id,
            severity: req.severity,
            category: req.category,
            summary: req.summary,
            labels: req.labels,
            started_at: now,
            ended_at: None,
            last_seen_at: now,
            dedup_key,
            incident_id: None,
            status: AlertStatus::Open,
            snoozed_until: None,
            automation_hooks: vec![],
            escalation_policy_id: req.escalation_policy_id,
            plane: req.plane,
        };
        self.alerts.upsert(alert.clone()).await.map_err(AncError::Core)?;
        info!(alert_id = %alert.alert_id, tenant_id = %alert.tenant_id, "new alert created");
        self.stream.publish(StreamEvent::alert_created(&alert));

        let suppress_followups = self.correlate_alert(&mut alert, &policy, now).await?;
        self.alerts.upsert(alert.clone()).await.map_err(AncError::Core)?;

        if fatigue::in_maintenance_window(&policy.fatigue, &alert.component_id, alert.severity, now) {
            alert.labels.insert("suppressed".to_string(), "maintenance_window".to_string());
            self.alerts.upsert(alert.clone()).await.map_err(AncError::Core)?;
            info!(alert_id = %alert.alert_id, "alert suppressed by maintenance window, dispatch skipped");
            return Ok(alert);
        }

        if suppress_followups {
            info!(alert_id = %alert.alert_id, "notification suppressed, incident already notified recently");
            return Ok(alert);
        }

        self.dispatch_initial(&alert, &policy).await;
        Ok(alert)
    }

    /// Attaches the new alert to an existing incident or opens one,
    /// returning whether incident-followup suppression applies (§4.3
    /// "Correlation", "Fatigue control" incident-suppression rule).
    async fn correlate_alert(&self, alert: &mut Alert, policy: &PolicyBundle, now: chrono::DateTime<Utc>) -> Result<bool, AncError> {
        let cutoff = now - ChronoDuration::minutes(policy.correlation.window_minutes.max(1) as i64);
        let open_incidents = self.incidents.list_open_since(&alert.tenant_id, cutoff).await;

        match correlate(alert, &open_incidents, &policy.correlation, now) {
            CorrelationDecision::AttachTo(incident_id) => {
                if let Some(mut incident) = self.incidents.get(&alert.tenant_id, incident_id).await {
                    incident.alert_ids.insert(alert.alert_id);
                    incident.dependency_refs.insert(alert.component_id.clone());
                    incident.correlation_keys.insert(alert.dedup_key.clone());
                    self.incidents.upsert(incident).await.map_err(AncError::Core)?;
                }
                alert.incident_id = Some(incident_id);

                let since = now - ChronoDuration::minutes(policy.fatigue.suppression.suppress_window_minutes.max(1) as i64);
                let recent = self.notifications.list_by_incident_since(&alert.tenant_id, incident_id, since).await;
                Ok(fatigue::incident_followups_suppressed(&policy.fatigue, &recent))
            }
            CorrelationDecision::OpenNew => {
                let incident = open_incident_for(alert, now);
                alert.incident_id = Some(incident.incident_id);
                self.incidents.upsert(incident).await.map_err(AncError::Core)?;
                Ok(false)
            }
        }
    }

    /// Fires step 1 (delay 0) of the alert's bound escalation policy
    /// immediately and schedules steps 2..N; falls back to plain routing
    /// resolution (single immediate dispatch, no ladder) when the alert
    /// has no escalation policy bound (§4.3 "Escalation", "Routing").
    async fn dispatch_initial(&self, alert: &Alert, policy: &PolicyBundle) {
        let plan = alert.escalation_policy_id.as_deref().and_then(|id| policy.escalation.policies.get(id));

        let Some(plan) = plan else {
            let resolved = resolve_routing(alert, &policy.routing, &self.identity).await;
            for target in &resolved.targets {
                if !self.fatigue.allow_rate(&policy.fatigue.rate_limits, alert.alert_id, &alert.tenant_id, target) {
                    warn!(alert_id = %alert.alert_id, target = %target, "notification suppressed, rate limit exceeded");
                    continue;
                }
                for channel in &resolved.channels {
                    if let Err(e) = self.dispatch.create_and_dispatch(alert, target, *channel, resolved.policy_id.clone()).await {
                        warn!(alert_id = %alert.alert_id, error = %e, "initial dispatch failed for one target/channel");
                    }
                }
            }
            return;
        };

        if let Some(step1) = plan.steps.iter().find(|s| s.order == 1) {
            let targets = resolve_step_targets(alert, step1, policy, &self.identity).await;
            for target in &targets {
                if !self.fatigue.allow_rate(&policy.fatigue.rate_limits, alert.alert_id, &alert.tenant_id, target) {
                    warn!(alert_id = %alert.alert_id, target = %target, "notification suppressed, rate limit exceeded");
                    continue;
                }
                for channel in &step1.channels {
                    if let Err(e) = self.dispatch.create_and_dispatch(alert, target, *channel, step1.target_group_id.clone()).await {
                        warn!(alert_id = %alert.alert_id, error = %e, "escalation step 1 dispatch failed for one target/channel");
                    }
                }
            }
        }

        for step in plan.steps.iter().filter(|s| s.order > 1) {
            if let Err(e) = self.escalation.schedule_step(alert, step).await {
                warn!(alert_id = %alert.alert_id, step = step.order, error = %e, "failed to schedule escalation step");
            }
        }
    }

    pub async fn acknowledge(&self, tenant_id: &str, alert_id: Uuid) -> Result<Alert, AncError> {
        let mut alert = self.get_refreshed(tenant_id, alert_id).await?;
        alert.status = AlertStatus::Acknowledged;
        self.alerts.upsert(alert.clone()).await.map_err(AncError::Core)?;
        self.stream.publish(StreamEvent::alert_acknowledged(&alert));
        Ok(alert)
    }

    pub async fn resolve(&self, tenant_id: &str, alert_id: Uuid) -> Result<Alert, AncError> {
        let now = Utc::now();
        let mut alert = self.get_refreshed(tenant_id, alert_id).await?;
        alert.status = AlertStatus::Resolved;
        alert.ended_at = Some(now);
        self.alerts.upsert(alert.clone()).await.map_err(AncError::Core)?;
        self.stream.publish(StreamEvent::alert_resolved(&alert));

        if let Some(incident_id) = alert.incident_id {
            self.resolve_incident_if_all_alerts_resolved(tenant_id, incident_id, alert.alert_id, now).await?;
        }
        Ok(alert)
    }

    async fn resolve_incident_if_all_alerts_resolved(&self, tenant_id: &str, incident_id: Uuid, just_resolved: Uuid, now: chrono::DateTime<Utc>) -> Result<(), AncError> {
        let Some(mut incident) = self.incidents.get(tenant_id, incident_id).await else {
            return Ok(());
        };
        if incident.status == IncidentStatus::Resolved {
            return Ok(());
        }
        for alert_id in &incident.alert_ids {
            if *alert_id == just_resolved {
                continue;
            }
            match self.alerts.get(tenant_id, *alert_id).await {
                Some(a) if a.status == AlertStatus::Resolved => {}
                _ => return Ok(()),
            }
        }
        incident.status = IncidentStatus::Resolved;
        incident.resolved_at = Some(now);
        self.incidents.upsert(incident).await.map_err(AncError::Core)
    }

    pub async fn snooze(&self, tenant_id: &str, alert_id: Uuid, duration: ChronoDuration) -> Result<Alert, AncError> {
        let now = Utc::now();
        let mut alert = self.get_refreshed(tenant_id, alert_id).await?;
        alert.status = AlertStatus::Snoozed;
        alert.snoozed_until = Some(now + duration);
        self.alerts.upsert(alert.clone()).await.map_err(AncError::Core)?;
        self.stream.publish(StreamEvent::alert_snoozed(&alert));
        Ok(alert)
    }

    pub async fn tag(&self, tenant_id: &str, alert_id: Uuid, tag: &str) -> Result<Alert, AncError> {
        let mut alert = self.get_refreshed(tenant_id, alert_id).await?;
        alert.labels.insert(format!("tag:{tag}"), "true".to_string());
        self.alerts.upsert(alert.clone()).await.map_err(AncError::Core)?;
        Ok(alert)
    }

    /// Marks an incident mitigated, aborting its pending escalation while
    /// leaving member alerts open (§4.3 "Lifecycle transitions"). Pending
    /// escalation steps are aborted lazily — the scheduler checks incident
    /// status when a step's stub row comes due, rather than this call
    /// walking and cancelling every stub up front.
    pub async fn mitigate_incident(&self, tenant_id: &str, incident_id: Uuid) -> Result<(), AncError> {
        let mut incident = self
            .incidents
            .get(tenant_id, incident_id)
            .await
            .ok_or_else(|| AncError::Core(CoreError::NotFound(incident_id.to_string())))?;
        incident.status = IncidentStatus::Mitigated;
        incident.mitigated_at = Some(Utc::now());
        self.incidents.upsert(incident).await.map_err(AncError::Core)
    }

    /// Snoozes every non-resolved alert belonging to an incident
    /// (§2 "Incident snooze"), consistent with the per-alert snooze
    /// semantics of §4.3.
    pub async fn snooze_incident(&self, tenant_id: &str, incident_id: Uuid, duration: ChronoDuration) -> Result<(), AncError> {
        let incident = self
            .incidents
            .get(tenant_id, incident_id)
            .await
            .ok_or_else(|| AncError::Core(CoreError::NotFound(incident_id.to_string())))?;
        let now = Utc::now();
        for alert_id in incident.alert_ids.clone() {
            if let Some(mut alert) = self.alerts.get(tenant_id, alert_id).await {
                if alert.status == AlertStatus::Resolved {
                    continue;
                }
                alert.status = AlertStatus::Snoozed;
                alert.snoozed_until = Some(now + duration);
                self.alerts.upsert(alert.clone()).await.map_err(AncError::Core)?;
                self.stream.publish(StreamEvent::alert_snoozed(&alert));
            }
        }
        Ok(())
    }

    async fn get_refreshed(&self, tenant_id: &str, alert_id: Uuid) -> Result<Alert, AncError> {
        let mut alert = self
            .alerts
            .get(tenant_id, alert_id)
            .await
            .ok_or_else(|| AncError::Core(CoreError::NotFound(alert_id.to_string())))?;
        let was_snoozed = alert.status == AlertStatus::Snoozed;
        alert.refresh_snooze(Utc::now());
        if was_snoozed && alert.status == AlertStatus::Open {
            self.alerts.upsert(alert.clone()).await.map_err(AncError::Core)?;
            self.stream.publish(StreamEvent::alert_unsnoozed(&alert));
        }
        Ok(alert)
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
    use ep_common::alert_types::Channel;
    use ep_common::policy::{EscalationPlan, EscalationStep, FallbackPolicy, PolicyBundle, PolicyStore, RetryPolicy, RetryRule};

    fn request(dedup_key: &str, severity: Severity) -> AlertIngestRequest {
        AlertIngestRequest {
            tenant_id: "tenant-a".to_string(),
            source_module: "producer-1".to_string(),
            component_id: "api".to_string(),
            severity,
            category: "latency".to_string(),
            summary: "p99 high".to_string(),
            labels: BTreeMap::new(),
            dedup_key: Some(dedup_key.to_string()),
            escalation_policy_id: Some("escalation-1".to_string()),
            plane: None,
        }
    }

    fn harness() -> (AlertIngestService, Arc<InMemoryAlertStore>, Arc<InMemoryNotificationStore>, Arc<RecordingChannelDispatcher>) {
        let alerts = Arc::new(InMemoryAlertStore::new());
        let incidents = Arc::new(InMemoryIncidentStore::new());
        let notifications = Arc::new(InMemoryNotificationStore::new());
        let dispatcher = Arc::new(RecordingChannelDispatcher::new());
        let stream = Arc::new(EventStreamBroker::new(64));
        let dispatch = Arc::new(DispatchService {
            notifications: notifications.clone(),
            preferences: Arc::new(InMemoryNotificationPreferenceStore::new()),
            channels: dispatcher.clone(),
            stream: stream.clone(),
            retry_policy: RetryPolicy {
                defaults: RetryRule { max_attempts: 1, backoff_intervals_secs: vec![1] },
                by_channel: BTreeMap::new(),
                by_severity: BTreeMap::new(),
            },
            fallback_policy: FallbackPolicy { defaults: vec![], by_severity: BTreeMap::new() },
        });
        let identity: Arc<dyn IdentityClient> = Arc::new(PassthroughIdentityClient);

        let mut bundle = PolicyBundle::default();
        bundle.escalation.policies.insert(
            "escalation-1".to_string(),
            EscalationPlan {
                continue_after_ack: false,
                steps: vec![
                    EscalationStep { order: 1, delay_seconds: 0, channels: vec![Channel::Sms], target_group_id: Some("oncall".to_string()) },
                    EscalationStep { order: 2, delay_seconds: 300, channels: vec![Channel::Voice], target_group_id: Some("oncall".to_string()) },
                ],
            },
        );
        bundle.dedup.default_window_minutes = 5;
        let policy = Arc::new(PolicyStore::new(bundle));

        let escalation = Arc::new(EscalationScheduler::new(
            alerts.clone(),
            incidents.clone(),
            notifications.clone(),
            dispatch.clone(),
            identity.clone(),
            policy.clone(),
        ));

        let service = AlertIngestService {
            alerts: alerts.clone(),
            incidents,
            notifications: notifications.clone(),
            dispatch,
            escalation,
            identity,
            policy,
            fatigue: FatigueGate::new(),
            stream,
        };
        (service, alerts, notifications, dispatcher)
    }

    #[tokio::test]
    async fn first_arrival_dispatches_step_one_and_schedules_step_two() {
        let (service, _alerts, notifications, dispatcher) = harness();
        let alert = service.ingest(request("dk-1", Severity::P1)).await.unwrap();

        assert!(dispatcher.sent().iter().any(|(c, t)| *c == Channel::Sms && t == "oncall"));
        let due_later = notifications.list_due_escalation_steps(Utc::now() + chrono::Duration::hours(1)).await;
        assert!(due_later.iter().any(|n| n.alert_id == alert.alert_id && n.escalation_step == Some(2)));
    }

    #[tokio::test]
    async fn repeat_arrival_within_window_merges_without_new_dispatch() {
        let (service, _alerts, _notifications, dispatcher) = harness();
        service.ingest(request("dk-1", Severity::P1)).await.unwrap();
        let sent_after_first = dispatcher.sent().len();

        let merged = service.ingest(request("dk-1", Severity::P2)).await.unwrap();
        assert_eq!(dispatcher.sent().len(), sent_after_first, "merge must not trigger a fresh dispatch");
        assert_eq!(merged.severity, Severity::P1, "severity must not downgrade on merge");
    }

    #[tokio::test]
    async fn severity_upgrades_on_merge() {
        let (service, _alerts, _notifications, _dispatcher) = harness();
        service.ingest(request("dk-1", Severity::P2)).await.unwrap();
        let merged = service.ingest(request("dk-1", Severity::P0)).await.unwrap();
        assert_eq!(merged.severity, Severity::P0);
    }

    #[tokio::test]
    async fn acknowledge_then_escalation_guard_prevents_step_two() {
        let (service, _alerts, notifications, dispatcher) = harness();
        let alert = service.ingest(request("dk-1", Severity::P1)).await.unwrap();
        service.acknowledge(&alert.tenant_id, alert.alert_id).await.unwrap();

        // Force step 2 due now and run the scheduler directly.
        let due = notifications.list_due_escalation_steps(Utc::now() + chrono::Duration::hours(1)).await;
        let stub = due.into_iter().find(|n| n.alert_id == alert.alert_id).unwrap();
        let mut immediate = stub.clone();
        immediate.next_attempt_at = Some(Utc::now() - chrono::Duration::seconds(1));
        notifications.update(immediate).await.unwrap();

        let before = dispatcher.sent().len();
        service.escalation.tick().await;
        assert_eq!(dispatcher.sent().len(), before, "acknowledged alert without continue_after_ack must abort escalation step 2");
    }

    #[tokio::test]
    async fn resolve_closes_incident_once_every_member_alert_is_resolved() {
        let (service, _alerts, _notifications, _dispatcher) = harness();
        let alert = service.ingest(request("dk-1", Severity::P1)).await.unwrap();
        let incident_id = alert.incident_id.unwrap();
        service.resolve(&alert.tenant_id, alert.alert_id).await.unwrap();
        let incident = service.incidents.get(&alert.tenant_id, incident_id).await.unwrap();
        assert_eq!(incident.status, IncidentStatus::Resolved);
    }

    #[tokio::test]
    async fn snooze_then_read_after_expiry_auto_unsnoozes() {
        let (service, alerts, _notifications, _dispatcher) = harness();
        let alert = service.ingest(request("dk-1", Severity::P1)).await.unwrap();
        service.snooze(&alert.tenant_id, alert.alert_id, ChronoDuration::milliseconds(1)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let refreshed = service.get_refreshed(&alert.tenant_id, alert.alert_id).await.unwrap();
        assert_eq!(refreshed.status, AlertStatus::Open);
        let stored = alerts.get(&alert.tenant_id, alert.alert_id).await.unwrap();
        assert_eq!(stored.status, AlertStatus::Open);
    }
}
