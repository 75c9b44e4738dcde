use chrono::{DateTime, Utc};
use ep_common::alert_types::{Alert, Incident};
use ep_common::policy::{CorrelationPolicy, CorrelationRule, DependencyMatch};
use tracing::warn;

/// Outcome of attempting to attach an alert to an existing incident
/// (§4.3 "Correlation").
pub enum CorrelationDecision {
    AttachTo(uuid::Uuid),
    OpenNew,
}

/// Applies correlation rules in order against the tenant's open incidents
/// within the correlation window; the first rule whose conditions (and
/// optional dependency match) are satisfied wins (§4.3).
///
/// An `Alert` carries no explicit dependency list of its own; its
/// `component_id` is treated as the one dependency it contributes, so a
/// `dependency_match: shared` rule matches when the incident's
/// `dependency_refs` already contains that component, or the incident has
/// none recorded yet (first alert to join it).
pub fn correlate(alert: &Alert, open_incidents: &[Incident], policy: &CorrelationPolicy, now: DateTime<Utc>) -> CorrelationDecision {
    for rule in &policy.rules {
        let window_minutes = rule.window_minutes.unwrap_or(policy.window_minutes).max(1);
        let cutoff = now - chrono::Duration::minutes(window_minutes as i64);

        for incident in open_incidents {
            if incident.opened_at < cutoff {
                continue;
            }
            if !conditions_match(alert, incident, &rule.conditions) {
                continue;
            }
            if !dependency_match_ok(rule.dependency_match, alert, incident) {
                continue;
            }
            return CorrelationDecision::AttachTo(incident.incident_id);
        }
    }
    CorrelationDecision::OpenNew
}

fn conditions_match(alert: &Alert, incident: &Incident, conditions: &[String]) -> bool {
    conditions.iter().all(|condition| match condition.as_str() {
        "tenant_id" => alert.tenant_id == incident.tenant_id,
        "severity" => alert.severity == incident.severity,
        "plane" => alert.plane == incident.plane,
        other => {
            warn!(condition = other, "unrecognized correlation condition, ignoring");
            true
        }
    })
}

fn dependency_match_ok(dependency_match: Option<DependencyMatch>, alert: &Alert, incident: &Incident) -> bool {
    match dependency_match {
        None | Some(DependencyMatch::None) => true,
        Some(DependencyMatch::Shared) => incident.dependency_refs.is_empty() || incident.dependency_refs.contains(&alert.component_id),
    }
}

/// Seeds a brand-new incident from the first alert attached to it (§4.3
/// "On no match: open a new Incident seeded by this Alert").
pub fn open_incident_for(alert: &Alert, now: DateTime<Utc>) -> Incident {
    use std::collections::BTreeSet;
    Incident {
        incident_id: uuid::Uuid::new_v4(),
        tenant_id: alert.tenant_id.clone(),
        severity: alert.severity,
        opened_at: now,
        mitigated_at: None,
        resolved_at: None,
        status: ep_common::alert_types::IncidentStatus::Open,
        alert_ids: BTreeSet::from([alert.alert_id]),
        correlation_keys: BTreeSet::from([alert.dedup_key.clone()]),
        dependency_refs: BTreeSet::from([alert.component_id.clone()]),
        plane: alert.plane.clone(),
    }
}
