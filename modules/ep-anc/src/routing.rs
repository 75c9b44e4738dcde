use std::sync::Arc;

use ep_common::alert_types::{Alert, Channel};
use ep_common::policy::{RoutingPolicy, RoutingTarget};
use tracing::warn;

use crate::collaborators::IdentityClient;

/// Resolved routing decision for one alert: the channels and concrete
/// target user ids to notify, plus the `policy_id` that selected them
/// (§4.3 "Routing").
pub struct ResolvedRouting {
    pub channels: Vec<Channel>,
    pub targets: Vec<String>,
    pub policy_id: Option<String>,
}

/// Merges routing defaults with tenant overrides and severity-specific
/// channel overrides, severity taking precedence over the tenant default
/// (§4.3: "routing defaults merged with tenant overrides and
/// severity-specific channel overrides"), then expands any logical
/// target (`group:*`, `role:*`, `schedule:*`) through the identity
/// collaborator.
pub async fn resolve_routing(alert: &Alert, policy: &RoutingPolicy, identity: &Arc<dyn IdentityClient>) -> ResolvedRouting {
    let base = policy.tenant_overrides.get(&alert.tenant_id).cloned().unwrap_or_else(|| policy.defaults.clone());
    let target: RoutingTarget = match policy.severity_overrides.get(&alert.severity) {
        Some(severity_target) => RoutingTarget {
            channels: if severity_target.channels.is_empty() { base.channels } else { severity_target.channels.clone() },
            targets: if severity_target.targets.is_empty() { base.targets } else { severity_target.targets.clone() },
            policy_id: severity_target.policy_id.clone().or(base.policy_id),
        },
        None => base,
    };

    let mut expanded = Vec::new();
    for target_ref in &target.targets {
        match identity.expand_target(&alert.tenant_id, target_ref).await {
            ep_common::error::Outcome::Ok(ids) => expanded.extend(ids),
            ep_common::error::Outcome::Degraded { reason } => {
                warn!(target_ref = %target_ref, reason = %reason, "identity expansion degraded, passing target through unchanged");
                expanded.push(target_ref.clone());
            }
        }
    }

    ResolvedRouting { channels: target.channels, targets: expanded, policy_id: target.policy_id }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::PassthroughIdentityClient;
    use ep_common::alert_types::Severity;
    use std::collections::BTreeMap;

    fn alert(severity: Severity) -> Alert {
        Alert {
            alert_id: uuid::Uuid::new_v4(),
            tenant_id: "tenant-a".to_string(),
            source_module: "sin".to_string(),
            component_id: "api".to_string(),
            severity,
            category: "latency".to_string(),
            summary: "p99 high".to_string(),
            labels: BTreeMap::new(),
            started_at: chrono::Utc::now(),
            ended_at: None,
            last_seen_at: chrono::Utc::now(),
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
    async fn severity_override_wins_over_default() {
        let policy = RoutingPolicy {
            defaults: RoutingTarget { channels: vec![Channel::Email], targets: vec!["oncall".to_string()], policy_id: Some("default".to_string()) },
            tenant_overrides: BTreeMap::new(),
            severity_overrides: std::collections::BTreeMap::from([(
                Severity::P0,
                RoutingTarget { channels: vec![Channel::Sms, Channel::Voice], targets: vec![], policy_id: None },
            )]),
        };
        let identity: std::sync::Arc<dyn IdentityClient> = std::sync::Arc::new(PassthroughIdentityClient);
        let resolved = resolve_routing(&alert(Severity::P0), &policy, &identity).await;
        assert_eq!(resolved.channels, vec![Channel::Sms, Channel::Voice]);
        assert_eq!(resolved.targets, vec!["oncall".to_string()]);
        assert_eq!(resolved.policy_id, Some("default".to_string()));
    }

    #[tokio::test]
    async fn tenant_override_replaces_default_when_no_severity_override() {
        let policy = RoutingPolicy {
            defaults: RoutingTarget { channels: vec![Channel::Email], targets: vec![], policy_id: None },
            tenant_overrides: BTreeMap::from([(
                "tenant-a".to_string(),
                RoutingTarget { channels: vec![Channel::Webhook], targets: vec!["hook-1".to_string()], policy_id: Some("p1".to_string()) },
            )]),
            severity_overrides: BTreeMap::new(),
        };
        let identity: std::sync::Arc<dyn IdentityClient> = std::sync::Arc::new(PassthroughIdentityClient);
        let resolved = resolve_routing(&alert(Severity::P2), &policy, &identity).await;
        assert_eq!(resolved.channels, vec![Channel::Webhook]);
        assert_eq!(resolved.targets, vec!["hook-1".to_string()]);
    }
}
