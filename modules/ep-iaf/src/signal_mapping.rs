use std::collections::BTreeMap;

use chrono::Utc;
use ep_common::envelope::{Environment, Resource, SignalEnvelope, SignalKind};
use serde_json::Value;
use uuid::Uuid;

use crate::adapter::{ProviderEvent, WebhookEvent};

/// `provider_id:provider_event_type -> canonical signal_type` (§4.2
/// signal mapping). Unknown provider event types pass through normalized
/// (`provider:event_type` with dots turned into underscores) rather than
/// being rejected — mapping gaps are additive, not a reason to drop data.
pub fn map_to_canonical_signal_type(provider_id: &str, provider_event_type: &str) -> String {
    let known: &[(&str, &str, &str)] = &[
        ("github", "pull_request.opened", "pr_opened"),
        ("github", "pull_request.closed", "pr_closed"),
        ("github", "pull_request.merged", "pr_merged"),
        ("github", "push", "push"),
        ("github", "issues.opened", "issue_opened"),
        ("github", "issues.closed", "issue_closed"),
        ("jira", "issue.created", "issue_created"),
        ("jira", "issue.updated", "issue_updated"),
        ("jira", "issue.deleted", "issue_deleted"),
        ("slack", "message.posted", "message_posted"),
    ];

    for (provider, event_type, canonical) in known {
        if *provider == provider_id && *event_type == provider_event_type {
            return canonical.to_string();
        }
    }

    format!("{provider_id}:{}", provider_event_type.replace('.', "_"))
}

/// Pull addressing fields out of the provider payload into the canonical
/// `Resource` shape (§4.2 signal mapping: repository, branch, pr_id,
/// issue_key, channel_id).
pub fn extract_resource(payload: &BTreeMap<String, Value>) -> Option<Resource> {
    let get_str = |key: &str| payload.get(key).and_then(|v| v.as_str()).map(str::to_string);

    let resource = Resource {
        service_name: get_str("service_name"),
        repository: get_str("repository"),
        branch: get_str("branch"),
        commit: get_str("commit"),
        pr_id: get_str("pr_id").or_else(|| payload.get("pr_id").and_then(|v| v.as_i64()).map(|n| n.to_string())),
        issue_key: get_str("issue_key"),
        channel_id: get_str("channel_id"),
        environment: get_str("environment"),
        deployment_id: get_str("deployment_id"),
    };

    let is_empty = resource.service_name.is_none()
        && resource.repository.is_none()
        && resource.branch.is_none()
        && resource.commit.is_none()
        && resource.pr_id.is_none()
        && resource.issue_key.is_none()
        && resource.channel_id.is_none()
        && resource.environment.is_none()
        && resource.deployment_id.is_none();

    if is_empty {
        None
    } else {
        Some(resource)
    }
}

/// Map a verified webhook delivery to a canonical `SignalEnvelope` (§4.2).
/// `producer_id = connection_id`: the connection stands in for the
/// external system as the canonical producer of its signals.
pub fn webhook_to_envelope(
    provider_id: &str,
    connection_id: Uuid,
    tenant_id: &str,
    environment: Environment,
    event: WebhookEvent,
) -> SignalEnvelope {
    let signal_type = map_to_canonical_signal_type(provider_id, &event.event_type);
    let resource = extract_resource(&event.payload);
    let now = Utc::now();

    SignalEnvelope {
        signal_id: Uuid::new_v4().to_string(),
        tenant_id: tenant_id.to_string(),
        environment,
        producer_id: connection_id.to_string(),
        signal_kind: SignalKind::Event,
        signal_type,
        occurred_at: now,
        ingested_at: now,
        payload: event.payload,
        schema_version: "1.0.0".to_string(),
        actor_id: None,
        correlation_id: event.provider_event_id,
        trace_id: None,
        span_id: None,
        resource,
        sequence_no: None,
    }
}

/// Map a single polled provider event the same way (§4.2 polling loop
/// step 3: "map each event to SignalEnvelope").
pub fn poll_event_to_envelope(
    provider_id: &str,
    connection_id: Uuid,
    tenant_id: &str,
    environment: Environment,
    event: ProviderEvent,
) -> SignalEnvelope {
    webhook_to_envelope(
        provider_id,
        connection_id,
        tenant_id,
        environment,
        WebhookEvent {
            event_type: event.event_type,
            payload: event.payload,
            provider_event_id: event.provider_event_id,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn known_github_event_maps_to_canonical_type() {
        assert_eq!(map_to_canonical_signal_type("github", "pull_request.opened"), "pr_opened");
    }

    #[test]
    fn known_jira_event_maps_to_canonical_type() {
        assert_eq!(map_to_canonical_signal_type("jira", "issue.created"), "issue_created");
    }

    #[test]
    fn unknown_event_type_passes_through_normalized() {
        assert_eq!(
            map_to_canonical_signal_type("gitlab", "merge_request.approved"),
            "gitlab:merge_request_approved"
        );
    }

    #[test]
    fn resource_extraction_pulls_known_addressing_fields() {
        let payload = BTreeMap::from([
            ("repository".to_string(), json!("acme/widgets")),
            ("pr_id".to_string(), json!(42)),
        ]);
        let resource = extract_resource(&payload).expect("resource expected");
        assert_eq!(resource.repository.as_deref(), Some("acme/widgets"));
        assert_eq!(resource.pr_id.as_deref(), Some("42"));
    }

    #[test]
    fn empty_payload_yields_no_resource() {
        assert!(extract_resource(&BTreeMap::new()).is_none());
    }

    #[test]
    fn webhook_maps_producer_id_to_connection_id() {
        let connection_id = Uuid::new_v4();
        let event = WebhookEvent {
            event_type: "pull_request.opened".to_string(),
            payload: BTreeMap::from([("pr_id".to_string(), json!(1))]),
            provider_event_id: Some("evt-1".to_string()),
        };
        let envelope = webhook_to_envelope("github", connection_id, "tenant-a", Environment::Prod, event);
        assert_eq!(envelope.producer_id, connection_id.to_string());
        assert_eq!(envelope.signal_type, "pr_opened");
        assert_eq!(envelope.correlation_id.as_deref(), Some("evt-1"));
    }
}
