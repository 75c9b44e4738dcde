use std::sync::Arc;

use async_trait::async_trait;
use ep_anc::{AlertIngestRequest, AlertIngestService};
use ep_common::alert_types::Severity;
use ep_common::envelope::SignalEnvelope;
use ep_common::CoreError;
use ep_sin::routing::{RoutingClass, RoutingConsumer};
use serde_json::Value;

/// Wires SIN's real-time-detection class into ANC's alert ingest, the way
/// §3 Open Question #4 requires: a real downstream consumer, never a
/// queue a pipeline pops from itself. Severity is derived from a
/// `severity` payload field when the producer sends one, defaulting to
/// `P3` otherwise — SIN has no severity concept of its own (§4.1).
pub struct AlertSinkConsumer {
    pub ingest: Arc<AlertIngestService>,
}

#[async_trait]
impl RoutingConsumer for AlertSinkConsumer {
    fn handles(&self, class: RoutingClass) -> bool {
        matches!(class, RoutingClass::RealtimeDetection)
    }

    async fn consume(&self, envelope: &SignalEnvelope) -> Result<(), CoreError> {
        let component_id = envelope
            .resource
            .as_ref()
            .and_then(|r| r.service_name.clone())
            .unwrap_or_else(|| envelope.producer_id.clone());

        let severity = envelope
            .payload
            .get("severity")
            .and_then(Value::as_str)
            .and_then(parse_severity)
            .unwrap_or(Severity::P3);

        let summary = envelope
            .payload
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("{} on {}", envelope.signal_type, component_id));

        let request = AlertIngestRequest {
            tenant_id: envelope.tenant_id.clone(),
            source_module: "sin".to_string(),
            component_id,
            severity,
            category: envelope.signal_type.clone(),
            summary,
            labels: Default::default(),
            dedup_key: None,
            escalation_policy_id: None,
            plane: envelope.resource.as_ref().and_then(|r| r.environment.clone()),
        };

        self.ingest
            .ingest(request)
            .await
            .map(|_| ())
            .map_err(|e| CoreError::DownstreamFailure(e.to_string()))
    }
}

fn parse_severity(raw: &str) -> Option<Severity> {
    match raw.to_ascii_uppercase().as_str() {
        "P0" => Some(Severity::P0),
        "P1" => Some(Severity::P1),
        "P2" => Some(Severity::P2),
        "P3" => Some(Severity::P3),
        "P4" => Some(Severity::P4),
        _ => None,
    }
}
