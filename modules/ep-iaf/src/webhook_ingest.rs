use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ep_common::envelope::{Environment, IngestResult};
use ep_common::error::Outcome;
use ep_common::CoreError;
use ep_sin::SinPipeline;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapter::AdapterRegistry;
use crate::collaborators::KmsClient;
use crate::connection_store::{ConnectionStore, WebhookRegistrationStore};
use crate::error::IafError;
use crate::signal_mapping::webhook_to_envelope;
use crate::webhook::{check_timestamp, header_ci, ReplayCache};

/// Wires every step of an inbound webhook delivery (§4.2 "webhook ingress
/// flow", §6 `POST /v1/webhooks/:registration_id`):
/// 1. resolve `registration_id` -> connection (never trust a caller-supplied
///    tenant/connection id directly)
/// 2. resolve the connection's KMS secret
/// 3. adapter signature verification
/// 4. timestamp skew gate
/// 5. replay detection
/// 6. signal mapping
/// 7. submission to the SIN pipeline
pub struct WebhookIngestService {
    pub registrations: Arc<dyn WebhookRegistrationStore>,
    pub connections: Arc<dyn ConnectionStore>,
    pub adapters: Arc<AdapterRegistry>,
    pub kms: Arc<dyn KmsClient>,
    pub replay_cache: Arc<ReplayCache>,
    pub sin: Arc<SinPipeline>,
    pub timestamp_tolerance: Duration,
}

impl WebhookIngestService {
    pub async fn ingest(
        &self,
        registration_id: Uuid,
        raw_body: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<IngestResult, IafError> {
        let registration = self
            .registrations
            .get_by_registration_id(registration_id)
            .await
            .ok_or_else(|| IafError::Core(CoreError::NotFound(registration_id.to_string())))?;

        let connection = self
            .connections
            .get_any(registration.connection_id)
            .await
            .ok_or_else(|| IafError::UnknownConnection(registration.connection_id.to_string()))?;

        if !connection.is_usable() {
            return Err(IafError::Core(CoreError::Auth(format!(
                "connection {} is not active",
                connection.connection_id
            ))));
        }

        let adapter = self.adapters.get(&connection.provider_id)?;

        let secret = match self.kms.resolve_secret(&registration.secret_ref).await {
            Outcome::Ok(secret) => secret,
            Outcome::Degraded { reason } => {
                warn!(connection_id = %connection.connection_id, reason = %reason, "kms secret resolution failed for webhook ingress");
                return Err(IafError::Core(CoreError::Auth(format!("secret unavailable: {reason}"))));
            }
        };

        let signature_header = header_ci(headers, "X-Hub-Signature-256")
            .or_else(|| header_ci(headers, "X-Signature"))
            .unwrap_or("");

        self.replay_cache
            .check_and_record(connection.connection_id, signature_header, raw_body)
            .map_err(IafError::Core)?;

        let event = adapter
            .process_webhook(&secret, raw_body, headers)
            .map_err(IafError::Core)?;

        if let Some(event_time) = extract_event_time(headers) {
            check_timestamp(event_time, Utc::now(), self.timestamp_tolerance).map_err(IafError::Core)?;
        }

        let environment = extract_environment(headers);
        let envelope = webhook_to_envelope(
            &connection.provider_id,
            connection.connection_id,
            &connection.tenant_id,
            environment,
            event,
        );

        info!(
            connection_id = %connection.connection_id,
            signal_type = %envelope.signal_type,
            "webhook mapped to signal envelope"
        );

        let results = self
            .sin
            .ingest_batch(vec![envelope], &connection.tenant_id)
            .await
            .map_err(|e| IafError::Core(CoreError::DownstreamFailure(e.to_string())))?;

        results
            .into_iter()
            .next()
            .ok_or_else(|| IafError::Core(CoreError::DownstreamFailure("sin pipeline returned no result".to_string())))
    }
}

/// Most providers don't carry an event timestamp header; when absent the
/// timestamp gate is skipped rather than rejected (§4.2 step 4 only applies
/// "when the provider supplies one").
fn extract_event_time(headers: &HashMap<String, String>) -> Option<chrono::DateTime<Utc>> {
    header_ci(headers, "X-Event-Timestamp").and_then(|v| {
        v.parse::<i64>()
            .ok()
            .and_then(|epoch| chrono::DateTime::from_timestamp(epoch, 0))
    })
}

fn extract_environment(headers: &HashMap<String, String>) -> Environment {
    match header_ci(headers, "X-Environment") {
        Some("stage") => Environment::Stage,
        Some("dev") => Environment::Dev,
        _ => Environment::Prod,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{AdapterCapabilities, ProviderAdapter, ProviderEvent, WebhookEvent};
    use crate::collaborators::StaticKmsClient;
    use crate::connection_store::{InMemoryConnectionStore, InMemoryWebhookRegistrationStore};
    use async_trait::async_trait;
    use ep_common::action_types::{Capability, ConnectionStatus, IntegrationConnection, NormalisedAction, NormalisedActionResponse, WebhookRegistration, WebhookStatus};
    use ep_sin::contract::InMemoryContractStore;
    use ep_sin::dedup::DedupGate;
    use ep_sin::dlq::InMemoryDlqStore;
    use ep_sin::governance::GovernanceRules;
    use ep_sin::producer_registry::InMemoryProducerStore;

    struct EchoAdapter;

    #[async_trait]
    impl ProviderAdapter for EchoAdapter {
        fn provider_id(&self) -> &'static str {
            "echo"
        }
        fn get_capabilities(&self) -> AdapterCapabilities {
            AdapterCapabilities {
                webhook_supported: true,
                polling_supported: false,
                outbound_actions_supported: false,
            }
        }
        fn process_webhook(
            &self,
            secret: &str,
            raw_body: &[u8],
            headers: &HashMap<String, String>,
        ) -> Result<WebhookEvent, CoreError> {
            if header_ci(headers, "X-Signature") != Some(secret) {
                return Err(CoreError::InvalidSignature);
            }
            let _ = raw_body;
            Ok(WebhookEvent {
                event_type: "ping".to_string(),
                payload: Default::default(),
                provider_event_id: Some("evt-1".to_string()),
            })
        }
        async fn poll_events(&self, _auth: &str, _cursor: Option<&str>) -> Result<(Vec<ProviderEvent>, String), CoreError> {
            Ok((vec![], String::new()))
        }
        async fn execute_action(&self, _auth: &str, _action: &NormalisedAction) -> Result<NormalisedActionResponse, CoreError> {
            unreachable!()
        }
        async fn verify_connection(&self, _auth: &str) -> bool {
            true
        }
    }

    async fn service() -> (WebhookIngestService, Uuid) {
        let connections = Arc::new(InMemoryConnectionStore::new());
        let registrations = Arc::new(InMemoryWebhookRegistrationStore::new());
        let adapters = Arc::new(AdapterRegistry::new());
        adapters.register(Arc::new(EchoAdapter));

        let connection_id = Uuid::new_v4();
        let registration_id = Uuid::new_v4();
        connections
            .create(IntegrationConnection {
                connection_id,
                tenant_id: "tenant-a".to_string(),
                provider_id: "echo".to_string(),
                auth_ref: "kms://auth/1".to_string(),
                enabled_capabilities: vec![Capability::Webhook],
                status: ConnectionStatus::Active,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        registrations
            .create(WebhookRegistration {
                registration_id,
                connection_id,
                secret_ref: "kms://secret/1".to_string(),
                events_subscribed: vec!["ping".to_string()],
                status: WebhookStatus::Active,
            })
            .await
            .unwrap();

        let kms = Arc::new(StaticKmsClient::new(std::collections::BTreeMap::from([(
            "kms://secret/1".to_string(),
            "shh".to_string(),
        )])));

        let producers = Arc::new(InMemoryProducerStore::new());
        producers
            .register(ep_common::envelope::ProducerRegistration {
                producer_id: connection_id.to_string(),
                tenant_id: "tenant-a".to_string(),
                plane: ep_common::envelope::Plane::ClientServices,
                allowed_signal_kinds: vec![ep_common::envelope::SignalKind::Event],
                allowed_signal_types: vec!["echo:ping".to_string()],
                contract_versions: Default::default(),
                status: ep_common::envelope::ProducerStatus::Active,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let contracts = Arc::new(InMemoryContractStore::new());
        contracts.publish(ep_common::envelope::DataContract {
            signal_type: "echo:ping".to_string(),
            contract_version: "1.0.0".to_string(),
            required_fields: vec![],
            optional_fields: vec![],
            field_mappings: Default::default(),
            unit_conversions: Default::default(),
            pii_flags: vec![],
            secrets_flags: vec![],
        });

        let sin = Arc::new(SinPipeline {
            contracts,
            producers,
            dlq: Arc::new(InMemoryDlqStore::new()),
            dedup: Arc::new(DedupGate::new(Duration::from_secs(3600))),
            sequence: Arc::new(ep_sin::dedup::SequenceTracker::new()),
            governance: GovernanceRules::default(),
            consumers: vec![],
            dlq_failure_threshold: 3,
            routing_max_attempts: 1,
        });

        let service = WebhookIngestService {
            registrations,
            connections,
            adapters,
            kms,
            replay_cache: Arc::new(ReplayCache::new(Duration::from_secs(3600))),
            sin,
            timestamp_tolerance: Duration::from_secs(300),
        };
        (service, registration_id)
    }

    #[tokio::test]
    async fn valid_webhook_is_accepted_end_to_end() {
        let (service, registration_id) = service().await;
        let mut headers = HashMap::new();
        headers.insert("X-Signature".to_string(), "shh".to_string());
        let result = service.ingest(registration_id, b"{}", &headers).await.unwrap();
        assert_eq!(result.status, ep_common::envelope::IngestStatus::Accepted);
    }

    #[tokio::test]
    async fn invalid_signature_is_rejected_before_reaching_sin() {
        let (service, registration_id) = service().await;
        let mut headers = HashMap::new();
        headers.insert("X-Signature".to_string(), "wrong".to_string());
        let err = service.ingest(registration_id, b"{}", &headers).await.unwrap_err();
        assert!(matches!(err, IafError::Core(CoreError::InvalidSignature)));
    }

    #[tokio::test]
    async fn replayed_delivery_is_rejected_on_second_attempt() {
        let (service, registration_id) = service().await;
        let mut headers = HashMap::new();
        headers.insert("X-Signature".to_string(), "shh".to_string());
        service.ingest(registration_id, b"{}", &headers).await.unwrap();
        let err = service.ingest(registration_id, b"{}", &headers).await.unwrap_err();
        assert!(matches!(err, IafError::Core(CoreError::ReplayDetected)));
    }

    #[tokio::test]
    async fn unknown_registration_id_is_not_found() {
        let (service, _) = service().await;
        let err = service.ingest(Uuid::new_v4(), b"{}", &HashMap::new()).await.unwrap_err();
        assert!(matches!(err, IafError::Core(CoreError::NotFound(_))));
    }
}
