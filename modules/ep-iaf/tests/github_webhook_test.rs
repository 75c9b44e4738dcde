use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ep_common::action_types::{Capability, ConnectionStatus, IntegrationConnection, WebhookRegistration, WebhookStatus};
use ep_common::envelope::{DataContract, Plane, ProducerRegistration, ProducerStatus, SignalKind};
use ep_iaf::adapter::AdapterRegistry;
use ep_iaf::collaborators::StaticKmsClient;
use ep_iaf::connection_store::{ConnectionStore, InMemoryConnectionStore, InMemoryWebhookRegistrationStore, WebhookRegistrationStore};
use ep_iaf::github_adapter::GithubAdapter;
use ep_iaf::http_client::RetryingHttpClient;
use ep_iaf::webhook::ReplayCache;
use ep_iaf::webhook_ingest::WebhookIngestService;
use ep_sin::contract::InMemoryContractStore;
use ep_sin::dedup::DedupGate;
use ep_sin::dlq::InMemoryDlqStore;
use ep_sin::governance::GovernanceRules;
use ep_sin::producer_registry::InMemoryProducerStore;
use ep_sin::SinPipeline;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    let digest = mac.finalize().into_bytes();
    format!("sha256={}", digest.iter().map(|b| format!("{b:02x}")).collect::<String>())
}

async fn build_service() -> (WebhookIngestService, Uuid) {
    let connections = Arc::new(InMemoryConnectionStore::new());
    let registrations = Arc::new(InMemoryWebhookRegistrationStore::new());
    let adapters = Arc::new(AdapterRegistry::new());
    adapters.register(Arc::new(GithubAdapter::new(Arc::new(RetryingHttpClient::new(Duration::from_secs(5), 1)))));

    let connection_id = Uuid::new_v4();
    let registration_id = Uuid::new_v4();
    connections
        .create(IntegrationConnection {
            connection_id,
            tenant_id: "tenant-acme".to_string(),
            provider_id: "github".to_string(),
            auth_ref: "kms://auth/github-1".to_string(),
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
            secret_ref: "kms://secret/github-1".to_string(),
            events_subscribed: vec!["pull_request".to_string()],
            status: WebhookStatus::Active,
        })
        .await
        .unwrap();

    let kms = Arc::new(StaticKmsClient::new(BTreeMap::from([(
        "kms://secret/github-1".to_string(),
        "whsec_test".to_string(),
    )])));

    let producers = Arc::new(InMemoryProducerStore::new());
    producers
        .register(ProducerRegistration {
            producer_id: connection_id.to_string(),
            tenant_id: "tenant-acme".to_string(),
            plane: Plane::ClientServices,
            allowed_signal_kinds: vec![SignalKind::Event],
            allowed_signal_types: vec!["pr_opened".to_string()],
            contract_versions: BTreeMap::new(),
            status: ProducerStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        })
        .await
        .unwrap();

    let contracts = Arc::new(InMemoryContractStore::new());
    contracts.publish(DataContract {
        signal_type: "pr_opened".to_string(),
        contract_version: "1.0.0".to_string(),
        required_fields: vec!["pr_id".to_string()],
        optional_fields: vec![],
        field_mappings: BTreeMap::new(),
        unit_conversions: BTreeMap::new(),
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
async fn github_pull_request_opened_webhook_becomes_an_accepted_signal() {
    let (service, registration_id) = build_service().await;
    let body = br#"{"action":"opened","pull_request":{"number":7,"head":{"ref":"feature-y"}},"repository":{"full_name":"acme/widgets"}}"#;

    let mut headers = BTreeMap::new();
    headers.insert("X-Hub-Signature-256".to_string(), sign("whsec_test", body));
    headers.insert("X-GitHub-Event".to_string(), "pull_request".to_string());
    headers.insert("X-GitHub-Delivery".to_string(), "delivery-xyz".to_string());
    let headers: std::collections::HashMap<String, String> = headers.into_iter().collect();

    let result = service.ingest(registration_id, body, &headers).await.unwrap();
    assert_eq!(result.status, ep_common::envelope::IngestStatus::Accepted);
}

#[tokio::test]
async fn tampered_github_signature_never_reaches_the_pipeline() {
    let (service, registration_id) = build_service().await;
    let body = br#"{"action":"opened","pull_request":{"number":7}}"#;

    let mut headers = BTreeMap::new();
    headers.insert("X-Hub-Signature-256".to_string(), "sha256=0000000000000000".to_string());
    headers.insert("X-GitHub-Event".to_string(), "pull_request".to_string());
    let headers: std::collections::HashMap<String, String> = headers.into_iter().collect();

    let err = service.ingest(registration_id, body, &headers).await.unwrap_err();
    assert!(matches!(err, ep_iaf::IafError::Core(ep_common::CoreError::InvalidSignature)));
}
