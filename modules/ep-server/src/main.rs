mod consumer;
mod error;
mod routes;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use ep_anc::alert_store::InMemoryAlertStore;
use ep_anc::incident_store::InMemoryIncidentStore;
use ep_anc::notification_store::InMemoryNotificationStore;
use ep_anc::preference_store::InMemoryNotificationPreferenceStore;
use ep_anc::{
    AlertIngestService, DispatchService, EscalationScheduler, EventStreamBroker,
    NotificationRetryWorker,
};
use ep_anc::collaborators::{PassthroughIdentityClient, RecordingChannelDispatcher};
use ep_anc::fatigue::FatigueGate;
use ep_common::policy::{PolicyBundle, PolicyStore};
use ep_common::Config;
use ep_iaf::action_store::InMemoryActionStore;
use ep_iaf::circuit_breaker::CircuitBreakerConfig;
use ep_iaf::collaborators::{AlwaysAllowBudgetClient, NoopEvidenceReceiptClient, StaticKmsClient};
use ep_iaf::connection_store::{InMemoryConnectionStore, InMemoryWebhookRegistrationStore};
use ep_iaf::cursor_store::InMemoryPollingCursorStore;
use ep_iaf::github_adapter::GithubAdapter;
use ep_iaf::http_client::RetryingHttpClient;
use ep_iaf::webhook::ReplayCache;
use ep_iaf::{ActionExecutor, AdapterRegistry, CircuitBreakerRegistry, Poller, WebhookIngestService};
use ep_sin::contract::InMemoryContractStore;
use ep_sin::dedup::DedupGate;
use ep_sin::dlq::InMemoryDlqStore;
use ep_sin::governance::GovernanceRules;
use ep_sin::producer_registry::InMemoryProducerStore;
use ep_sin::SinPipeline;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::consumer::AlertSinkConsumer;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    let config = Config::server_from_env();
    config.log_redacted();

    let producers = Arc::new(InMemoryProducerStore::new());
    let dlq = Arc::new(InMemoryDlqStore::new());
    let contracts = Arc::new(InMemoryContractStore::new());
    let dedup = Arc::new(DedupGate::new(Duration::from_secs(config.dedup_window_hours * 3600)));

    // Alert-side infrastructure is built before SIN so its ingest service
    // can be wired into SIN's fan-out as a real RoutingConsumer (§3 Open
    // Question #4 — never a self-draining queue).
    let alerts = Arc::new(InMemoryAlertStore::new());
    let incidents = Arc::new(InMemoryIncidentStore::new());
    let notifications = Arc::new(InMemoryNotificationStore::new());
    let preferences = Arc::new(InMemoryNotificationPreferenceStore::new());
    let identity = Arc::new(PassthroughIdentityClient);
    let channels = Arc::new(RecordingChannelDispatcher::new());
    let stream = Arc::new(EventStreamBroker::new(1024));
    let policy = Arc::new(PolicyStore::new(PolicyBundle::default()));

    let dispatch = Arc::new(DispatchService {
        notifications: notifications.clone(),
        preferences: preferences.clone(),
        channels,
        stream: stream.clone(),
        retry_policy: policy.load_full().retry.clone(),
        fallback_policy: policy.load_full().fallback.clone(),
    });

    let escalation = Arc::new(EscalationScheduler::new(
        alerts.clone(),
        incidents.clone(),
        notifications.clone(),
        dispatch.clone(),
        identity.clone(),
        policy.clone(),
    ));

    let ingest = Arc::new(AlertIngestService {
        alerts: alerts.clone(),
        incidents: incidents.clone(),
        notifications: notifications.clone(),
        dispatch: dispatch.clone(),
        escalation: escalation.clone(),
        identity,
        policy: policy.clone(),
        fatigue: FatigueGate::default(),
        stream: stream.clone(),
    });

    let retry_worker = Arc::new(NotificationRetryWorker::new(alerts.clone(), notifications.clone(), dispatch.clone()));

    let alert_sink: Arc<dyn ep_sin::routing::RoutingConsumer> = Arc::new(AlertSinkConsumer { ingest: ingest.clone() });

    let sin = Arc::new(SinPipeline {
        contracts: contracts.clone(),
        producers: producers.clone(),
        dlq: dlq.clone(),
        dedup,
        sequence: std::sync::Arc::new(ep_sin::dedup::SequenceTracker::new()),
        governance: GovernanceRules::default(),
        consumers: vec![alert_sink],
        dlq_failure_threshold: 5,
        routing_max_attempts: 3,
    });

    let connections = Arc::new(InMemoryConnectionStore::new());
    let webhook_registrations = Arc::new(InMemoryWebhookRegistrationStore::new());
    let actions = Arc::new(InMemoryActionStore::new());
    let cursors = Arc::new(InMemoryPollingCursorStore::new());

    let http_client = Arc::new(RetryingHttpClient::new(
        Duration::from_secs(config.http_timeout_secs),
        config.http_max_retries,
    ));
    let adapters = Arc::new(AdapterRegistry::new());
    adapters.register(Arc::new(GithubAdapter::new(http_client.clone())));

    let breakers = Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig {
        failure_threshold: config.circuit_breaker_failure_threshold,
        success_threshold: config.circuit_breaker_success_threshold,
        timeout: Duration::from_secs(config.circuit_breaker_timeout_secs),
    }));

    let kms = Arc::new(StaticKmsClient::new(Default::default()));
    let budget = Arc::new(AlwaysAllowBudgetClient);
    let evidence = Arc::new(NoopEvidenceReceiptClient);
    let replay_cache = Arc::new(ReplayCache::new(Duration::from_secs(config.signature_cache_ttl_secs)));

    let webhook_ingest = Arc::new(WebhookIngestService {
        registrations: webhook_registrations.clone(),
        connections: connections.clone(),
        adapters: adapters.clone(),
        kms: kms.clone(),
        replay_cache,
        sin: sin.clone(),
        timestamp_tolerance: Duration::from_secs(config.webhook_timestamp_tolerance_secs.max(0) as u64),
    });

    let action_executor = Arc::new(ActionExecutor {
        connections: connections.clone(),
        adapters: adapters.clone(),
        breakers: breakers.clone(),
        actions: actions.clone(),
        kms: kms.clone(),
        budget: budget.clone(),
        evidence,
    });

    let poller = Arc::new(Poller::new(
        connections.clone(),
        cursors.clone(),
        adapters.clone(),
        breakers.clone(),
        kms.clone(),
        budget,
        sin.clone(),
    ));

    let app_state = Arc::new(AppState {
        sin,
        producers,
        dlq,
        connections,
        webhook_registrations,
        actions,
        cursors,
        adapters,
        breakers,
        webhook_ingest,
        action_executor,
        poller: poller.clone(),
        alerts,
        incidents,
        notifications,
        preferences,
        ingest,
        dispatch,
        escalation: escalation.clone(),
        retry_worker: retry_worker.clone(),
        stream,
        policy,
    });

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(60));
        loop {
            ticker.tick().await;
            let polled = poller.tick().await;
            tracing::info!(polled, "poller tick complete");
        }
    });

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            let claimed = escalation.tick().await;
            tracing::info!(claimed, "escalation sweep complete");
        }
    });

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(15));
        loop {
            ticker.tick().await;
            let retried = retry_worker.tick().await;
            tracing::info!(retried, "notification retry sweep complete");
        }
    });

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app: Router = Router::new()
        .merge(routes::signals::router())
        .merge(routes::integrations::router())
        .merge(routes::alerts::router())
        .merge(routes::stream::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let addr = format!("{}:{}", config.web_host, config.web_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "ep-server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
