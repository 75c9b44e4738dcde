use std::sync::Arc;

use ep_anc::{AlertIngestService, DispatchService, EscalationScheduler, EventStreamBroker, NotificationRetryWorker};
use ep_anc::alert_store::AlertStore;
use ep_anc::incident_store::IncidentStore;
use ep_anc::notification_store::NotificationStore;
use ep_anc::preference_store::NotificationPreferenceStore;
use ep_common::policy::PolicyStore;
use ep_iaf::action_store::ActionStore;
use ep_iaf::connection_store::{ConnectionStore, WebhookRegistrationStore};
use ep_iaf::cursor_store::PollingCursorStore;
use ep_iaf::{ActionExecutor, AdapterRegistry, CircuitBreakerRegistry, Poller, WebhookIngestService};
use ep_sin::dlq::DlqStore;
use ep_sin::producer_registry::ProducerStore;
use ep_sin::SinPipeline;

/// Everything an axum handler needs, wired once at startup (§9 "global
/// singletons" redesign flag: one explicit struct constructed in `main`,
/// not a process-wide static).
#[derive(Clone)]
pub struct AppState {
    pub sin: Arc<SinPipeline>,
    pub producers: Arc<dyn ProducerStore>,
    pub dlq: Arc<dyn DlqStore>,

    pub connections: Arc<dyn ConnectionStore>,
    pub webhook_registrations: Arc<dyn WebhookRegistrationStore>,
    pub actions: Arc<dyn ActionStore>,
    pub cursors: Arc<dyn PollingCursorStore>,
    pub adapters: Arc<AdapterRegistry>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub webhook_ingest: Arc<WebhookIngestService>,
    pub action_executor: Arc<ActionExecutor>,
    pub poller: Arc<Poller>,

    pub alerts: Arc<dyn AlertStore>,
    pub incidents: Arc<dyn IncidentStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub preferences: Arc<dyn NotificationPreferenceStore>,
    pub ingest: Arc<AlertIngestService>,
    pub dispatch: Arc<DispatchService>,
    pub escalation: Arc<EscalationScheduler>,
    pub retry_worker: Arc<NotificationRetryWorker>,
    pub stream: Arc<EventStreamBroker>,
    pub policy: Arc<PolicyStore>,
}
