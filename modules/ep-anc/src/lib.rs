pub mod alert_store;
pub mod collaborators;
pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod escalation;
pub mod fatigue;
pub mod incident_store;
pub mod ingest;
pub mod notification_store;
pub mod preference_store;
pub mod retry;
pub mod routing;
pub mod stream;

pub use alert_store::{AlertSearchFilter, AlertStore};
pub use dispatch::DispatchService;
pub use error::AncError;
pub use escalation::EscalationScheduler;
pub use ingest::{AlertIngestRequest, AlertIngestService};
pub use retry::NotificationRetryWorker;
pub use stream::{EventStreamBroker, StreamEvent, StreamFilter};
