use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Webhook,
    Polling,
    OutboundActions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    PendingVerification,
    Active,
    Suspended,
    Error,
    Deleted,
}

/// A tenant's configured link to an external provider (§3). Owns the
/// webhook registration, polling cursor, and circuit breaker state that
/// reference it by `connection_id`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IntegrationConnection {
    pub connection_id: Uuid,
    pub tenant_id: String,
    pub provider_id: String,
    /// Opaque handle into KMS; never the secret itself.
    pub auth_ref: String,
    pub enabled_capabilities: Vec<Capability>,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IntegrationConnection {
    pub fn has_capability(&self, cap: Capability) -> bool {
        self.enabled_capabilities.contains(&cap)
    }

    pub fn is_usable(&self) -> bool {
        matches!(self.status, ConnectionStatus::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Active,
    Disabled,
}

/// Public-facing webhook registration. `registration_id` is the token used
/// in the inbound URL path — never `connection_id` directly (§4.2, §9 Open
/// Question #1, resolved in §3.1).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WebhookRegistration {
    pub registration_id: Uuid,
    pub connection_id: Uuid,
    /// Opaque KMS handle for the shared secret.
    pub secret_ref: String,
    pub events_subscribed: Vec<String>,
    pub status: WebhookStatus,
}

/// One polling cursor per connection (§3).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PollingCursor {
    pub connection_id: Uuid,
    pub cursor_position: String,
    pub last_polled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// An outbound effect a caller wants executed against a provider, keyed
/// for at-most-once delivery by `(tenant_id, idempotency_key)` (§3).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NormalisedAction {
    pub action_id: Uuid,
    pub tenant_id: String,
    pub connection_id: Uuid,
    pub canonical_type: String,
    pub target: BTreeMap<String, Value>,
    pub payload: BTreeMap<String, Value>,
    pub idempotency_key: String,
    pub correlation_id: Option<String>,
    pub status: ActionStatus,
    pub response_payload: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NormalisedActionResponse {
    pub provider_reference: Option<String>,
    pub payload: Value,
}
