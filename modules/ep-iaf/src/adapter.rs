use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ep_common::action_types::{NormalisedAction, NormalisedActionResponse};
use ep_common::CoreError;
use serde_json::Value;

use crate::error::IafError;

/// Capability flags a provider supports, queried once per adapter and
/// cross-checked against the connection's `enabled_capabilities` before
/// the runtime routes a webhook/poll/action to it (§4.2).
#[derive(Debug, Clone, Copy, Default)]
pub struct AdapterCapabilities {
    pub webhook_supported: bool,
    pub polling_supported: bool,
    pub outbound_actions_supported: bool,
}

/// One decoded webhook delivery, post-signature-verification (§4.2).
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub event_type: String,
    pub payload: BTreeMap<String, Value>,
    /// Provider event id, if present, used to populate `correlation_id`
    /// on the mapped envelope (§4.2 signal mapping).
    pub provider_event_id: Option<String>,
}

/// One event surfaced by a poll, before signal mapping (§4.2).
#[derive(Debug, Clone)]
pub struct ProviderEvent {
    pub event_type: String,
    pub payload: BTreeMap<String, Value>,
    pub provider_event_id: Option<String>,
}

/// The per-provider SPI every adapter implements (§4.2). Secrets are
/// supplied per call by the runtime (resolved from KMS via `auth_ref` /
/// `secret_ref`) rather than held by the adapter across calls, so a single
/// adapter instance is safe to share across concurrent connections of the
/// same provider (§5 "adapter instances are shared per connection_id").
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider_id(&self) -> &'static str;

    fn get_capabilities(&self) -> AdapterCapabilities;

    /// Verify authenticity and extract the provider event type from a raw
    /// webhook delivery. `secret` is the resolved shared secret for this
    /// connection. Fails with `InvalidSignature` or `MalformedPayload`.
    fn process_webhook(
        &self,
        secret: &str,
        raw_body: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<WebhookEvent, CoreError>;

    /// Fetch events since `cursor`, returning the finite page and the
    /// cursor to resume from. Fails with `UpstreamError` (retryable) or
    /// `Auth` (non-retryable) (§4.2).
    async fn poll_events(&self, auth: &str, cursor: Option<&str>) -> Result<(Vec<ProviderEvent>, String), CoreError>;

    /// Execute an outbound action, forwarding `idempotency_key` to the
    /// provider where it supports one (§4.2).
    async fn execute_action(
        &self,
        auth: &str,
        action: &NormalisedAction,
    ) -> Result<NormalisedActionResponse, CoreError>;

    /// Cheap liveness/authorization probe (§4.2).
    async fn verify_connection(&self, auth: &str) -> bool;
}

/// Process-wide mapping `provider_id -> adapter`, populated at startup and
/// immutable thereafter (§4.2 "Registry lifecycle", §9 "prefer
/// compile-time registration over reflective discovery"). Adapter
/// *instances* are cached here directly since adapters hold no
/// per-connection state; the per-connection state (secrets, cursors,
/// breakers) lives in the stores and the circuit breaker registry instead.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: Mutex<BTreeMap<&'static str, Arc<dyn ProviderAdapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, adapter: Arc<dyn ProviderAdapter>) {
        let mut adapters = self.adapters.lock().expect("adapter registry mutex poisoned");
        adapters.insert(adapter.provider_id(), adapter);
    }

    pub fn get(&self, provider_id: &str) -> Result<Arc<dyn ProviderAdapter>, IafError> {
        self.adapters
            .lock()
            .expect("adapter registry mutex poisoned")
            .get(provider_id)
            .cloned()
            .ok_or_else(|| IafError::UnknownProvider(provider_id.to_string()))
    }
}
