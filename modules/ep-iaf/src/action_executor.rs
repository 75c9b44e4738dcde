use std::sync::Arc;

use ep_common::action_types::NormalisedAction;
use ep_common::error::Outcome;
use ep_common::CoreError;
use tracing::{info, warn};

use crate::adapter::AdapterRegistry;
use crate::action_store::ActionStore;
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::collaborators::{BudgetClient, EvidenceReceiptClient, KmsClient};
use crate::connection_store::ConnectionStore;
use crate::error::IafError;

/// Executes a single outbound `NormalisedAction` (§4.2 "outbound action
/// execution"):
/// 1. idempotency guard — resubmitting `(tenant_id, idempotency_key)`
///    returns the already-stored terminal result rather than re-calling the
///    provider
/// 2. budget check (fail-open)
/// 3. circuit breaker
/// 4. adapter call
/// 5. best-effort evidence receipt emission
pub struct ActionExecutor {
    pub connections: Arc<dyn ConnectionStore>,
    pub adapters: Arc<AdapterRegistry>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub actions: Arc<dyn ActionStore>,
    pub kms: Arc<dyn KmsClient>,
    pub budget: Arc<dyn BudgetClient>,
    pub evidence: Arc<dyn EvidenceReceiptClient>,
}

impl ActionExecutor {
    pub async fn execute(&self, action: NormalisedAction) -> Result<NormalisedAction, IafError> {
        let tenant_id = action.tenant_id.clone();
        let action_id_on_submit = action.action_id;
        let (stored, created) = self.actions.insert_or_get_existing(action).await;

        if !created {
            info!(action_id = %stored.action_id, "action already processed, returning stored result");
            return Ok(stored);
        }

        let connection = self
            .connections
            .get(&tenant_id, stored.connection_id)
            .await
            .ok_or_else(|| IafError::UnknownConnection(stored.connection_id.to_string()))?;

        if !connection.is_usable() {
            let reason = format!("connection {} is not active", connection.connection_id);
            self.actions.mark_failed(stored.action_id, &reason).await?;
            return Err(IafError::Core(CoreError::Auth(reason)));
        }

        let allowed = self.budget.check_and_reserve(&tenant_id, connection.connection_id, 1).await;
        if let Outcome::Degraded { reason } = &allowed {
            warn!(action_id = %stored.action_id, reason = %reason, "budget check degraded, proceeding fail-open");
        }
        if matches!(allowed, Outcome::Ok(false)) {
            let reason = "budget exhausted".to_string();
            self.actions.mark_failed(stored.action_id, &reason).await?;
            return Err(IafError::Core(CoreError::RateLimit { retry_after_secs: None }));
        }

        let breaker = self.breakers.for_connection(connection.connection_id);
        if let Err(e) = breaker.allow_call() {
            self.actions.mark_failed(stored.action_id, &e.to_string()).await?;
            return Err(IafError::Core(e));
        }

        let adapter = self.adapters.get(&connection.provider_id)?;
        let secret = match self.kms.resolve_secret(&connection.auth_ref).await {
            Outcome::Ok(s) => s,
            Outcome::Degraded { reason } => {
                self.actions.mark_failed(stored.action_id, &reason).await?;
                return Err(IafError::Core(CoreError::Auth(format!("secret unavailable: {reason}"))));
            }
        };

        match adapter.execute_action(&secret, &stored).await {
            Ok(response) => {
                breaker.record_success();
                let payload = response.payload.clone();
                self.actions.mark_completed(stored.action_id, payload.clone()).await?;

                if let Outcome::Degraded { reason } = self.evidence.emit_receipt(&tenant_id, stored.action_id, payload).await {
                    warn!(action_id = %stored.action_id, reason = %reason, "evidence receipt emission degraded");
                }

                self.actions
                    .get(&tenant_id, stored.action_id)
                    .await
                    .ok_or_else(|| IafError::Core(CoreError::NotFound(action_id_on_submit.to_string())))
            }
            Err(e) => {
                breaker.record_failure();
                self.actions.mark_failed(stored.action_id, &e.to_string()).await?;
                Err(IafError::Core(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action_store::InMemoryActionStore;
    use crate::adapter::{AdapterCapabilities, ProviderAdapter, ProviderEvent, WebhookEvent};
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::collaborators::{AlwaysAllowBudgetClient, NoopEvidenceReceiptClient, StaticKmsClient};
    use crate::connection_store::InMemoryConnectionStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use ep_common::action_types::{ActionStatus, Capability, ConnectionStatus, IntegrationConnection};
    use std::collections::BTreeMap;
    use uuid::Uuid;

    struct EchoActionAdapter;

    #[async_trait]
    impl ProviderAdapter for EchoActionAdapter {
        fn provider_id(&self) -> &'static str {
            "echoaction"
        }
        fn get_capabilities(&self) -> AdapterCapabilities {
            AdapterCapabilities {
                webhook_supported: false,
                polling_supported: false,
                outbound_actions_supported: true,
            }
        }
        fn process_webhook(
            &self,
            _secret: &str,
            _raw_body: &[u8],
            _headers: &std::collections::HashMap<String, String>,
        ) -> Result<WebhookEvent, CoreError> {
            unreachable!()
        }
        async fn poll_events(&self, _auth: &str, _cursor: Option<&str>) -> Result<(Vec<ProviderEvent>, String), CoreError> {
            unreachable!()
        }
        async fn execute_action(
            &self,
            _auth: &str,
            action: &NormalisedAction,
        ) -> Result<ep_common::action_types::NormalisedActionResponse, CoreError> {
            Ok(ep_common::action_types::NormalisedActionResponse {
                provider_reference: Some("ref-1".to_string()),
                payload: serde_json::json!({ "echoed": action.idempotency_key }),
            })
        }
        async fn verify_connection(&self, _auth: &str) -> bool {
            true
        }
    }

    fn action(connection_id: Uuid, idempotency_key: &str) -> NormalisedAction {
        NormalisedAction {
            action_id: Uuid::new_v4(),
            tenant_id: "tenant-a".to_string(),
            connection_id,
            canonical_type: "comment_on_pr".to_string(),
            target: BTreeMap::new(),
            payload: BTreeMap::new(),
            idempotency_key: idempotency_key.to_string(),
            correlation_id: None,
            status: ActionStatus::Pending,
            response_payload: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn executor() -> (ActionExecutor, Uuid) {
        let connections = Arc::new(InMemoryConnectionStore::new());
        let adapters = Arc::new(AdapterRegistry::new());
        adapters.register(Arc::new(EchoActionAdapter));
        let connection_id = Uuid::new_v4();
        connections
            .create(IntegrationConnection {
                connection_id,
                tenant_id: "tenant-a".to_string(),
                provider_id: "echoaction".to_string(),
                auth_ref: "kms://auth/1".to_string(),
                enabled_capabilities: vec![Capability::OutboundActions],
                status: ConnectionStatus::Active,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let executor = ActionExecutor {
            connections,
            adapters,
            breakers: Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
            actions: Arc::new(InMemoryActionStore::new()),
            kms: Arc::new(StaticKmsClient::new(std::collections::BTreeMap::from([(
                "kms://auth/1".to_string(),
                "token".to_string(),
            )]))),
            budget: Arc::new(AlwaysAllowBudgetClient),
            evidence: Arc::new(NoopEvidenceReceiptClient),
        };
        (executor, connection_id)
    }

    #[tokio::test]
    async fn successful_execution_marks_action_completed() {
        let (executor, connection_id) = executor().await;
        let result = executor.execute(action(connection_id, "key-1")).await.unwrap();
        assert_eq!(result.status, ActionStatus::Completed);
    }

    #[tokio::test]
    async fn resubmission_with_same_idempotency_key_returns_stored_result_without_calling_adapter() {
        let (executor, connection_id) = executor().await;
        let first = executor.execute(action(connection_id, "key-1")).await.unwrap();
        let second = executor.execute(action(connection_id, "key-1")).await.unwrap();
        assert_eq!(first.action_id, second.action_id);
    }

    #[tokio::test]
    async fn open_circuit_fails_fast_and_marks_action_failed() {
        let (executor, connection_id) = executor().await;
        for _ in 0..5 {
            executor.breakers.for_connection(connection_id).record_failure();
        }
        let err = executor.execute(action(connection_id, "key-2")).await.unwrap_err();
        assert!(matches!(err, IafError::Core(CoreError::CircuitOpen { .. })));
    }
}
