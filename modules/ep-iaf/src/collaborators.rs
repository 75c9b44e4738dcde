use async_trait::async_trait;
use ep_common::error::Outcome;
use uuid::Uuid;

/// Secret resolution against KMS. Unlike the budget/ERIS collaborators
/// below, a KMS failure is never fail-open — without a secret an adapter
/// cannot verify a signature or authenticate an outbound call, so callers
/// treat a `Degraded` result as a hard `Auth` error rather than a
/// default-and-continue (§2 only applies the fail-open `Outcome` shape to
/// budget/ERIS; KMS degradation still surfaces, just without a silent
/// fallback value).
#[async_trait]
pub trait KmsClient: Send + Sync {
    async fn resolve_secret(&self, secret_ref: &str) -> Outcome<String>;
}

/// Deterministic stand-in used by tests and by a process that stores
/// secrets directly (e.g. a dev environment's `.env`-sourced
/// `auth_ref`/`secret_ref` as the secret itself).
pub struct StaticKmsClient {
    secrets: std::collections::BTreeMap<String, String>,
}

impl StaticKmsClient {
    pub fn new(secrets: std::collections::BTreeMap<String, String>) -> Self {
        Self { secrets }
    }
}

#[async_trait]
impl KmsClient for StaticKmsClient {
    async fn resolve_secret(&self, secret_ref: &str) -> Outcome<String> {
        match self.secrets.get(secret_ref) {
            Some(s) => Outcome::Ok(s.clone()),
            None => Outcome::Degraded {
                reason: format!("no secret registered for ref {secret_ref}"),
            },
        }
    }
}

/// Spend-budget check consulted before a poll or outbound action (§4.2
/// "Budget check (external collaborator, fail-open if unavailable)").
/// Fail-open means: if the budget service itself is unreachable, the call
/// proceeds and the degradation is logged (§9 redesign flag — never a
/// silent `try/except`).
#[async_trait]
pub trait BudgetClient: Send + Sync {
    async fn check_and_reserve(&self, tenant_id: &str, connection_id: Uuid, estimated_cost_cents: u64) -> Outcome<bool>;
}

pub struct AlwaysAllowBudgetClient;

#[async_trait]
impl BudgetClient for AlwaysAllowBudgetClient {
    async fn check_and_reserve(&self, _tenant_id: &str, _connection_id: Uuid, _estimated_cost_cents: u64) -> Outcome<bool> {
        Outcome::Ok(true)
    }
}

/// Best-effort, non-blocking evidence receipt emission on completed
/// outbound actions (§4.2 step 4: "emit an evidence receipt ... best-
/// effort, non-blocking"). ERIS persistence internals are out of scope
/// (§1); this is only the contract surface the action executor calls.
#[async_trait]
pub trait EvidenceReceiptClient: Send + Sync {
    async fn emit_receipt(&self, tenant_id: &str, action_id: Uuid, payload: serde_json::Value) -> Outcome<()>;
}

pub struct NoopEvidenceReceiptClient;

#[async_trait]
impl EvidenceReceiptClient for NoopEvidenceReceiptClient {
    async fn emit_receipt(&self, _tenant_id: &str, _action_id: Uuid, _payload: serde_json::Value) -> Outcome<()> {
        Outcome::Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_kms_resolves_known_ref() {
        let client = StaticKmsClient::new(std::collections::BTreeMap::from([(
            "kms://secret/1".to_string(),
            "shh".to_string(),
        )]));
        match client.resolve_secret("kms://secret/1").await {
            Outcome::Ok(secret) => assert_eq!(secret, "shh"),
            Outcome::Degraded { .. } => panic!("expected Ok"),
        }
    }

    #[tokio::test]
    async fn static_kms_degrades_on_unknown_ref() {
        let client = StaticKmsClient::new(std::collections::BTreeMap::new());
        assert!(client.resolve_secret("kms://missing").await.is_degraded());
    }
}
