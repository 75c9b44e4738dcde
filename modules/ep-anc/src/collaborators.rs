use async_trait::async_trait;
use ep_common::alert_types::{Channel, Notification};
use ep_common::error::Outcome;
use ep_common::CoreError;

/// Expands a logical routing target (`group:*`, `role:*`, `schedule:*`, an
/// on-call reference) into concrete user ids (§4.3 "Routing"). Identity
/// lookups are an external collaborator like KMS/budget; without an
/// explicit fail-open instruction for a lookup failure, a `Degraded`
/// result is logged and the template string is passed through unchanged,
/// matching the documented behavior for an already-unrecognized template
/// ("unexpanded templated strings pass through unchanged").
#[async_trait]
pub trait IdentityClient: Send + Sync {
    async fn expand_target(&self, tenant_id: &str, target_ref: &str) -> Outcome<Vec<String>>;
}

/// Identity stand-in for tests and standalone deployments without a
/// directory service: anything not matching a `group:`/`role:`/`schedule:`
/// prefix passes through as a single concrete target.
pub struct PassthroughIdentityClient;

#[async_trait]
impl IdentityClient for PassthroughIdentityClient {
    async fn expand_target(&self, _tenant_id: &str, target_ref: &str) -> Outcome<Vec<String>> {
        Outcome::Ok(vec![target_ref.to_string()])
    }
}

/// Sends one notification over its channel. Email/SMS/voice/webhook
/// delivery mechanics are out of scope (§1); this is the contract surface
/// the dispatcher calls. A webhook-channel implementation is expected to
/// delegate to an `ep-iaf::ActionExecutor` so outbound provider calls all
/// flow through the shared circuit breaker and HTTP client (§0 dependency
/// order: ANC depends on IAF for outbound action execution).
#[async_trait]
pub trait ChannelDispatcher: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), CoreError>;
}

/// Deterministic test double: a channel in `always_fail` never succeeds.
#[derive(Default)]
pub struct RecordingChannelDispatcher {
    pub always_fail: std::collections::HashSet<Channel>,
    sent: std::sync::Mutex<Vec<(Channel, String)>>,
}

impl RecordingChannelDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(channels: impl IntoIterator<Item = Channel>) -> Self {
        Self {
            always_fail: channels.into_iter().collect(),
            sent: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<(Channel, String)> {
        self.sent.lock().expect("recording dispatcher poisoned").clone()
    }
}

#[async_trait]
impl ChannelDispatcher for RecordingChannelDispatcher {
    async fn send(&self, notification: &Notification) -> Result<(), CoreError> {
        if self.always_fail.contains(&notification.channel) {
            return Err(CoreError::UpstreamError(format!("{:?} channel unavailable", notification.channel)));
        }
        self.sent
            .lock()
            .expect("recording dispatcher poisoned")
            .push((notification.channel, notification.target_id.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passthrough_identity_returns_the_ref_unchanged() {
        let client = PassthroughIdentityClient;
        match client.expand_target("tenant-a", "user-42").await {
            Outcome::Ok(targets) => assert_eq!(targets, vec!["user-42".to_string()]),
            Outcome::Degraded { .. } => panic!("expected Ok"),
        }
    }
}
