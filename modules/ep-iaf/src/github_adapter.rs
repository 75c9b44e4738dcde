use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use ep_common::action_types::{NormalisedAction, NormalisedActionResponse};
use ep_common::CoreError;
use serde_json::Value;
use std::sync::Arc;

use crate::adapter::{AdapterCapabilities, ProviderAdapter, ProviderEvent, WebhookEvent};
use crate::http_client::RetryingHttpClient;
use crate::webhook::{header_ci, verify_hmac_sha256};

/// GitHub adapter: HMAC-SHA256 webhook verification (`X-Hub-Signature-256`),
/// event type from `X-GitHub-Event`, REST polling and outbound actions
/// (§4.2, §6). Wraps a single `reqwest::Client` behind a small typed
/// surface, the same shape as the other provider clients in this crate.
pub struct GithubAdapter {
    http: Arc<RetryingHttpClient>,
    api_base: String,
}

impl GithubAdapter {
    pub fn new(http: Arc<RetryingHttpClient>) -> Self {
        Self {
            http,
            api_base: "https://api.github.com".to_string(),
        }
    }

    pub fn with_api_base(http: Arc<RetryingHttpClient>, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for GithubAdapter {
    fn provider_id(&self) -> &'static str {
        "github"
    }

    fn get_capabilities(&self) -> AdapterCapabilities {
        AdapterCapabilities {
            webhook_supported: true,
            polling_supported: true,
            outbound_actions_supported: true,
        }
    }

    fn process_webhook(
        &self,
        secret: &str,
        raw_body: &[u8],
        headers: &HashMap<String, String>,
    ) -> Result<WebhookEvent, CoreError> {
        let signature = header_ci(headers, "X-Hub-Signature-256").ok_or(CoreError::InvalidSignature)?;
        if !verify_hmac_sha256(secret, raw_body, signature) {
            return Err(CoreError::InvalidSignature);
        }

        let event_type = header_ci(headers, "X-GitHub-Event")
            .ok_or_else(|| CoreError::MalformedPayload("missing X-GitHub-Event header".to_string()))?
            .to_string();

        let body: Value = serde_json::from_slice(raw_body)
            .map_err(|e| CoreError::MalformedPayload(format!("invalid JSON body: {e}")))?;

        let action = body.get("action").and_then(|v| v.as_str()).unwrap_or("");
        let full_event_type = if action.is_empty() {
            event_type
        } else {
            format!("{event_type}.{action}")
        };

        let mut payload = BTreeMap::new();
        if let Some(pr) = body.get("pull_request") {
            if let Some(number) = pr.get("number") {
                payload.insert("pr_id".to_string(), number.clone());
            }
            if let Some(head) = pr.get("head").and_then(|h| h.get("ref")) {
                payload.insert("branch".to_string(), head.clone());
            }
        }
        if let Some(issue) = body.get("issue") {
            if let Some(number) = issue.get("number") {
                payload.insert("issue_key".to_string(), number.clone());
            }
        }
        if let Some(repo) = body.get("repository").and_then(|r| r.get("full_name")) {
            payload.insert("repository".to_string(), repo.clone());
        }
        if let Value::Object(map) = &body {
            for (k, v) in map {
                payload.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }

        let provider_event_id = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("X-GitHub-Delivery"))
            .map(|(_, v)| v.clone());

        Ok(WebhookEvent {
            event_type: full_event_type,
            payload,
            provider_event_id,
        })
    }

    async fn poll_events(&self, auth: &str, cursor: Option<&str>) -> Result<(Vec<ProviderEvent>, String), CoreError> {
        let since = cursor.unwrap_or("1970-01-01T00:00:00Z");
        let url = format!("{}/notifications?since={since}", self.api_base);

        let resp = self
            .http
            .send_with_retry(
                reqwest::Method::GET,
                &url,
                None,
                None,
                &[("Authorization", format!("Bearer {auth}")), ("Accept", "application/vnd.github+json".to_string())],
            )
            .await?;

        let items: Vec<Value> = resp
            .json()
            .await
            .map_err(|e| CoreError::UpstreamError(format!("malformed notifications response: {e}")))?;

        let new_cursor = chrono::Utc::now().to_rfc3339();
        let events = items
            .into_iter()
            .map(|item| {
                let event_type = item
                    .get("subject")
                    .and_then(|s| s.get("type"))
                    .and_then(|t| t.as_str())
                    .unwrap_or("notification")
                    .to_string();
                let payload: BTreeMap<String, Value> = item
                    .as_object()
                    .cloned()
                    .map(|m| m.into_iter().collect())
                    .unwrap_or_default();
                let provider_event_id = item.get("id").and_then(|v| v.as_str()).map(str::to_string);
                ProviderEvent {
                    event_type,
                    payload,
                    provider_event_id,
                }
            })
            .collect();

        Ok((events, new_cursor))
    }

    async fn execute_action(
        &self,
        auth: &str,
        action: &NormalisedAction,
    ) -> Result<NormalisedActionResponse, CoreError> {
        let repository = action
            .target
            .get("repository")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CoreError::Validation("action target missing repository".to_string()))?;
        let pr_id = action
            .target
            .get("pr_id")
            .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string())))
            .ok_or_else(|| CoreError::Validation("action target missing pr_id".to_string()))?;

        let url = match action.canonical_type.as_str() {
            "comment_on_pr" => format!("{}/repos/{repository}/issues/{pr_id}/comments", self.api_base),
            other => return Err(CoreError::Validation(format!("unsupported canonical_type: {other}"))),
        };

        let body = Value::Object(action.payload.clone().into_iter().collect());

        let resp = self
            .http
            .send_with_retry(
                reqwest::Method::POST,
                &url,
                Some(&action.idempotency_key),
                Some(body),
                &[("Authorization", format!("Bearer {auth}")), ("Accept", "application/vnd.github+json".to_string())],
            )
            .await?;

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| CoreError::UpstreamError(format!("malformed action response: {e}")))?;
        let provider_reference = payload.get("id").and_then(|v| v.as_i64()).map(|n| n.to_string());

        Ok(NormalisedActionResponse {
            provider_reference,
            payload,
        })
    }

    async fn verify_connection(&self, auth: &str) -> bool {
        self.http
            .send_with_retry(
                reqwest::Method::GET,
                &format!("{}/user", self.api_base),
                None,
                None,
                &[("Authorization", format!("Bearer {auth}"))],
            )
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use std::time::Duration;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let digest = mac.finalize().into_bytes();
        format!("sha256={}", digest.iter().map(|b| format!("{b:02x}")).collect::<String>())
    }

    fn adapter() -> GithubAdapter {
        GithubAdapter::new(Arc::new(RetryingHttpClient::new(Duration::from_secs(5), 1)))
    }

    #[test]
    fn valid_signature_is_accepted_and_event_type_combines_header_and_action() {
        let secret = "shh";
        let body = br#"{"action":"opened","pull_request":{"number":42,"head":{"ref":"feature-x"}},"repository":{"full_name":"acme/widgets"}}"#;
        let mut headers = HashMap::new();
        headers.insert("X-Hub-Signature-256".to_string(), sign(secret, body));
        headers.insert("X-GitHub-Event".to_string(), "pull_request".to_string());
        headers.insert("X-GitHub-Delivery".to_string(), "delivery-123".to_string());

        let event = adapter().process_webhook(secret, body, &headers).unwrap();
        assert_eq!(event.event_type, "pull_request.opened");
        assert_eq!(event.provider_event_id.as_deref(), Some("delivery-123"));
        assert_eq!(event.payload.get("pr_id").and_then(|v| v.as_i64()), Some(42));
        assert_eq!(event.payload.get("branch").and_then(|v| v.as_str()), Some("feature-x"));
    }

    #[test]
    fn invalid_signature_is_rejected() {
        let body = br#"{"action":"opened"}"#;
        let mut headers = HashMap::new();
        headers.insert("X-Hub-Signature-256".to_string(), "sha256=deadbeef".to_string());
        headers.insert("X-GitHub-Event".to_string(), "pull_request".to_string());

        let err = adapter().process_webhook("shh", body, &headers).unwrap_err();
        assert!(matches!(err, CoreError::InvalidSignature));
    }

    #[test]
    fn missing_event_header_is_malformed() {
        let secret = "shh";
        let body = br#"{}"#;
        let mut headers = HashMap::new();
        headers.insert("X-Hub-Signature-256".to_string(), sign(secret, body));

        let err = adapter().process_webhook(secret, body, &headers).unwrap_err();
        assert!(matches!(err, CoreError::MalformedPayload(_)));
    }
}
