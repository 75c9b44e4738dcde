use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{patch, post};
use axum::{Json, Router};
use chrono::Utc;
use ep_common::action_types::{Capability, ConnectionStatus, IntegrationConnection, NormalisedAction, ActionStatus, WebhookRegistration, WebhookStatus};
use ep_common::envelope::IngestResult;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::tenant_id;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/integrations/connections", post(create_connection))
        .route("/v1/integrations/connections/:connection_id/verify", post(verify_connection))
        .route("/v1/integrations/connections/:connection_id", patch(update_connection))
        .route("/v1/integrations/webhooks/:provider_id/:registration_id", post(webhook_ingress))
        .route("/v1/integrations/actions/execute", post(execute_action))
}

#[derive(Debug, Deserialize)]
pub struct CreateConnectionRequest {
    pub provider_id: String,
    pub auth_ref: String,
    pub enabled_capabilities: Vec<Capability>,
    #[serde(default)]
    pub webhook_events_subscribed: Vec<String>,
    #[serde(default)]
    pub webhook_secret_ref: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct CreateConnectionResponse {
    pub connection: IntegrationConnection,
    pub webhook_registration: Option<WebhookRegistration>,
}

async fn create_connection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateConnectionRequest>,
) -> Result<Json<CreateConnectionResponse>, ApiError> {
    let tenant = tenant_id(&headers)?;
    let now = Utc::now();
    let connection = IntegrationConnection {
        connection_id: Uuid::new_v4(),
        tenant_id: tenant,
        provider_id: req.provider_id,
        auth_ref: req.auth_ref,
        enabled_capabilities: req.enabled_capabilities,
        status: ConnectionStatus::PendingVerification,
        created_at: now,
        updated_at: now,
    };
    state.connections.create(connection.clone()).await?;

    let webhook_registration = if connection.has_capability(Capability::Webhook) {
        let registration = WebhookRegistration {
            registration_id: Uuid::new_v4(),
            connection_id: connection.connection_id,
            secret_ref: req.webhook_secret_ref.unwrap_or_else(|| connection.auth_ref.clone()),
            events_subscribed: req.webhook_events_subscribed,
            status: WebhookStatus::Active,
        };
        state.webhook_registrations.create(registration.clone()).await?;
        Some(registration)
    } else {
        None
    };

    Ok(Json(CreateConnectionResponse { connection, webhook_registration }))
}

async fn verify_connection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(connection_id): Path<Uuid>,
) -> Result<Json<IntegrationConnection>, ApiError> {
    let tenant = tenant_id(&headers)?;
    state.connections.set_status(&tenant, connection_id, ConnectionStatus::Active).await?;
    state
        .connections
        .get(&tenant, connection_id)
        .await
        .map(Json)
        .ok_or_else(|| ep_common::CoreError::NotFound(connection_id.to_string()).into())
}

#[derive(Debug, Deserialize)]
pub struct UpdateConnectionRequest {
    pub status: ConnectionStatus,
}

async fn update_connection(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(connection_id): Path<Uuid>,
    Json(req): Json<UpdateConnectionRequest>,
) -> Result<(), ApiError> {
    let tenant = tenant_id(&headers)?;
    state.connections.set_status(&tenant, connection_id, req.status).await?;
    Ok(())
}

async fn webhook_ingress(
    State(state): State<Arc<AppState>>,
    Path((_provider_id, registration_id)): Path<(String, Uuid)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestResult>, ApiError> {
    let header_map: HashMap<String, String> = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
        .collect();
    let result = state.webhook_ingest.ingest(registration_id, &body, &header_map).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct ExecuteActionRequest {
    pub connection_id: Uuid,
    pub canonical_type: String,
    pub target: BTreeMap<String, Value>,
    pub payload: BTreeMap<String, Value>,
    pub idempotency_key: String,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

async fn execute_action(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<ExecuteActionRequest>,
) -> Result<Json<NormalisedAction>, ApiError> {
    let tenant = tenant_id(&headers)?;
    let now = Utc::now();
    let action = NormalisedAction {
        action_id: Uuid::new_v4(),
        tenant_id: tenant,
        connection_id: req.connection_id,
        canonical_type: req.canonical_type,
        target: req.target,
        payload: req.payload,
        idempotency_key: req.idempotency_key,
        correlation_id: req.correlation_id,
        status: ActionStatus::Pending,
        response_payload: None,
        created_at: now,
        updated_at: now,
    };
    let result = state.action_executor.execute(action).await?;
    Ok(Json(result))
}
