use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use ep_common::envelope::{IngestResult, IngestSummary, ProducerRegistration, ProducerStatus, SignalEnvelope};
use ep_sin::pipeline::new_signal_id;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::routes::tenant_id;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/signals/ingest", post(ingest))
        .route("/v1/signals/dlq", get(list_dlq))
        .route("/v1/signals/dlq/:dlq_id", get(get_dlq_entry))
        .route("/v1/producers/register", post(register_producer))
        .route("/v1/producers/:producer_id", get(get_producer))
        .route("/v1/producers/:producer_id", put(set_producer_status))
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    pub signals: Vec<SignalEnvelope>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub results: Vec<IngestResult>,
    pub summary: IngestSummary,
}

async fn ingest(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
    let tenant = tenant_id(&headers)?;
    let batch = req
        .signals
        .into_iter()
        .map(|mut envelope| {
            if envelope.signal_id.is_empty() {
                envelope.signal_id = new_signal_id();
            }
            envelope
        })
        .collect();
    let results = state.sin.ingest_batch(batch, &tenant).await?;
    let summary = IngestSummary::tally(&results);
    Ok(Json(IngestResponse { results, summary }))
}

#[derive(Debug, Deserialize)]
pub struct DlqQuery {
    pub tenant_id: Option<String>,
    pub producer_id: Option<String>,
    pub signal_type: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Serialize)]
pub struct DlqListResponse {
    pub entries: Vec<ep_common::envelope::DlqEntry>,
    pub total: usize,
}

async fn list_dlq(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<DlqQuery>,
) -> Result<Json<DlqListResponse>, ApiError> {
    let tenant = tenant_id(&headers)?;
    if let Some(requested) = &query.tenant_id {
        if requested != &tenant {
            return Err(ep_common::CoreError::TenantIsolationViolation(format!(
                "tenant {tenant} may not read DLQ for tenant {requested}"
            ))
            .into());
        }
    }
    let mut entries = state.dlq.list(&tenant, query.limit, query.offset).await;
    if let Some(producer_id) = &query.producer_id {
        entries.retain(|e| &e.producer_id == producer_id);
    }
    if let Some(signal_type) = &query.signal_type {
        entries.retain(|e| &e.signal_type == signal_type);
    }
    let total = state.dlq.count(&tenant).await;
    Ok(Json(DlqListResponse { entries, total }))
}

async fn get_dlq_entry(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(dlq_id): Path<uuid::Uuid>,
) -> Result<Json<ep_common::envelope::DlqEntry>, ApiError> {
    let tenant = tenant_id(&headers)?;
    state
        .dlq
        .get(&tenant, dlq_id)
        .await
        .map(Json)
        .ok_or_else(|| ep_common::CoreError::NotFound(dlq_id.to_string()).into())
}

#[derive(Debug, Deserialize)]
pub struct RegisterProducerRequest {
    pub producer_id: String,
    pub plane: ep_common::envelope::Plane,
    pub allowed_signal_kinds: Vec<ep_common::envelope::SignalKind>,
    pub allowed_signal_types: Vec<String>,
    #[serde(default)]
    pub contract_versions: std::collections::BTreeMap<String, String>,
}

async fn register_producer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<RegisterProducerRequest>,
) -> Result<Json<ProducerRegistration>, ApiError> {
    let tenant = tenant_id(&headers)?;
    let now = Utc::now();
    let registration = ProducerRegistration {
        producer_id: req.producer_id,
        tenant_id: tenant,
        plane: req.plane,
        allowed_signal_kinds: req.allowed_signal_kinds,
        allowed_signal_types: req.allowed_signal_types,
        contract_versions: req.contract_versions,
        status: ProducerStatus::Active,
        created_at: now,
        updated_at: now,
    };
    state.producers.register(registration.clone()).await?;
    Ok(Json(registration))
}

async fn get_producer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(producer_id): Path<String>,
) -> Result<Json<ProducerRegistration>, ApiError> {
    let tenant = tenant_id(&headers)?;
    state
        .producers
        .get(&tenant, &producer_id)
        .await
        .map(Json)
        .ok_or_else(|| ep_common::CoreError::ProducerNotRegistered(producer_id).into())
}

#[derive(Debug, Deserialize)]
pub struct SetProducerStatusRequest {
    pub status: ProducerStatus,
}

async fn set_producer_status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(producer_id): Path<String>,
    Json(req): Json<SetProducerStatusRequest>,
) -> Result<(), ApiError> {
    let tenant = tenant_id(&headers)?;
    state.producers.set_status(&tenant, &producer_id, req.status).await?;
    Ok(())
}
