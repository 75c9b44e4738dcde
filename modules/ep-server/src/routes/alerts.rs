use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Duration as ChronoDuration;
use ep_anc::{AlertIngestRequest, AlertSearchFilter};
use ep_common::alert_types::{Alert, NotificationPreference, Severity};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::routes::tenant_id;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/alerts", post(ingest_alert))
        .route("/v1/alerts/bulk", post(ingest_alerts_bulk))
        .route("/v1/alerts/search", post(search_alerts))
        .route("/v1/alerts/:alert_id", get(get_alert))
        .route("/v1/alerts/:alert_id/ack", post(ack_alert))
        .route("/v1/alerts/:alert_id/resolve", post(resolve_alert))
        .route("/v1/alerts/:alert_id/snooze", post(snooze_alert))
        .route("/v1/alerts/:alert_id/tag/noisy", post(tag_noisy))
        .route("/v1/alerts/:alert_id/tag/false-positive", post(tag_false_positive))
        .route("/v1/incidents/:incident_id/mitigate", post(mitigate_incident))
        .route("/v1/incidents/:incident_id/snooze", post(snooze_incident))
        .route("/v1/preferences", post(upsert_preferences))
}

#[derive(Debug, Deserialize)]
pub struct IngestAlertRequest {
    pub source_module: String,
    pub component_id: String,
    pub severity: Severity,
    pub category: String,
    pub summary: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub dedup_key: Option<String>,
    #[serde(default)]
    pub escalation_policy_id: Option<String>,
    #[serde(default)]
    pub plane: Option<String>,
}

impl IngestAlertRequest {
    fn into_request(self, tenant_id: String) -> AlertIngestRequest {
        AlertIngestRequest {
            tenant_id,
            source_module: self.source_module,
            component_id: self.component_id,
            severity: self.severity,
            category: self.category,
            summary: self.summary,
            labels: self.labels,
            dedup_key: self.dedup_key,
            escalation_policy_id: self.escalation_policy_id,
            plane: self.plane,
        }
    }
}

async fn ingest_alert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<IngestAlertRequest>,
) -> Result<Json<Alert>, ApiError> {
    let tenant = tenant_id(&headers)?;
    let alert = state.ingest.ingest(req.into_request(tenant)).await?;
    Ok(Json(alert))
}

async fn ingest_alerts_bulk(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(reqs): Json<Vec<IngestAlertRequest>>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    let tenant = tenant_id(&headers)?;
    let mut alerts = Vec::with_capacity(reqs.len());
    for req in reqs {
        alerts.push(state.ingest.ingest(req.into_request(tenant.clone())).await?);
    }
    Ok(Json(alerts))
}

async fn get_alert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<Alert>, ApiError> {
    let tenant = tenant_id(&headers)?;
    state
        .alerts
        .get(&tenant, alert_id)
        .await
        .map(Json)
        .ok_or_else(|| ep_common::CoreError::NotFound(alert_id.to_string()).into())
}

#[derive(Debug, Deserialize, Default)]
pub struct SearchAlertsRequest {
    #[serde(default)]
    pub component_id: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub status: Option<ep_common::alert_types::AlertStatus>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    50
}

async fn search_alerts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<SearchAlertsRequest>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    let tenant = tenant_id(&headers)?;
    let filter = AlertSearchFilter {
        component_id: req.component_id,
        category: req.category,
        severity: req.severity,
        status: req.status,
        limit: req.limit,
        offset: req.offset,
    };
    Ok(Json(state.alerts.search(&tenant, &filter).await))
}

async fn ack_alert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<Alert>, ApiError> {
    let tenant = tenant_id(&headers)?;
    Ok(Json(state.ingest.acknowledge(&tenant, alert_id).await?))
}

async fn resolve_alert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<Alert>, ApiError> {
    let tenant = tenant_id(&headers)?;
    Ok(Json(state.ingest.resolve(&tenant, alert_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct SnoozeRequest {
    pub duration_minutes: i64,
}

async fn snooze_alert(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(alert_id): Path<Uuid>,
    Json(req): Json<SnoozeRequest>,
) -> Result<Json<Alert>, ApiError> {
    let tenant = tenant_id(&headers)?;
    let duration = ChronoDuration::minutes(req.duration_minutes);
    Ok(Json(state.ingest.snooze(&tenant, alert_id, duration).await?))
}

async fn tag_noisy(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<Alert>, ApiError> {
    let tenant = tenant_id(&headers)?;
    Ok(Json(state.ingest.tag(&tenant, alert_id, "noisy").await?))
}

async fn tag_false_positive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<Alert>, ApiError> {
    let tenant = tenant_id(&headers)?;
    Ok(Json(state.ingest.tag(&tenant, alert_id, "false-positive").await?))
}

async fn mitigate_incident(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(incident_id): Path<Uuid>,
) -> Result<(), ApiError> {
    let tenant = tenant_id(&headers)?;
    state.ingest.mitigate_incident(&tenant, incident_id).await?;
    Ok(())
}

async fn snooze_incident(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(incident_id): Path<Uuid>,
    Json(req): Json<SnoozeRequest>,
) -> Result<(), ApiError> {
    let tenant = tenant_id(&headers)?;
    let duration = ChronoDuration::minutes(req.duration_minutes);
    state.ingest.snooze_incident(&tenant, incident_id, duration).await?;
    Ok(())
}

async fn upsert_preferences(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(preference): Json<NotificationPreference>,
) -> Result<(), ApiError> {
    let tenant = tenant_id(&headers)?;
    if preference.tenant_id != tenant {
        return Err(ep_common::CoreError::TenantIsolationViolation(preference.tenant_id).into());
    }
    state.preferences.upsert(preference).await?;
    Ok(())
}
