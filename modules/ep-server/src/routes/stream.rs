use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use ep_common::alert_types::Severity;
use futures::stream::Stream;
use serde::Deserialize;

use crate::error::ApiError;
use crate::routes::tenant_id;
use crate::state::AppState;
use ep_anc::StreamFilter;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/v1/alerts/stream", get(stream_alerts))
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    pub component_id: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub event_type: Option<String>,
}

async fn stream_alerts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let tenant = tenant_id(&headers)?;

    let mut filter = StreamFilter::default();
    filter.tenant_ids.insert(tenant);
    filter.component_ids.extend(query.component_id);
    filter.categories.extend(query.category);
    filter.severities.extend(query.severity);
    filter.event_types.extend(query.event_type);

    let mut subscription = state.stream.subscribe(filter);
    let stream = async_stream::stream! {
        loop {
            let event = subscription.next_event().await;
            let payload = serde_json::to_string(event.as_ref()).unwrap_or_else(|_| "{}".to_string());
            yield Ok(Event::default().event(event.event_type.clone()).data(payload));
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
