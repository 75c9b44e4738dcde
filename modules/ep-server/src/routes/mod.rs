pub mod alerts;
pub mod integrations;
pub mod signals;
pub mod stream;

use axum::http::HeaderMap;

use crate::error::ApiError;
use ep_common::CoreError;

/// Every route is tenant-scoped by an asserted `X-Tenant-Id` header. Real
/// tenant authentication (verifying the caller is entitled to that tenant)
/// is an external collaborator out of scope here (§1); this only extracts
/// the asserted id so every downstream store lookup can be tenant-scoped.
pub fn tenant_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-tenant-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
        .ok_or_else(|| ApiError::from(CoreError::Auth("missing X-Tenant-Id header".to_string())))
}
