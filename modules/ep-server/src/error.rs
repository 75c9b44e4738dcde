use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use ep_anc::AncError;
use ep_common::CoreError;
use ep_iaf::IafError;
use ep_sin::SinError;
use serde_json::json;

/// Maps every crate-local error enum onto a `{error_code, error_message}`
/// body and the transport status `CoreError::http_status` assigns it
/// (§7 "user-visible failure behavior": batch calls stay 200 at the
/// transport layer, this is only for the auth/cross-tenant/malformed-batch
/// errors that legitimately reach it directly).
pub struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self(err)
    }
}

impl From<SinError> for ApiError {
    fn from(err: SinError) -> Self {
        match err {
            SinError::Core(core) => Self(core),
            other => Self(CoreError::Validation(other.to_string())),
        }
    }
}

impl From<IafError> for ApiError {
    fn from(err: IafError) -> Self {
        match err {
            IafError::Core(core) => Self(core),
            other => Self(CoreError::Validation(other.to_string())),
        }
    }
}

impl From<AncError> for ApiError {
    fn from(err: AncError) -> Self {
        match err {
            AncError::Core(core) => Self(core),
            other => Self(CoreError::Validation(other.to_string())),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({
            "error_code": self.0.error_code(),
            "error_message": self.0.to_string(),
        }));
        (status, body).into_response()
    }
}
