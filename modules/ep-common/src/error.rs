use thiserror::Error;

/// Error taxonomy shared by every component of the event plane (§7).
///
/// Variants are kinds, not exception types: every call site classifies a
/// failure into one of these before it crosses a crate boundary, so that
/// retry policy and HTTP status mapping are a pure function of the error
/// rather than ad hoc matching at each caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("missing or invalid credential: {0}")]
    Auth(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolationViolation(String),

    #[error("producer not registered: {0}")]
    ProducerNotRegistered(String),

    #[error("signal type not allowed for producer: {0}")]
    SignalTypeNotAllowed(String),

    #[error("signal kind not allowed for producer: {0}")]
    SignalKindNotAllowed(String),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("governance violation: {0}")]
    GovernanceViolation(String),

    #[error("duplicate signal_id within dedup window")]
    Duplicate,

    #[error("downstream delivery failure: {0}")]
    DownstreamFailure(String),

    #[error("rate limit exceeded{}", .retry_after_secs.map(|s| format!(", retry after {s}s")).unwrap_or_default())]
    RateLimit { retry_after_secs: Option<u64> },

    #[error("circuit open, retry after {retry_after_secs}s")]
    CircuitOpen { retry_after_secs: u64 },

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("replay detected")]
    ReplayDetected,

    #[error("event timestamp out of tolerance range")]
    TimestampOutOfRange,

    #[error("upstream error: {0}")]
    UpstreamError(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// Standard error-code tag carried in per-item results (§7 "user-visible
/// failure behavior"). Kept as a stable string rather than the Display
/// text, since callers match on it.
impl CoreError {
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Auth(_) => "AUTH",
            CoreError::TenantIsolationViolation(_) => "TENANT_ISOLATION_VIOLATION",
            CoreError::ProducerNotRegistered(_) => "PRODUCER_NOT_REGISTERED",
            CoreError::SignalTypeNotAllowed(_) => "SIGNAL_TYPE_NOT_ALLOWED",
            CoreError::SignalKindNotAllowed(_) => "SIGNAL_KIND_NOT_ALLOWED",
            CoreError::SchemaViolation(_) => "SCHEMA_VIOLATION",
            CoreError::GovernanceViolation(_) => "GOVERNANCE_VIOLATION",
            CoreError::Duplicate => "DUPLICATE",
            CoreError::DownstreamFailure(_) => "DOWNSTREAM_FAILURE",
            CoreError::RateLimit { .. } => "RATE_LIMIT",
            CoreError::CircuitOpen { .. } => "CIRCUIT_OPEN",
            CoreError::InvalidSignature => "INVALID_SIGNATURE",
            CoreError::ReplayDetected => "REPLAY_DETECTED",
            CoreError::TimestampOutOfRange => "TIMESTAMP_OUT_OF_RANGE",
            CoreError::UpstreamError(_) => "UPSTREAM_ERROR",
            CoreError::Validation(_) => "VALIDATION_ERROR",
            CoreError::NotFound(_) => "NOT_FOUND",
            CoreError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
        }
    }

    /// Whether the service may retry this call internally (exponential
    /// backoff, §4.4). Validation-shaped errors are never retried
    /// internally — the caller resubmits (§4.1 "Failure semantics").
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            CoreError::DownstreamFailure(_)
                | CoreError::RateLimit { .. }
                | CoreError::CircuitOpen { .. }
                | CoreError::UpstreamError(_)
        )
    }

    /// Whether a persistent rejection of this kind escalates to the DLQ
    /// once retry/confirmation thresholds are met (§4.1 DLQ policy).
    pub fn dlq_eligible(&self) -> bool {
        matches!(
            self,
            CoreError::SchemaViolation(_)
                | CoreError::GovernanceViolation(_)
                | CoreError::DownstreamFailure(_)
        )
    }

    /// Transport-level status code an ingress layer would map this to.
    /// Per §7, batch calls return 200 for any parseable batch; this is for
    /// the few error kinds that legitimately reach the transport layer
    /// (auth, malformed batch, cross-tenant reads).
    pub fn http_status(&self) -> u16 {
        match self {
            CoreError::Auth(_) => 401,
            CoreError::TenantIsolationViolation(_) => 403,
            CoreError::ProducerNotRegistered(_)
            | CoreError::SignalTypeNotAllowed(_)
            | CoreError::SignalKindNotAllowed(_)
            | CoreError::Validation(_)
            | CoreError::MalformedPayload(_)
            | CoreError::Duplicate => 400,
            CoreError::NotFound(_) => 404,
            CoreError::RateLimit { .. } => 429,
            CoreError::CircuitOpen { .. } => 503,
            _ => 422,
        }
    }
}

/// A result whose error reached an explicit degraded outcome rather than
/// being thrown away. Used for "fail-open" collaborators (budget, ERIS,
/// IAM availability checks) so degraded paths stay visible instead of
/// being swallowed by a bare `try/except` (§9 redesign flag).
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Ok(T),
    Degraded { reason: String },
}

impl<T> Outcome<T> {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded { .. })
    }

    pub fn ok_or(self, default: T) -> T {
        match self {
            Outcome::Ok(v) => v,
            Outcome::Degraded { reason } => {
                tracing::warn!(reason = %reason, "collaborator degraded, using fallback");
                default
            }
        }
    }
}
