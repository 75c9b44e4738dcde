use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Dev,
    Stage,
    Prod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Event,
    Metric,
    Log,
    Trace,
}

/// Addressing context for a signal — repository/branch/pr_id/service_name/…
/// Every field optional: a signal carries whichever subset its provider
/// and signal_type populate.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Resource {
    pub service_name: Option<String>,
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub pr_id: Option<String>,
    pub issue_key: Option<String>,
    pub channel_id: Option<String>,
    pub environment: Option<String>,
    pub deployment_id: Option<String>,
}

/// The canonical envelope every signal is normalized into (§3).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SignalEnvelope {
    pub signal_id: String,
    pub tenant_id: String,
    pub environment: Environment,
    pub producer_id: String,
    pub signal_kind: SignalKind,
    pub signal_type: String,
    pub occurred_at: DateTime<Utc>,
    pub ingested_at: DateTime<Utc>,
    pub payload: BTreeMap<String, Value>,
    pub schema_version: String,
    pub actor_id: Option<String>,
    pub correlation_id: Option<String>,
    pub trace_id: Option<String>,
    pub span_id: Option<String>,
    pub resource: Option<Resource>,
    pub sequence_no: Option<i64>,
}

/// Data contract keyed by (signal_type, contract_version), §3. Immutable
/// once published — a new contract shape gets a new `contract_version`,
/// never a mutation of an existing one.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DataContract {
    pub signal_type: String,
    pub contract_version: String,
    pub required_fields: Vec<String>,
    pub optional_fields: Vec<String>,
    /// provider field name -> canonical field name
    pub field_mappings: BTreeMap<String, String>,
    /// canonical field name -> conversion, e.g. "s_to_ms"
    pub unit_conversions: BTreeMap<String, UnitConversion>,
    pub pii_flags: Vec<String>,
    pub secrets_flags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum UnitConversion {
    SecondsToMillis,
    MillisToSeconds,
    BytesToKilobytes,
}

impl UnitConversion {
    pub fn apply(&self, value: &Value) -> Value {
        let Some(n) = value.as_f64() else {
            return value.clone();
        };
        let converted = match self {
            UnitConversion::SecondsToMillis => n * 1000.0,
            UnitConversion::MillisToSeconds => n / 1000.0,
            UnitConversion::BytesToKilobytes => n / 1024.0,
        };
        serde_json::json!(converted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Plane {
    ClientServices,
    ProductServices,
    SharedServices,
}

/// Registration of a producer allowed to emit signals into a tenant (§3).
/// Status transitions only — never silently deleted.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProducerRegistration {
    pub producer_id: String,
    pub tenant_id: String,
    pub plane: Plane,
    pub allowed_signal_kinds: Vec<SignalKind>,
    pub allowed_signal_types: Vec<String>,
    /// signal_type -> contract_version in effect for this producer
    pub contract_versions: BTreeMap<String, String>,
    pub status: ProducerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProducerStatus {
    Active,
    Suspended,
    Retired,
}

impl ProducerRegistration {
    pub fn allows(&self, kind: SignalKind, signal_type: &str) -> Result<(), String> {
        if !self.allowed_signal_kinds.contains(&kind) {
            return Err(format!("signal_kind {kind:?} not allowed for producer"));
        }
        if !self.allowed_signal_types.iter().any(|t| t == signal_type) {
            return Err(format!("signal_type {signal_type} not allowed for producer"));
        }
        Ok(())
    }
}

/// Dead-letter entry, terminal state for an envelope that exhausted
/// retries or persistent-violation confirmation (§3, §4.1).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DlqEntry {
    pub dlq_id: Uuid,
    pub signal_id: String,
    pub tenant_id: String,
    pub producer_id: String,
    pub signal_type: String,
    pub error_code: String,
    pub error_message: String,
    pub retry_count: u32,
    pub original_payload_ref: Value,
    pub created_at: DateTime<Utc>,
}

/// Per-envelope ingest outcome (§4.1, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Accepted,
    Rejected,
    Dlq,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct IngestResult {
    pub signal_id: String,
    pub status: IngestStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub dlq_id: Option<Uuid>,
    pub warnings: Vec<String>,
}

impl IngestResult {
    pub fn accepted(signal_id: impl Into<String>) -> Self {
        Self {
            signal_id: signal_id.into(),
            status: IngestStatus::Accepted,
            error_code: None,
            error_message: None,
            dlq_id: None,
            warnings: Vec::new(),
        }
    }

    pub fn rejected(signal_id: impl Into<String>, error_code: &str, message: impl Into<String>) -> Self {
        Self {
            signal_id: signal_id.into(),
            status: IngestStatus::Rejected,
            error_code: Some(error_code.to_string()),
            error_message: Some(message.into()),
            dlq_id: None,
            warnings: Vec::new(),
        }
    }

    pub fn dlq(signal_id: impl Into<String>, error_code: &str, message: impl Into<String>, dlq_id: Uuid) -> Self {
        Self {
            signal_id: signal_id.into(),
            status: IngestStatus::Dlq,
            error_code: Some(error_code.to_string()),
            error_message: Some(message.into()),
            dlq_id: Some(dlq_id),
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct IngestSummary {
    pub total: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub dlq: usize,
}

impl IngestSummary {
    pub fn tally(results: &[IngestResult]) -> Self {
        let mut s = Self {
            total: results.len(),
            ..Default::default()
        };
        for r in results {
            match r.status {
                IngestStatus::Accepted => s.accepted += 1,
                IngestStatus::Rejected => s.rejected += 1,
                IngestStatus::Dlq => s.dlq += 1,
            }
        }
        s
    }
}
