use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    P0,
    P1,
    P2,
    P3,
    P4,
}

impl Severity {
    /// Lower is worse; used when an update may only *upgrade* severity (§4.3).
    pub fn is_upgrade_from(&self, other: Severity) -> bool {
        *self < other
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Open,
    Acknowledged,
    Snoozed,
    Resolved,
}

/// A deduplicated observation of a problem (§3). Identity within the
/// dedup window is `dedup_key`; repeats merge into the same row.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Alert {
    pub alert_id: Uuid,
    pub tenant_id: String,
    pub source_module: String,
    pub component_id: String,
    pub severity: Severity,
    pub category: String,
    pub summary: String,
    pub labels: BTreeMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_seen_at: DateTime<Utc>,
    pub dedup_key: String,
    pub incident_id: Option<Uuid>,
    pub status: AlertStatus,
    pub snoozed_until: Option<DateTime<Utc>>,
    pub automation_hooks: Vec<String>,
    pub escalation_policy_id: Option<String>,
    pub plane: Option<String>,
}

impl Alert {
    /// `snooze` auto-expires back to `open` on first read after expiry
    /// (§4.3 lifecycle transitions). Callers that read an Alert should run
    /// this first so the in-memory view matches the documented semantics.
    pub fn refresh_snooze(&mut self, now: DateTime<Utc>) {
        if self.status == AlertStatus::Snoozed {
            if let Some(until) = self.snoozed_until {
                if now >= until {
                    self.status = AlertStatus::Open;
                    self.snoozed_until = None;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Open,
    Mitigated,
    Resolved,
}

/// A correlated group of alerts (§3). Owns the correlation lifetime of its
/// members; alerts reference it by id rather than embedding a back-pointer
/// (§9 "cyclic graphs" redesign flag — repository-by-id, not embedded refs).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Incident {
    pub incident_id: Uuid,
    pub tenant_id: String,
    pub severity: Severity,
    pub opened_at: DateTime<Utc>,
    pub mitigated_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub status: IncidentStatus,
    pub alert_ids: BTreeSet<Uuid>,
    pub correlation_keys: BTreeSet<String>,
    pub dependency_refs: BTreeSet<String>,
    pub plane: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Voice,
    Webhook,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

/// One dispatch attempt slot for a target+channel (§3). Created by
/// routing/escalation, mutated by the dispatcher, terminal once `sent`,
/// `failed` (after retries and fallbacks), or `cancelled`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Notification {
    pub notification_id: Uuid,
    pub tenant_id: String,
    pub alert_id: Uuid,
    pub incident_id: Option<Uuid>,
    pub target_id: String,
    pub channel: Channel,
    pub status: NotificationStatus,
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub policy_id: Option<String>,
    /// Set only for escalation-step stub rows awaiting their scheduled time.
    pub escalation_step: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-user dispatch preferences — channel allow-list, per-channel severity
/// threshold, and a quiet-hours schedule in the user's own timezone
/// (§2, "Preferences").
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NotificationPreference {
    pub tenant_id: String,
    pub target_id: String,
    pub allowed_channels: BTreeSet<Channel>,
    /// channel -> minimum severity that may be dispatched on it
    pub channel_severity_floor: BTreeMap<Channel, Severity>,
    pub timezone: String,
    pub quiet_hours: Vec<QuietHoursWindow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct QuietHoursWindow {
    /// 0 = Sunday .. 6 = Saturday, in the user's timezone; `None` = every day.
    pub day_of_week: Option<u8>,
    pub start_minute_of_day: u16,
    pub end_minute_of_day: u16,
}
