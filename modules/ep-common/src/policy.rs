use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::alert_types::{Channel, Severity};

/// The read-only policy bundle (§3). The core never mutates this; it is
/// sourced externally (config service / bundle file) and reloaded
/// atomically under a single-writer/multi-reader lock (§5).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PolicyBundle {
    pub dedup: DedupPolicy,
    pub correlation: CorrelationPolicy,
    pub routing: RoutingPolicy,
    pub escalation: EscalationPolicy,
    pub fatigue: FatiguePolicy,
    pub retry: RetryPolicy,
    pub fallback: FallbackPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DedupPolicy {
    pub default_window_minutes: u32,
    pub by_category: BTreeMap<String, u32>,
    pub by_severity: BTreeMap<Severity, u32>,
}

impl DedupPolicy {
    /// Dedup window for (category, severity), most specific match wins;
    /// falls back to the bundle default, then a hardcoded minimum (§9).
    pub fn window_minutes(&self, category: &str, severity: Severity) -> u32 {
        if let Some(m) = self.by_category.get(category) {
            return *m;
        }
        if let Some(m) = self.by_severity.get(&severity) {
            return *m;
        }
        if self.default_window_minutes > 0 {
            return self.default_window_minutes;
        }
        5
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorrelationPolicy {
    pub window_minutes: u32,
    pub rules: Vec<CorrelationRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationRule {
    pub name: String,
    pub conditions: Vec<String>,
    pub dependency_match: Option<DependencyMatch>,
    pub window_minutes: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyMatch {
    Shared,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoutingPolicy {
    pub defaults: RoutingTarget,
    pub tenant_overrides: BTreeMap<String, RoutingTarget>,
    pub severity_overrides: BTreeMap<Severity, RoutingTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RoutingTarget {
    pub channels: Vec<Channel>,
    pub targets: Vec<String>,
    pub policy_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EscalationPolicy {
    pub policies: BTreeMap<String, EscalationPlan>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationPlan {
    pub steps: Vec<EscalationStep>,
    pub continue_after_ack: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationStep {
    pub order: u32,
    pub delay_seconds: u64,
    pub channels: Vec<Channel>,
    pub target_group_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FatiguePolicy {
    pub rate_limits: RateLimitPolicy,
    pub maintenance: Vec<MaintenanceWindow>,
    pub suppression: SuppressionPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RateLimitPolicy {
    pub per_alert: RateLimitRule,
    pub per_user: RateLimitRule,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RateLimitRule {
    pub max_notifications: u32,
    pub window_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub component_id: String,
    pub severities: Vec<Severity>,
    pub start: chrono::DateTime<chrono::Utc>,
    pub end: chrono::DateTime<chrono::Utc>,
}

impl MaintenanceWindow {
    pub fn matches(&self, component_id: &str, severity: Severity, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.component_id == component_id
            && self.severities.contains(&severity)
            && now >= self.start
            && now <= self.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SuppressionPolicy {
    pub suppress_followup_during_incident: bool,
    pub suppress_window_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetryPolicy {
    pub defaults: RetryRule,
    pub by_channel: BTreeMap<Channel, RetryRule>,
    pub by_severity: BTreeMap<Severity, RetryRule>,
}

impl RetryPolicy {
    pub fn rule_for(&self, channel: Channel, severity: Severity) -> RetryRule {
        if let Some(r) = self.by_severity.get(&severity) {
            return r.clone();
        }
        if let Some(r) = self.by_channel.get(&channel) {
            return r.clone();
        }
        self.defaults.clone()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryRule {
    pub max_attempts: u32,
    pub backoff_intervals_secs: Vec<u64>,
}

impl Default for RetryRule {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_intervals_secs: vec![30, 120, 300],
        }
    }
}

impl RetryRule {
    pub fn backoff_for_attempt(&self, attempt: u32) -> u64 {
        let idx = (attempt as usize).min(self.backoff_intervals_secs.len().saturating_sub(1));
        self.backoff_intervals_secs.get(idx).copied().unwrap_or(30)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FallbackPolicy {
    pub defaults: Vec<Channel>,
    pub by_severity: BTreeMap<Severity, Vec<Channel>>,
}

impl FallbackPolicy {
    /// Fallback channel order for a severity, with the already-failed
    /// channel removed (§4.3 dispatch step 4).
    pub fn channels_for(&self, severity: Severity, exclude: Channel) -> Vec<Channel> {
        let base = self
            .by_severity
            .get(&severity)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone());
        base.into_iter().filter(|c| *c != exclude).collect()
    }
}

/// Lock-free read-mostly holder for the externally-sourced `PolicyBundle`
/// (§5: "reloaded atomically under a single-writer/multi-reader lock").
/// The bundle itself is fetched by a collaborator outside this crate's
/// scope (config service / bundle file, §1 Non-goals); this store only
/// owns the atomic swap so every hot-path reader sees either the old or
/// the new bundle in full, never a partially-updated one.
pub struct PolicyStore {
    inner: ArcSwap<PolicyBundle>,
    reloading: AtomicBool,
}

impl PolicyStore {
    pub fn new(initial: PolicyBundle) -> Self {
        Self {
            inner: ArcSwap::new(Arc::new(initial)),
            reloading: AtomicBool::new(false),
        }
    }

    /// Lock-free read of the current bundle. Callers get a consistent
    /// `Arc` snapshot even if a reload swaps in new data mid-read.
    pub fn load_full(&self) -> Arc<PolicyBundle> {
        self.inner.load_full()
    }

    /// Swap in a freshly-fetched bundle. Only one reload proceeds at a
    /// time; a reload that arrives while another is in flight is skipped
    /// and reported via the returned `bool`.
    pub fn reload(&self, bundle: PolicyBundle) -> bool {
        if self.reloading.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            info!("policy bundle reload already in progress, skipping");
            return false;
        }
        self.inner.store(Arc::new(bundle));
        self.reloading.store(false, Ordering::SeqCst);
        true
    }
}
