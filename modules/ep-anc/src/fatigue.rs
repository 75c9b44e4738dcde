use std::time::Duration;

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use ep_common::alert_types::{Channel, Notification, NotificationPreference, Severity};
use ep_common::cache::SlidingWindowCounter;
use ep_common::policy::{FatiguePolicy, RateLimitPolicy};
use uuid::Uuid;

/// Rate limiting, maintenance-window suppression, quiet-hours/preference
/// gating, and incident-followup suppression (§4.3 "Fatigue control").
/// Each check is a pure function of `(state, policy, now)` except the
/// sliding-window counters, which hold their own interior mutability the
/// way `ep_common::cache` is built for (§9 "coroutine suspension in
/// business logic" — no suspension point needed for an in-process rate
/// check).
pub struct FatigueGate {
    per_alert: SlidingWindowCounter<Uuid>,
    per_user: SlidingWindowCounter<(String, String)>,
}

impl Default for FatigueGate {
    fn default() -> Self {
        Self {
            per_alert: SlidingWindowCounter::new(),
            per_user: SlidingWindowCounter::new(),
        }
    }
}

impl FatigueGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if dispatching would exceed either the per-alert or
    /// per-`(tenant, target)` rate limit. Records the attempt against
    /// `per_alert` first; a per-alert rejection short-circuits before the
    /// per-user counter is touched, so a suppressed notification never
    /// consumes the user's budget.
    pub fn allow_rate(&self, policy: &RateLimitPolicy, alert_id: Uuid, tenant_id: &str, target_id: &str) -> bool {
        let alert_window = Duration::from_secs(policy.per_alert.window_minutes.max(1) as u64 * 60);
        if !self.per_alert.try_record(alert_id, policy.per_alert.max_notifications.max(1), alert_window) {
            return false;
        }
        let user_window = Duration::from_secs(policy.per_user.window_minutes.max(1) as u64 * 60);
        self.per_user
            .try_record((tenant_id.to_string(), target_id.to_string()), policy.per_user.max_notifications.max(1), user_window)
    }
}

/// Whether `(component_id, severity)` falls inside a configured
/// maintenance window at `now` (§4.3: "mark Alert as suppressed; still
/// persist ... but do not dispatch").
pub fn in_maintenance_window(policy: &FatiguePolicy, component_id: &str, severity: Severity, now: DateTime<Utc>) -> bool {
    policy.maintenance.iter().any(|w| w.matches(component_id, severity, now))
}

/// Incident-followup suppression: true when the incident already produced
/// a notification within `suppress_window_minutes` and the policy asks to
/// suppress followups (§4.3).
pub fn incident_followups_suppressed(policy: &FatiguePolicy, recent_notifications: &[Notification]) -> bool {
    policy.suppression.suppress_followup_during_incident && !recent_notifications.is_empty()
}

/// Whether a dispatch to `(channel, severity)` is allowed under `pref` at
/// `now` (§4.3 "Quiet hours & user preferences"). `severity` must be at
/// least as bad as the channel's configured floor (lower variant = worse,
/// per `Severity`'s declared ordering).
pub fn preference_allows(pref: &NotificationPreference, channel: Channel, severity: Severity, now: DateTime<Utc>) -> bool {
    if !pref.allowed_channels.contains(&channel) {
        return false;
    }
    if let Some(floor) = pref.channel_severity_floor.get(&channel) {
        if severity > *floor {
            return false;
        }
    }
    !in_quiet_hours(pref, now)
}

fn in_quiet_hours(pref: &NotificationPreference, now_utc: DateTime<Utc>) -> bool {
    let offset = parse_fixed_offset(&pref.timezone);
    let local = now_utc.with_timezone(&offset);
    let day_of_week = local.format("%w").to_string().parse::<u8>().unwrap_or(0);
    let minute_of_day = (local.hour() * 60 + local.minute()) as u16;
    pref.quiet_hours.iter().any(|w| {
        (w.day_of_week.is_none() || w.day_of_week == Some(day_of_week))
            && minute_of_day >= w.start_minute_of_day
            && minute_of_day < w.end_minute_of_day
    })
}

/// Accepts `"+HH:MM"`, `"-HH:MM"`, `"Z"`, or `"UTC"`; anything else falls
/// back to UTC. Only fixed offsets are supported — the corpus this
/// workspace is built from never pulls in an IANA timezone database
/// (`chrono-tz`), so quiet hours are specified as a fixed UTC offset
/// rather than a named zone.
fn parse_fixed_offset(tz: &str) -> FixedOffset {
    if tz.eq_ignore_ascii_case("utc") || tz == "Z" {
        return FixedOffset::east_opt(0).expect("zero offset is always valid");
    }
    let (sign, rest) = match tz.as_bytes().first() {
        Some(b'+') => (1, &tz[1..]),
        Some(b'-') => (-1, &tz[1..]),
        _ => return FixedOffset::east_opt(0).expect("zero offset is always valid"),
    };
    let mut parts = rest.splitn(2, ':');
    let hours: i32 = parts.next().and_then(|h| h.parse().ok()).unwrap_or(0);
    let minutes: i32 = parts.next().and_then(|m| m.parse().ok()).unwrap_or(0);
    let total_seconds = sign * (hours * 3600 + minutes * 60);
    FixedOffset::east_opt(total_seconds).unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is always valid"))
}
