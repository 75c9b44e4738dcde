use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ep_common::cache::TtlKeySet;
use ep_common::CoreError;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 over the raw request body, header format `sha256=<hex>`,
/// compared in constant time (§6 "Webhook signature verification").
pub fn verify_hmac_sha256(secret: &str, raw_body: &[u8], header_value: &str) -> bool {
    let Some(hex_digest) = header_value.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex_decode(hex_digest) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);
    let computed = mac.finalize().into_bytes();

    computed.ct_eq(&expected).into()
}

/// Shared-token equality verification, for providers that use a static
/// bearer token header rather than an HMAC (§6).
pub fn verify_shared_token(secret: &str, header_value: &str) -> bool {
    secret.as_bytes().ct_eq(header_value.as_bytes()).into()
}

fn hex_decode(s: &str) -> Result<Vec<u8>, ()> {
    if s.len() % 2 != 0 {
        return Err(());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
        .collect()
}

/// Timestamp gate: reject if the event is older than `tolerance` or more
/// than 60s in the future (§4.2 step 4, §8 boundary test: +61s rejected,
/// +59s accepted).
pub fn check_timestamp(event_time: DateTime<Utc>, now: DateTime<Utc>, tolerance: Duration) -> Result<(), CoreError> {
    let age = now.signed_duration_since(event_time);
    let future_tolerance = chrono::Duration::seconds(60);

    if age < -future_tolerance {
        return Err(CoreError::TimestampOutOfRange);
    }
    if age > chrono::Duration::from_std(tolerance).unwrap_or(chrono::Duration::seconds(300)) {
        return Err(CoreError::TimestampOutOfRange);
    }
    Ok(())
}

/// Replay protection cache, keyed by `hash(connection_id || signature_header
/// || payload)` (§4.2 step 5, §8 "webhook replay" invariant).
pub struct ReplayCache {
    seen: TtlKeySet<String>,
}

impl ReplayCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: TtlKeySet::new(ttl),
        }
    }

    pub fn fingerprint(connection_id: Uuid, signature_header: &str, raw_body: &[u8]) -> String {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        connection_id.hash(&mut hasher);
        signature_header.hash(&mut hasher);
        raw_body.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    /// Returns `Err(ReplayDetected)` if this exact delivery was already
    /// seen within the signature TTL; otherwise records it.
    pub fn check_and_record(&self, connection_id: Uuid, signature_header: &str, raw_body: &[u8]) -> Result<(), CoreError> {
        let key = Self::fingerprint(connection_id, signature_header, raw_body);
        if self.seen.check_and_insert(key) {
            return Err(CoreError::ReplayDetected);
        }
        Ok(())
    }
}

/// Looks up a header case-insensitively, matching how adapters must read
/// provider headers whose casing varies by HTTP stack (`X-Hub-Signature-256`
/// vs `x-hub-signature-256`).
pub fn header_ci<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
