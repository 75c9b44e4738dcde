use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use ep_common::action_types::PollingCursor;
use uuid::Uuid;

/// One cursor per connection (§3). `last_polled_at` is updated even when a
/// poll returns zero events (§4.2 polling loop step 3), so the interval
/// gate in step 1 works regardless of provider activity.
#[async_trait]
pub trait PollingCursorStore: Send + Sync {
    async fn get(&self, connection_id: Uuid) -> Option<PollingCursor>;
    async fn upsert(&self, cursor: PollingCursor);
}

#[derive(Default)]
pub struct InMemoryPollingCursorStore {
    cursors: RwLock<BTreeMap<Uuid, PollingCursor>>,
}

impl InMemoryPollingCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PollingCursorStore for InMemoryPollingCursorStore {
    async fn get(&self, connection_id: Uuid) -> Option<PollingCursor> {
        self.cursors.read().expect("cursor store poisoned").get(&connection_id).cloned()
    }

    async fn upsert(&self, cursor: PollingCursor) {
        self.cursors.write().expect("cursor store poisoned").insert(cursor.connection_id, cursor);
    }
}

/// Whether a connection is due to be polled again (§4.2 polling loop step
/// 1): `now - cursor.last_polled_at >= poll_interval`, or the connection
/// has never been polled.
pub fn is_due(cursor: Option<&PollingCursor>, poll_interval: chrono::Duration) -> bool {
    match cursor.and_then(|c| c.last_polled_at) {
        None => true,
        Some(last) => Utc::now().signed_duration_since(last) >= poll_interval,
    }
}
