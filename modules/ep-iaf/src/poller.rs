use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use ep_common::action_types::{Capability, PollingCursor};
use ep_common::envelope::Environment;
use ep_common::error::Outcome;
use ep_sin::SinPipeline;
use tokio::sync::Semaphore;
use tracing::{info, warn};
use uuid::Uuid;

use crate::adapter::AdapterRegistry;
use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::collaborators::{BudgetClient, KmsClient};
use crate::connection_store::ConnectionStore;
use crate::cursor_store::{is_due, PollingCursorStore};
use crate::signal_mapping::poll_event_to_envelope;

/// Polls every active connection with `Capability::Polling` on a fixed
/// tick, bounded by a worker pool (§4.2 polling loop, §5 "pool of workers,
/// default 16"). One tick processes every due connection concurrently,
/// each connection serialized against itself by the semaphore permit it
/// holds for the duration of its own poll.
pub struct Poller {
    pub connections: Arc<dyn ConnectionStore>,
    pub cursors: Arc<dyn PollingCursorStore>,
    pub adapters: Arc<AdapterRegistry>,
    pub breakers: Arc<CircuitBreakerRegistry>,
    pub kms: Arc<dyn KmsClient>,
    pub budget: Arc<dyn BudgetClient>,
    pub sin: Arc<SinPipeline>,
    pub poll_interval: ChronoDuration,
    pub worker_pool_size: usize,
}

impl Poller {
    pub fn new(
        connections: Arc<dyn ConnectionStore>,
        cursors: Arc<dyn PollingCursorStore>,
        adapters: Arc<AdapterRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        kms: Arc<dyn KmsClient>,
        budget: Arc<dyn BudgetClient>,
        sin: Arc<SinPipeline>,
    ) -> Self {
        Self {
            connections,
            cursors,
            adapters,
            breakers,
            kms,
            budget,
            sin,
            poll_interval: ChronoDuration::seconds(60),
            worker_pool_size: 16,
        }
    }

    /// Run a single tick: poll every due connection, up to
    /// `worker_pool_size` concurrently. Returns the number of connections
    /// polled this tick (due but circuit-open connections are skipped, not
    /// counted).
    pub async fn tick(&self) -> usize {
        let candidates = self.connections.list_active_with_capability(Capability::Polling).await;
        let semaphore = Arc::new(Semaphore::new(self.worker_pool_size));
        let mut handles = Vec::new();

        for connection in candidates {
            let cursor = self.cursors.get(connection.connection_id).await;
            if !is_due(cursor.as_ref(), self.poll_interval) {
                continue;
            }

            let permit = semaphore.clone().acquire_owned().await.expect("semaphore closed");
            let this = self.clone_refs();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                this.poll_one(connection.connection_id, connection.tenant_id, connection.provider_id, connection.auth_ref)
                    .await
            }));
        }

        let total = handles.len();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "poller worker task panicked");
            }
        }
        total
    }

    fn clone_refs(&self) -> PollWorker {
        PollWorker {
            cursors: self.cursors.clone(),
            adapters: self.adapters.clone(),
            breakers: self.breakers.clone(),
            kms: self.kms.clone(),
            budget: self.budget.clone(),
            sin: self.sin.clone(),
        }
    }
}

struct PollWorker {
    cursors: Arc<dyn PollingCursorStore>,
    adapters: Arc<AdapterRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    kms: Arc<dyn KmsClient>,
    budget: Arc<dyn BudgetClient>,
    sin: Arc<SinPipeline>,
}

impl PollWorker {
    async fn poll_one(&self, connection_id: Uuid, tenant_id: String, provider_id: String, auth_ref: String) {
        let breaker = self.breakers.for_connection(connection_id);
        if let Err(e) = breaker.allow_call() {
            info!(connection_id = %connection_id, error = %e, "skipping poll, circuit open");
            return;
        }

        let allowed = self.budget.check_and_reserve(&tenant_id, connection_id, 1).await;
        if let Outcome::Degraded { reason } = &allowed {
            warn!(connection_id = %connection_id, reason = %reason, "budget check degraded, proceeding fail-open");
        }
        if matches!(allowed, Outcome::Ok(false)) {
            info!(connection_id = %connection_id, "poll skipped, budget exhausted");
            return;
        }

        let adapter = match self.adapters.get(&provider_id) {
            Ok(a) => a,
            Err(e) => {
                warn!(connection_id = %connection_id, error = %e, "no adapter registered for provider");
                return;
            }
        };

        let secret = match self.kms.resolve_secret(&auth_ref).await {
            Outcome::Ok(s) => s,
            Outcome::Degraded { reason } => {
                warn!(connection_id = %connection_id, reason = %reason, "kms auth resolution failed, skipping poll");
                return;
            }
        };

        let cursor = self.cursors.get(connection_id).await;
        let cursor_position = cursor.as_ref().map(|c| c.cursor_position.as_str());

        let poll_result = adapter.poll_events(&secret, cursor_position).await;

        match poll_result {
            Ok((events, new_cursor)) => {
                breaker.record_success();
                let count = events.len();
                let envelopes = events
                    .into_iter()
                    .map(|event| poll_event_to_envelope(&provider_id, connection_id, &tenant_id, Environment::Prod, event))
                    .collect::<Vec<_>>();

                if !envelopes.is_empty() {
                    if let Err(e) = self.sin.ingest_batch(envelopes, &tenant_id).await {
                        warn!(connection_id = %connection_id, error = %e, "sin ingest failed for polled batch");
                    }
                }

                self.cursors
                    .upsert(PollingCursor {
                        connection_id,
                        cursor_position: new_cursor,
                        last_polled_at: Some(chrono::Utc::now()),
                    })
                    .await;

                info!(connection_id = %connection_id, events = count, "poll completed");
            }
            Err(e) => {
                breaker.record_failure();
                warn!(connection_id = %connection_id, error = %e, "poll failed");
                if let Some(mut c) = cursor {
                    c.last_polled_at = Some(chrono::Utc::now());
                    self.cursors.upsert(c).await;
                } else {
                    self.cursors
                        .upsert(PollingCursor {
                            connection_id,
                            cursor_position: String::new(),
                            last_polled_at: Some(chrono::Utc::now()),
                        })
                        .await;
                }
            }
        }
    }
}
