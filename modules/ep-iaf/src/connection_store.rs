use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use ep_common::action_types::{ConnectionStatus, IntegrationConnection, WebhookRegistration, WebhookStatus};
use ep_common::CoreError;
use uuid::Uuid;

/// Tenant-scoped CRUD surface for `IntegrationConnection` (§3, §6). Every
/// lookup takes `tenant_id` so no query path can cross a tenant boundary
/// (§5 "no query omits tenant scope").
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn create(&self, connection: IntegrationConnection) -> Result<(), CoreError>;
    async fn get(&self, tenant_id: &str, connection_id: Uuid) -> Option<IntegrationConnection>;
    async fn set_status(&self, tenant_id: &str, connection_id: Uuid, status: ConnectionStatus) -> Result<(), CoreError>;
    async fn list_active_with_capability(&self, capability: ep_common::action_types::Capability) -> Vec<IntegrationConnection>;

    /// Tenant-unscoped lookup, used only to resolve the owning tenant for an
    /// inbound webhook whose URL carries a `registration_id` token rather
    /// than an asserted tenant (§4.2, §9 Open Question #1). Every other
    /// lookup in this trait must take `tenant_id`; this is the sole
    /// exception and exists to make that lookup possible in the first
    /// place, not to bypass tenant scoping elsewhere.
    async fn get_any(&self, connection_id: Uuid) -> Option<IntegrationConnection>;
}

#[derive(Default)]
pub struct InMemoryConnectionStore {
    connections: RwLock<BTreeMap<Uuid, IntegrationConnection>>,
}

impl InMemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionStore for InMemoryConnectionStore {
    async fn create(&self, connection: IntegrationConnection) -> Result<(), CoreError> {
        let mut connections = self.connections.write().expect("connection store poisoned");
        connections.insert(connection.connection_id, connection);
        Ok(())
    }

    async fn get(&self, tenant_id: &str, connection_id: Uuid) -> Option<IntegrationConnection> {
        self.connections
            .read()
            .expect("connection store poisoned")
            .get(&connection_id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
    }

    async fn set_status(&self, tenant_id: &str, connection_id: Uuid, status: ConnectionStatus) -> Result<(), CoreError> {
        let mut connections = self.connections.write().expect("connection store poisoned");
        let connection = connections
            .get_mut(&connection_id)
            .filter(|c| c.tenant_id == tenant_id)
            .ok_or_else(|| CoreError::NotFound(connection_id.to_string()))?;
        connection.status = status;
        connection.updated_at = Utc::now();
        Ok(())
    }

    async fn list_active_with_capability(&self, capability: ep_common::action_types::Capability) -> Vec<IntegrationConnection> {
        self.connections
            .read()
            .expect("connection store poisoned")
            .values()
            .filter(|c| c.is_usable() && c.has_capability(capability))
            .cloned()
            .collect()
    }

    async fn get_any(&self, connection_id: Uuid) -> Option<IntegrationConnection> {
        self.connections.read().expect("connection store poisoned").get(&connection_id).cloned()
    }
}

/// Lookup surface keyed by `registration_id`, the public-facing webhook
/// token (§3, §9 Open Question #1: normalized on `registration_id`, never
/// `connection_id`, in the inbound URL path).
#[async_trait]
pub trait WebhookRegistrationStore: Send + Sync {
    async fn create(&self, registration: WebhookRegistration) -> Result<(), CoreError>;
    async fn get_by_registration_id(&self, registration_id: Uuid) -> Option<WebhookRegistration>;
}

#[derive(Default)]
pub struct InMemoryWebhookRegistrationStore {
    registrations: RwLock<BTreeMap<Uuid, WebhookRegistration>>,
}

impl InMemoryWebhookRegistrationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookRegistrationStore for InMemoryWebhookRegistrationStore {
    async fn create(&self, registration: WebhookRegistration) -> Result<(), CoreError> {
        self.registrations
            .write()
            .expect("webhook registration store poisoned")
            .insert(registration.registration_id, registration);
        Ok(())
    }

    async fn get_by_registration_id(&self, registration_id: Uuid) -> Option<WebhookRegistration> {
        self.registrations
            .read()
            .expect("webhook registration store poisoned")
            .get(&registration_id)
            .filter(|r| r.status == WebhookStatus::Active)
            .cloned()
    }
}
