//! Resource handlers.
//!
//! Each handler owns one resource type: its schema, the mapping between
//! attribute maps and the typed model, and the CRUD calls against the
//! configured [`Clients`].

pub mod analytics;
pub mod definition;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::client::Clients;
use crate::error::ProviderError;
use crate::retry::RetrySchedule;
use crate::schema::Schema;

pub use analytics::{StoreHandler, CHANNEL_TYPE, DATASTORE_TYPE};
pub use definition::{DefinitionHandler, RESOURCE_DEFINITION_TYPE};

/// Everything a handler needs once the provider is configured.
#[derive(Clone)]
pub struct Session {
    /// Upstream clients.
    pub clients: Clients,
    /// Schedule for retried IoT Analytics mutations.
    pub retry: RetrySchedule,
}

impl Session {
    /// Create a session.
    pub fn new(clients: Clients, retry: RetrySchedule) -> Self {
        Self { clients, retry }
    }
}

/// CRUD for one resource type.
///
/// Configuration values are attribute maps as produced by the engine. Every
/// returned state is the full mirror of the remote object, in canonical form.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// The resource type name, e.g. `aws_iotanalytics_channel`.
    fn type_name(&self) -> &'static str;

    /// The resource schema.
    fn schema(&self) -> Schema;

    /// Parse `config` into the typed model and flatten it back.
    ///
    /// Only user-settable attributes are kept, so a full state mirror
    /// normalizes to the configuration it was created from.
    fn normalize(&self, config: &Value) -> Result<Value, ProviderError>;

    /// Computed attributes whose value a change to `attribute` replaces.
    ///
    /// Plans leave these unknown instead of carrying the prior value.
    fn recomputed_by(&self, attribute: &str) -> &'static [&'static str] {
        let _ = attribute;
        &[]
    }

    /// Create the remote object and return its mirror.
    async fn create(&self, session: &Session, planned: &Value) -> Result<Value, ProviderError>;

    /// Read the remote object identified by `id`.
    async fn read(&self, session: &Session, id: &str) -> Result<Value, ProviderError>;

    /// Converge the remote object from `prior` to `planned`.
    async fn update(
        &self,
        session: &Session,
        prior: &Value,
        planned: &Value,
    ) -> Result<Value, ProviderError>;

    /// Delete the remote object. Never retried.
    async fn delete(&self, session: &Session, id: &str) -> Result<(), ProviderError>;

    /// Identifiers of all remote objects of this type.
    async fn list(&self, session: &Session) -> Result<Vec<String>, ProviderError>;
}

/// All handlers served by the provider.
pub fn handlers() -> Vec<Arc<dyn ResourceHandler>> {
    vec![
        Arc::new(StoreHandler::channel()),
        Arc::new(StoreHandler::datastore()),
        Arc::new(DefinitionHandler),
    ]
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use super::Session;
    use crate::client::memory::MemoryAccount;
    use crate::client::Clients;
    use crate::retry::RetrySchedule;

    /// A session over a fresh in-memory account.
    pub fn memory_session(retry: RetrySchedule) -> (Session, Arc<MemoryAccount>) {
        let account = Arc::new(MemoryAccount::default());
        let clients = Clients {
            analytics: account.clone(),
            greengrass: account.clone(),
        };
        (Session::new(clients, retry), account)
    }
}
