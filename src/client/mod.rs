//! Upstream API seams.
//!
//! Handlers talk to AWS only through [`IotAnalyticsApi`] and
//! [`GreengrassApi`]. [`aws`] backs them with the AWS SDK, [`memory`] with
//! an in-process account used by tests.

pub mod aws;
pub mod memory;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::model::{
    DefinitionDescription, DefinitionResource, DefinitionSpec, StoreDescription, StoreKind,
    StoreSpec,
};

/// IoT Analytics channel and datastore operations.
#[async_trait]
pub trait IotAnalyticsApi: Send + Sync {
    /// Create a channel or datastore.
    async fn create_store(&self, kind: StoreKind, spec: &StoreSpec) -> Result<(), ProviderError>;

    /// Replace the storage and retention of an existing object.
    async fn update_store(&self, kind: StoreKind, spec: &StoreSpec) -> Result<(), ProviderError>;

    /// Describe an object by name. Missing objects are [`ProviderError::NotFound`].
    async fn describe_store(
        &self,
        kind: StoreKind,
        name: &str,
    ) -> Result<StoreDescription, ProviderError>;

    /// Delete an object by name.
    async fn delete_store(&self, kind: StoreKind, name: &str) -> Result<(), ProviderError>;

    /// Names of all objects of `kind`.
    async fn list_stores(&self, kind: StoreKind) -> Result<Vec<String>, ProviderError>;
}

/// Greengrass resource definition operations.
#[async_trait]
pub trait GreengrassApi: Send + Sync {
    /// Create a definition, with an initial version when `spec.resources` is
    /// non-empty. Returns the new definition id.
    async fn create_definition(&self, spec: &DefinitionSpec) -> Result<String, ProviderError>;

    /// Create a new version holding `resources`. Returns the version ARN.
    async fn create_definition_version(
        &self,
        definition_id: &str,
        resources: &[DefinitionResource],
    ) -> Result<String, ProviderError>;

    /// Rename a definition.
    async fn rename_definition(&self, definition_id: &str, name: &str)
        -> Result<(), ProviderError>;

    /// Add or overwrite tags.
    async fn tag_definition(
        &self,
        arn: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError>;

    /// Remove tags by key.
    async fn untag_definition(&self, arn: &str, keys: &[String]) -> Result<(), ProviderError>;

    /// Describe a definition and its latest version.
    async fn get_definition(
        &self,
        definition_id: &str,
    ) -> Result<DefinitionDescription, ProviderError>;

    /// Delete a definition.
    async fn delete_definition(&self, definition_id: &str) -> Result<(), ProviderError>;

    /// Ids of all definitions.
    async fn list_definitions(&self) -> Result<Vec<String>, ProviderError>;
}

/// The clients handed to resource handlers.
#[derive(Clone)]
pub struct Clients {
    /// IoT Analytics client.
    pub analytics: Arc<dyn IotAnalyticsApi>,
    /// Greengrass client.
    pub greengrass: Arc<dyn GreengrassApi>,
}

/// Builds [`Clients`] from the provider configuration.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect using `config`.
    async fn connect(&self, config: &ProviderConfig) -> Result<Clients, ProviderError>;
}
