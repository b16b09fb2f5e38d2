//! In-process stand-in for an AWS account.
//!
//! Implements both API traits over shared state, so lifecycle tests can run
//! without network access. Mutation failures can be injected to exercise the
//! retry schedule.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::{Clients, Connector, GreengrassApi, IotAnalyticsApi};
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::model::{
    DefinitionDescription, DefinitionResource, DefinitionSpec, StoreDescription, StoreKind,
    StoreSpec,
};

const ACCOUNT_ID: &str = "123456789012";
const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Default)]
struct StoredDefinition {
    name: String,
    tags: BTreeMap<String, String>,
    versions: Vec<Vec<DefinitionResource>>,
}

#[derive(Debug, Default)]
struct AccountState {
    stores: BTreeMap<(StoreKind, String), StoreSpec>,
    definitions: BTreeMap<String, StoredDefinition>,
    next_definition: u64,
    failures_remaining: usize,
    failure_message: String,
    analytics_mutations: usize,
}

/// Shared state of a fake account.
#[derive(Debug)]
pub struct MemoryAccount {
    region: String,
    state: Mutex<AccountState>,
}

impl Default for MemoryAccount {
    fn default() -> Self {
        Self::new(DEFAULT_REGION)
    }
}

impl MemoryAccount {
    /// An empty account in `region`.
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            state: Mutex::new(AccountState::default()),
        }
    }

    /// Make the next `count` channel/datastore create or update calls fail
    /// with `message`, the way a not-yet-propagated IAM role does.
    pub async fn fail_next_mutations(&self, count: usize, message: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.failures_remaining = count;
        state.failure_message = message.into();
    }

    /// Number of channel/datastore create and update calls received,
    /// failed ones included.
    pub async fn analytics_mutations(&self) -> usize {
        self.state.lock().await.analytics_mutations
    }

    /// Drop an object behind the provider's back.
    pub async fn remove_store(&self, kind: StoreKind, name: &str) {
        self.state
            .lock()
            .await
            .stores
            .remove(&(kind, name.to_string()));
    }

    fn store_arn(&self, kind: StoreKind, name: &str) -> String {
        format!(
            "arn:aws:iotanalytics:{}:{}:{}/{}",
            self.region,
            ACCOUNT_ID,
            kind.as_str(),
            name
        )
    }

    fn definition_arn(&self, id: &str) -> String {
        format!(
            "arn:aws:greengrass:{}:{}:/greengrass/definition/resources/{}",
            self.region, ACCOUNT_ID, id
        )
    }

    fn version_arn(&self, id: &str, version: usize) -> String {
        format!("{}/versions/{}", self.definition_arn(id), version)
    }

    fn definition_id_from_arn<'a>(&self, arn: &'a str) -> Result<&'a str, ProviderError> {
        arn.rsplit('/')
            .next()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ProviderError::Validation(format!("malformed definition arn {}", arn)))
    }
}

fn injected_failure(state: &mut AccountState, operation: &str) -> Result<(), ProviderError> {
    state.analytics_mutations += 1;
    if state.failures_remaining > 0 {
        state.failures_remaining -= 1;
        return Err(ProviderError::api(operation, state.failure_message.clone()));
    }
    Ok(())
}

fn store_not_found(kind: StoreKind, name: &str) -> ProviderError {
    ProviderError::NotFound(format!("{} {} does not exist", kind, name))
}

fn definition_not_found(id: &str) -> ProviderError {
    ProviderError::NotFound(format!("resource definition {} does not exist", id))
}

#[async_trait]
impl IotAnalyticsApi for MemoryAccount {
    async fn create_store(&self, kind: StoreKind, spec: &StoreSpec) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        injected_failure(&mut state, "create")?;
        let key = (kind, spec.name.clone());
        if state.stores.contains_key(&key) {
            return Err(ProviderError::AlreadyExists(format!(
                "{} {} already exists",
                kind, spec.name
            )));
        }
        debug!(kind = %kind, name = %spec.name, "memory: store created");
        state.stores.insert(key, spec.clone());
        Ok(())
    }

    async fn update_store(&self, kind: StoreKind, spec: &StoreSpec) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        injected_failure(&mut state, "update")?;
        match state.stores.get_mut(&(kind, spec.name.clone())) {
            Some(stored) => {
                *stored = spec.clone();
                Ok(())
            },
            None => Err(store_not_found(kind, &spec.name)),
        }
    }

    async fn describe_store(
        &self,
        kind: StoreKind,
        name: &str,
    ) -> Result<StoreDescription, ProviderError> {
        let state = self.state.lock().await;
        let spec = state
            .stores
            .get(&(kind, name.to_string()))
            .ok_or_else(|| store_not_found(kind, name))?;
        Ok(StoreDescription {
            name: spec.name.clone(),
            arn: Some(self.store_arn(kind, name)),
            storage: spec.storage.clone(),
            retention: spec.retention,
        })
    }

    async fn delete_store(&self, kind: StoreKind, name: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        state
            .stores
            .remove(&(kind, name.to_string()))
            .map(|_| ())
            .ok_or_else(|| store_not_found(kind, name))
    }

    async fn list_stores(&self, kind: StoreKind) -> Result<Vec<String>, ProviderError> {
        let state = self.state.lock().await;
        Ok(state
            .stores
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.clone())
            .collect())
    }
}

#[async_trait]
impl GreengrassApi for MemoryAccount {
    async fn create_definition(&self, spec: &DefinitionSpec) -> Result<String, ProviderError> {
        let mut state = self.state.lock().await;
        state.next_definition += 1;
        let id = format!("{:08x}-0000-4000-8000-{:012x}", state.next_definition, state.next_definition);
        let mut definition = StoredDefinition {
            name: spec.name.clone(),
            tags: spec.tags.clone(),
            versions: Vec::new(),
        };
        if !spec.resources.is_empty() {
            definition.versions.push(spec.resources.clone());
        }
        state.definitions.insert(id.clone(), definition);
        Ok(id)
    }

    async fn create_definition_version(
        &self,
        definition_id: &str,
        resources: &[DefinitionResource],
    ) -> Result<String, ProviderError> {
        let mut state = self.state.lock().await;
        let definition = state
            .definitions
            .get_mut(definition_id)
            .ok_or_else(|| definition_not_found(definition_id))?;
        definition.versions.push(resources.to_vec());
        let version = definition.versions.len();
        Ok(self.version_arn(definition_id, version))
    }

    async fn rename_definition(
        &self,
        definition_id: &str,
        name: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        let definition = state
            .definitions
            .get_mut(definition_id)
            .ok_or_else(|| definition_not_found(definition_id))?;
        definition.name = name.to_string();
        Ok(())
    }

    async fn tag_definition(
        &self,
        arn: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError> {
        let id = self.definition_id_from_arn(arn)?;
        let mut state = self.state.lock().await;
        let definition = state
            .definitions
            .get_mut(id)
            .ok_or_else(|| definition_not_found(id))?;
        definition
            .tags
            .extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn untag_definition(&self, arn: &str, keys: &[String]) -> Result<(), ProviderError> {
        let id = self.definition_id_from_arn(arn)?;
        let mut state = self.state.lock().await;
        let definition = state
            .definitions
            .get_mut(id)
            .ok_or_else(|| definition_not_found(id))?;
        for key in keys {
            definition.tags.remove(key);
        }
        Ok(())
    }

    async fn get_definition(
        &self,
        definition_id: &str,
    ) -> Result<DefinitionDescription, ProviderError> {
        let state = self.state.lock().await;
        let definition = state
            .definitions
            .get(definition_id)
            .ok_or_else(|| definition_not_found(definition_id))?;
        let version = definition.versions.len();
        Ok(DefinitionDescription {
            id: definition_id.to_string(),
            arn: self.definition_arn(definition_id),
            name: definition.name.clone(),
            tags: definition.tags.clone(),
            latest_version_arn: (version > 0).then(|| self.version_arn(definition_id, version)),
            resources: definition.versions.last().cloned().unwrap_or_default(),
        })
    }

    async fn delete_definition(&self, definition_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state.lock().await;
        state
            .definitions
            .remove(definition_id)
            .map(|_| ())
            .ok_or_else(|| definition_not_found(definition_id))
    }

    async fn list_definitions(&self) -> Result<Vec<String>, ProviderError> {
        let state = self.state.lock().await;
        Ok(state.definitions.keys().cloned().collect())
    }
}

/// Hands out clients backed by one shared [`MemoryAccount`].
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    account: Arc<MemoryAccount>,
}

impl MemoryConnector {
    /// A connector over `account`.
    pub fn new(account: Arc<MemoryAccount>) -> Self {
        Self { account }
    }

    /// The backing account.
    pub fn account(&self) -> &Arc<MemoryAccount> {
        &self.account
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, config: &ProviderConfig) -> Result<Clients, ProviderError> {
        if let Some(region) = &config.region {
            if *region != self.account.region {
                return Err(ProviderError::Configuration(format!(
                    "memory account lives in {}, not {}",
                    self.account.region, region
                )));
            }
        }
        Ok(Clients {
            analytics: self.account.clone(),
            greengrass: self.account.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DataContainer, StorageConfig};

    fn spec(name: &str) -> StoreSpec {
        StoreSpec {
            name: name.to_string(),
            storage: StorageConfig::ServiceManaged,
            retention: None,
        }
    }

    fn device(path: &str) -> DefinitionResource {
        DefinitionResource {
            id: "res".to_string(),
            name: "res".to_string(),
            data_container: DataContainer::LocalDevice {
                source_path: path.to_string(),
                group_owner_setting: None,
            },
        }
    }

    #[tokio::test]
    async fn test_store_lifecycle() {
        let account = MemoryAccount::default();
        account.create_store(StoreKind::Channel, &spec("raw")).await.unwrap();
        let err = account
            .create_store(StoreKind::Channel, &spec("raw"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AlreadyExists(_)));

        // Same name, other kind, is a different object.
        assert!(account
            .describe_store(StoreKind::Datastore, "raw")
            .await
            .unwrap_err()
            .is_not_found());

        let described = account.describe_store(StoreKind::Channel, "raw").await.unwrap();
        assert_eq!(
            described.arn.as_deref(),
            Some("arn:aws:iotanalytics:us-east-1:123456789012:channel/raw")
        );

        account.delete_store(StoreKind::Channel, "raw").await.unwrap();
        assert!(account.list_stores(StoreKind::Channel).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let account = MemoryAccount::default();
        account.fail_next_mutations(1, "Unable to assume role").await;
        assert!(account.create_store(StoreKind::Datastore, &spec("d")).await.is_err());
        assert!(account.create_store(StoreKind::Datastore, &spec("d")).await.is_ok());
        assert_eq!(account.analytics_mutations().await, 2);
    }

    #[tokio::test]
    async fn test_definition_versions_and_tags() {
        let account = MemoryAccount::default();
        let id = account
            .create_definition(&DefinitionSpec {
                name: "defs".to_string(),
                tags: BTreeMap::from([("team".to_string(), "edge".to_string())]),
                resources: vec![device("/dev/a")],
            })
            .await
            .unwrap();

        let first = account.get_definition(&id).await.unwrap();
        assert!(first.latest_version_arn.as_deref().unwrap().ends_with("/versions/1"));

        let arn = account
            .create_definition_version(&id, &[device("/dev/b")])
            .await
            .unwrap();
        let second = account.get_definition(&id).await.unwrap();
        assert_eq!(second.latest_version_arn.as_deref(), Some(arn.as_str()));
        assert_eq!(second.resources, vec![device("/dev/b")]);

        account.untag_definition(&second.arn, &["team".to_string()]).await.unwrap();
        assert!(account.get_definition(&id).await.unwrap().tags.is_empty());

        account.delete_definition(&id).await.unwrap();
        assert!(!account.list_definitions().await.unwrap().contains(&id));
    }

    #[tokio::test]
    async fn test_connector_rejects_other_region() {
        let connector = MemoryConnector::default();
        let config = ProviderConfig {
            region: Some("eu-west-1".to_string()),
            ..Default::default()
        };
        assert!(connector.connect(&config).await.is_err());
        assert!(connector.connect(&ProviderConfig::default()).await.is_ok());
    }
}
