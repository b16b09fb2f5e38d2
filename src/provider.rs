//! The AWS IoT provider.
//!
//! [`IotProvider`] serves the three resource types over [`ProviderService`].
//! It holds no clients until `Configure` succeeds; every CRUD call before that
//! fails with [`ProviderError::Configuration`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::attributes::resource_id;
use crate::client::aws::AwsConnector;
use crate::client::Connector;
use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::plan;
use crate::resources::{self, ResourceHandler, Session};
use crate::schema::{Diagnostic, ProviderSchema};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities};
use crate::validation::validate;

/// Provider for Greengrass resource definitions and IoT Analytics
/// channels and datastores.
pub struct IotProvider {
    connector: Arc<dyn Connector>,
    handlers: BTreeMap<&'static str, Arc<dyn ResourceHandler>>,
    session: RwLock<Option<Arc<Session>>>,
}

impl IotProvider {
    /// A provider that connects with `connector` on `Configure`.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let handlers = resources::handlers()
            .into_iter()
            .map(|h| (h.type_name(), h))
            .collect();
        Self {
            connector,
            handlers,
            session: RwLock::new(None),
        }
    }

    /// A provider talking to AWS through the SDK.
    pub fn aws() -> Self {
        Self::new(Arc::new(AwsConnector))
    }

    /// Identifiers of every remote object of `resource_type`.
    pub async fn list(&self, resource_type: &str) -> Result<Vec<String>, ProviderError> {
        let handler = self.handler(resource_type)?;
        let session = self.session().await?;
        handler.list(&session).await
    }

    fn handler(&self, resource_type: &str) -> Result<&Arc<dyn ResourceHandler>, ProviderError> {
        self.handlers
            .get(resource_type)
            .ok_or_else(|| ProviderError::UnknownResource(resource_type.to_string()))
    }

    async fn session(&self) -> Result<Arc<Session>, ProviderError> {
        self.session.read().await.clone().ok_or_else(|| {
            ProviderError::Configuration("provider has not been configured".to_string())
        })
    }

    /// Schema diagnostics first; typed parsing only runs on schema-valid input.
    fn check_provider_config(config: &Value) -> Vec<Diagnostic> {
        let diagnostics = validate(&ProviderConfig::schema(), config);
        if !diagnostics.is_empty() {
            return diagnostics;
        }
        match ProviderConfig::from_value(config.clone()) {
            Ok(_) => vec![],
            Err(e) => vec![Diagnostic::error(e.message().to_string())],
        }
    }
}

#[async_trait::async_trait]
impl ProviderService for IotProvider {
    fn schema(&self) -> ProviderSchema {
        self.handlers.values().fold(
            ProviderSchema::new().with_provider_config(ProviderConfig::schema()),
            |schema, handler| schema.with_resource(handler.type_name(), handler.schema()),
        )
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            resources: self.handlers.keys().map(|k| k.to_string()).collect(),
            capabilities: ServerCapabilities { plan_destroy: true },
        }
    }

    async fn validate_provider_config(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        Ok(Self::check_provider_config(&config))
    }

    #[instrument(skip(self, config))]
    async fn configure(&self, config: Value) -> Result<Vec<Diagnostic>, ProviderError> {
        let diagnostics = Self::check_provider_config(&config);
        if diagnostics.iter().any(Diagnostic::is_error) {
            return Ok(diagnostics);
        }

        let config = ProviderConfig::from_value(config)?;
        let clients = self.connector.connect(&config).await?;
        let retry = config.retry_schedule();
        info!(
            region = config.region.as_deref().unwrap_or("default"),
            max_attempts = retry.max_attempts(),
            "Provider configured"
        );

        *self.session.write().await = Some(Arc::new(Session::new(clients, retry)));
        Ok(diagnostics)
    }

    async fn stop(&self) -> Result<(), ProviderError> {
        self.session.write().await.take();
        debug!("Session released");
        Ok(())
    }

    async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<Vec<Diagnostic>, ProviderError> {
        let handler = self.handler(resource_type)?;
        let diagnostics = validate(&handler.schema(), &config);
        if !diagnostics.is_empty() {
            return Ok(diagnostics);
        }
        Ok(match handler.normalize(&config) {
            Ok(_) => vec![],
            Err(e) => vec![Diagnostic::error(e.message().to_string())],
        })
    }

    async fn plan(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        proposed_state: Value,
        _config: Value,
    ) -> Result<PlanResult, ProviderError> {
        let handler = self.handler(resource_type)?;
        plan::plan(handler.as_ref(), prior_state.as_ref(), &proposed_state)
    }

    #[instrument(skip(self, planned_state))]
    async fn create(&self, resource_type: &str, planned_state: Value) -> Result<Value, ProviderError> {
        let handler = self.handler(resource_type)?;
        let session = self.session().await?;
        handler.create(&session, &planned_state).await
    }

    #[instrument(skip(self, current_state))]
    async fn read(&self, resource_type: &str, current_state: Value) -> Result<Value, ProviderError> {
        let handler = self.handler(resource_type)?;
        let session = self.session().await?;
        handler.read(&session, &resource_id(&current_state)?).await
    }

    #[instrument(skip(self, prior_state, planned_state))]
    async fn update(
        &self,
        resource_type: &str,
        prior_state: Value,
        planned_state: Value,
    ) -> Result<Value, ProviderError> {
        let handler = self.handler(resource_type)?;
        let session = self.session().await?;
        handler.update(&session, &prior_state, &planned_state).await
    }

    #[instrument(skip(self, current_state))]
    async fn delete(&self, resource_type: &str, current_state: Value) -> Result<(), ProviderError> {
        let handler = self.handler(resource_type)?;
        let session = self.session().await?;
        handler.delete(&session, &resource_id(&current_state)?).await
    }

    #[instrument(skip(self))]
    async fn import_resource(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        let handler = self.handler(resource_type)?;
        let session = self.session().await?;
        let state = handler.read(&session, id).await?;
        Ok(vec![ImportedResource::new(resource_type, state)])
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::client::memory::{MemoryAccount, MemoryConnector};
    use crate::resources::{CHANNEL_TYPE, DATASTORE_TYPE, RESOURCE_DEFINITION_TYPE};
    use crate::testing::{assert_error_contains, assert_has_errors, assert_no_errors};

    fn memory_provider() -> (IotProvider, Arc<MemoryAccount>) {
        let account = Arc::new(MemoryAccount::default());
        let provider = IotProvider::new(Arc::new(MemoryConnector::new(account.clone())));
        (provider, account)
    }

    #[tokio::test]
    async fn test_unconfigured_calls_fail_with_configuration_error() {
        let (provider, _) = memory_provider();
        let err = provider
            .create(CHANNEL_TYPE, json!({"name": "telemetry"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));

        let err = provider
            .read(DATASTORE_TYPE, json!({"id": "telemetry"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_unknown_resource_type() {
        let (provider, _) = memory_provider();
        provider.configure(json!({})).await.unwrap();
        let err = provider
            .create("aws_greengrass_core_definition", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::UnknownResource(_)));
    }

    #[tokio::test]
    async fn test_configure_reports_bad_config() {
        let (provider, _) = memory_provider();
        let diagnostics = provider
            .configure(json!({"retry_delays": ["one"]}))
            .await
            .unwrap();
        assert_has_errors(&diagnostics);

        let diagnostics = provider
            .validate_provider_config(json!({"regoin": "eu-west-1"}))
            .await
            .unwrap();
        assert_error_contains(&diagnostics, "regoin");

        // Still unconfigured.
        assert!(provider.session().await.is_err());
    }

    #[tokio::test]
    async fn test_configure_rejects_foreign_region() {
        let (provider, _) = memory_provider();
        let err = assert_err!(provider.configure(json!({"region": "ap-south-1"})).await);
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_validate_resource_config() {
        let (provider, _) = memory_provider();
        let ok = provider
            .validate_resource_config(
                CHANNEL_TYPE,
                json!({"name": "telemetry", "storage": [{"service_managed_s3": [{}]}]}),
            )
            .await
            .unwrap();
        assert_no_errors(&ok);

        let conflicting = provider
            .validate_resource_config(
                CHANNEL_TYPE,
                json!({
                    "name": "telemetry",
                    "storage": [{
                        "service_managed_s3": [{}],
                        "customer_managed_s3": [{"bucket": "b", "role_arn": "r"}]
                    }]
                }),
            )
            .await
            .unwrap();
        assert_has_errors(&conflicting);

        let no_container = provider
            .validate_resource_config(
                RESOURCE_DEFINITION_TYPE,
                json!({"name": "defs", "resource": [{"id": "r1", "name": "r1", "data_container": [{}]}]}),
            )
            .await
            .unwrap();
        assert_has_errors(&no_container);
    }

    #[tokio::test]
    async fn test_channel_lifecycle() {
        let (provider, account) = memory_provider();
        provider.configure(json!({"retry_delays": [0]})).await.unwrap();

        let state = provider
            .create(
                CHANNEL_TYPE,
                json!({"name": "telemetry", "retention_period": [{"number_of_days": 30}]}),
            )
            .await
            .unwrap();
        assert_eq!(state["id"], "telemetry");
        assert_eq!(
            state["retention_period"],
            json!([{"number_of_days": 30, "unlimited": false}])
        );

        let updated = provider
            .update(
                CHANNEL_TYPE,
                state.clone(),
                json!({"id": "telemetry", "name": "telemetry", "retention_period": [{"unlimited": true}]}),
            )
            .await
            .unwrap();
        assert_eq!(updated["retention_period"], json!([{"unlimited": true}]));
        assert_eq!(account.analytics_mutations().await, 2);

        provider.delete(CHANNEL_TYPE, updated).await.unwrap();
        let err = provider
            .read(CHANNEL_TYPE, json!({"id": "telemetry"}))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_import_reads_remote_object() {
        let (provider, _) = memory_provider();
        provider.configure(Value::Null).await.unwrap();
        let created = provider
            .create(
                RESOURCE_DEFINITION_TYPE,
                json!({"name": "defs", "tags": {"team": "edge"}}),
            )
            .await
            .unwrap();
        let id = created["id"].as_str().unwrap();

        let imported = provider
            .import_resource(RESOURCE_DEFINITION_TYPE, id)
            .await
            .unwrap();
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].resource_type, RESOURCE_DEFINITION_TYPE);
        assert_eq!(imported[0].state, created);
    }

    #[tokio::test]
    async fn test_stop_releases_session() {
        let (provider, _) = memory_provider();
        assert_ok!(provider.configure(json!({})).await);
        assert_ok!(provider.stop().await);
        let err = provider
            .delete(CHANNEL_TYPE, json!({"id": "telemetry"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Configuration(_)));
    }

    #[test]
    fn test_schema_and_metadata() {
        let (provider, _) = memory_provider();
        let schema = provider.schema();
        assert_eq!(schema.resources.len(), 3);
        assert!(schema.provider.block.attributes.contains_key("retry_delays"));

        let metadata = provider.metadata();
        assert!(metadata.capabilities.plan_destroy);
        assert_eq!(
            metadata.resources,
            vec![RESOURCE_DEFINITION_TYPE, CHANNEL_TYPE, DATASTORE_TYPE]
        );
    }
}
