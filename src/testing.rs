//! Test harness for the provider.
//!
//! [`ProviderTester`] drives an [`IotProvider`] backed by a [`MemoryAccount`]
//! the way the engine would, without a gRPC server.
//!
//! ```ignore
//! use hemmer_provider_aws_iot::testing::ProviderTester;
//! use serde_json::json;
//!
//! let tester = ProviderTester::configured(json!({"retry_delays": [0]})).await?;
//! let state = tester.apply("aws_iotanalytics_channel", None, json!({"name": "telemetry"})).await?;
//! assert_eq!(state["id"], "telemetry");
//! ```

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::client::memory::{MemoryAccount, MemoryConnector};
use crate::error::ProviderError;
use crate::provider::IotProvider;
use crate::schema::{Diagnostic, DiagnosticSeverity};
use crate::server::ProviderService;
use crate::types::{ImportedResource, PlanResult};

/// Drives an in-memory [`IotProvider`].
pub struct ProviderTester {
    provider: IotProvider,
    account: Arc<MemoryAccount>,
}

impl Default for ProviderTester {
    fn default() -> Self {
        Self::with_account(Arc::new(MemoryAccount::default()))
    }
}

impl ProviderTester {
    /// An unconfigured tester over a fresh account.
    pub fn new() -> Self {
        Self::default()
    }

    /// An unconfigured tester over `account`.
    pub fn with_account(account: Arc<MemoryAccount>) -> Self {
        Self {
            provider: IotProvider::new(Arc::new(MemoryConnector::new(account.clone()))),
            account,
        }
    }

    /// A tester over a fresh account, configured with `config`.
    pub async fn configured(config: Value) -> Result<Self, TestError> {
        let tester = Self::new();
        tester.configure(config).await?;
        Ok(tester)
    }

    /// The provider under test.
    pub fn provider(&self) -> &IotProvider {
        &self.provider
    }

    /// The backing account, for failure injection and inspection.
    pub fn account(&self) -> &Arc<MemoryAccount> {
        &self.account
    }

    /// Configure the provider, failing on error diagnostics.
    pub async fn configure(&self, config: Value) -> Result<(), TestError> {
        let diagnostics = self.provider.configure(config).await?;
        check_diagnostics(diagnostics)
    }

    /// Validate a resource configuration, failing on error diagnostics.
    pub async fn validate_resource_config(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<(), TestError> {
        let diagnostics = self
            .provider
            .validate_resource_config(resource_type, config)
            .await?;
        check_diagnostics(diagnostics)
    }

    /// Plan a resource creation.
    pub async fn plan_create(
        &self,
        resource_type: &str,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, None, config.clone(), config)
            .await
    }

    /// Plan a change from `prior_state` to `config`.
    pub async fn plan_update(
        &self,
        resource_type: &str,
        prior_state: Value,
        config: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), config.clone(), config)
            .await
    }

    /// Plan a resource deletion.
    pub async fn plan_delete(
        &self,
        resource_type: &str,
        prior_state: Value,
    ) -> Result<PlanResult, ProviderError> {
        self.provider
            .plan(resource_type, Some(prior_state), Value::Null, Value::Null)
            .await
    }

    /// Read the remote object behind `state`.
    pub async fn read(&self, resource_type: &str, state: Value) -> Result<Value, ProviderError> {
        self.provider.read(resource_type, state).await
    }

    /// Delete the remote object behind `state`.
    pub async fn delete(&self, resource_type: &str, state: Value) -> Result<(), ProviderError> {
        self.provider.delete(resource_type, state).await
    }

    /// Import a remote object by id.
    pub async fn import(
        &self,
        resource_type: &str,
        id: &str,
    ) -> Result<Vec<ImportedResource>, ProviderError> {
        self.provider.import_resource(resource_type, id).await
    }

    /// Identifiers of every remote object of `resource_type`.
    pub async fn list(&self, resource_type: &str) -> Result<Vec<String>, ProviderError> {
        self.provider.list(resource_type).await
    }

    /// Validate, plan and converge `config` from `prior_state`.
    ///
    /// Creates when there is no prior state, replaces when the plan requires
    /// it and refreshes without mutating when nothing changed.
    pub async fn apply(
        &self,
        resource_type: &str,
        prior_state: Option<Value>,
        config: Value,
    ) -> Result<Value, TestError> {
        self.validate_resource_config(resource_type, config.clone())
            .await?;
        let plan = self
            .provider
            .plan(resource_type, prior_state.clone(), config.clone(), config)
            .await?;

        let state = match prior_state {
            None => self.provider.create(resource_type, plan.planned_state).await?,
            Some(prior) if plan.requires_replace => {
                self.provider.delete(resource_type, prior).await?;
                self.provider.create(resource_type, plan.planned_state).await?
            },
            Some(prior) if plan.changes.is_empty() => self.provider.read(resource_type, prior).await?,
            Some(prior) => {
                self.provider
                    .update(resource_type, prior, plan.planned_state)
                    .await?
            },
        };
        Ok(state)
    }

    /// Create, update, then delete. Returns the state after the update.
    pub async fn lifecycle_crud(
        &self,
        resource_type: &str,
        initial_config: Value,
        updated_config: Value,
    ) -> Result<Value, TestError> {
        let created = self.apply(resource_type, None, initial_config).await?;
        let updated = self
            .apply(resource_type, Some(created), updated_config)
            .await?;
        self.plan_delete(resource_type, updated.clone()).await?;
        self.delete(resource_type, updated.clone()).await?;
        Ok(updated)
    }
}

/// Failure of a harness operation.
#[derive(Debug, Error)]
pub enum TestError {
    /// The operation returned error diagnostics.
    #[error("operation failed with diagnostics: {}", summarize(.0))]
    Diagnostics(Vec<Diagnostic>),
    /// The provider returned an error.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

fn summarize(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| {
            let mut line = d.summary.clone();
            if let Some(detail) = &d.detail {
                line.push_str(": ");
                line.push_str(detail);
            }
            if let Some(attr) = &d.attribute {
                line.push_str(&format!(" (at {})", attr));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("; ")
}

fn check_diagnostics(diagnostics: Vec<Diagnostic>) -> Result<(), TestError> {
    let errors: Vec<_> = diagnostics.into_iter().filter(Diagnostic::is_error).collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(TestError::Diagnostics(errors))
    }
}

fn errors(diagnostics: &[Diagnostic]) -> Vec<&str> {
    diagnostics
        .iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .map(|d| d.summary.as_str())
        .collect()
}

/// Assert that a plan has changes and creates in place.
pub fn assert_plan_creates(plan: &PlanResult) {
    assert!(
        !plan.changes.is_empty(),
        "Expected plan to have changes for create, but got no changes"
    );
    assert!(!plan.requires_replace, "Expected plan to create, not replace");
}

/// Assert that a plan has no changes.
pub fn assert_plan_no_changes(plan: &PlanResult) {
    assert!(
        plan.changes.is_empty(),
        "Expected no changes, but got {:?}",
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that a plan requires replacement.
pub fn assert_plan_replaces(plan: &PlanResult) {
    assert!(
        plan.requires_replace,
        "Expected plan to require replacement, but it does not"
    );
}

/// Assert that a plan changes `path`.
pub fn assert_plan_changes_attribute(plan: &PlanResult, path: &str) {
    assert!(
        plan.changes.iter().any(|c| c.path == path),
        "Expected plan to change '{}', changed: {:?}",
        path,
        plan.changes.iter().map(|c| &c.path).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain no errors.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors = errors(diagnostics);
    assert!(errors.is_empty(), "Expected no errors, but got {:?}", errors);
}

/// Assert that diagnostics contain at least one error.
pub fn assert_has_errors(diagnostics: &[Diagnostic]) {
    assert!(
        !errors(diagnostics).is_empty(),
        "Expected at least one error, but got none"
    );
}

/// Assert that some error summary contains `substring`.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let errors = errors(diagnostics);
    assert!(
        errors.iter().any(|s| s.contains(substring)),
        "Expected an error containing '{}', errors: {:?}",
        substring,
        errors
    );
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::resources::{CHANNEL_TYPE, DATASTORE_TYPE, RESOURCE_DEFINITION_TYPE};

    fn local_device(path: &str) -> Value {
        json!({
            "id": "dev",
            "name": "dev",
            "data_container": [{
                "local_device_resource_data": [{"source_path": path, "group_owner_setting": []}]
            }]
        })
    }

    fn local_volume(path: &str) -> Value {
        json!({
            "id": "dev",
            "name": "dev",
            "data_container": [{
                "local_volume_resource_data": [{
                    "source_path": path,
                    "destination_path": "/mnt/data",
                    "group_owner_setting": []
                }]
            }]
        })
    }

    #[tokio::test]
    async fn test_datastore_without_storage_reads_unset() {
        let tester = ProviderTester::configured(json!({"retry_delays": [0]}))
            .await
            .unwrap();
        let state = tester
            .apply(DATASTORE_TYPE, None, json!({"name": "readings"}))
            .await
            .unwrap();
        let read = tester.read(DATASTORE_TYPE, state).await.unwrap();
        assert_eq!(read["storage"], json!([]));
    }

    #[tokio::test]
    async fn test_customer_managed_storage_mirrors_exactly() {
        let tester = ProviderTester::configured(json!({})).await.unwrap();
        let state = tester
            .apply(
                CHANNEL_TYPE,
                None,
                json!({
                    "name": "telemetry",
                    "storage": [{
                        "customer_managed_s3": [{
                            "bucket": "raw-telemetry",
                            "role_arn": "arn:aws:iam::123456789012:role/iot"
                        }]
                    }]
                }),
            )
            .await
            .unwrap();
        let read = tester.read(CHANNEL_TYPE, state).await.unwrap();
        let storage = &read["storage"][0];
        assert_eq!(storage["customer_managed_s3"][0]["bucket"], "raw-telemetry");
        assert_eq!(storage["service_managed_s3"], json!([]));
    }

    #[tokio::test]
    async fn test_reapply_keeps_version_and_variant_change_bumps_it() {
        let tester = ProviderTester::configured(json!({})).await.unwrap();
        let config = json!({"name": "defs", "resource": [local_device("/dev/ttyUSB0")]});
        let created = tester
            .apply(RESOURCE_DEFINITION_TYPE, None, config.clone())
            .await
            .unwrap();
        let version = created["latest_definition_version_arn"].clone();
        assert!(version.is_string());

        let plan = tester
            .plan_update(RESOURCE_DEFINITION_TYPE, created.clone(), config.clone())
            .await
            .unwrap();
        assert_plan_no_changes(&plan);
        let reapplied = tester
            .apply(RESOURCE_DEFINITION_TYPE, Some(created), config)
            .await
            .unwrap();
        assert_eq!(reapplied["latest_definition_version_arn"], version);

        let switched = json!({"name": "defs", "resource": [local_volume("/var/data")]});
        let plan = tester
            .plan_update(RESOURCE_DEFINITION_TYPE, reapplied.clone(), switched.clone())
            .await
            .unwrap();
        assert_plan_changes_attribute(&plan, "resource");
        assert!(plan.planned_state.get("latest_definition_version_arn").is_none());

        let changed = tester
            .apply(RESOURCE_DEFINITION_TYPE, Some(reapplied), switched)
            .await
            .unwrap();
        assert!(changed["latest_definition_version_arn"].is_string());
        assert_ne!(changed["latest_definition_version_arn"], version);
        assert_eq!(changed["id"], plan.planned_state["id"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_retries_through_transient_failures() {
        let tester = ProviderTester::configured(json!({})).await.unwrap();
        tester
            .account()
            .fail_next_mutations(2, "role not yet assumable")
            .await;

        let start = tokio::time::Instant::now();
        let state = tester
            .apply(CHANNEL_TYPE, None, json!({"name": "telemetry"}))
            .await
            .unwrap();
        assert_eq!(state["id"], "telemetry");
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert_eq!(tester.account().analytics_mutations().await, 3);
    }

    #[tokio::test]
    async fn test_delete_then_list_omits_identifier() {
        let tester = ProviderTester::configured(json!({})).await.unwrap();
        let updated = tester
            .lifecycle_crud(
                CHANNEL_TYPE,
                json!({"name": "telemetry"}),
                json!({"name": "telemetry", "retention_period": [{"number_of_days": 7}]}),
            )
            .await
            .unwrap();
        assert_eq!(
            updated["retention_period"],
            json!([{"number_of_days": 7, "unlimited": false}])
        );
        assert!(!tester
            .list(CHANNEL_TYPE)
            .await
            .unwrap()
            .contains(&"telemetry".to_string()));
    }

    #[tokio::test]
    async fn test_rename_replaces_channel() {
        let tester = ProviderTester::configured(json!({})).await.unwrap();
        let created = tester
            .apply(CHANNEL_TYPE, None, json!({"name": "telemetry"}))
            .await
            .unwrap();
        let plan = tester
            .plan_update(CHANNEL_TYPE, created.clone(), json!({"name": "telemetry_v2"}))
            .await
            .unwrap();
        assert_plan_replaces(&plan);
        assert_plan_changes_attribute(&plan, "name");

        tester
            .apply(CHANNEL_TYPE, Some(created), json!({"name": "telemetry_v2"}))
            .await
            .unwrap();
        assert_eq!(
            tester.list(CHANNEL_TYPE).await.unwrap(),
            vec!["telemetry_v2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_conflicting_storage_fails_validation() {
        let tester = ProviderTester::configured(json!({})).await.unwrap();
        let err = tester
            .apply(
                DATASTORE_TYPE,
                None,
                json!({
                    "name": "readings",
                    "storage": [{
                        "customer_managed_s3": [{"bucket": "b", "role_arn": "r"}],
                        "service_managed_s3": [{}]
                    }]
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TestError::Diagnostics(_)));
        assert!(tester.list(DATASTORE_TYPE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_plan_create_and_import() {
        let tester = ProviderTester::configured(json!({})).await.unwrap();
        let plan = tester
            .plan_create(DATASTORE_TYPE, json!({"name": "readings"}))
            .await
            .unwrap();
        assert_plan_creates(&plan);

        tester
            .apply(DATASTORE_TYPE, None, json!({"name": "readings"}))
            .await
            .unwrap();
        let imported = tester.import(DATASTORE_TYPE, "readings").await.unwrap();
        assert_eq!(imported[0].state["name"], "readings");
    }

    #[tokio::test]
    async fn test_unconfigured_tester_fails() {
        let tester = ProviderTester::new();
        let err = tester
            .apply(CHANNEL_TYPE, None, json!({"name": "telemetry"}))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TestError::Provider(ProviderError::Configuration(_))
        ));
    }

    #[test]
    #[should_panic(expected = "Expected no errors")]
    fn test_assert_no_errors_fails() {
        assert_no_errors(&[Diagnostic::error("An error")]);
    }

    #[test]
    fn test_assert_error_contains() {
        let diagnostics = vec![
            Diagnostic::warning("Deprecated"),
            Diagnostic::error("Invalid configuration value"),
        ];
        assert_has_errors(&diagnostics);
        assert_error_contains(&diagnostics, "configuration");
    }

    #[test]
    fn test_test_error_display() {
        let err = TestError::Diagnostics(vec![
            Diagnostic::error("First error").with_attribute("storage"),
            Diagnostic::error("Second error").with_detail("More info"),
        ]);
        let display = err.to_string();
        assert!(display.contains("First error (at storage)"));
        assert!(display.contains("Second error: More info"));
    }
}
