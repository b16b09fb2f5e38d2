//! IoT Analytics channels and datastores.
//!
//! Both kinds share one attribute layout and one storage model, so a single
//! handler serves them, parameterized by [`StoreKind`].

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument};

use super::{ResourceHandler, Session};
use crate::attributes::{
    as_object, optional_bool, optional_i64, optional_str, required_str, resource_id,
    single_block, wrap_in_list, Attributes,
};
use crate::error::ProviderError;
use crate::model::{
    CustomerManagedS3, RetentionPeriod, StorageConfig, StoreDescription, StoreKind, StoreSpec,
};
use crate::retry::retry_with_schedule;
use crate::schema::{Attribute, Block, NestedBlock, Schema};

/// Resource type name for channels.
pub const CHANNEL_TYPE: &str = "aws_iotanalytics_channel";
/// Resource type name for datastores.
pub const DATASTORE_TYPE: &str = "aws_iotanalytics_datastore";

/// Handler for `aws_iotanalytics_channel` and `aws_iotanalytics_datastore`.
#[derive(Debug, Clone, Copy)]
pub struct StoreHandler {
    kind: StoreKind,
}

impl StoreHandler {
    /// The channel handler.
    pub fn channel() -> Self {
        Self {
            kind: StoreKind::Channel,
        }
    }

    /// The datastore handler.
    pub fn datastore() -> Self {
        Self {
            kind: StoreKind::Datastore,
        }
    }

    /// Which kind of object this handler manages.
    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    fn operation(&self, verb: &str) -> String {
        let noun = match self.kind {
            StoreKind::Channel => "Channel",
            StoreKind::Datastore => "Datastore",
        };
        format!("{}{}", verb, noun)
    }
}

fn storage_schema() -> NestedBlock {
    NestedBlock::optional_one(
        Block::new()
            .with_block(
                "customer_managed_s3",
                NestedBlock::optional_one(
                    Block::new()
                        .with_attribute("bucket", Attribute::required_string())
                        .with_attribute("key_prefix", Attribute::optional_string())
                        .with_attribute("role_arn", Attribute::required_string()),
                )
                .conflicts_with("service_managed_s3"),
            )
            .with_block(
                "service_managed_s3",
                NestedBlock::optional_one(Block::new()).conflicts_with("customer_managed_s3"),
            )
            .with_description("Where the data is kept; the service default when omitted"),
    )
}

fn retention_period_schema() -> NestedBlock {
    NestedBlock::optional_one(
        Block::new()
            .with_attribute("number_of_days", Attribute::optional_int64())
            .with_attribute("unlimited", Attribute::optional_bool()),
    )
}

/// Parse a configuration or state value into a [`StoreSpec`].
pub fn parse_spec(value: &Value) -> Result<StoreSpec, ProviderError> {
    let obj = as_object(value, "configuration")?;
    Ok(StoreSpec {
        name: required_str(obj, "name")?,
        storage: parse_storage(obj)?,
        retention: parse_retention(obj)?,
    })
}

fn parse_storage(obj: &Attributes) -> Result<StorageConfig, ProviderError> {
    let Some(storage) = single_block(obj, "storage")? else {
        return Ok(StorageConfig::Unset);
    };
    let customer_managed = single_block(storage, "customer_managed_s3")?
        .map(|cm| {
            Ok::<_, ProviderError>(CustomerManagedS3 {
                bucket: required_str(cm, "bucket")?,
                key_prefix: optional_str(cm, "key_prefix")?,
                role_arn: required_str(cm, "role_arn")?,
            })
        })
        .transpose()?;
    let service_managed = single_block(storage, "service_managed_s3")?.is_some();
    StorageConfig::from_variants(customer_managed, service_managed)
}

fn parse_retention(obj: &Attributes) -> Result<Option<RetentionPeriod>, ProviderError> {
    single_block(obj, "retention_period")?
        .map(|r| {
            RetentionPeriod::from_parts(optional_bool(r, "unlimited")?, optional_i64(r, "number_of_days")?)
        })
        .transpose()
}

/// Flatten a storage configuration into its list-of-one block form.
pub fn flatten_storage(storage: &StorageConfig) -> Value {
    let block = match storage {
        StorageConfig::Unset => None,
        StorageConfig::CustomerManaged {
            bucket,
            key_prefix,
            role_arn,
        } => {
            let mut cm = Map::new();
            cm.insert("bucket".to_string(), json!(bucket));
            if let Some(prefix) = key_prefix {
                cm.insert("key_prefix".to_string(), json!(prefix));
            }
            cm.insert("role_arn".to_string(), json!(role_arn));
            Some(json!({
                "customer_managed_s3": [cm],
                "service_managed_s3": [],
            }))
        },
        StorageConfig::ServiceManaged => Some(json!({
            "customer_managed_s3": [],
            "service_managed_s3": [{}],
        })),
    };
    wrap_in_list(block)
}

fn flatten_retention(retention: Option<RetentionPeriod>) -> Value {
    wrap_in_list(retention.map(|r| match r {
        RetentionPeriod::Unlimited => json!({"unlimited": true}),
        RetentionPeriod::Days(days) => json!({"number_of_days": days, "unlimited": false}),
    }))
}

fn flatten_spec(spec: &StoreSpec) -> Value {
    json!({
        "name": spec.name,
        "storage": flatten_storage(&spec.storage),
        "retention_period": flatten_retention(spec.retention),
    })
}

fn mirror(description: &StoreDescription) -> Value {
    json!({
        "id": description.name,
        "name": description.name,
        "arn": description.arn,
        "storage": flatten_storage(&description.storage),
        "retention_period": flatten_retention(description.retention),
    })
}

#[async_trait]
impl ResourceHandler for StoreHandler {
    fn type_name(&self) -> &'static str {
        match self.kind {
            StoreKind::Channel => CHANNEL_TYPE,
            StoreKind::Datastore => DATASTORE_TYPE,
        }
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string()
                    .with_description(format!("Name of the {}", self.kind))
                    .with_force_new(),
            )
            .with_attribute("arn", Attribute::computed_string())
            .with_block("storage", storage_schema())
            .with_block("retention_period", retention_period_schema())
    }

    fn normalize(&self, config: &Value) -> Result<Value, ProviderError> {
        parse_spec(config).map(|spec| flatten_spec(&spec))
    }

    #[instrument(skip(self, session, planned), fields(kind = %self.kind))]
    async fn create(&self, session: &Session, planned: &Value) -> Result<Value, ProviderError> {
        let spec = parse_spec(planned)?;
        let operation = self.operation("Create");
        info!(name = %spec.name, "creating {}", self.kind);

        // The role in customer-managed storage may still be propagating.
        retry_with_schedule(&session.retry, &operation, || {
            session.clients.analytics.create_store(self.kind, &spec)
        })
        .await?;

        self.read(session, &spec.name).await
    }

    async fn read(&self, session: &Session, id: &str) -> Result<Value, ProviderError> {
        debug!(kind = %self.kind, name = %id, "reading");
        let description = session.clients.analytics.describe_store(self.kind, id).await?;
        Ok(mirror(&description))
    }

    #[instrument(skip(self, session, prior, planned), fields(kind = %self.kind))]
    async fn update(
        &self,
        session: &Session,
        prior: &Value,
        planned: &Value,
    ) -> Result<Value, ProviderError> {
        let id = resource_id(prior)?;
        let spec = parse_spec(planned)?;
        if spec.name != id {
            return Err(ProviderError::Validation(format!(
                "renaming {} {} to {} requires replacement",
                self.kind, id, spec.name
            )));
        }
        let operation = self.operation("Update");
        info!(name = %spec.name, "updating {}", self.kind);

        retry_with_schedule(&session.retry, &operation, || {
            session.clients.analytics.update_store(self.kind, &spec)
        })
        .await?;

        self.read(session, &spec.name).await
    }

    async fn delete(&self, session: &Session, id: &str) -> Result<(), ProviderError> {
        info!(kind = %self.kind, name = %id, "deleting");
        session.clients.analytics.delete_store(self.kind, id).await
    }

    async fn list(&self, session: &Session) -> Result<Vec<String>, ProviderError> {
        session.clients.analytics.list_stores(self.kind).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::*;
    use crate::resources::test_support::memory_session;
    use crate::retry::RetrySchedule;
    use crate::validation;

    const ROLE: &str = "arn:aws:iam::123456789012:role/iot-analytics";

    fn customer_managed_config(name: &str) -> Value {
        json!({
            "name": name,
            "storage": [{
                "customer_managed_s3": [{
                    "bucket": "iot-raw",
                    "key_prefix": "telemetry/",
                    "role_arn": ROLE
                }]
            }],
            "retention_period": [{"number_of_days": 30}]
        })
    }

    #[tokio::test]
    async fn test_create_without_storage_reads_back_unset() {
        for handler in [StoreHandler::channel(), StoreHandler::datastore()] {
            let (session, _account) = memory_session(RetrySchedule::default());
            let state = handler
                .create(&session, &json!({"name": "telemetry"}))
                .await
                .unwrap();
            assert_eq!(state["id"], "telemetry");
            assert_eq!(state["storage"], json!([]));
            assert_eq!(state["retention_period"], json!([]));

            let read = handler.read(&session, "telemetry").await.unwrap();
            assert_eq!(read, state);
            assert_eq!(parse_spec(&read).unwrap().storage, StorageConfig::Unset);
        }
    }

    #[tokio::test]
    async fn test_customer_managed_storage_round_trips_through_read() {
        for handler in [StoreHandler::channel(), StoreHandler::datastore()] {
            let (session, _account) = memory_session(RetrySchedule::default());
            let config = customer_managed_config("telemetry");
            handler.create(&session, &config).await.unwrap();

            let read = handler.read(&session, "telemetry").await.unwrap();
            let storage = &read["storage"][0];
            assert_eq!(storage["customer_managed_s3"][0]["bucket"], "iot-raw");
            assert_eq!(storage["customer_managed_s3"][0]["role_arn"], ROLE);
            assert_eq!(storage["service_managed_s3"], json!([]));
            assert_eq!(
                handler.normalize(&read).unwrap(),
                handler.normalize(&config).unwrap()
            );
        }
    }

    #[tokio::test]
    async fn test_service_managed_storage_flattens_to_empty_block() {
        let handler = StoreHandler::datastore();
        let (session, _account) = memory_session(RetrySchedule::default());
        let state = handler
            .create(
                &session,
                &json!({"name": "lake", "storage": [{"service_managed_s3": [{}]}]}),
            )
            .await
            .unwrap();
        assert_eq!(
            state["storage"],
            json!([{"customer_managed_s3": [], "service_managed_s3": [{}]}])
        );
    }

    #[tokio::test]
    async fn test_update_changes_storage_and_retention() {
        let handler = StoreHandler::channel();
        let (session, _account) = memory_session(RetrySchedule::default());
        let prior = handler
            .create(&session, &customer_managed_config("telemetry"))
            .await
            .unwrap();

        let planned = json!({
            "name": "telemetry",
            "storage": [{"service_managed_s3": [{}]}],
            "retention_period": [{"unlimited": true}]
        });
        let state = handler.update(&session, &prior, &planned).await.unwrap();
        assert_eq!(state["storage"][0]["customer_managed_s3"], json!([]));
        assert_eq!(state["retention_period"], json!([{"unlimited": true}]));
    }

    #[tokio::test]
    async fn test_update_rejects_rename() {
        let handler = StoreHandler::channel();
        let (session, _account) = memory_session(RetrySchedule::default());
        let prior = handler
            .create(&session, &json!({"name": "telemetry"}))
            .await
            .unwrap();
        let err = handler
            .update(&session, &prior, &json!({"name": "telemetry_v2"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Validation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_retries_until_role_propagates() {
        let handler = StoreHandler::channel();
        let (session, account) = memory_session(RetrySchedule::default());
        account.fail_next_mutations(3, "Unable to assume role").await;

        let start = Instant::now();
        let state = handler
            .create(&session, &customer_managed_config("telemetry"))
            .await
            .unwrap();
        assert_eq!(state["id"], "telemetry");
        assert_eq!(account.analytics_mutations().await, 4);
        // 1 + 2 + 5 seconds before the fourth attempt.
        assert_eq!(start.elapsed(), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_surfaces_last_error_after_six_attempts() {
        let handler = StoreHandler::datastore();
        let (session, account) = memory_session(RetrySchedule::default());
        account.fail_next_mutations(10, "Unable to assume role").await;

        let start = Instant::now();
        let err = handler
            .create(&session, &json!({"name": "lake"}))
            .await
            .unwrap_err();
        assert_eq!(err.message(), "Unable to assume role");
        assert_eq!(account.analytics_mutations().await, 6);
        assert_eq!(start.elapsed(), Duration::from_secs(26));
        assert!(handler.list(&session).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_uses_retry_schedule() {
        let handler = StoreHandler::channel();
        let (session, account) = memory_session(RetrySchedule::from_secs(&[4, 0]));
        let prior = handler
            .create(&session, &json!({"name": "telemetry"}))
            .await
            .unwrap();
        account.fail_next_mutations(1, "Unable to assume role").await;

        let start = Instant::now();
        handler
            .update(
                &session,
                &prior,
                &json!({"name": "telemetry", "retention_period": [{"number_of_days": 7}]}),
            )
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_delete_is_single_shot_and_removes_from_list() {
        let handler = StoreHandler::channel();
        let (session, _account) = memory_session(RetrySchedule::default());
        handler
            .create(&session, &json!({"name": "telemetry"}))
            .await
            .unwrap();
        handler
            .create(&session, &json!({"name": "archive"}))
            .await
            .unwrap();

        handler.delete(&session, "telemetry").await.unwrap();
        let names = handler.list(&session).await.unwrap();
        assert!(!names.contains(&"telemetry".to_string()));
        assert!(names.contains(&"archive".to_string()));

        let err = handler.delete(&session, "telemetry").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_read_missing_object_is_not_found() {
        let handler = StoreHandler::datastore();
        let (session, _account) = memory_session(RetrySchedule::default());
        let err = handler.read(&session, "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_conflicting_storage_rejected_by_schema_and_parser() {
        let config = json!({
            "name": "telemetry",
            "storage": [{
                "customer_managed_s3": [{"bucket": "b", "role_arn": ROLE}],
                "service_managed_s3": [{}]
            }]
        });
        let handler = StoreHandler::channel();
        let diagnostics = validation::validate(&handler.schema(), &config);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].summary.contains("Conflicting blocks"));
        assert!(matches!(
            handler.normalize(&config),
            Err(ProviderError::Validation(_))
        ));
    }

    #[test]
    fn test_normalize_drops_empty_key_prefix_and_computed_attributes() {
        let handler = StoreHandler::channel();
        let normalized = handler
            .normalize(&json!({
                "id": "telemetry",
                "arn": "arn:aws:iotanalytics:us-east-1:123456789012:channel/telemetry",
                "name": "telemetry",
                "storage": [{"customer_managed_s3": [{"bucket": "b", "key_prefix": "", "role_arn": ROLE}]}]
            }))
            .unwrap();
        assert_eq!(
            normalized,
            json!({
                "name": "telemetry",
                "storage": [{
                    "customer_managed_s3": [{"bucket": "b", "role_arn": ROLE}],
                    "service_managed_s3": []
                }],
                "retention_period": []
            })
        );
    }

    #[test]
    fn test_schema_marks_name_force_new() {
        let schema = StoreHandler::datastore().schema();
        assert!(schema.forces_new("name"));
        assert!(!schema.forces_new("storage"));
        assert_eq!(schema.computed_attributes(), vec!["arn", "id"]);
    }
}
