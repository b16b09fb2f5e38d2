//! Greengrass resource definitions.
//!
//! A definition is a named, tagged container of immutable versions. Changing
//! the resource list creates a new version; name and tags are updated in
//! place.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument};

use super::{ResourceHandler, Session};
use crate::attributes::{
    as_object, block_list, optional_bool, optional_str, required_str, resource_id, single_block,
    string_list, string_map, wrap_in_list, Attributes,
};
use crate::error::ProviderError;
use crate::model::{
    DataContainer, DefinitionDescription, DefinitionResource, DefinitionSpec, GroupOwnerSetting,
};
use crate::schema::{Attribute, Block, NestedBlock, Schema};

/// Resource type name for Greengrass resource definitions.
pub const RESOURCE_DEFINITION_TYPE: &str = "aws_greengrass_resource_definition";

const LOCAL_DEVICE: &str = "local_device_resource_data";
const LOCAL_VOLUME: &str = "local_volume_resource_data";
const S3_MODEL: &str = "s3_machine_learning_model_resource_data";
const SAGEMAKER_MODEL: &str = "sagemaker_machine_learning_model_resource_data";
const SECRET: &str = "secrets_manager_secret_resource_data";

const DATA_CONTAINER_VARIANTS: [&str; 5] =
    [LOCAL_DEVICE, LOCAL_VOLUME, S3_MODEL, SAGEMAKER_MODEL, SECRET];

/// Handler for `aws_greengrass_resource_definition`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefinitionHandler;

fn group_owner_setting_schema() -> NestedBlock {
    NestedBlock::optional_one(
        Block::new()
            .with_attribute("auto_add_group_owner", Attribute::optional_bool())
            .with_attribute("group_owner", Attribute::optional_string()),
    )
}

fn variant(name: &str, block: Block) -> NestedBlock {
    DATA_CONTAINER_VARIANTS
        .iter()
        .filter(|other| **other != name)
        .fold(NestedBlock::optional_one(block), |nested, other| {
            nested.conflicts_with(*other)
        })
}

fn data_container_schema() -> NestedBlock {
    let block = Block::new()
        .with_block(
            LOCAL_DEVICE,
            variant(
                LOCAL_DEVICE,
                Block::new()
                    .with_attribute("source_path", Attribute::required_string())
                    .with_block("group_owner_setting", group_owner_setting_schema()),
            ),
        )
        .with_block(
            LOCAL_VOLUME,
            variant(
                LOCAL_VOLUME,
                Block::new()
                    .with_attribute("source_path", Attribute::required_string())
                    .with_attribute("destination_path", Attribute::required_string())
                    .with_block("group_owner_setting", group_owner_setting_schema()),
            ),
        )
        .with_block(
            S3_MODEL,
            variant(
                S3_MODEL,
                Block::new()
                    .with_attribute("s3_uri", Attribute::required_string())
                    .with_attribute("destination_path", Attribute::required_string()),
            ),
        )
        .with_block(
            SAGEMAKER_MODEL,
            variant(
                SAGEMAKER_MODEL,
                Block::new()
                    .with_attribute("sagemaker_job_arn", Attribute::required_string())
                    .with_attribute("destination_path", Attribute::required_string()),
            ),
        )
        .with_block(
            SECRET,
            variant(
                SECRET,
                Block::new()
                    .with_attribute("secret_arn", Attribute::required_string())
                    .with_attribute(
                        "additional_staging_labels_to_download",
                        Attribute::optional_string_list(),
                    ),
            ),
        );
    NestedBlock::optional_one(block).with_min_items(1)
}

/// Parse a configuration or state value into a [`DefinitionSpec`].
pub fn parse_spec(value: &Value) -> Result<DefinitionSpec, ProviderError> {
    let obj = as_object(value, "configuration")?;
    let resources = block_list(obj, "resource")?
        .into_iter()
        .map(parse_resource)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(DefinitionSpec {
        name: required_str(obj, "name")?,
        tags: string_map(obj, "tags")?,
        resources,
    })
}

fn parse_resource(obj: &Attributes) -> Result<DefinitionResource, ProviderError> {
    let id = required_str(obj, "id")?;
    let container = single_block(obj, "data_container")?.ok_or_else(|| {
        ProviderError::Validation(format!("resource {}: data_container is required", id))
    })?;
    Ok(DefinitionResource {
        name: required_str(obj, "name")?,
        data_container: parse_data_container(&id, container)?,
        id,
    })
}

fn parse_data_container(id: &str, obj: &Attributes) -> Result<DataContainer, ProviderError> {
    let mut selected = Vec::new();
    for name in DATA_CONTAINER_VARIANTS {
        if let Some(block) = single_block(obj, name)? {
            selected.push((name, block));
        }
    }
    let (name, block) = match selected.as_slice() {
        [one] => *one,
        [] => {
            return Err(ProviderError::Validation(format!(
                "resource {}: data_container must set one of {}",
                id,
                DATA_CONTAINER_VARIANTS.join(", ")
            )))
        },
        many => {
            let names: Vec<_> = many.iter().map(|(n, _)| *n).collect();
            return Err(ProviderError::Validation(format!(
                "resource {}: data_container sets more than one of {}",
                id,
                names.join(", ")
            )));
        },
    };

    Ok(match name {
        LOCAL_DEVICE => DataContainer::LocalDevice {
            source_path: required_str(block, "source_path")?,
            group_owner_setting: parse_group_owner_setting(block)?,
        },
        LOCAL_VOLUME => DataContainer::LocalVolume {
            source_path: required_str(block, "source_path")?,
            destination_path: required_str(block, "destination_path")?,
            group_owner_setting: parse_group_owner_setting(block)?,
        },
        S3_MODEL => DataContainer::S3MachineLearningModel {
            s3_uri: required_str(block, "s3_uri")?,
            destination_path: required_str(block, "destination_path")?,
        },
        SAGEMAKER_MODEL => DataContainer::SageMakerMachineLearningModel {
            sagemaker_job_arn: required_str(block, "sagemaker_job_arn")?,
            destination_path: required_str(block, "destination_path")?,
        },
        SECRET => DataContainer::SecretsManagerSecret {
            secret_arn: required_str(block, "secret_arn")?,
            additional_staging_labels_to_download: string_list(
                block,
                "additional_staging_labels_to_download",
            )?,
        },
        other => {
            return Err(ProviderError::Validation(format!(
                "resource {}: unsupported data_container {}",
                id, other
            )))
        },
    })
}

fn parse_group_owner_setting(obj: &Attributes) -> Result<Option<GroupOwnerSetting>, ProviderError> {
    single_block(obj, "group_owner_setting")?
        .map(|s| {
            Ok(GroupOwnerSetting {
                auto_add_group_owner: optional_bool(s, "auto_add_group_owner")?.unwrap_or(false),
                group_owner: optional_str(s, "group_owner")?.filter(|g| !g.is_empty()),
            })
        })
        .transpose()
}

fn flatten_group_owner_setting(setting: &Option<GroupOwnerSetting>) -> Value {
    wrap_in_list(setting.as_ref().map(|s| {
        let mut obj = Map::new();
        obj.insert("auto_add_group_owner".to_string(), json!(s.auto_add_group_owner));
        if let Some(owner) = &s.group_owner {
            obj.insert("group_owner".to_string(), json!(owner));
        }
        Value::Object(obj)
    }))
}

fn flatten_data_container(container: &DataContainer) -> Value {
    let (selected, block) = match container {
        DataContainer::LocalDevice {
            source_path,
            group_owner_setting,
        } => (
            LOCAL_DEVICE,
            json!({
                "source_path": source_path,
                "group_owner_setting": flatten_group_owner_setting(group_owner_setting),
            }),
        ),
        DataContainer::LocalVolume {
            source_path,
            destination_path,
            group_owner_setting,
        } => (
            LOCAL_VOLUME,
            json!({
                "source_path": source_path,
                "destination_path": destination_path,
                "group_owner_setting": flatten_group_owner_setting(group_owner_setting),
            }),
        ),
        DataContainer::S3MachineLearningModel {
            s3_uri,
            destination_path,
        } => (
            S3_MODEL,
            json!({"s3_uri": s3_uri, "destination_path": destination_path}),
        ),
        DataContainer::SageMakerMachineLearningModel {
            sagemaker_job_arn,
            destination_path,
        } => (
            SAGEMAKER_MODEL,
            json!({"sagemaker_job_arn": sagemaker_job_arn, "destination_path": destination_path}),
        ),
        DataContainer::SecretsManagerSecret {
            secret_arn,
            additional_staging_labels_to_download,
        } => (
            SECRET,
            json!({
                "secret_arn": secret_arn,
                "additional_staging_labels_to_download": additional_staging_labels_to_download,
            }),
        ),
    };

    let mut obj = Map::new();
    for name in DATA_CONTAINER_VARIANTS {
        obj.insert(name.to_string(), json!([]));
    }
    obj.insert(selected.to_string(), json!([block]));
    Value::Object(obj)
}

fn flatten_resources(resources: &[DefinitionResource]) -> Value {
    resources
        .iter()
        .map(|r| {
            json!({
                "id": r.id,
                "name": r.name,
                "data_container": [flatten_data_container(&r.data_container)],
            })
        })
        .collect()
}

fn flatten_spec(spec: &DefinitionSpec) -> Value {
    json!({
        "name": spec.name,
        "tags": spec.tags,
        "resource": flatten_resources(&spec.resources),
    })
}

fn mirror(description: &DefinitionDescription) -> Value {
    json!({
        "id": description.id,
        "arn": description.arn,
        "name": description.name,
        "tags": description.tags,
        "latest_definition_version_arn": description.latest_version_arn,
        "resource": flatten_resources(&description.resources),
    })
}

/// Tags to set and tag keys to remove to get from `current` to `desired`.
fn tag_changes(
    current: &BTreeMap<String, String>,
    desired: &BTreeMap<String, String>,
) -> (BTreeMap<String, String>, Vec<String>) {
    let set = desired
        .iter()
        .filter(|(k, v)| current.get(*k) != Some(*v))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let remove = current
        .keys()
        .filter(|k| !desired.contains_key(*k))
        .cloned()
        .collect();
    (set, remove)
}

#[async_trait]
impl ResourceHandler for DefinitionHandler {
    fn type_name(&self) -> &'static str {
        RESOURCE_DEFINITION_TYPE
    }

    fn schema(&self) -> Schema {
        Schema::v0()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("arn", Attribute::computed_string())
            .with_attribute(
                "name",
                Attribute::required_string().with_description("Name of the resource definition"),
            )
            .with_attribute("tags", Attribute::optional_string_map())
            .with_attribute(
                "latest_definition_version_arn",
                Attribute::computed_string()
                    .with_description("ARN of the version holding the current resource list"),
            )
            .with_block(
                "resource",
                NestedBlock::list(
                    Block::new()
                        .with_attribute("id", Attribute::required_string())
                        .with_attribute("name", Attribute::required_string())
                        .with_block("data_container", data_container_schema()),
                ),
            )
    }

    fn normalize(&self, config: &Value) -> Result<Value, ProviderError> {
        parse_spec(config).map(|spec| flatten_spec(&spec))
    }

    fn recomputed_by(&self, attribute: &str) -> &'static [&'static str] {
        match attribute {
            "resource" => &["latest_definition_version_arn"],
            _ => &[],
        }
    }

    #[instrument(skip(self, session, planned))]
    async fn create(&self, session: &Session, planned: &Value) -> Result<Value, ProviderError> {
        let spec = parse_spec(planned)?;
        info!(name = %spec.name, resources = spec.resources.len(), "creating resource definition");
        let id = session.clients.greengrass.create_definition(&spec).await?;
        self.read(session, &id).await
    }

    async fn read(&self, session: &Session, id: &str) -> Result<Value, ProviderError> {
        debug!(definition_id = %id, "reading resource definition");
        let description = session.clients.greengrass.get_definition(id).await?;
        Ok(mirror(&description))
    }

    #[instrument(skip(self, session, prior, planned))]
    async fn update(
        &self,
        session: &Session,
        prior: &Value,
        planned: &Value,
    ) -> Result<Value, ProviderError> {
        let id = resource_id(prior)?;
        let spec = parse_spec(planned)?;
        let greengrass = &session.clients.greengrass;
        let current = greengrass.get_definition(&id).await?;

        if current.name != spec.name {
            info!(definition_id = %id, from = %current.name, to = %spec.name, "renaming");
            greengrass.rename_definition(&id, &spec.name).await?;
        }

        let (set, remove) = tag_changes(&current.tags, &spec.tags);
        if !remove.is_empty() {
            greengrass.untag_definition(&current.arn, &remove).await?;
        }
        if !set.is_empty() {
            greengrass.tag_definition(&current.arn, &set).await?;
        }

        if current.resources != spec.resources {
            let version_arn = greengrass
                .create_definition_version(&id, &spec.resources)
                .await?;
            info!(definition_id = %id, version_arn = %version_arn, "created definition version");
        } else {
            debug!(definition_id = %id, "resource list unchanged, keeping version");
        }

        self.read(session, &id).await
    }

    async fn delete(&self, session: &Session, id: &str) -> Result<(), ProviderError> {
        info!(definition_id = %id, "deleting resource definition");
        session.clients.greengrass.delete_definition(id).await
    }

    async fn list(&self, session: &Session) -> Result<Vec<String>, ProviderError> {
        session.clients.greengrass.list_definitions().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::test_support::memory_session;
    use crate::retry::RetrySchedule;
    use crate::validation;

    fn local_device_config() -> Value {
        json!({
            "name": "resource_definition_edge",
            "tags": {"tagKey": "tagValue"},
            "resource": [{
                "id": "test_id",
                "name": "test_name",
                "data_container": [{
                    "local_device_resource_data": [{
                        "source_path": "/dev/source",
                        "group_owner_setting": [{"auto_add_group_owner": false, "group_owner": "user"}]
                    }]
                }]
            }]
        })
    }

    fn local_volume_config() -> Value {
        json!({
            "name": "resource_definition_edge",
            "tags": {"tagKey": "tagValue"},
            "resource": [{
                "id": "test_id",
                "name": "test_name",
                "data_container": [{
                    "local_volume_resource_data": [{
                        "source_path": "/dev/source",
                        "destination_path": "/destination",
                        "group_owner_setting": [{"auto_add_group_owner": false, "group_owner": "user"}]
                    }]
                }]
            }]
        })
    }

    #[tokio::test]
    async fn test_create_sets_id_arn_and_version() {
        let (session, _account) = memory_session(RetrySchedule::default());
        let state = DefinitionHandler
            .create(&session, &local_device_config())
            .await
            .unwrap();
        assert!(!state["id"].as_str().unwrap().is_empty());
        assert!(state["arn"].as_str().unwrap().starts_with("arn:aws:greengrass:"));
        assert_eq!(state["tags"]["tagKey"], "tagValue");
        assert!(state["latest_definition_version_arn"].is_string());
        assert_eq!(
            DefinitionHandler.normalize(&state).unwrap(),
            DefinitionHandler.normalize(&local_device_config()).unwrap()
        );
    }

    #[tokio::test]
    async fn test_create_without_resources_has_no_version() {
        let (session, _account) = memory_session(RetrySchedule::default());
        let state = DefinitionHandler
            .create(&session, &json!({"name": "empty"}))
            .await
            .unwrap();
        assert!(state["latest_definition_version_arn"].is_null());
        assert_eq!(state["resource"], json!([]));
    }

    #[tokio::test]
    async fn test_reapply_identical_spec_keeps_version() {
        let (session, _account) = memory_session(RetrySchedule::default());
        let first = DefinitionHandler
            .create(&session, &local_device_config())
            .await
            .unwrap();
        let second = DefinitionHandler
            .update(&session, &first, &local_device_config())
            .await
            .unwrap();
        assert_eq!(
            first["latest_definition_version_arn"],
            second["latest_definition_version_arn"]
        );
    }

    #[tokio::test]
    async fn test_changing_data_container_creates_new_version() {
        let (session, _account) = memory_session(RetrySchedule::default());
        let first = DefinitionHandler
            .create(&session, &local_device_config())
            .await
            .unwrap();
        let second = DefinitionHandler
            .update(&session, &first, &local_volume_config())
            .await
            .unwrap();
        assert_ne!(
            first["latest_definition_version_arn"],
            second["latest_definition_version_arn"]
        );
        let container = &second["resource"][0]["data_container"][0];
        assert_eq!(container[LOCAL_DEVICE], json!([]));
        assert_eq!(container[LOCAL_VOLUME][0]["destination_path"], "/destination");
    }

    #[tokio::test]
    async fn test_rename_and_retag_in_place() {
        let (session, _account) = memory_session(RetrySchedule::default());
        let first = DefinitionHandler
            .create(&session, &local_device_config())
            .await
            .unwrap();

        let mut planned = local_device_config();
        planned["name"] = json!("renamed");
        planned["tags"] = json!({"owner": "edge-team"});
        let second = DefinitionHandler
            .update(&session, &first, &planned)
            .await
            .unwrap();

        assert_eq!(second["id"], first["id"]);
        assert_eq!(second["name"], "renamed");
        assert_eq!(second["tags"], json!({"owner": "edge-team"}));
        assert_eq!(
            first["latest_definition_version_arn"],
            second["latest_definition_version_arn"]
        );
    }

    #[tokio::test]
    async fn test_delete_removes_from_list() {
        let (session, _account) = memory_session(RetrySchedule::default());
        let state = DefinitionHandler
            .create(&session, &local_device_config())
            .await
            .unwrap();
        let id = state["id"].as_str().unwrap().to_string();
        assert!(DefinitionHandler.list(&session).await.unwrap().contains(&id));

        DefinitionHandler.delete(&session, &id).await.unwrap();
        assert!(!DefinitionHandler.list(&session).await.unwrap().contains(&id));
        assert!(DefinitionHandler.read(&session, &id).await.unwrap_err().is_not_found());
    }

    #[test]
    fn test_every_data_container_variant_normalizes() {
        let containers = [
            json!({SAGEMAKER_MODEL: [{
                "sagemaker_job_arn": "arn:aws:sagemaker:us-west-2:123456789012:training-job/xgboost",
                "destination_path": "/destination"
            }]}),
            json!({S3_MODEL: [{"s3_uri": "s3://bucket/key.zip", "destination_path": "/destination"}]}),
            json!({SECRET: [{
                "secret_arn": "arn:aws:secretsmanager:us-west-2:123456789012:secret:token",
                "additional_staging_labels_to_download": ["label1", "label2"]
            }]}),
        ];
        for container in containers {
            let config = json!({
                "name": "defs",
                "resource": [{"id": "r", "name": "r", "data_container": [container]}]
            });
            let normalized = DefinitionHandler.normalize(&config).unwrap();
            let flat = normalized["resource"][0]["data_container"][0].as_object().unwrap();
            assert_eq!(flat.len(), DATA_CONTAINER_VARIANTS.len());
            assert_eq!(
                flat.values().filter(|v| *v != &json!([])).count(),
                1,
                "exactly one variant is set"
            );
            assert_eq!(DefinitionHandler.normalize(&normalized).unwrap(), normalized);
        }
    }

    #[test]
    fn test_each_variant_name_selects_its_own_container() {
        let blocks = [
            (LOCAL_DEVICE, json!({"source_path": "/dev/ttyUSB0"})),
            (LOCAL_VOLUME, json!({"source_path": "/var/data", "destination_path": "/mnt/data"})),
            (S3_MODEL, json!({"s3_uri": "s3://bucket/key.zip", "destination_path": "/d"})),
            (SAGEMAKER_MODEL, json!({"sagemaker_job_arn": "arn:job", "destination_path": "/d"})),
            (SECRET, json!({"secret_arn": "arn:secret"})),
        ];
        assert_eq!(blocks.len(), DATA_CONTAINER_VARIANTS.len());
        for (name, block) in blocks {
            let container = json!({ name: [block] });
            let parsed = parse_data_container("r", container.as_object().unwrap()).unwrap();
            let selected = match parsed {
                DataContainer::LocalDevice { .. } => LOCAL_DEVICE,
                DataContainer::LocalVolume { .. } => LOCAL_VOLUME,
                DataContainer::S3MachineLearningModel { .. } => S3_MODEL,
                DataContainer::SageMakerMachineLearningModel { .. } => SAGEMAKER_MODEL,
                DataContainer::SecretsManagerSecret { .. } => SECRET,
            };
            assert_eq!(selected, name);
        }
    }

    #[test]
    fn test_data_container_requires_exactly_one_variant() {
        let empty = json!({
            "name": "defs",
            "resource": [{"id": "r", "name": "r", "data_container": [{}]}]
        });
        assert!(DefinitionHandler.normalize(&empty).is_err());

        let two = json!({
            "name": "defs",
            "resource": [{"id": "r", "name": "r", "data_container": [{
                LOCAL_DEVICE: [{"source_path": "/dev/a"}],
                S3_MODEL: [{"s3_uri": "s3://b/k", "destination_path": "/d"}]
            }]}]
        });
        assert!(DefinitionHandler.normalize(&two).is_err());
        let diagnostics = validation::validate(&DefinitionHandler.schema(), &two);
        assert_eq!(diagnostics.len(), 1);

        let missing = json!({"name": "defs", "resource": [{"id": "r", "name": "r"}]});
        assert!(DefinitionHandler.normalize(&missing).is_err());
        assert!(!validation::is_valid(&DefinitionHandler.schema(), &missing));
    }

    #[test]
    fn test_tag_changes() {
        let current = BTreeMap::from([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "2".to_string()),
        ]);
        let desired = BTreeMap::from([
            ("a".to_string(), "1".to_string()),
            ("b".to_string(), "3".to_string()),
            ("c".to_string(), "4".to_string()),
        ]);
        let (set, remove) = tag_changes(&current, &desired);
        assert_eq!(set.keys().collect::<Vec<_>>(), vec!["b", "c"]);
        assert!(remove.is_empty());

        let (set, remove) = tag_changes(&desired, &BTreeMap::new());
        assert!(set.is_empty());
        assert_eq!(remove, vec!["a", "b", "c"]);
    }
}
