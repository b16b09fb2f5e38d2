//! AWS SDK implementations of the client traits.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_greengrass::types as gg;
use aws_sdk_iotanalytics::error::{BuildError, ProvideErrorMetadata, SdkError};
use aws_sdk_iotanalytics::types as ia;
use tracing::{debug, info};

use super::{Clients, Connector, GreengrassApi, IotAnalyticsApi};
use crate::config::ProviderConfig;
use crate::error::{format_err_chain, ProviderError};
use crate::model::{
    DataContainer, DefinitionDescription, DefinitionResource, DefinitionSpec, GroupOwnerSetting,
    RetentionPeriod, StorageConfig, StoreDescription, StoreKind, StoreSpec,
};

const LIST_PAGE_SIZE: &str = "20";

/// Connects real SDK clients using the default AWS credential chain.
#[derive(Debug, Clone, Default)]
pub struct AwsConnector;

#[async_trait]
impl Connector for AwsConnector {
    async fn connect(&self, config: &ProviderConfig) -> Result<Clients, ProviderError> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        if let Some(endpoint_url) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint_url);
        }
        let sdk_config = loader.load().await;

        let region = sdk_config.region().map(|r| r.to_string()).ok_or_else(|| {
            ProviderError::Configuration(
                "no AWS region configured; set \"region\" or AWS_REGION".to_string(),
            )
        })?;
        info!(region = %region, "AWS clients configured");

        Ok(Clients {
            analytics: Arc::new(AwsIotAnalytics {
                client: aws_sdk_iotanalytics::Client::new(&sdk_config),
            }),
            greengrass: Arc::new(AwsGreengrass {
                client: aws_sdk_greengrass::Client::new(&sdk_config),
            }),
        })
    }
}

/// Map an SDK error to a [`ProviderError`] by its service error code.
fn classify<E, R>(operation: &str, err: SdkError<E, R>) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let code = err.code().unwrap_or_default().to_string();
    let message = err.message().unwrap_or_default().to_string();
    let detail = if message.is_empty() {
        format!("{}: {}", operation, code)
    } else {
        format!("{}: {}", operation, message)
    };

    match code.as_str() {
        "ResourceNotFoundException" | "NotFoundException" => ProviderError::NotFound(detail),
        "BadRequestException" if message.to_ascii_lowercase().contains("not found") => {
            ProviderError::NotFound(detail)
        },
        "ResourceAlreadyExistsException" => ProviderError::AlreadyExists(detail),
        c if c.starts_with("AccessDenied") => ProviderError::PermissionDenied(detail),
        c if c.starts_with("Throttling") => ProviderError::ResourceExhausted(detail),
        _ => ProviderError::api(operation, format_err_chain(&err)),
    }
}

/// SDK builders return the value directly, or a `Result` when the shape has
/// required members. This unifies both.
trait Built {
    type Output;

    fn built(self, what: &str) -> Result<Self::Output, ProviderError>;
}

impl<T> Built for Result<T, BuildError> {
    type Output = T;

    fn built(self, what: &str) -> Result<T, ProviderError> {
        self.map_err(|e| ProviderError::Validation(format!("invalid {}: {}", what, e)))
    }
}

macro_rules! built_infallible {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Built for $ty {
                type Output = $ty;

                fn built(self, _what: &str) -> Result<$ty, ProviderError> {
                    Ok(self)
                }
            }
        )*
    };
}

built_infallible!(
    ia::ChannelStorage,
    ia::ServiceManagedChannelS3Storage,
    ia::CustomerManagedChannelS3Storage,
    ia::ServiceManagedDatastoreS3Storage,
    ia::CustomerManagedDatastoreS3Storage,
    ia::RetentionPeriod,
    gg::Resource,
    gg::ResourceDataContainer,
    gg::ResourceDefinitionVersion,
    gg::GroupOwnerSetting,
    gg::LocalDeviceResourceData,
    gg::LocalVolumeResourceData,
    gg::S3MachineLearningModelResourceData,
    gg::SageMakerMachineLearningModelResourceData,
    gg::SecretsManagerSecretResourceData,
);

/// Owned text from an SDK accessor that may or may not be optional.
fn text<'a>(value: impl Into<Option<&'a str>>) -> String {
    value.into().unwrap_or_default().to_string()
}

fn opt_text<'a>(value: impl Into<Option<&'a str>>) -> Option<String> {
    value
        .into()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// IoT Analytics

/// IoT Analytics backed by `aws-sdk-iotanalytics`.
#[derive(Debug, Clone)]
pub struct AwsIotAnalytics {
    client: aws_sdk_iotanalytics::Client,
}

fn retention_to_sdk(retention: Option<RetentionPeriod>) -> Result<Option<ia::RetentionPeriod>, ProviderError> {
    retention
        .map(|r| {
            let builder = ia::RetentionPeriod::builder();
            match r {
                RetentionPeriod::Unlimited => builder.unlimited(true),
                RetentionPeriod::Days(days) => builder
                    .unlimited(false)
                    .number_of_days(days),
            }
            .build()
            .built("retention_period")
        })
        .transpose()
}

fn retention_from_sdk(retention: Option<&ia::RetentionPeriod>) -> Option<RetentionPeriod> {
    let retention = retention?;
    let unlimited: Option<bool> = retention.unlimited().into();
    if unlimited.unwrap_or(false) {
        return Some(RetentionPeriod::Unlimited);
    }
    let days: Option<i32> = retention.number_of_days().into();
    days.filter(|d| *d > 0)
        .map(RetentionPeriod::Days)
}

fn channel_storage_to_sdk(storage: &StorageConfig) -> Result<Option<ia::ChannelStorage>, ProviderError> {
    let builder = ia::ChannelStorage::builder();
    let storage = match storage {
        StorageConfig::Unset => return Ok(None),
        StorageConfig::ServiceManaged => builder.service_managed_s3(
            ia::ServiceManagedChannelS3Storage::builder()
                .build()
                .built("service_managed_s3")?,
        ),
        StorageConfig::CustomerManaged {
            bucket,
            key_prefix,
            role_arn,
        } => builder.customer_managed_s3(
            ia::CustomerManagedChannelS3Storage::builder()
                .bucket(bucket)
                .set_key_prefix(key_prefix.clone())
                .role_arn(role_arn)
                .build()
                .built("customer_managed_s3")?,
        ),
    };
    Ok(Some(storage.build().built("storage")?))
}

fn channel_storage_from_sdk(storage: Option<&ia::ChannelStorage>) -> StorageConfig {
    let Some(storage) = storage else {
        return StorageConfig::Unset;
    };
    if let Some(cm) = storage.customer_managed_s3() {
        return StorageConfig::customer_managed(
            text(cm.bucket()),
            opt_text(cm.key_prefix()),
            text(cm.role_arn()),
        );
    }
    if storage.service_managed_s3().is_some() {
        return StorageConfig::ServiceManaged;
    }
    StorageConfig::Unset
}

fn datastore_storage_to_sdk(
    storage: &StorageConfig,
) -> Result<Option<ia::DatastoreStorage>, ProviderError> {
    Ok(match storage {
        StorageConfig::Unset => None,
        StorageConfig::ServiceManaged => Some(ia::DatastoreStorage::ServiceManagedS3(
            ia::ServiceManagedDatastoreS3Storage::builder()
                .build()
                .built("service_managed_s3")?,
        )),
        StorageConfig::CustomerManaged {
            bucket,
            key_prefix,
            role_arn,
        } => Some(ia::DatastoreStorage::CustomerManagedS3(
            ia::CustomerManagedDatastoreS3Storage::builder()
                .bucket(bucket)
                .set_key_prefix(key_prefix.clone())
                .role_arn(role_arn)
                .build()
                .built("customer_managed_s3")?,
        )),
    })
}

fn datastore_storage_from_sdk(storage: Option<&ia::DatastoreStorage>) -> StorageConfig {
    match storage {
        Some(ia::DatastoreStorage::CustomerManagedS3(cm)) => StorageConfig::customer_managed(
            text(cm.bucket()),
            opt_text(cm.key_prefix()),
            text(cm.role_arn()),
        ),
        Some(ia::DatastoreStorage::ServiceManagedS3(_)) => StorageConfig::ServiceManaged,
        // Multi-layer SiteWise storage is not modelled.
        _ => StorageConfig::Unset,
    }
}

#[async_trait]
impl IotAnalyticsApi for AwsIotAnalytics {
    async fn create_store(&self, kind: StoreKind, spec: &StoreSpec) -> Result<(), ProviderError> {
        let retention = retention_to_sdk(spec.retention)?;
        match kind {
            StoreKind::Channel => {
                self.client
                    .create_channel()
                    .channel_name(&spec.name)
                    .set_channel_storage(channel_storage_to_sdk(&spec.storage)?)
                    .set_retention_period(retention)
                    .send()
                    .await
                    .map_err(|e| classify("CreateChannel", e))?;
            },
            StoreKind::Datastore => {
                self.client
                    .create_datastore()
                    .datastore_name(&spec.name)
                    .set_datastore_storage(datastore_storage_to_sdk(&spec.storage)?)
                    .set_retention_period(retention)
                    .send()
                    .await
                    .map_err(|e| classify("CreateDatastore", e))?;
            },
        }
        debug!(kind = %kind, name = %spec.name, "created");
        Ok(())
    }

    async fn update_store(&self, kind: StoreKind, spec: &StoreSpec) -> Result<(), ProviderError> {
        let retention = retention_to_sdk(spec.retention)?;
        match kind {
            StoreKind::Channel => {
                self.client
                    .update_channel()
                    .channel_name(&spec.name)
                    .set_channel_storage(channel_storage_to_sdk(&spec.storage)?)
                    .set_retention_period(retention)
                    .send()
                    .await
                    .map_err(|e| classify("UpdateChannel", e))?;
            },
            StoreKind::Datastore => {
                self.client
                    .update_datastore()
                    .datastore_name(&spec.name)
                    .set_datastore_storage(datastore_storage_to_sdk(&spec.storage)?)
                    .set_retention_period(retention)
                    .send()
                    .await
                    .map_err(|e| classify("UpdateDatastore", e))?;
            },
        }
        Ok(())
    }

    async fn describe_store(
        &self,
        kind: StoreKind,
        name: &str,
    ) -> Result<StoreDescription, ProviderError> {
        let missing = || ProviderError::NotFound(format!("{} {} not returned", kind, name));
        match kind {
            StoreKind::Channel => {
                let out = self
                    .client
                    .describe_channel()
                    .channel_name(name)
                    .send()
                    .await
                    .map_err(|e| classify("DescribeChannel", e))?;
                let channel = out.channel().ok_or_else(missing)?;
                Ok(StoreDescription {
                    name: opt_text(channel.name()).unwrap_or_else(|| name.to_string()),
                    arn: opt_text(channel.arn()),
                    storage: channel_storage_from_sdk(channel.storage()),
                    retention: retention_from_sdk(channel.retention_period()),
                })
            },
            StoreKind::Datastore => {
                let out = self
                    .client
                    .describe_datastore()
                    .datastore_name(name)
                    .send()
                    .await
                    .map_err(|e| classify("DescribeDatastore", e))?;
                let datastore = out.datastore().ok_or_else(missing)?;
                Ok(StoreDescription {
                    name: opt_text(datastore.name()).unwrap_or_else(|| name.to_string()),
                    arn: opt_text(datastore.arn()),
                    storage: datastore_storage_from_sdk(datastore.storage()),
                    retention: retention_from_sdk(datastore.retention_period()),
                })
            },
        }
    }

    async fn delete_store(&self, kind: StoreKind, name: &str) -> Result<(), ProviderError> {
        match kind {
            StoreKind::Channel => {
                self.client
                    .delete_channel()
                    .channel_name(name)
                    .send()
                    .await
                    .map_err(|e| classify("DeleteChannel", e))?;
            },
            StoreKind::Datastore => {
                self.client
                    .delete_datastore()
                    .datastore_name(name)
                    .send()
                    .await
                    .map_err(|e| classify("DeleteDatastore", e))?;
            },
        }
        Ok(())
    }

    async fn list_stores(&self, kind: StoreKind) -> Result<Vec<String>, ProviderError> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            next_token = match kind {
                StoreKind::Channel => {
                    let out = self
                        .client
                        .list_channels()
                        .set_next_token(next_token)
                        .send()
                        .await
                        .map_err(|e| classify("ListChannels", e))?;
                    names.extend(
                        out.channel_summaries()
                            .iter()
                            .filter_map(|s| opt_text(s.channel_name())),
                    );
                    opt_text(out.next_token())
                },
                StoreKind::Datastore => {
                    let out = self
                        .client
                        .list_datastores()
                        .set_next_token(next_token)
                        .send()
                        .await
                        .map_err(|e| classify("ListDatastores", e))?;
                    names.extend(
                        out.datastore_summaries()
                            .iter()
                            .filter_map(|s| opt_text(s.datastore_name())),
                    );
                    opt_text(out.next_token())
                },
            };
            if next_token.is_none() {
                return Ok(names);
            }
        }
    }
}

// Greengrass

/// Greengrass backed by `aws-sdk-greengrass`.
#[derive(Debug, Clone)]
pub struct AwsGreengrass {
    client: aws_sdk_greengrass::Client,
}

fn group_owner_to_sdk(
    setting: &Option<GroupOwnerSetting>,
) -> Result<Option<gg::GroupOwnerSetting>, ProviderError> {
    setting
        .as_ref()
        .map(|s| {
            gg::GroupOwnerSetting::builder()
                .auto_add_group_owner(s.auto_add_group_owner)
                .set_group_owner(s.group_owner.clone())
                .build()
                .built("group_owner_setting")
        })
        .transpose()
}

fn group_owner_from_sdk(setting: Option<&gg::GroupOwnerSetting>) -> Option<GroupOwnerSetting> {
    setting.map(|s| {
        let auto_add: Option<bool> = s.auto_add_group_owner().into();
        GroupOwnerSetting {
            auto_add_group_owner: auto_add.unwrap_or(false),
            group_owner: opt_text(s.group_owner()),
        }
    })
}

fn resource_to_sdk(resource: &DefinitionResource) -> Result<gg::Resource, ProviderError> {
    let container = gg::ResourceDataContainer::builder();
    let container = match &resource.data_container {
        DataContainer::LocalDevice {
            source_path,
            group_owner_setting,
        } => container.local_device_resource_data(
            gg::LocalDeviceResourceData::builder()
                .source_path(source_path)
                .set_group_owner_setting(group_owner_to_sdk(group_owner_setting)?)
                .build()
                .built("local_device_resource_data")?,
        ),
        DataContainer::LocalVolume {
            source_path,
            destination_path,
            group_owner_setting,
        } => container.local_volume_resource_data(
            gg::LocalVolumeResourceData::builder()
                .source_path(source_path)
                .destination_path(destination_path)
                .set_group_owner_setting(group_owner_to_sdk(group_owner_setting)?)
                .build()
                .built("local_volume_resource_data")?,
        ),
        DataContainer::S3MachineLearningModel {
            s3_uri,
            destination_path,
        } => container.s3_machine_learning_model_resource_data(
            gg::S3MachineLearningModelResourceData::builder()
                .s3_uri(s3_uri)
                .destination_path(destination_path)
                .build()
                .built("s3_machine_learning_model_resource_data")?,
        ),
        DataContainer::SageMakerMachineLearningModel {
            sagemaker_job_arn,
            destination_path,
        } => container.sage_maker_machine_learning_model_resource_data(
            gg::SageMakerMachineLearningModelResourceData::builder()
                .sage_maker_job_arn(sagemaker_job_arn)
                .destination_path(destination_path)
                .build()
                .built("sagemaker_machine_learning_model_resource_data")?,
        ),
        DataContainer::SecretsManagerSecret {
            secret_arn,
            additional_staging_labels_to_download,
        } => container.secrets_manager_secret_resource_data(
            gg::SecretsManagerSecretResourceData::builder()
                .arn(secret_arn)
                .set_additional_staging_labels_to_download(
                    Some(additional_staging_labels_to_download.clone())
                        .filter(|labels| !labels.is_empty()),
                )
                .build()
                .built("secrets_manager_secret_resource_data")?,
        ),
    };

    gg::Resource::builder()
        .id(&resource.id)
        .name(&resource.name)
        .resource_data_container(container.build().built("data_container")?)
        .build()
        .built("resource")
}

fn resource_from_sdk(resource: &gg::Resource) -> Result<DefinitionResource, ProviderError> {
    let id = text(resource.id());
    let container: Option<&gg::ResourceDataContainer> = resource.resource_data_container().into();
    let unsupported = || {
        ProviderError::Validation(format!(
            "resource {} has no supported data container",
            id
        ))
    };
    let container = container.ok_or_else(unsupported)?;

    let data_container = if let Some(d) = container.local_device_resource_data() {
        DataContainer::LocalDevice {
            source_path: text(d.source_path()),
            group_owner_setting: group_owner_from_sdk(d.group_owner_setting()),
        }
    } else if let Some(v) = container.local_volume_resource_data() {
        DataContainer::LocalVolume {
            source_path: text(v.source_path()),
            destination_path: text(v.destination_path()),
            group_owner_setting: group_owner_from_sdk(v.group_owner_setting()),
        }
    } else if let Some(m) = container.s3_machine_learning_model_resource_data() {
        DataContainer::S3MachineLearningModel {
            s3_uri: text(m.s3_uri()),
            destination_path: text(m.destination_path()),
        }
    } else if let Some(m) = container.sage_maker_machine_learning_model_resource_data() {
        DataContainer::SageMakerMachineLearningModel {
            sagemaker_job_arn: text(m.sage_maker_job_arn()),
            destination_path: text(m.destination_path()),
        }
    } else if let Some(s) = container.secrets_manager_secret_resource_data() {
        DataContainer::SecretsManagerSecret {
            secret_arn: text(s.arn()),
            additional_staging_labels_to_download: s
                .additional_staging_labels_to_download()
                .to_vec(),
        }
    } else {
        return Err(unsupported());
    };

    Ok(DefinitionResource {
        id: id.clone(),
        name: text(resource.name()),
        data_container,
    })
}

fn resources_to_sdk(resources: &[DefinitionResource]) -> Result<Vec<gg::Resource>, ProviderError> {
    resources.iter().map(resource_to_sdk).collect()
}

fn tags_to_sdk(tags: &BTreeMap<String, String>) -> Option<HashMap<String, String>> {
    (!tags.is_empty()).then(|| tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

#[async_trait]
impl GreengrassApi for AwsGreengrass {
    async fn create_definition(&self, spec: &DefinitionSpec) -> Result<String, ProviderError> {
        let initial_version = if spec.resources.is_empty() {
            None
        } else {
            Some(
                gg::ResourceDefinitionVersion::builder()
                    .set_resources(Some(resources_to_sdk(&spec.resources)?))
                    .build()
                    .built("initial_version")?,
            )
        };

        let out = self
            .client
            .create_resource_definition()
            .name(&spec.name)
            .set_tags(tags_to_sdk(&spec.tags))
            .set_initial_version(initial_version)
            .send()
            .await
            .map_err(|e| classify("CreateResourceDefinition", e))?;

        let id = opt_text(out.id()).ok_or_else(|| {
            ProviderError::api("CreateResourceDefinition", "response carried no definition id")
        })?;
        info!(definition_id = %id, name = %spec.name, "resource definition created");
        Ok(id)
    }

    async fn create_definition_version(
        &self,
        definition_id: &str,
        resources: &[DefinitionResource],
    ) -> Result<String, ProviderError> {
        let out = self
            .client
            .create_resource_definition_version()
            .resource_definition_id(definition_id)
            .set_resources(Some(resources_to_sdk(resources)?))
            .send()
            .await
            .map_err(|e| classify("CreateResourceDefinitionVersion", e))?;
        Ok(text(out.arn()))
    }

    async fn rename_definition(
        &self,
        definition_id: &str,
        name: &str,
    ) -> Result<(), ProviderError> {
        self.client
            .update_resource_definition()
            .resource_definition_id(definition_id)
            .name(name)
            .send()
            .await
            .map_err(|e| classify("UpdateResourceDefinition", e))?;
        Ok(())
    }

    async fn tag_definition(
        &self,
        arn: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), ProviderError> {
        if tags.is_empty() {
            return Ok(());
        }
        self.client
            .tag_resource()
            .resource_arn(arn)
            .set_tags(tags_to_sdk(tags))
            .send()
            .await
            .map_err(|e| classify("TagResource", e))?;
        Ok(())
    }

    async fn untag_definition(&self, arn: &str, keys: &[String]) -> Result<(), ProviderError> {
        if keys.is_empty() {
            return Ok(());
        }
        self.client
            .untag_resource()
            .resource_arn(arn)
            .set_tag_keys(Some(keys.to_vec()))
            .send()
            .await
            .map_err(|e| classify("UntagResource", e))?;
        Ok(())
    }

    async fn get_definition(
        &self,
        definition_id: &str,
    ) -> Result<DefinitionDescription, ProviderError> {
        let out = self
            .client
            .get_resource_definition()
            .resource_definition_id(definition_id)
            .send()
            .await
            .map_err(|e| classify("GetResourceDefinition", e))?;

        let tags: Option<&HashMap<String, String>> = out.tags().into();
        let mut description = DefinitionDescription {
            id: opt_text(out.id()).unwrap_or_else(|| definition_id.to_string()),
            arn: text(out.arn()),
            name: text(out.name()),
            tags: tags
                .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                .unwrap_or_default(),
            latest_version_arn: opt_text(out.latest_version_arn()),
            resources: Vec::new(),
        };

        if let Some(version_id) = opt_text(out.latest_version()) {
            let version = self
                .client
                .get_resource_definition_version()
                .resource_definition_id(definition_id)
                .resource_definition_version_id(version_id)
                .send()
                .await
                .map_err(|e| classify("GetResourceDefinitionVersion", e))?;
            if let Some(definition) = version.definition() {
                description.resources = definition
                    .resources()
                    .iter()
                    .map(resource_from_sdk)
                    .collect::<Result<_, _>>()?;
            }
        }
        Ok(description)
    }

    async fn delete_definition(&self, definition_id: &str) -> Result<(), ProviderError> {
        self.client
            .delete_resource_definition()
            .resource_definition_id(definition_id)
            .send()
            .await
            .map_err(|e| classify("DeleteResourceDefinition", e))?;
        Ok(())
    }

    async fn list_definitions(&self) -> Result<Vec<String>, ProviderError> {
        let mut ids = Vec::new();
        let mut next_token: Option<String> = None;
        loop {
            let out = self
                .client
                .list_resource_definitions()
                .max_results(LIST_PAGE_SIZE)
                .set_next_token(next_token)
                .send()
                .await
                .map_err(|e| classify("ListResourceDefinitions", e))?;
            ids.extend(out.definitions().iter().filter_map(|d| opt_text(d.id())));
            next_token = opt_text(out.next_token());
            if next_token.is_none() {
                return Ok(ids);
            }
        }
    }
}
