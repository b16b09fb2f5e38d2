//! Typed values for the remote objects this provider manages.
//!
//! Attribute maps are parsed into these types before any API call, and API
//! responses are turned back into them before being flattened into state.

use std::collections::BTreeMap;

use crate::error::ProviderError;

/// Where an IoT Analytics channel or datastore keeps its data.
///
/// The two S3 variants are mutually exclusive. `Unset` lets the service pick
/// its default and is what a describe returns when neither is reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StorageConfig {
    /// No storage block configured.
    #[default]
    Unset,
    /// Data kept in a bucket owned by the account.
    CustomerManaged {
        /// Bucket name.
        bucket: String,
        /// Optional key prefix, never empty.
        key_prefix: Option<String>,
        /// Role the service assumes to write to the bucket.
        role_arn: String,
    },
    /// Data kept in storage owned by the service.
    ServiceManaged,
}

impl StorageConfig {
    /// Build from the two optional variants, rejecting both at once.
    pub fn from_variants(
        customer_managed: Option<CustomerManagedS3>,
        service_managed: bool,
    ) -> Result<Self, ProviderError> {
        match (customer_managed, service_managed) {
            (Some(_), true) => Err(ProviderError::Validation(
                "storage: only one of customer_managed_s3 or service_managed_s3 may be set"
                    .to_string(),
            )),
            (Some(cm), false) => Ok(Self::customer_managed(cm.bucket, cm.key_prefix, cm.role_arn)),
            (None, true) => Ok(Self::ServiceManaged),
            (None, false) => Ok(Self::Unset),
        }
    }

    /// Customer-managed storage; an empty key prefix counts as none.
    pub fn customer_managed(
        bucket: impl Into<String>,
        key_prefix: Option<String>,
        role_arn: impl Into<String>,
    ) -> Self {
        Self::CustomerManaged {
            bucket: bucket.into(),
            key_prefix: key_prefix.filter(|p| !p.is_empty()),
            role_arn: role_arn.into(),
        }
    }
}

/// The fields of a customer-managed S3 block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerManagedS3 {
    /// Bucket name.
    pub bucket: String,
    /// Optional key prefix.
    pub key_prefix: Option<String>,
    /// Role the service assumes.
    pub role_arn: String,
}

/// How long IoT Analytics keeps messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPeriod {
    /// Kept forever.
    Unlimited,
    /// Kept for the given number of days. Positive, within the API's `i32` range.
    Days(i32),
}

impl RetentionPeriod {
    /// Build from the `unlimited` flag and `number_of_days`.
    pub fn from_parts(
        unlimited: Option<bool>,
        number_of_days: Option<i64>,
    ) -> Result<Self, ProviderError> {
        match (unlimited.unwrap_or(false), number_of_days) {
            (true, None) => Ok(Self::Unlimited),
            (true, Some(_)) => Err(ProviderError::Validation(
                "retention_period: number_of_days cannot be set when unlimited is true"
                    .to_string(),
            )),
            (false, Some(days)) => i32::try_from(days)
                .ok()
                .filter(|d| *d > 0)
                .map(Self::Days)
                .ok_or_else(|| {
                    ProviderError::Validation(format!(
                        "retention_period: number_of_days must be a positive number, got {}",
                        days
                    ))
                }),
            (false, None) => Err(ProviderError::Validation(
                "retention_period: set number_of_days or unlimited = true".to_string(),
            )),
        }
    }
}

/// The two IoT Analytics object kinds sharing one storage model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreKind {
    /// An ingestion channel.
    Channel,
    /// A datastore.
    Datastore,
}

impl StoreKind {
    /// Human-readable kind, used in logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Channel => "channel",
            Self::Datastore => "datastore",
        }
    }
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Desired configuration of a channel or datastore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSpec {
    /// Object name, also its identifier.
    pub name: String,
    /// Storage backend.
    pub storage: StorageConfig,
    /// Retention, service default when `None`.
    pub retention: Option<RetentionPeriod>,
}

/// A channel or datastore as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDescription {
    /// Object name.
    pub name: String,
    /// Object ARN.
    pub arn: Option<String>,
    /// Storage backend.
    pub storage: StorageConfig,
    /// Retention.
    pub retention: Option<RetentionPeriod>,
}

/// Group owner permissions for local device and volume resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupOwnerSetting {
    /// Add the Linux group owning the resource to the Lambda process.
    pub auto_add_group_owner: bool,
    /// Explicit group owner.
    pub group_owner: Option<String>,
}

/// The payload of a Greengrass resource. Exactly one variant per resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataContainer {
    /// A device file under `/dev`.
    LocalDevice {
        /// Device path on the core.
        source_path: String,
        /// Group owner permissions.
        group_owner_setting: Option<GroupOwnerSetting>,
    },
    /// A volume on the core mounted into the Lambda environment.
    LocalVolume {
        /// Path on the core.
        source_path: String,
        /// Mount path inside the Lambda environment.
        destination_path: String,
        /// Group owner permissions.
        group_owner_setting: Option<GroupOwnerSetting>,
    },
    /// A machine learning model stored in S3.
    S3MachineLearningModel {
        /// Model archive URI.
        s3_uri: String,
        /// Local path for the model.
        destination_path: String,
    },
    /// A model produced by a SageMaker training job.
    SageMakerMachineLearningModel {
        /// Training job ARN.
        sagemaker_job_arn: String,
        /// Local path for the model.
        destination_path: String,
    },
    /// A Secrets Manager secret made available on the core.
    SecretsManagerSecret {
        /// Secret ARN.
        secret_arn: String,
        /// Staging labels fetched in addition to `AWSCURRENT`.
        additional_staging_labels_to_download: Vec<String>,
    },
}

/// One entry of a resource definition version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionResource {
    /// Resource id, unique within the definition.
    pub id: String,
    /// Resource name.
    pub name: String,
    /// Resource payload.
    pub data_container: DataContainer,
}

/// Desired configuration of a Greengrass resource definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefinitionSpec {
    /// Definition name.
    pub name: String,
    /// Tags on the definition.
    pub tags: BTreeMap<String, String>,
    /// Resources of the latest version.
    pub resources: Vec<DefinitionResource>,
}

/// A Greengrass resource definition as reported by the service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefinitionDescription {
    /// Definition id.
    pub id: String,
    /// Definition ARN.
    pub arn: String,
    /// Definition name.
    pub name: String,
    /// Tags on the definition.
    pub tags: BTreeMap<String, String>,
    /// ARN of the latest version, if any version exists.
    pub latest_version_arn: Option<String>,
    /// Resources of the latest version.
    pub resources: Vec<DefinitionResource>,
}
