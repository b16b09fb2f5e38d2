//! Provider configuration.
//!
//! Delivered as a JSON object by `Configure`. Every field is optional: region
//! and credentials fall back to the standard AWS default chain.

use serde::Deserialize;
use serde_json::Value;

use crate::error::ProviderError;
use crate::retry::{RetrySchedule, DEFAULT_DELAYS_SECS};
use crate::schema::{Attribute, AttributeFlags, AttributeType, Schema};

/// Settings accepted in the provider block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    /// AWS region, e.g. `us-west-2`.
    pub region: Option<String>,
    /// Named profile from the shared AWS config files.
    pub profile: Option<String>,
    /// Endpoint override, used with local emulators.
    pub endpoint_url: Option<String>,
    /// Seconds to sleep after each failed IoT Analytics create/update.
    pub retry_delays: Option<Vec<u64>>,
}

impl ProviderConfig {
    /// Schema of the provider block.
    pub fn schema() -> Schema {
        Schema::v0()
            .with_attribute(
                "region",
                Attribute::optional_string().with_description("AWS region"),
            )
            .with_attribute(
                "profile",
                Attribute::optional_string().with_description("Shared config profile name"),
            )
            .with_attribute(
                "endpoint_url",
                Attribute::optional_string().with_description("Override the AWS endpoint"),
            )
            .with_attribute(
                "retry_delays",
                Attribute::new(
                    AttributeType::list(AttributeType::Int64),
                    AttributeFlags::optional(),
                )
                .with_description("Seconds slept between IoT Analytics create/update attempts")
                .with_default(serde_json::json!(DEFAULT_DELAYS_SECS)),
            )
    }

    /// Parse the provider block. `null` yields the defaults.
    pub fn from_value(value: Value) -> Result<Self, ProviderError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value)
            .map_err(|e| ProviderError::Configuration(format!("invalid provider config: {}", e)))
    }

    /// The retry schedule for IoT Analytics mutations.
    pub fn retry_schedule(&self) -> RetrySchedule {
        match &self.retry_delays {
            Some(secs) => RetrySchedule::from_secs(secs),
            None => RetrySchedule::default(),
        }
    }
}
