//! Hemmer provider for AWS IoT.
//!
//! Manages three resource types over the Hemmer provider protocol:
//!
//! - `aws_iotanalytics_channel`
//! - `aws_iotanalytics_datastore`
//! - `aws_greengrass_resource_definition`
//!
//! # Overview
//!
//! - **[`IotProvider`]**: the [`ProviderService`] implementation, dispatching
//!   each request to a [`resources::ResourceHandler`]
//! - **Clients**: [`client::IotAnalyticsApi`] and [`client::GreengrassApi`],
//!   backed by the AWS SDK or by an in-memory account
//! - **Retry**: IoT Analytics create/update calls run on a fixed delay
//!   schedule (`1, 2, 5, 8, 10, 0` seconds by default), since freshly created
//!   IAM roles take a while to become assumable
//! - **Server**: [`serve`] starts the gRPC server and prints the handshake
//!
//! # Handshake Protocol
//!
//! On start the binary prints a single line to stdout:
//!
//! ```text
//! HEMMER_PROVIDER|1|127.0.0.1:50051
//! ```
//!
//! Format: `HEMMER_PROVIDER|<protocol_version>|<address>`. Logs go to stderr.
//!
//! # Provider Configuration
//!
//! ```json
//! {
//!   "region": "us-east-1",
//!   "profile": "edge",
//!   "endpoint_url": "http://localhost:4566",
//!   "retry_delays": [1, 2, 5, 8, 10, 0]
//! }
//! ```
//!
//! Every field is optional; region and credentials fall back to the AWS
//! default chain.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attributes;
pub mod client;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod plan;
pub mod provider;
pub mod resources;
pub mod retry;
pub mod schema;
pub mod server;
pub mod testing;
pub mod types;
pub mod validation;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

pub use config::ProviderConfig;
pub use error::ProviderError;
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::IotProvider;
pub use retry::RetrySchedule;
pub use schema::ProviderSchema;
pub use server::{
    serve, serve_on, serve_on_with_options, serve_with_options, ProviderService, ServeOptions,
};
pub use types::{
    AttributeChange, ImportedResource, PlanResult, ProviderMetadata, ServerCapabilities,
    HANDSHAKE_PREFIX, PROTOCOL_VERSION,
};
pub use validation::{is_valid, validate, validate_result};
