//! Error types for the AWS IoT provider.

use thiserror::Error;

/// Errors produced while serving provider requests.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The remote object does not exist.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The supplied configuration or state is invalid.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The provider is not configured, or its configuration is unusable.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is not served by this provider.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A gRPC transport error occurred.
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// The remote object already exists.
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// The caller is not allowed to perform the operation.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The upstream API throttled the request.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Any other upstream API failure.
    #[error("AWS API error in {operation}: {message}")]
    Api {
        /// Name of the failed API operation.
        operation: String,
        /// Error message, including the source chain.
        message: String,
    },

    /// The operation is not supported for this resource type.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),
}

impl ProviderError {
    /// Get the error message without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(msg)
            | Self::Validation(msg)
            | Self::Configuration(msg)
            | Self::UnknownResource(msg)
            | Self::AlreadyExists(msg)
            | Self::PermissionDenied(msg)
            | Self::ResourceExhausted(msg)
            | Self::Unimplemented(msg) => msg,
            Self::Api { message, .. } => message,
            Self::Serialization(_err) => "serialization error (see Debug output)",
            Self::Transport(_err) => "transport error (see Debug output)",
        }
    }

    /// Build an [`ProviderError::Api`] for the named operation.
    pub fn api(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Whether this error reports a missing remote object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<ProviderError> for tonic::Status {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotFound(msg) => tonic::Status::not_found(msg),
            ProviderError::Validation(msg) => tonic::Status::invalid_argument(msg),
            ProviderError::Configuration(msg) => tonic::Status::failed_precondition(msg),
            ProviderError::UnknownResource(msg) => tonic::Status::not_found(msg),
            ProviderError::Serialization(err) => {
                tonic::Status::invalid_argument(format!("Serialization error: {}", err))
            },
            ProviderError::Transport(err) => {
                tonic::Status::unavailable(format!("Transport error: {}", err))
            },
            ProviderError::AlreadyExists(msg) => tonic::Status::already_exists(msg),
            ProviderError::PermissionDenied(msg) => tonic::Status::permission_denied(msg),
            ProviderError::ResourceExhausted(msg) => tonic::Status::resource_exhausted(msg),
            ProviderError::Api { operation, message } => {
                tonic::Status::unavailable(format!("{}: {}", operation, message))
            },
            ProviderError::Unimplemented(msg) => tonic::Status::unimplemented(msg),
        }
    }
}

/// Walk the full error chain and join all causes into one string.
///
/// AWS SDK errors often display as a bare "service error" and keep the useful
/// detail in their sources.
pub fn format_err_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}
