//! Configuration error types.

use std::path::PathBuf;

use thiserror::Error;

use quay_core::EndpointConfigError;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// An explicitly requested file does not exist.
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// The sources could not be merged or extracted.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// A value is out of range or inconsistent.
    #[error("Invalid configuration: {message}")]
    ValidationError { message: String },

    /// A required field is missing or blank.
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    /// No endpoint section with this name exists.
    #[error("No {section} endpoint named '{name}' is configured")]
    UnknownEndpoint {
        /// `sending` or `handling`.
        section: &'static str,
        name: String,
    },

    /// An endpoint section failed core validation.
    #[error("Invalid {section} endpoint '{name}': {source}")]
    Endpoint {
        section: &'static str,
        name: String,
        #[source]
        source: EndpointConfigError,
    },
}

impl ConfigError {
    /// Creates a validation error with the given message.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// Creates a missing field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
