//! Configuration schema definitions.
//!
//! ```toml
//! [logging]
//! level = "debug"
//! format = "pretty"
//!
//! [pipeline]
//! message_type_property = "Quay.EnclosedMessageType"
//!
//! [sending.fulfilment]
//! connection_string = "memory://local"
//! entity_path = "fulfilment"
//!
//! [handling.orders]
//! connection_string = "memory://local"
//! entity_path = "orders"
//! max_concurrent_calls = 4
//! dead_letter_on_unhandled_error = true
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use quay_core::{
    DEFAULT_MESSAGE_TYPE_PROPERTY, EndpointConfig, EndpointHandlingConfig,
    endpoint::DEFAULT_MAX_LOCK_RENEWAL,
};

use super::error::{ConfigError, ConfigResult};

/// Root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuayConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Sending endpoints by name.
    #[serde(default)]
    pub sending: BTreeMap<String, SendingEndpointSection>,

    /// Handling (listening) endpoints by name.
    #[serde(default)]
    pub handling: BTreeMap<String, HandlingEndpointSection>,
}

impl QuayConfig {
    /// Returns the validated sending endpoint called `name`.
    pub fn sending_endpoint(&self, name: &str) -> ConfigResult<EndpointConfig> {
        self.sending
            .get(name)
            .ok_or_else(|| ConfigError::UnknownEndpoint {
                section: "sending",
                name: name.to_owned(),
            })?
            .to_endpoint_config()
            .map_err(|source| ConfigError::Endpoint {
                section: "sending",
                name: name.to_owned(),
                source,
            })
    }

    /// Returns the validated handling endpoint called `name`.
    pub fn handling_endpoint(&self, name: &str) -> ConfigResult<EndpointHandlingConfig> {
        self.handling
            .get(name)
            .ok_or_else(|| ConfigError::UnknownEndpoint {
                section: "handling",
                name: name.to_owned(),
            })?
            .to_handling_config()
            .map_err(|source| ConfigError::Endpoint {
                section: "handling",
                name: name.to_owned(),
                source,
            })
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// Settings shared by every listener and gateway in the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// User property carrying the payload type tag. Senders and dispatchers
    /// must agree on it.
    #[serde(default = "default_message_type_property")]
    pub message_type_property: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            message_type_property: default_message_type_property(),
        }
    }
}

fn default_message_type_property() -> String {
    DEFAULT_MESSAGE_TYPE_PROPERTY.to_string()
}

// =============================================================================
// Endpoints
// =============================================================================

/// A `[sending.<name>]` section.
#[derive(Clone, Serialize, Deserialize)]
pub struct SendingEndpointSection {
    pub connection_string: String,
    pub entity_path: String,
}

impl SendingEndpointSection {
    /// Converts the section into a validated endpoint config.
    pub fn to_endpoint_config(&self) -> Result<EndpointConfig, quay_core::EndpointConfigError> {
        EndpointConfig::new(self.connection_string.clone(), self.entity_path.clone())
    }
}

impl fmt::Debug for SendingEndpointSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendingEndpointSection")
            .field("connection_string", &"<redacted>")
            .field("entity_path", &self.entity_path)
            .finish()
    }
}

/// A `[handling.<name>]` section.
#[derive(Clone, Serialize, Deserialize)]
pub struct HandlingEndpointSection {
    pub connection_string: String,
    pub entity_path: String,

    #[serde(default)]
    pub auto_complete: bool,

    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: u32,

    /// Maximum lock renewal in seconds.
    #[serde(default = "default_max_lock_renewal_secs")]
    pub max_lock_renewal_secs: u64,

    #[serde(default)]
    pub dead_letter_on_unhandled_error: bool,
}

impl HandlingEndpointSection {
    /// Converts the section into a validated handling config.
    pub fn to_handling_config(
        &self,
    ) -> Result<EndpointHandlingConfig, quay_core::EndpointConfigError> {
        let endpoint =
            EndpointConfig::new(self.connection_string.clone(), self.entity_path.clone())?;
        EndpointHandlingConfig::builder(endpoint)
            .auto_complete(self.auto_complete)
            .max_concurrent_calls(self.max_concurrent_calls)
            .max_lock_renewal(Duration::from_secs(self.max_lock_renewal_secs))
            .dead_letter_on_unhandled_error(self.dead_letter_on_unhandled_error)
            .build()
    }
}

impl fmt::Debug for HandlingEndpointSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlingEndpointSection")
            .field("connection_string", &"<redacted>")
            .field("entity_path", &self.entity_path)
            .field("auto_complete", &self.auto_complete)
            .field("max_concurrent_calls", &self.max_concurrent_calls)
            .field("max_lock_renewal_secs", &self.max_lock_renewal_secs)
            .field(
                "dead_letter_on_unhandled_error",
                &self.dead_letter_on_unhandled_error,
            )
            .finish()
    }
}

fn default_max_concurrent_calls() -> u32 {
    1
}

fn default_max_lock_renewal_secs() -> u64 {
    DEFAULT_MAX_LOCK_RENEWAL.as_secs()
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Returns the lowercase level name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Converts to the matching `tracing` level.
    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Line format of log records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; falls back to `full` without it.
    Json,
}

/// Where log records are written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// When file output starts a new file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// The `[logging]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    #[serde(default)]
    pub thread_ids: bool,

    /// Include file and line of the call site.
    #[serde(default)]
    pub file_location: bool,

    /// Required when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Per-module levels, e.g. `quay_transport = "trace"`.
    #[serde(default)]
    pub filters: BTreeMap<String, LogLevel>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            span_events: SpanEventConfig::default(),
            thread_ids: false,
            file_location: false,
            file_path: None,
            rotation: LogRotation::Never,
            filters: BTreeMap::new(),
        }
    }
}
