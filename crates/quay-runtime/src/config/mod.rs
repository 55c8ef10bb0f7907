//! Configuration for a Quay process.
//!
//! A [`QuayConfig`] document is loaded from layered sources by
//! [`ConfigLoader`], checked by [`validate_config`], and turned into the
//! validated endpoint structs of `quay-core` on demand.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    HandlingEndpointSection, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    PipelineConfig, QuayConfig, SendingEndpointSection, SpanEventConfig,
};
pub use validation::validate_config;
