//! Configuration validation.
//!
//! Log levels and formats are closed enums and are rejected while parsing;
//! this module checks everything a parser cannot.

use super::error::{ConfigError, ConfigResult};
use super::schema::{LogOutput, LoggingConfig, PipelineConfig, QuayConfig};

/// Validates the whole document, including every endpoint section.
pub fn validate_config(config: &QuayConfig) -> ConfigResult<()> {
    validate_logging(&config.logging)?;
    validate_pipeline(&config.pipeline)?;

    for name in config.sending.keys() {
        validate_name("sending", name)?;
        config.sending_endpoint(name)?;
    }
    for name in config.handling.keys() {
        validate_name("handling", name)?;
        config.handling_endpoint(name)?;
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if let Some(module) = logging.filters.keys().find(|m| m.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Log filter module name cannot be blank (got {module:?})"
        )));
    }
    Ok(())
}

fn validate_pipeline(pipeline: &PipelineConfig) -> ConfigResult<()> {
    if pipeline.message_type_property.trim().is_empty() {
        return Err(ConfigError::missing_field("pipeline.message_type_property"));
    }
    Ok(())
}

fn validate_name(section: &str, name: &str) -> ConfigResult<()> {
    if name.trim().is_empty() {
        return Err(ConfigError::validation(format!(
            "{section} endpoint names cannot be blank"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{HandlingEndpointSection, SendingEndpointSection};

    fn handling(max_concurrent_calls: u32) -> HandlingEndpointSection {
        HandlingEndpointSection {
            connection_string: "memory://local".into(),
            entity_path: "orders".into(),
            auto_complete: false,
            max_concurrent_calls,
            max_lock_renewal_secs: 300,
            dead_letter_on_unhandled_error: false,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&QuayConfig::default()).is_ok());
    }

    #[test]
    fn test_blank_type_property() {
        let mut config = QuayConfig::default();
        config.pipeline.message_type_property = "  ".into();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }

    #[test]
    fn test_file_output_requires_path() {
        let mut config = QuayConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());

        config.logging.file_path = Some("quay.log".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = QuayConfig::default();
        config.handling.insert("orders".into(), handling(0));
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Endpoint { .. })
        ));
    }

    #[test]
    fn test_blank_entity_path_rejected() {
        let mut config = QuayConfig::default();
        config.sending.insert(
            "fulfilment".into(),
            SendingEndpointSection {
                connection_string: "memory://local".into(),
                entity_path: " ".into(),
            },
        );
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Endpoint {
                section: "sending",
                ..
            })
        ));
    }
}
