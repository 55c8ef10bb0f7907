//! Validated endpoint configuration.
//!
//! Both shapes are checked once, at construction, and are immutable after
//! that. Components share them read-only.

use std::fmt;
use std::time::Duration;

use crate::error::EndpointConfigError;

/// Suffix of the dead-letter sub-queue of an entity.
pub const DEAD_LETTER_QUEUE_SUFFIX: &str = "$DeadLetterQueue";

/// Default maximum lock renewal duration.
pub const DEFAULT_MAX_LOCK_RENEWAL: Duration = Duration::from_secs(300);

/// Returns the path of `entity_path`'s dead-letter sub-queue.
pub fn dead_letter_path(entity_path: &str) -> String {
    format!("{}/{}", entity_path.trim_end_matches('/'), DEAD_LETTER_QUEUE_SUFFIX)
}

fn require(field: &'static str, value: String) -> Result<String, EndpointConfigError> {
    if value.trim().is_empty() {
        return Err(EndpointConfigError::Blank { field });
    }
    Ok(value)
}

// =============================================================================
// Sending Config
// =============================================================================

/// Where to send: a connection string and an entity path.
#[derive(Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    connection_string: String,
    entity_path: String,
}

impl EndpointConfig {
    /// Creates a config, rejecting blank values.
    pub fn new(
        connection_string: impl Into<String>,
        entity_path: impl Into<String>,
    ) -> Result<Self, EndpointConfigError> {
        Ok(Self {
            connection_string: require("connection_string", connection_string.into())?,
            entity_path: require("entity_path", entity_path.into())?,
        })
    }

    /// Returns the broker connection string.
    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    /// Returns the queue or topic path.
    pub fn entity_path(&self) -> &str {
        &self.entity_path
    }

    /// Returns the path of this entity's dead-letter sub-queue.
    pub fn dead_letter_path(&self) -> String {
        dead_letter_path(&self.entity_path)
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("connection_string", &"<redacted>")
            .field("entity_path", &self.entity_path)
            .finish()
    }
}

// =============================================================================
// Handling Config
// =============================================================================

/// Receive-side settings for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointHandlingConfig {
    endpoint: EndpointConfig,
    auto_complete: bool,
    max_concurrent_calls: u32,
    max_lock_renewal: Duration,
    dead_letter_on_unhandled_error: bool,
}

impl EndpointHandlingConfig {
    /// Starts a builder with the default settings.
    pub fn builder(endpoint: EndpointConfig) -> EndpointHandlingConfigBuilder {
        EndpointHandlingConfigBuilder {
            endpoint,
            auto_complete: false,
            max_concurrent_calls: 1,
            max_lock_renewal: DEFAULT_MAX_LOCK_RENEWAL,
            dead_letter_on_unhandled_error: false,
        }
    }

    /// Returns a config with default settings for `endpoint`.
    pub fn with_defaults(endpoint: EndpointConfig) -> Self {
        Self {
            endpoint,
            auto_complete: false,
            max_concurrent_calls: 1,
            max_lock_renewal: DEFAULT_MAX_LOCK_RENEWAL,
            dead_letter_on_unhandled_error: false,
        }
    }

    /// Returns the endpoint being handled.
    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    /// Returns the broker connection string.
    pub fn connection_string(&self) -> &str {
        self.endpoint.connection_string()
    }

    /// Returns the queue or topic path.
    pub fn entity_path(&self) -> &str {
        self.endpoint.entity_path()
    }

    /// Whether the receiver completes messages itself.
    pub fn auto_complete(&self) -> bool {
        self.auto_complete
    }

    /// Upper bound on concurrent callbacks.
    pub fn max_concurrent_calls(&self) -> u32 {
        self.max_concurrent_calls
    }

    /// How long message locks are renewed while a handler runs.
    pub fn max_lock_renewal(&self) -> Duration {
        self.max_lock_renewal
    }

    /// Whether unhandled handler errors dead-letter the message.
    pub fn dead_letter_on_unhandled_error(&self) -> bool {
        self.dead_letter_on_unhandled_error
    }
}

/// Builder for [`EndpointHandlingConfig`].
#[derive(Debug, Clone)]
pub struct EndpointHandlingConfigBuilder {
    endpoint: EndpointConfig,
    auto_complete: bool,
    max_concurrent_calls: u32,
    max_lock_renewal: Duration,
    dead_letter_on_unhandled_error: bool,
}

impl EndpointHandlingConfigBuilder {
    /// Lets the transport settle successful callbacks itself.
    pub fn auto_complete(mut self, enabled: bool) -> Self {
        self.auto_complete = enabled;
        self
    }

    /// Bounds in-flight callbacks. Must be at least 1.
    pub fn max_concurrent_calls(mut self, calls: u32) -> Self {
        self.max_concurrent_calls = calls;
        self
    }

    /// Sets the maximum lock renewal duration.
    pub fn max_lock_renewal(mut self, duration: Duration) -> Self {
        self.max_lock_renewal = duration;
        self
    }

    /// Dead-letters messages whose handler fails instead of letting the
    /// failure propagate.
    pub fn dead_letter_on_unhandled_error(mut self, enabled: bool) -> Self {
        self.dead_letter_on_unhandled_error = enabled;
        self
    }

    /// Validates and builds the config.
    pub fn build(self) -> Result<EndpointHandlingConfig, EndpointConfigError> {
        if self.max_concurrent_calls < 1 {
            return Err(EndpointConfigError::MaxConcurrentCalls(
                self.max_concurrent_calls,
            ));
        }

        Ok(EndpointHandlingConfig {
            endpoint: self.endpoint,
            auto_complete: self.auto_complete,
            max_concurrent_calls: self.max_concurrent_calls,
            max_lock_renewal: self.max_lock_renewal,
            dead_letter_on_unhandled_error: self.dead_letter_on_unhandled_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> EndpointConfig {
        EndpointConfig::new("memory://local", "orders").unwrap()
    }

    #[test]
    fn test_blank_fields_are_rejected() {
        assert_eq!(
            EndpointConfig::new("  ", "orders").unwrap_err(),
            EndpointConfigError::Blank {
                field: "connection_string"
            }
        );
        assert_eq!(
            EndpointConfig::new("memory://local", "").unwrap_err(),
            EndpointConfigError::Blank {
                field: "entity_path"
            }
        );
    }

    #[test]
    fn test_handling_defaults() {
        let config = EndpointHandlingConfig::builder(endpoint()).build().unwrap();
        assert!(!config.auto_complete());
        assert_eq!(config.max_concurrent_calls(), 1);
        assert_eq!(config.max_lock_renewal(), Duration::from_secs(300));
        assert!(!config.dead_letter_on_unhandled_error());
        assert_eq!(config, EndpointHandlingConfig::with_defaults(endpoint()));
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let err = EndpointHandlingConfig::builder(endpoint())
            .max_concurrent_calls(0)
            .build()
            .unwrap_err();
        assert_eq!(err, EndpointConfigError::MaxConcurrentCalls(0));
    }

    #[test]
    fn test_dead_letter_path() {
        assert_eq!(endpoint().dead_letter_path(), "orders/$DeadLetterQueue");
        assert_eq!(
            dead_letter_path("topic/subscriptions/audit/"),
            "topic/subscriptions/audit/$DeadLetterQueue"
        );
    }

    #[test]
    fn test_debug_hides_connection_string() {
        let config = EndpointConfig::new("secret-key", "orders").unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-key"));
        assert!(debug.contains("orders"));
    }
}
