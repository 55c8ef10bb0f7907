//! Quay Runtime - process-level plumbing for the Quay message pipeline.
//!
//! This crate provides:
//! - Layered configuration (`ConfigLoader`, `QuayConfig`)
//! - Logging setup (`LoggingBuilder`, `SpanEvents`)
//! - A `tracing`-backed instrumentor (`TracingInstrumentor`)
//! - Listener hosting with signal-driven shutdown (`ListenerHost`)
//!
//! ```ignore
//! use quay_runtime::{ListenerHost, config, logging};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = config::load_config()?;
//!     config::validate_config(&config)?;
//!     logging::init_from_config(&config.logging);
//!
//!     let mut host = ListenerHost::new();
//!     host.register(build_orders_listener(&config)?)?;
//!
//!     // Run until Ctrl+C
//!     host.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod host;
pub mod instrumentor;
pub mod logging;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, QuayConfig};
pub use error::{HostError, HostResult};
pub use host::ListenerHost;
pub use instrumentor::{TELEMETRY_TARGET, TracingInstrumentor};
pub use logging::{LoggingBuilder, SpanEvents};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides the logging macros plus `Level` and `instrument`.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
