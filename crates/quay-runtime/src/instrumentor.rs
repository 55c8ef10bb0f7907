//! An [`Instrumentor`] that writes telemetry as log events.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use quay_core::{
    BoxedInstrumentor, DependencyTelemetry, ElapsedTelemetry, Instrumentor, RequestTelemetry,
};

/// `tracing` target used for telemetry events.
pub const TELEMETRY_TARGET: &str = "quay::telemetry";

/// Reports every measurement as an `info` event on [`TELEMETRY_TARGET`].
///
/// Filter the target (`quay::telemetry=off`) to silence it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInstrumentor;

impl TracingInstrumentor {
    /// Creates the instrumentor.
    pub fn new() -> Self {
        Self
    }

    /// Returns the instrumentor as a shared handle.
    pub fn boxed() -> BoxedInstrumentor {
        Arc::new(Self)
    }
}

fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

impl Instrumentor for TracingInstrumentor {
    fn track_elapsed(&self, telemetry: ElapsedTelemetry<'_>) {
        info!(
            target: TELEMETRY_TARGET,
            event_id = telemetry.event_id.code(),
            name = telemetry.name,
            elapsed_ms = millis(telemetry.elapsed),
            properties = ?telemetry.properties,
            "Elapsed"
        );
    }

    fn track_request(&self, telemetry: RequestTelemetry<'_>) {
        info!(
            target: TELEMETRY_TARGET,
            event_id = telemetry.event_id.code(),
            name = telemetry.name,
            source = telemetry.source,
            timestamp = %telemetry.timestamp,
            elapsed_ms = millis(telemetry.elapsed),
            success = telemetry.is_successful,
            properties = ?telemetry.properties,
            "Request"
        );
    }

    fn track_dependency(&self, telemetry: DependencyTelemetry<'_>) {
        info!(
            target: TELEMETRY_TARGET,
            event_id = telemetry.event_id.code(),
            dependency_type = telemetry.dependency_type,
            target_name = telemetry.target,
            name = telemetry.name,
            data = telemetry.data,
            timestamp = %telemetry.timestamp,
            elapsed_ms = millis(telemetry.elapsed),
            success = telemetry.is_successful,
            "Dependency"
        );
    }
}
