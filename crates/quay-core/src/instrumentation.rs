//! Telemetry interface consumed by the pipeline.
//!
//! The pipeline only reports measurements; what an [`Instrumentor`] does with
//! them is up to the implementation. [`VoidInstrumentor`] discards everything.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::events::EventId;
use crate::properties::UserProperties;

/// Elapsed time of a named operation (a handler invocation).
#[derive(Debug, Clone, Copy)]
pub struct ElapsedTelemetry<'a> {
    pub event_id: EventId,
    pub elapsed: Duration,
    pub name: &'a str,
    pub properties: Option<&'a UserProperties>,
}

/// One processed inbound message.
#[derive(Debug, Clone, Copy)]
pub struct RequestTelemetry<'a> {
    pub event_id: EventId,
    pub elapsed: Duration,
    pub timestamp: DateTime<Utc>,
    pub name: &'a str,
    pub source: Option<&'a str>,
    pub is_successful: bool,
    pub properties: Option<&'a UserProperties>,
}

/// One outbound call to a dependency (a broker send).
#[derive(Debug, Clone, Copy)]
pub struct DependencyTelemetry<'a> {
    pub event_id: EventId,
    pub elapsed: Duration,
    pub timestamp: DateTime<Utc>,
    pub dependency_type: &'a str,
    pub target: &'a str,
    pub name: &'a str,
    pub data: Option<&'a str>,
    pub is_successful: bool,
    pub properties: Option<&'a UserProperties>,
}

/// Receives pipeline telemetry.
pub trait Instrumentor: Send + Sync {
    /// Records the elapsed time of a handler invocation.
    fn track_elapsed(&self, telemetry: ElapsedTelemetry<'_>);

    /// Records a processed inbound message.
    fn track_request(&self, telemetry: RequestTelemetry<'_>);

    /// Records an outbound dependency call.
    fn track_dependency(&self, telemetry: DependencyTelemetry<'_>);
}

/// Shared instrumentor handle.
pub type BoxedInstrumentor = Arc<dyn Instrumentor>;

/// An instrumentor that discards all telemetry.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoidInstrumentor;

impl Instrumentor for VoidInstrumentor {
    fn track_elapsed(&self, _telemetry: ElapsedTelemetry<'_>) {}

    fn track_request(&self, _telemetry: RequestTelemetry<'_>) {}

    fn track_dependency(&self, _telemetry: DependencyTelemetry<'_>) {}
}

/// Returns a shared [`VoidInstrumentor`].
pub fn void_instrumentor() -> BoxedInstrumentor {
    Arc::new(VoidInstrumentor)
}
