//! Numeric event ids attached to log records and telemetry.

/// Stable identifiers for pipeline log events.
///
/// Ids are grouped by component: `11xxxx` host, `12xxxx` listener, `13xxxx` processor,
/// `14xxxx` handler, `15xxxx` serialiser, `16xxxx` outbound gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum EventId {
    HostStarted = 110_001,
    HostFinished = 110_002,
    ListenerException = 120_000,
    ListenerStarted = 120_001,
    ListenerFinished = 120_002,
    ListenerCancelled = 120_003,
    ListenerHandlerFinished = 120_004,
    ProcessorException = 130_000,
    ProcessorCancelled = 130_003,
    ProcessorDispatcherMissingType = 131_000,
    HandlerException = 140_000,
    HandlerMeasuredElapsed = 140_004,
    SerialiserException = 150_000,
    OutboundGatewayException = 160_000,
    OutboundGatewaySentSingle = 160_001,
    OutboundGatewaySentMultiple = 160_002,
    OutboundGatewayMeasuredElapsedSingle = 160_003,
    OutboundGatewayMeasuredElapsedMultiple = 160_004,
}

impl EventId {
    /// Returns the numeric id.
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_component_groups() {
        assert_eq!(EventId::HostStarted.code() / 10_000, 11);
        assert_eq!(EventId::ListenerException.code() / 10_000, 12);
        assert_eq!(EventId::ProcessorException.code() / 10_000, 13);
        assert_eq!(EventId::HandlerException.code() / 10_000, 14);
        assert_eq!(EventId::HandlerMeasuredElapsed.to_string(), "140004");
    }
}
