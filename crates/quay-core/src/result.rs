//! The outcome of handling one message.
//!
//! A [`HandlingResult`] is produced once per message, by a handler or by the
//! processor itself, and consumed once by the listener to pick the
//! acknowledgement action:
//!
//! | Outcome | Acknowledgement |
//! |---------|-----------------|
//! | `Completed` | complete |
//! | `DeadLettered` | dead-letter with properties |
//! | `UnrecognisedMessageType` | dead-letter with properties |
//! | `Abandoned` | abandon with properties |

use std::error::Error as StdError;
use std::fmt;

use crate::properties::{PropertyValue, UserProperties, set_or_override};

/// Reserved property keys written by the pipeline.
pub mod keys {
    /// Reason a message was dead-lettered.
    pub const DEAD_LETTERED: &str = "Quay.DeadLettered";
    /// Reason a message was abandoned.
    pub const ABANDONED: &str = "Quay.Abandoned";
    /// Why a message type could not be recognised.
    pub const UNRECOGNISED_MESSAGE_TYPE: &str = "Quay.UnrecognisedMessageType";
    /// Display text of a captured error.
    pub const ERROR_MESSAGE: &str = "Quay.Error.Message";
    /// Source chain of a captured error.
    pub const ERROR_TRACE: &str = "Quay.Error.Trace";

    /// Cause tag used when the result was built from an error.
    pub const ERROR_CAUSE_TAG: &str = "Error";
}

/// The kind of outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlingOutcome {
    /// The message was handled and should be removed.
    Completed,
    /// The message must move to the dead-letter sub-queue.
    DeadLettered,
    /// The lock should be released for redelivery.
    Abandoned,
    /// The body did not contain the expected payload type.
    UnrecognisedMessageType,
}

impl fmt::Display for HandlingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "Completed"),
            Self::DeadLettered => write!(f, "DeadLettered"),
            Self::Abandoned => write!(f, "Abandoned"),
            Self::UnrecognisedMessageType => write!(f, "UnrecognisedMessageType"),
        }
    }
}

/// A captured error: its display text and source chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cause {
    /// `Display` output of the error.
    pub message: String,
    /// The error followed by each of its sources, one per line.
    pub trace: String,
}

impl Cause {
    /// Captures an error and walks its source chain.
    pub fn capture(err: &(dyn StdError + 'static)) -> Self {
        let mut trace = err.to_string();
        let mut source = err.source();
        while let Some(inner) = source {
            trace.push_str("\n  caused by: ");
            trace.push_str(&inner.to_string());
            source = inner.source();
        }

        Self {
            message: err.to_string(),
            trace,
        }
    }
}

/// The outcome of handling one message.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlingResult {
    outcome: HandlingOutcome,
    properties: UserProperties,
    cause: Option<Cause>,
}

impl HandlingResult {
    /// The message was handled successfully.
    pub fn completed(properties: Option<UserProperties>) -> Self {
        Self {
            outcome: HandlingOutcome::Completed,
            properties: properties.unwrap_or_default(),
            cause: None,
        }
    }

    /// The message should be dead-lettered for the given reason.
    pub fn dead_lettered(details: impl Into<String>, properties: Option<UserProperties>) -> Self {
        Self::tagged(
            HandlingOutcome::DeadLettered,
            keys::DEAD_LETTERED,
            details.into(),
            properties,
        )
    }

    /// The message should be dead-lettered because of `err`.
    pub fn dead_lettered_with_error(
        err: &(dyn StdError + 'static),
        properties: Option<UserProperties>,
    ) -> Self {
        Self::from_error(
            HandlingOutcome::DeadLettered,
            keys::DEAD_LETTERED,
            err,
            properties,
        )
    }

    /// The message should be abandoned for the given reason.
    pub fn abandoned(details: impl Into<String>, properties: Option<UserProperties>) -> Self {
        Self::tagged(
            HandlingOutcome::Abandoned,
            keys::ABANDONED,
            details.into(),
            properties,
        )
    }

    /// The message should be abandoned because of `err`.
    pub fn abandoned_with_error(
        err: &(dyn StdError + 'static),
        properties: Option<UserProperties>,
    ) -> Self {
        Self::from_error(HandlingOutcome::Abandoned, keys::ABANDONED, err, properties)
    }

    /// The body did not deserialise into the expected type.
    pub fn unrecognised_message_type(
        details: impl Into<String>,
        properties: Option<UserProperties>,
    ) -> Self {
        Self::tagged(
            HandlingOutcome::UnrecognisedMessageType,
            keys::UNRECOGNISED_MESSAGE_TYPE,
            details.into(),
            properties,
        )
    }

    fn tagged(
        outcome: HandlingOutcome,
        key: &str,
        details: String,
        properties: Option<UserProperties>,
    ) -> Self {
        let mut properties = properties.unwrap_or_default();
        set_or_override(&mut properties, key, details);

        Self {
            outcome,
            properties,
            cause: None,
        }
    }

    fn from_error(
        outcome: HandlingOutcome,
        key: &str,
        err: &(dyn StdError + 'static),
        properties: Option<UserProperties>,
    ) -> Self {
        let cause = Cause::capture(err);
        let mut properties = properties.unwrap_or_default();
        set_or_override(&mut properties, key, keys::ERROR_CAUSE_TAG);
        set_or_override(&mut properties, keys::ERROR_MESSAGE, cause.message.as_str());
        set_or_override(&mut properties, keys::ERROR_TRACE, cause.trace.as_str());

        Self {
            outcome,
            properties,
            cause: Some(cause),
        }
    }

    /// Returns the outcome kind.
    pub fn outcome(&self) -> HandlingOutcome {
        self.outcome
    }

    /// Returns `true` for `Completed`.
    pub fn is_completed(&self) -> bool {
        self.outcome == HandlingOutcome::Completed
    }

    /// Returns the properties to attach on abandon/dead-letter.
    pub fn properties(&self) -> &UserProperties {
        &self.properties
    }

    /// Returns a property value.
    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    /// Returns the captured error, if any.
    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }
}
