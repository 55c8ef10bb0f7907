//! Payload serialisation.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::error;

use crate::error::{SerialisationError, SerialisationResult};
use crate::events::EventId;
use crate::message::WireMessage;

/// Converts typed payloads to body bytes and back.
pub trait MessageSerialiser: Send + Sync + 'static {
    /// Encodes a payload.
    fn serialise<T: Serialize>(&self, payload: &T) -> SerialisationResult<Vec<u8>>;

    /// Decodes a message body.
    ///
    /// `Ok(None)` is the recognised "no value" case, distinct from a
    /// malformed body.
    fn deserialise<T: DeserializeOwned>(
        &self,
        message: &WireMessage,
    ) -> SerialisationResult<Option<T>>;
}

/// UTF-8 JSON serialiser.
///
/// A JSON `null` body deserialises to `None`. Empty or whitespace-only bodies
/// are errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMessageSerialiser;

impl JsonMessageSerialiser {
    /// Creates a JSON serialiser.
    pub fn new() -> Self {
        Self
    }
}

impl MessageSerialiser for JsonMessageSerialiser {
    fn serialise<T: Serialize>(&self, payload: &T) -> SerialisationResult<Vec<u8>> {
        serde_json::to_vec(payload).map_err(|e| {
            let type_name = std::any::type_name::<T>();
            error!(
                event_id = EventId::SerialiserException.code(),
                type_name,
                error = %e,
                "Unhandled error serialising payload"
            );
            SerialisationError::Serialise {
                type_name,
                reason: e.to_string(),
            }
        })
    }

    fn deserialise<T: DeserializeOwned>(
        &self,
        message: &WireMessage,
    ) -> SerialisationResult<Option<T>> {
        if message.body.iter().all(u8::is_ascii_whitespace) {
            return Err(SerialisationError::EmptyBody {
                message_id: message.message_id.clone(),
            });
        }

        serde_json::from_slice::<Option<T>>(&message.body).map_err(|e| {
            let type_name = std::any::type_name::<T>();
            error!(
                event_id = EventId::SerialiserException.code(),
                type_name,
                message_id = %message.message_id,
                error = %e,
                "Unhandled error deserialising message"
            );
            SerialisationError::Deserialise {
                type_name,
                reason: e.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Greeting {
        #[serde(rename = "Id")]
        id: i32,
        #[serde(rename = "Name")]
        name: String,
    }

    fn wire(body: &[u8]) -> WireMessage {
        WireMessage::new(body.to_vec())
    }

    #[test]
    fn test_round_trip() {
        let serialiser = JsonMessageSerialiser::new();
        let greeting = Greeting {
            id: 5,
            name: "Hello world".into(),
        };

        let bytes = serialiser.serialise(&greeting).unwrap();
        let back: Option<Greeting> = serialiser.deserialise(&wire(&bytes)).unwrap();

        assert_eq!(back, Some(greeting));
    }

    #[test]
    fn test_json_shape_matches_field_names() {
        let bytes = JsonMessageSerialiser
            .serialise(&Greeting {
                id: 5,
                name: "Hello world".into(),
            })
            .unwrap();
        assert_eq!(bytes, br#"{"Id":5,"Name":"Hello world"}"#);
    }

    #[test]
    fn test_null_body_is_no_value() {
        let back: Option<Greeting> = JsonMessageSerialiser.deserialise(&wire(b"null")).unwrap();
        assert!(back.is_none());
    }

    #[test]
    fn test_whitespace_body_is_error() {
        let message = wire(b"   \n");
        let err = JsonMessageSerialiser
            .deserialise::<Greeting>(&message)
            .unwrap_err();
        assert!(
            matches!(err, SerialisationError::EmptyBody { ref message_id } if *message_id == message.message_id)
        );
    }

    #[test]
    fn test_non_json_body_is_typed_error() {
        let err = JsonMessageSerialiser
            .deserialise::<Greeting>(&wire(b"<Greeting/>"))
            .unwrap_err();
        assert!(matches!(err, SerialisationError::Deserialise { .. }));
    }

    #[test]
    fn test_schema_violation_is_typed_error() {
        let err = JsonMessageSerialiser
            .deserialise::<Greeting>(&wire(br#"{"Id":"five"}"#))
            .unwrap_err();
        assert!(matches!(err, SerialisationError::Deserialise { .. }));
    }
}
