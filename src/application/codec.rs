use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;

use crate::domain::errors::PipelineError;

/// Converts payloads to and from their wire encoding
pub trait Codec<T>: Send + Sync {
    fn encode(&self, value: &T) -> Result<Vec<u8>, PipelineError>;
    fn decode(&self, bytes: &[u8]) -> Result<T, PipelineError>;
}

/// UTF-8 JSON codec. Unknown fields are ignored on decode; missing required
/// fields are an error unless the payload type supplies a default.
pub struct JsonCodec<T> {
    _payload: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _payload: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Codec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn encode(&self, value: &T) -> Result<Vec<u8>, PipelineError> {
        serde_json::to_vec(value).map_err(PipelineError::Serialization)
    }

    fn decode(&self, bytes: &[u8]) -> Result<T, PipelineError> {
        serde_json::from_slice(bytes).map_err(PipelineError::Deserialization)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Person;
    use chrono::{TimeZone, Utc};

    fn codec() -> JsonCodec<Person> {
        JsonCodec::new()
    }

    #[test]
    fn person_round_trips() {
        let person = Person::new("Roignant", "Cédric");
        let bytes = codec().encode(&person).unwrap();
        assert_eq!(codec().decode(&bytes).unwrap(), person);
    }

    #[test]
    fn wire_format_uses_date_field() {
        let when = Utc.with_ymd_and_hms(2018, 3, 1, 12, 30, 0).unwrap();
        let person = Person::new("Roignant", "Cedric").with_created_at(when);
        let json: serde_json::Value =
            serde_json::from_slice(&codec().encode(&person).unwrap()).unwrap();

        assert_eq!(json["name"], "Roignant");
        assert_eq!(json["lastname"], "Cedric");
        assert_eq!(json["date"], "2018-03-01T12:30:00Z");
    }

    #[test]
    fn millisecond_precision_survives() {
        let when = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let person = Person::new("a", "b").with_created_at(when);
        let decoded = codec().decode(&codec().encode(&person).unwrap()).unwrap();
        assert_eq!(decoded.created_at.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let bytes = br#"{"name":"Ada","lastname":"Lovelace","date":"2020-01-01T00:00:00Z","age":36}"#;
        let person = codec().decode(bytes).unwrap();
        assert_eq!(person.name, "Ada");
    }

    #[test]
    fn missing_date_defaults_to_now() {
        let before = Utc::now().timestamp_millis();
        let person = codec()
            .decode(br#"{"name":"Roignant","lastname":"Cedric"}"#)
            .unwrap();
        let after = Utc::now().timestamp_millis();

        assert_eq!(person.lastname, "Cedric");
        let stamped = person.created_at.timestamp_millis();
        assert!(before <= stamped && stamped <= after);
        assert_eq!(person.created_at.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[test]
    fn missing_lastname_fails_to_decode() {
        let err = codec()
            .decode(br#"{"name":"Ada","date":"2020-01-01T00:00:00Z"}"#)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Deserialization(_)));
    }

    #[test]
    fn garbage_fails_to_decode() {
        let err = codec().decode(b"\x00\x01not json").unwrap_err();
        assert!(matches!(err, PipelineError::Deserialization(_)));
    }
}
