//! User property values carried on wire messages.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// String-keyed application properties attached to a wire message.
pub type UserProperties = HashMap<String, PropertyValue>;

/// A scalar user property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    /// Boolean flag.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// UTC timestamp.
    Timestamp(DateTime<Utc>),
    /// Text.
    String(String),
}

impl PropertyValue {
    /// Returns the value as a string slice if it is textual.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            Self::String(v) => f.write_str(v),
        }
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for PropertyValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(value: DateTime<Utc>) -> Self {
        Self::Timestamp(value)
    }
}

/// Sets `key` to `value`, replacing any existing entry.
pub(crate) fn set_or_override(
    properties: &mut UserProperties,
    key: &str,
    value: impl Into<PropertyValue>,
) {
    properties.insert(key.to_string(), value.into());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_values_expose_str() {
        assert_eq!(PropertyValue::from("abc").as_str(), Some("abc"));
        assert_eq!(PropertyValue::from(5).as_str(), None);
    }

    #[test]
    fn test_untagged_json_shape() {
        let mut props = UserProperties::new();
        props.insert("count".into(), 3.into());
        props.insert("name".into(), "order".into());
        let json = serde_json::to_value(&props).unwrap();
        assert_eq!(json["count"], 3);
        assert_eq!(json["name"], "order");
    }
}
