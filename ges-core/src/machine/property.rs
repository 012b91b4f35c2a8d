//! Typed, named values describing a machine's settings and states.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use thiserror::Error as ThisError;

/// A value of one of the types a machine can report.
///
/// Serializes as `{"type": "<kind>", "value": <value>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Value {
    Uint8(u8),
    Uint16(u16),
    Uint32(u32),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Boolean(bool),
    Float(f64),
    String(String),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        self.into()
    }

    /// Get the contained `u32`.
    pub fn to_u32(&self) -> Option<u32> {
        match self {
            Self::Uint32(value) => Some(*value),
            _ => None,
        }
    }

    /// Get the contained `bool`.
    pub fn to_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    /// Get the contained `f64`.
    pub fn to_float(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            _ => None,
        }
    }

    /// Get the contained string.
    pub fn to_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    /// Widens any numeric value to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Uint8(value) => Some(value.into()),
            Self::Uint16(value) => Some(value.into()),
            Self::Uint32(value) => Some(value.into()),
            Self::Int8(value) => Some(value.into()),
            Self::Int16(value) => Some(value.into()),
            Self::Int32(value) => Some(value.into()),
            Self::Float(value) => Some(value),
            Self::Boolean(_) | Self::String(_) => None,
        }
    }

    /// Get the contained `bool`.
    pub fn ok_bool(&self) -> Result<bool, PropertyError> {
        self.to_bool().ok_or_else(|| self.wrong_kind(ValueKind::Boolean))
    }

    /// Get the contained `f64`.
    pub fn ok_float(&self) -> Result<f64, PropertyError> {
        self.to_float().ok_or_else(|| self.wrong_kind(ValueKind::Float))
    }

    /// Get the contained string.
    pub fn ok_str(&self) -> Result<&str, PropertyError> {
        self.to_str().ok_or_else(|| self.wrong_kind(ValueKind::String))
    }

    fn wrong_kind(&self, expected: ValueKind) -> PropertyError {
        PropertyError::WrongKind {
            expected,
            actual: self.kind(),
        }
    }
}

impl From<u8> for Value {
    fn from(value: u8) -> Self {
        Self::Uint8(value)
    }
}

impl From<u16> for Value {
    fn from(value: u16) -> Self {
        Self::Uint16(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Uint32(value)
    }
}

impl From<i8> for Value {
    fn from(value: i8) -> Self {
        Self::Int8(value)
    }
}

impl From<i16> for Value {
    fn from(value: i16) -> Self {
        Self::Int16(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int32(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl TryFrom<Value> for bool {
    type Error = PropertyError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.ok_bool()
    }
}

impl TryFrom<Value> for f64 {
    type Error = PropertyError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.ok_float()
    }
}

impl TryFrom<Value> for String {
    type Error = PropertyError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::String(value) => Ok(value),
            other => Err(other.wrong_kind(ValueKind::String)),
        }
    }
}

/// Represents a variant of [`Value`], minus the contained value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Uint8,
    Uint16,
    Uint32,
    Int8,
    Int16,
    Int32,
    Boolean,
    Float,
    String,
}

impl From<&Value> for ValueKind {
    fn from(value: &Value) -> Self {
        match value {
            Value::Uint8(_) => Self::Uint8,
            Value::Uint16(_) => Self::Uint16,
            Value::Uint32(_) => Self::Uint32,
            Value::Int8(_) => Self::Int8,
            Value::Int16(_) => Self::Int16,
            Value::Int32(_) => Self::Int32,
            Value::Boolean(_) => Self::Boolean,
            Value::Float(_) => Self::Float,
            Value::String(_) => Self::String,
        }
    }
}

impl Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ValueKind::*;
        let s = match self {
            Uint8 => "uint8",
            Uint16 => "uint16",
            Uint32 => "uint32",
            Int8 => "int8",
            Int16 => "int16",
            Int32 => "int32",
            Boolean => "boolean",
            Float => "float",
            String => "string",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, ThisError, Clone, PartialEq, Eq)]
pub enum PropertyError {
    #[error("Expected {expected} but got {actual}")]
    WrongKind {
        expected: ValueKind,
        actual: ValueKind,
    },
    #[error("No property named '{0}'")]
    Missing(String),
    #[error("'{0}' must be greater than zero")]
    NonPositive(String),
}

/// A named, described [`Value`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub description: String,
    pub data: Value,
}

impl Property {
    pub fn new(name: impl Into<String>, description: impl Into<String>, data: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            data: data.into(),
        }
    }
}

/// An ordered list of properties with unique names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(Vec<Property>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `property`, replacing any property with the same name in
    /// place. Returns the replaced property.
    pub fn save(&mut self, property: Property) -> Option<Property> {
        match self.0.iter_mut().find(|existing| existing.name == property.name) {
            Some(existing) => Some(std::mem::replace(existing, property)),
            None => {
                self.0.push(property);
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<&Property, PropertyError> {
        self.0
            .iter()
            .find(|property| property.name == name)
            .ok_or_else(|| PropertyError::Missing(name.to_string()))
    }

    pub fn value(&self, name: &str) -> Result<&Value, PropertyError> {
        self.get(name).map(|property| &property.data)
    }

    /// Replaces the value of an existing property, keeping its description.
    /// The new value must be of the same kind as the old one.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), PropertyError> {
        let value = value.into();
        let property = self
            .0
            .iter_mut()
            .find(|property| property.name == name)
            .ok_or_else(|| PropertyError::Missing(name.to_string()))?;
        if property.data.kind() != value.kind() {
            return Err(PropertyError::WrongKind {
                expected: property.data.kind(),
                actual: value.kind(),
            });
        }
        property.data = value;
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Property> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn save_replaces_in_place() {
        let mut properties = Properties::new();
        properties.save(Property::new("a", "first", 1u32));
        properties.save(Property::new("b", "second", true));
        let old = properties.save(Property::new("a", "first again", 2u32));
        assert_eq!(old.map(|property| property.data), Some(Value::Uint32(1)));
        let names: Vec<_> = properties.iter().map(|property| property.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert_eq!(properties.value("a"), Ok(&Value::Uint32(2)));
    }

    #[test]
    fn set_checks_kind() {
        let mut properties = Properties::new();
        properties.save(Property::new("temperature", "degrees", 73.0));
        properties.set("temperature", 71.5).unwrap();
        assert_eq!(
            properties.set("temperature", "hot"),
            Err(PropertyError::WrongKind {
                expected: ValueKind::Float,
                actual: ValueKind::String
            })
        );
        assert_eq!(
            properties.set("humidity", 0.4),
            Err(PropertyError::Missing("humidity".into()))
        );
    }

    #[test]
    fn serializes_with_type_tag() {
        let property = Property::new("heartbeat_period", "seconds", 3600u32);
        assert_eq!(
            serde_json::to_value(&property).unwrap(),
            json!({
                "name": "heartbeat_period",
                "description": "seconds",
                "data": {"type": "uint32", "value": 3600}
            })
        );
    }

    #[test]
    fn numeric_widening() {
        assert_eq!(Value::Uint16(7).as_f64(), Some(7.0));
        assert_eq!(Value::Boolean(true).as_f64(), None);
        assert_eq!(Value::from("x").ok_float(), Err(PropertyError::WrongKind {
            expected: ValueKind::Float,
            actual: ValueKind::String,
        }));
    }
}
