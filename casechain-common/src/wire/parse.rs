use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::utils::time::parse_timestamp;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("expected a JSON object")]
    NotAnObject,

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` has the wrong type, expected {expected}")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field `{field}` is invalid: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Typed decoding from a JSON value.
pub trait FromWire: Sized {
    fn from_wire(value: &Value) -> Result<Self, ParseError>;
}

/// Borrowed view over a JSON object with typed, fallible accessors.
/// `null` counts as missing.
#[derive(Debug, Clone, Copy)]
pub struct Fields<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    pub fn of(value: &'a Value) -> Result<Self, ParseError> {
        value
            .as_object()
            .map(|map| Self { map })
            .ok_or(ParseError::NotAnObject)
    }

    fn get(&self, field: &'static str) -> Result<&'a Value, ParseError> {
        match self.map.get(field) {
            None | Some(Value::Null) => Err(ParseError::MissingField(field)),
            Some(value) => Ok(value),
        }
    }

    pub fn has(&self, field: &str) -> bool {
        !matches!(self.map.get(field), None | Some(Value::Null))
    }

    pub fn string(&self, field: &'static str) -> Result<String, ParseError> {
        self.get(field)?
            .as_str()
            .map(str::to_owned)
            .ok_or(ParseError::TypeMismatch { field, expected: "string" })
    }

    pub fn u64(&self, field: &'static str) -> Result<u64, ParseError> {
        self.get(field)?
            .as_u64()
            .ok_or(ParseError::TypeMismatch { field, expected: "unsigned integer" })
    }

    pub fn u16(&self, field: &'static str) -> Result<u16, ParseError> {
        let raw = self.u64(field)?;
        u16::try_from(raw).map_err(|_| ParseError::InvalidValue {
            field,
            reason: format!("{raw} does not fit in 16 bits"),
        })
    }

    /// Accepts `0`/`1` or a JSON boolean.
    pub fn flag(&self, field: &'static str) -> Result<bool, ParseError> {
        match self.get(field)? {
            Value::Bool(b) => Ok(*b),
            Value::Number(n) => match n.as_u64() {
                Some(0) => Ok(false),
                Some(1) => Ok(true),
                _ => Err(ParseError::InvalidValue {
                    field,
                    reason: format!("expected 0 or 1, got {n}"),
                }),
            },
            _ => Err(ParseError::TypeMismatch { field, expected: "0, 1 or boolean" }),
        }
    }

    pub fn timestamp(&self, field: &'static str) -> Result<DateTime<Utc>, ParseError> {
        let raw = self.string(field)?;
        parse_timestamp(&raw).ok_or_else(|| ParseError::InvalidValue {
            field,
            reason: format!("unparseable timestamp `{raw}`"),
        })
    }

    pub fn array(&self, field: &'static str) -> Result<&'a [Value], ParseError> {
        self.get(field)?
            .as_array()
            .map(Vec::as_slice)
            .ok_or(ParseError::TypeMismatch { field, expected: "array" })
    }

    pub fn parsed<T>(&self, field: &'static str) -> Result<T, ParseError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.string(field)?;
        raw.parse::<T>().map_err(|e| ParseError::InvalidValue {
            field,
            reason: e.to_string(),
        })
    }
}

/// Result of decoding a batch: the well-formed elements plus one error per
/// dropped element.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    pub items: Vec<T>,
    pub errors: Vec<ParseError>,
}

impl<T> Batch<T> {
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}

impl<T> Default for Batch<T> {
    fn default() -> Self {
        Self { items: Vec::new(), errors: Vec::new() }
    }
}

/// Decodes every element independently; malformed elements are dropped.
pub fn decode_batch<T: FromWire>(values: &[Value]) -> Batch<T> {
    let mut batch = Batch::default();
    for value in values {
        match T::from_wire(value) {
            Ok(item) => batch.items.push(item),
            Err(e) => batch.errors.push(e),
        }
    }
    batch
}
