// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scalar values decoded from messages and their coercion into point fields.
//!
//! `FieldValue` has no integer variant: every JSON number is stored as a
//! float, so a field keeps one type across points and `42` is written as
//! `42`, never `42i`.

use std::fmt;
use thiserror::Error;

/// A value that can be stored in an InfluxDB field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// 64-bit floating point. Every JSON number ends up here.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Boolean value.
    Boolean(bool),
}

impl FieldValue {
    /// Format this value for InfluxDB Line Protocol.
    ///
    /// - Float: shortest representation without exponent (e.g., `42`, `0.5`)
    /// - String: quoted with double quotes, inner quotes escaped (e.g., `"hello"`)
    /// - Boolean: `true` or `false`
    pub fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Float(v) => format!("{}", v),
            FieldValue::String(v) => {
                let escaped = v.replace('\\', "\\\\").replace('"', "\\\"");
                format!("\"{}\"", escaped)
            }
            FieldValue::Boolean(v) => v.to_string(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line_protocol())
    }
}

/// A flat JSON scalar, the only value shape a message may carry.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Number(f64),
    String(String),
    Bool(bool),
}

impl Scalar {
    /// Inspect a decoded JSON value. Null, arrays and objects are not scalars.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map(Scalar::Number),
            serde_json::Value::String(s) => Some(Scalar::String(s.clone())),
            serde_json::Value::Bool(b) => Some(Scalar::Bool(*b)),
            serde_json::Value::Null
            | serde_json::Value::Array(_)
            | serde_json::Value::Object(_) => None,
        }
    }
}

impl From<Scalar> for FieldValue {
    fn from(scalar: Scalar) -> Self {
        match scalar {
            Scalar::Number(n) => FieldValue::Float(n),
            Scalar::String(s) => FieldValue::String(s),
            Scalar::Bool(b) => FieldValue::Boolean(b),
        }
    }
}

/// Declared type of a configured entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Number,
    String,
}

impl EntryType {
    /// Parse a declared type name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "number" => Some(EntryType::Number),
            "string" => Some(EntryType::String),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Number => "number",
            EntryType::String => "string",
        }
    }
}

/// Coercion failures. Each one costs a single field, never the message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoercionError {
    #[error("unknown entry type \"{entry_type}\" for entry key \"{key}\" topic \"{topic}\"")]
    UnknownEntryType {
        entry_type: String,
        key: String,
        topic: String,
    },

    #[error("entry key \"{key}\" in topic \"{topic}\" is not a {expected} (got {found})")]
    TypeMismatch {
        key: String,
        topic: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Convert a decoded JSON value into a field value of the declared type.
pub fn coerce(
    entry_type: &str,
    key: &str,
    topic: &str,
    value: &serde_json::Value,
) -> Result<FieldValue, CoercionError> {
    let expected = EntryType::parse(entry_type).ok_or_else(|| CoercionError::UnknownEntryType {
        entry_type: entry_type.to_string(),
        key: key.to_string(),
        topic: topic.to_string(),
    })?;

    match (expected, Scalar::from_json(value)) {
        (EntryType::Number, Some(Scalar::Number(n))) => Ok(FieldValue::Float(n)),
        (EntryType::String, Some(Scalar::String(s))) => Ok(FieldValue::String(s)),
        _ => Err(CoercionError::TypeMismatch {
            key: key.to_string(),
            topic: topic.to_string(),
            expected: expected.as_str(),
            found: json_kind(value),
        }),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
