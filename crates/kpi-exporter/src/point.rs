// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Points, write batches and their InfluxDB Line Protocol form.
//!
//! Line Protocol format:
//! ```text
//! measurement field1=val1,field2=val2 timestamp
//! ```
//!
//! Fields are kept in a sorted map so that two batches built from the same
//! input render byte-identically. Unlike a general-purpose writer there are
//! no tags and no integer fields: the measurement is the topic and every
//! field comes from one message.
//!
//! Field keys come straight from message payloads, so they are also checked
//! with [`check_field_key`] before they reach a point: a single key the
//! store cannot parse would otherwise fail the whole batch.
//!
//! See: <https://docs.influxdata.com/influxdb/v1/write_protocols/line_protocol_reference/>

use crate::value::FieldValue;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Batch construction errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("unknown precision {0:?} (expected one of ns, us, ms, s, m, h)")]
    UnknownPrecision(String),
}

/// Field keys that cannot be written even when escaped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldKeyError {
    #[error("field key is empty")]
    Empty,

    #[error("field key {0:?} ends with a backslash")]
    TrailingBackslash(String),
}

/// Check that `key` survives Line Protocol escaping.
///
/// A trailing backslash would escape the `=` that follows the key.
pub fn check_field_key(key: &str) -> Result<(), FieldKeyError> {
    if key.is_empty() {
        return Err(FieldKeyError::Empty);
    }
    if key.ends_with('\\') {
        return Err(FieldKeyError::TrailingBackslash(key.to_string()));
    }
    Ok(())
}

/// Timestamp precision of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    #[default]
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
}

impl Precision {
    /// Query parameter value understood by the InfluxDB write endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::Nanoseconds => "ns",
            Precision::Microseconds => "us",
            Precision::Milliseconds => "ms",
            Precision::Seconds => "s",
            Precision::Minutes => "m",
            Precision::Hours => "h",
        }
    }

    fn nanos_per_unit(&self) -> i64 {
        match self {
            Precision::Nanoseconds => 1,
            Precision::Microseconds => 1_000,
            Precision::Milliseconds => 1_000_000,
            Precision::Seconds => 1_000_000_000,
            Precision::Minutes => 60 * 1_000_000_000,
            Precision::Hours => 3_600 * 1_000_000_000,
        }
    }

    /// Truncate a nanosecond timestamp to this precision.
    pub fn scale(&self, timestamp_ns: i64) -> i64 {
        timestamp_ns.div_euclid(self.nanos_per_unit())
    }
}

impl FromStr for Precision {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "n" | "ns" => Ok(Precision::Nanoseconds),
            "u" | "us" => Ok(Precision::Microseconds),
            "ms" => Ok(Precision::Milliseconds),
            "s" => Ok(Precision::Seconds),
            "m" => Ok(Precision::Minutes),
            "h" => Ok(Precision::Hours),
            other => Err(BatchError::UnknownPrecision(other.to_string())),
        }
    }
}

/// Parameters a write client hands out to build its batches.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatchPointsConfig {
    /// Target database.
    pub database: String,
    /// Retention policy. Empty = database default.
    #[serde(default)]
    pub retention_policy: String,
    /// Timestamp precision name (`ns`, `us`, `ms`, `s`, `m`, `h`). Empty = `ns`.
    #[serde(default)]
    pub precision: String,
}

/// One timestamped row: measurement, fields, time.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    fields: BTreeMap<String, FieldValue>,
    timestamp_ns: i64,
}

impl Point {
    /// Create a point with no fields yet.
    pub fn new(measurement: impl Into<String>, timestamp_ns: i64) -> Self {
        Self {
            measurement: measurement.into(),
            fields: BTreeMap::new(),
            timestamp_ns,
        }
    }

    /// Set a field, returning the value it replaced.
    pub fn add_field(&mut self, key: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        self.fields.insert(key.into(), value)
    }

    pub fn measurement(&self) -> &str {
        &self.measurement
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn timestamp_ns(&self) -> i64 {
        self.timestamp_ns
    }

    pub fn has_fields(&self) -> bool {
        !self.fields.is_empty()
    }

    /// Render with the timestamp expressed in `precision` units.
    pub fn to_line_protocol(&self, precision: Precision) -> String {
        let mut line = escape_measurement(&self.measurement);

        // Space separator before fields
        line.push(' ');

        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&escape_field_key(key));
            line.push('=');
            line.push_str(&value.to_line_protocol());
        }

        // Space separator before timestamp
        line.push(' ');
        line.push_str(&precision.scale(self.timestamp_ns).to_string());

        line
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_line_protocol(Precision::Nanoseconds))
    }
}

/// An ordered set of points destined for a single write.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchPoints {
    config: BatchPointsConfig,
    precision: Precision,
    points: Vec<Point>,
}

impl BatchPoints {
    /// Create an empty batch. Fails on an unknown precision name.
    pub fn new(config: BatchPointsConfig) -> Result<Self, BatchError> {
        let precision = config.precision.parse()?;
        Ok(Self {
            config,
            precision,
            points: Vec::new(),
        })
    }

    pub fn add_point(&mut self, point: Point) {
        self.points.push(point);
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn database(&self) -> &str {
        &self.config.database
    }

    pub fn retention_policy(&self) -> &str {
        &self.config.retention_policy
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Newline-separated Line Protocol body for the whole batch.
    pub fn to_line_protocol(&self) -> String {
        let mut body = String::new();
        for point in &self.points {
            body.push_str(&point.to_line_protocol(self.precision));
            body.push('\n');
        }
        body
    }
}

/// Measurement names escape commas and spaces; control characters are
/// written as `\n`, `\r`, `\t` so a name never breaks the line.
fn escape_measurement(s: &str) -> String {
    escape_control(s).replace(',', "\\,").replace(' ', "\\ ")
}

/// Field keys additionally escape `=`.
fn escape_field_key(s: &str) -> String {
    escape_control(s)
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

fn escape_control(s: &str) -> String {
    s.replace('\n', "\\n")
        .replace('\r', "\\r")
        .replace('\t', "\\t")
}
