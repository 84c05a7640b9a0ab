// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Turns raw topic messages into points.
//!
//! A message is a flat JSON object. Depending on the topic's shaping mode
//! either every key becomes a field (histogram, top-k) or only the declared
//! keys are extracted and coerced (declared-field mode).
//!
//! Nothing here fails: a bad message costs one point, a bad entry costs one
//! field. Every such anomaly is logged through `tracing` and counted in
//! [`ProcessStats`].

use crate::config::TopicConfig;
use crate::point::{check_field_key, Point};
use crate::value::{coerce, Scalar};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Decoded message, keys in sorted order.
type Message = BTreeMap<String, serde_json::Value>;

/// Counters for one run of the builder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessStats {
    /// Messages handed to the builder.
    pub messages: u64,
    /// Points produced.
    pub points: u64,
    /// Messages that produced no point.
    pub messages_skipped: u64,
    /// Entries left out of otherwise valid points.
    pub fields_skipped: u64,
}

impl ProcessStats {
    /// Add another run's counters to this one.
    pub fn merge(&mut self, other: &ProcessStats) {
        self.messages += other.messages;
        self.points += other.points;
        self.messages_skipped += other.messages_skipped;
        self.fields_skipped += other.fields_skipped;
    }
}

/// Builds points for a single topic.
pub struct PointBuilder<'a> {
    config: &'a TopicConfig,
    stats: ProcessStats,
}

impl<'a> PointBuilder<'a> {
    /// Create a builder for the given topic rules.
    pub fn new(config: &'a TopicConfig) -> Self {
        Self {
            config,
            stats: ProcessStats::default(),
        }
    }

    /// Build the point for one message, or `None` if the message is unusable.
    pub fn build(&mut self, raw: &[u8], timestamp: DateTime<Utc>) -> Option<Point> {
        let config = self.config;
        self.stats.messages += 1;

        let message: Message = match serde_json::from_slice(raw) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    topic = %config.topic,
                    "failed to unmarshal a data point for topic \"{}\": {}: {}",
                    config.topic,
                    e,
                    String::from_utf8_lossy(raw)
                );
                self.stats.messages_skipped += 1;
                return None;
            }
        };

        let Some(timestamp_ns) = timestamp.timestamp_nanos_opt() else {
            tracing::warn!(
                topic = %config.topic,
                "timestamp {} out of range for topic \"{}\", skipping message",
                timestamp,
                config.topic
            );
            self.stats.messages_skipped += 1;
            return None;
        };

        let mut point = Point::new(config.topic.clone(), timestamp_ns);
        if config.shape.is_whole_message() {
            self.copy_entries(&message, &mut point);
        } else {
            self.extract_declared(&message, raw, &mut point);
        }

        if !point.has_fields() {
            tracing::info!(
                topic = %config.topic,
                "message for topic \"{}\" produced no fields, dropping point",
                config.topic
            );
            self.stats.messages_skipped += 1;
            return None;
        }

        self.stats.points += 1;
        Some(point)
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> ProcessStats {
        self.stats
    }

    /// Histogram / top-k: every key is a field, values copied as they are.
    fn copy_entries(&mut self, message: &Message, point: &mut Point) {
        let config = self.config;

        for (key, value) in message {
            let name = match &config.key_format {
                Some(format) => match format.render(key) {
                    Ok(name) => name,
                    Err(e) => {
                        tracing::warn!(topic = %config.topic, "{} in topic \"{}\"", e, config.topic);
                        self.stats.fields_skipped += 1;
                        continue;
                    }
                },
                None => key.clone(),
            };

            if let Err(e) = check_field_key(&name) {
                tracing::warn!(
                    topic = %config.topic,
                    "entry key {:?} in topic \"{}\" skipped: {}",
                    key,
                    config.topic,
                    e
                );
                self.stats.fields_skipped += 1;
                continue;
            }

            let Some(scalar) = Scalar::from_json(value) else {
                tracing::warn!(
                    topic = %config.topic,
                    "entry key \"{}\" in topic \"{}\" has a non-scalar value {}",
                    key,
                    config.topic,
                    value
                );
                self.stats.fields_skipped += 1;
                continue;
            };

            if point.add_field(name.as_str(), scalar.into()).is_some() {
                tracing::debug!(
                    topic = %config.topic,
                    "entry key \"{}\" overwrote field \"{}\"",
                    key,
                    name
                );
            }
        }
    }

    /// Declared-field mode: only configured keys, coerced to their declared type.
    fn extract_declared(&mut self, message: &Message, raw: &[u8], point: &mut Point) {
        let config = self.config;

        for (key, entry_type) in &config.fields {
            if let Err(e) = check_field_key(key) {
                tracing::warn!(topic = %config.topic, "declared key {:?} skipped: {}", key, e);
                self.stats.fields_skipped += 1;
                continue;
            }

            let Some(value) = message.get(key) else {
                tracing::warn!(
                    topic = %config.topic,
                    "entry key \"{}\" not found in topic \"{}\" message {}",
                    key,
                    config.topic,
                    String::from_utf8_lossy(raw)
                );
                self.stats.fields_skipped += 1;
                continue;
            };

            match coerce(entry_type, key, &config.topic, value) {
                Ok(field) => {
                    point.add_field(key.as_str(), field);
                }
                Err(e) => {
                    tracing::warn!(topic = %config.topic, "{}", e);
                    self.stats.fields_skipped += 1;
                }
            }
        }
    }
}
