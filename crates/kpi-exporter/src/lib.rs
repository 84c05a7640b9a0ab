// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! KPI Exporter
//!
//! Turns KPI messages consumed from a streaming bus into InfluxDB points and
//! writes them in batches.
//!
//! This crate provides:
//! - YAML-based configuration of per-topic shaping rules
//! - Histogram and top-k shaping (every key becomes a field)
//! - Declared-field extraction with `number` / `string` coercion
//! - printf-style bucket key formatting (`%04d`)
//! - InfluxDB Line Protocol generation with deterministic field order
//! - An async HTTP write client and a Line Protocol writer for dry runs
//!
//! # Overview
//!
//! Consuming the bus is not done here: callers hand over a batch of raw
//! messages with their receive timestamps.
//!
//! ```text
//! raw JSON + timestamp --> PointBuilder --> BatchPoints --> WriteClient
//! ```
//!
//! Bad messages and bad entries are logged and skipped; only the final
//! write can fail a batch.

pub mod builder;
pub mod client;
pub mod config;
pub mod exporter;
pub mod keyfmt;
pub mod point;
pub mod value;

pub use builder::{PointBuilder, ProcessStats};
pub use client::{HttpWriteClient, LineProtocolWriter, WriteClient, WriteError};
pub use config::{ExporterConfig, InfluxDbConfig, ShapeMode, TopicConfig};
pub use exporter::{process_data, ExportError, Exporter};
pub use keyfmt::KeyFormat;
pub use point::{BatchPoints, BatchPointsConfig, Point, Precision};
pub use value::FieldValue;
