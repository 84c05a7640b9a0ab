// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Write clients: where finished batches go.
//!
//! The exporter only needs two things from a store: the parameters to build
//! a batch with, and a single `write` call that succeeds or fails as a whole.

use crate::config::InfluxDbConfig;
use crate::point::{BatchPoints, BatchPointsConfig};
use std::future::Future;
use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Write errors.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("InfluxDB rejected the batch ({status}): {body}")]
    Status { status: u16, body: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A time-series store that accepts whole batches.
pub trait WriteClient {
    /// Parameters for constructing a batch destined for this client.
    fn batch_config(&self) -> BatchPointsConfig;

    /// Persist the batch. Either all points are accepted or the call fails.
    fn write(&self, batch: &BatchPoints) -> impl Future<Output = Result<(), WriteError>> + Send;
}

/// InfluxDB 1.x HTTP `/write` client.
pub struct HttpWriteClient {
    http: reqwest::Client,
    config: InfluxDbConfig,
    write_url: String,
}

impl HttpWriteClient {
    /// Create a client for the configured server.
    pub fn new(config: InfluxDbConfig) -> Result<Self, WriteError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        let write_url = format!("{}/write", config.url.trim_end_matches('/'));

        Ok(Self {
            http,
            config,
            write_url,
        })
    }

    pub fn config(&self) -> &InfluxDbConfig {
        &self.config
    }
}

impl WriteClient for HttpWriteClient {
    fn batch_config(&self) -> BatchPointsConfig {
        self.config.batch_config()
    }

    async fn write(&self, batch: &BatchPoints) -> Result<(), WriteError> {
        if batch.is_empty() {
            tracing::debug!(database = %batch.database(), "empty batch, nothing to send");
            return Ok(());
        }

        let mut query = vec![
            ("db", batch.database()),
            ("precision", batch.precision().as_str()),
        ];
        if !batch.retention_policy().is_empty() {
            query.push(("rp", batch.retention_policy()));
        }

        let mut request = self
            .http
            .post(&self.write_url)
            .query(&query)
            .body(batch.to_line_protocol());
        if let Some(user) = &self.config.username {
            request = request.basic_auth(user, self.config.password.as_ref());
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            tracing::debug!(points = batch.len(), database = %batch.database(), "batch written");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(WriteError::Status {
            status: status.as_u16(),
            body: body.trim().to_string(),
        })
    }
}

/// Writes batches as Line Protocol text to any `io::Write`.
///
/// Used for dry runs (stdout) and for capturing output in tests.
pub struct LineProtocolWriter<W> {
    out: Mutex<W>,
    batch_config: BatchPointsConfig,
}

impl<W: Write + Send> LineProtocolWriter<W> {
    /// Create a writer that builds batches with `batch_config`.
    pub fn new(out: W, batch_config: BatchPointsConfig) -> Self {
        Self {
            out: Mutex::new(out),
            batch_config,
        }
    }

    /// Recover the underlying writer.
    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

impl<W: Write + Send> WriteClient for LineProtocolWriter<W> {
    fn batch_config(&self) -> BatchPointsConfig {
        self.batch_config.clone()
    }

    async fn write(&self, batch: &BatchPoints) -> Result<(), WriteError> {
        let mut out = self.out.lock().unwrap_or_else(|e| e.into_inner());
        out.write_all(batch.to_line_protocol().as_bytes())?;
        out.flush()?;
        Ok(())
    }
}
