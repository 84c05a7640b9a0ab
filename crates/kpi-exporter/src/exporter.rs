// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Batch processing entry point.
//!
//! One call turns a set of messages from one topic into one batch and writes
//! it with one call to the store:
//!
//! ```text
//! raw messages + timestamps --> PointBuilder --> BatchPoints --> WriteClient::write
//! ```
//!
//! Only the write can fail the call (plus mismatched inputs and an unusable
//! batch configuration). Problems with individual messages are logged.

use crate::builder::{PointBuilder, ProcessStats};
use crate::client::{WriteClient, WriteError};
use crate::config::TopicConfig;
use crate::point::{BatchError, BatchPoints, BatchPointsConfig};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::Dispatch;

/// Errors that abort a whole batch.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("got {messages} messages but {timestamps} timestamps")]
    LengthMismatch { messages: usize, timestamps: usize },

    #[error("cannot create batch: {0}")]
    Batch(#[from] BatchError),

    #[error("write failed: {0}")]
    Write(#[from] WriteError),

    #[error("cancelled before the batch was written")]
    Cancelled,
}

/// Transform `messages` under `config` and write them as a single batch.
///
/// `messages[i]` was received at `timestamps[i]`; the slices must have the
/// same length. The write races against `cancel`: if the token fires first
/// the batch is discarded and [`ExportError::Cancelled`] returned.
///
/// Per-message anomalies go to the current `tracing` dispatcher. Use
/// [`Exporter`] to route them elsewhere.
pub async fn process_data<C, M>(
    cancel: &CancellationToken,
    config: &TopicConfig,
    client: &C,
    messages: &[M],
    timestamps: &[DateTime<Utc>],
) -> Result<ProcessStats, ExportError>
where
    C: WriteClient,
    M: AsRef<[u8]>,
{
    let (batch, stats) = build_batch(config, client.batch_config(), messages, timestamps)?;
    write_batch(cancel, client, &batch).await?;
    Ok(stats)
}

/// Build the batch for `messages` without writing it.
pub fn build_batch<M: AsRef<[u8]>>(
    config: &TopicConfig,
    batch_config: BatchPointsConfig,
    messages: &[M],
    timestamps: &[DateTime<Utc>],
) -> Result<(BatchPoints, ProcessStats), ExportError> {
    if messages.len() != timestamps.len() {
        return Err(ExportError::LengthMismatch {
            messages: messages.len(),
            timestamps: timestamps.len(),
        });
    }

    let mut batch = BatchPoints::new(batch_config)?;
    let mut builder = PointBuilder::new(config);

    for (raw, timestamp) in messages.iter().zip(timestamps) {
        if let Some(point) = builder.build(raw.as_ref(), *timestamp) {
            batch.add_point(point);
        }
    }

    let stats = builder.stats();
    tracing::debug!(
        topic = %config.topic,
        messages = stats.messages,
        points = stats.points,
        skipped = stats.messages_skipped,
        "batch built"
    );
    Ok((batch, stats))
}

async fn write_batch<C: WriteClient>(
    cancel: &CancellationToken,
    client: &C,
    batch: &BatchPoints,
) -> Result<(), ExportError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::warn!(points = batch.len(), "write cancelled, discarding batch");
            Err(ExportError::Cancelled)
        }
        result = client.write(batch) => result.map_err(ExportError::from),
    }
}

/// A write client paired with the log sink its anomalies are reported to.
pub struct Exporter<C> {
    client: C,
    dispatch: Dispatch,
}

impl<C: WriteClient> Exporter<C> {
    /// Report to the dispatcher that is current at construction time.
    pub fn new(client: C) -> Self {
        let dispatch = tracing::dispatcher::get_default(Dispatch::clone);
        Self::with_dispatch(client, dispatch)
    }

    /// Report to an explicit dispatcher.
    pub fn with_dispatch(client: C, dispatch: Dispatch) -> Self {
        Self { client, dispatch }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Same contract as [`process_data`], logging to this exporter's sink.
    pub async fn process<M: AsRef<[u8]>>(
        &self,
        cancel: &CancellationToken,
        config: &TopicConfig,
        messages: &[M],
        timestamps: &[DateTime<Utc>],
    ) -> Result<ProcessStats, ExportError> {
        let (batch, stats) = tracing::dispatcher::with_default(&self.dispatch, || {
            build_batch(config, self.client.batch_config(), messages, timestamps)
        })?;

        write_batch(cancel, &self.client, &batch)
            .with_subscriber(self.dispatch.clone())
            .await?;
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keyfmt::KeyFormat;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingClient {
        precision: String,
        batches: Mutex<Vec<String>>,
        fail: bool,
    }

    impl WriteClient for RecordingClient {
        fn batch_config(&self) -> BatchPointsConfig {
            BatchPointsConfig {
                database: "kpi".into(),
                precision: self.precision.clone(),
                ..Default::default()
            }
        }

        async fn write(&self, batch: &BatchPoints) -> Result<(), WriteError> {
            if self.fail {
                return Err(WriteError::Status {
                    status: 500,
                    body: "boom".into(),
                });
            }
            self.batches
                .lock()
                .unwrap()
                .push(batch.to_line_protocol());
            Ok(())
        }
    }

    /// Never finishes a write, counts attempts.
    #[derive(Default)]
    struct StalledClient {
        attempts: AtomicUsize,
    }

    impl WriteClient for StalledClient {
        fn batch_config(&self) -> BatchPointsConfig {
            BatchPointsConfig::default()
        }

        async fn write(&self, _batch: &BatchPoints) -> Result<(), WriteError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    fn ts(second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 5, 1, 12, 0, second).unwrap()
    }

    #[tokio::test]
    async fn test_process_data_writes_one_batch_in_order() {
        let config = TopicConfig::histogram("test-topic");
        let client = RecordingClient::default();
        let messages = [r#"{"0":1}"#, "}{", r#"{"10":2}"#];

        let stats = process_data(
            &CancellationToken::new(),
            &config,
            &client,
            &messages,
            &[ts(0), ts(1), ts(2)],
        )
        .await
        .expect("process");

        assert_eq!(stats.messages, 3);
        assert_eq!(stats.points, 2);
        assert_eq!(stats.messages_skipped, 1);

        let batches = client.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0],
            "test-topic 0=1 1556712000000000000\ntest-topic 10=2 1556712002000000000\n"
        );
    }

    #[tokio::test]
    async fn test_empty_batch_is_still_written() {
        let config = TopicConfig::declared("test-topic").field("foo", "number");
        let client = RecordingClient::default();

        process_data(&CancellationToken::new(), &config, &client, &["}{"], &[ts(0)])
            .await
            .expect("process");

        let batches = client.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert!(batches[0].is_empty());
    }

    #[tokio::test]
    async fn test_length_mismatch_is_rejected() {
        let config = TopicConfig::histogram("test-topic");
        let client = RecordingClient::default();

        let err = process_data(
            &CancellationToken::new(),
            &config,
            &client,
            &[r#"{"0":1}"#, r#"{"1":1}"#],
            &[ts(0)],
        )
        .await
        .unwrap_err();

        assert!(matches!(
            err,
            ExportError::LengthMismatch {
                messages: 2,
                timestamps: 1
            }
        ));
        assert!(client.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bad_batch_config_is_fatal() {
        let config = TopicConfig::histogram("test-topic");
        let client = RecordingClient {
            precision: "fortnight".into(),
            ..Default::default()
        };

        let err = process_data(&CancellationToken::new(), &config, &client, &[r#"{"0":1}"#], &[ts(0)])
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Batch(_)));
        assert!(client.batches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_is_returned() {
        let config = TopicConfig::histogram("test-topic");
        let client = RecordingClient {
            fail: true,
            ..Default::default()
        };

        let err = process_data(&CancellationToken::new(), &config, &client, &[r#"{"0":1}"#], &[ts(0)])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExportError::Write(WriteError::Status { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_write() {
        let config = TopicConfig::histogram("test-topic");
        let client = StalledClient::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = process_data(&cancel, &config, &client, &[r#"{"0":1}"#], &[ts(0)])
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Cancelled));
        assert_eq!(client.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_write() {
        let config = TopicConfig::histogram("test-topic");
        let client = StalledClient::default();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = process_data(&cancel, &config, &client, &[r#"{"0":1}"#], &[ts(0)])
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::Cancelled));
        assert_eq!(client.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_identical_input_gives_identical_batches() {
        let config =
            TopicConfig::histogram("test-topic").key_format(KeyFormat::parse("%04d").unwrap());
        let messages = [
            r#"{"30":1,"0":4,"200":9,"10":2}"#,
            r#"{"5":3,"1000":7}"#,
        ];
        let timestamps = [ts(0), ts(1)];

        let (first, _) =
            build_batch(&config, BatchPointsConfig::default(), &messages, &timestamps).unwrap();
        let (second, _) =
            build_batch(&config, BatchPointsConfig::default(), &messages, &timestamps).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.to_line_protocol(), second.to_line_protocol());
        assert_eq!(
            first.points()[0].to_string(),
            "test-topic 0000=4,0010=2,0030=1,0200=9 1556712000000000000"
        );
    }

    #[tokio::test]
    async fn test_exporter_uses_client_precision() {
        let config = TopicConfig::top_k("test-topic");
        let exporter = Exporter::new(RecordingClient {
            precision: "s".into(),
            ..Default::default()
        });

        exporter
            .process(&CancellationToken::new(), &config, &[br#"{"a":1}"#.to_vec()], &[ts(0)])
            .await
            .expect("process");

        let batches = exporter.client().batches.lock().unwrap();
        assert_eq!(batches[0], "test-topic a=1 1556712000\n");
    }
}
