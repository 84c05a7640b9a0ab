// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! KPI Exporter CLI
//!
//! Replays newline-delimited KPI messages into InfluxDB.
//!
//! # Usage
//!
//! ```bash
//! # Write an example configuration
//! kpi-exporter gen-config --output kpi-exporter.yaml
//!
//! # Check a configuration
//! kpi-exporter validate --config kpi-exporter.yaml
//!
//! # Ingest messages for one topic from stdin
//! consumer | kpi-exporter ingest --config kpi-exporter.yaml --topic request-latency
//!
//! # Print the Line Protocol instead of writing it
//! kpi-exporter ingest --config kpi-exporter.yaml --topic top-endpoints \
//!     --input dump.ndjson --dry-run
//! ```

use chrono::Utc;
use clap::{Parser, Subcommand};
use kpi_exporter::{
    ExportError, Exporter, ExporterConfig, HttpWriteClient, InfluxDbConfig, LineProtocolWriter,
    ProcessStats, TopicConfig, WriteClient,
};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

type InputLines = Lines<BufReader<Box<dyn AsyncRead + Unpin + Send>>>;

/// KPI Exporter
#[derive(Parser, Debug)]
#[command(name = "kpi-exporter")]
#[command(about = "Shape KPI messages into InfluxDB points and write them in batches")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "kpi-exporter.yaml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Ingest newline-delimited messages for one topic
    Ingest(IngestArgs),
}

#[derive(clap::Args, Debug)]
struct IngestArgs {
    /// Configuration file path
    #[arg(short, long)]
    config: PathBuf,

    /// Topic the messages belong to
    #[arg(short, long)]
    topic: String,

    /// Input file (stdin if omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Messages per write
    #[arg(long, default_value = "1000")]
    batch_size: usize,

    /// Give up on a write after this many seconds (0 = no limit)
    #[arg(long, default_value = "0")]
    write_timeout: u64,

    /// Override the InfluxDB server ("host:port" or "user:pass@host:port")
    #[arg(long)]
    influxdb: Option<String>,

    /// Print Line Protocol to stdout instead of writing to InfluxDB
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Default)]
struct IngestSummary {
    stats: ProcessStats,
    batches_written: u64,
    batches_failed: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Commands::GenConfig { output } => cmd_gen_config(output),
        Commands::Validate { config } => cmd_validate(config),
        Commands::Ingest(ingest) => cmd_ingest(ingest).await,
    }
}

fn cmd_gen_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let yaml = ExporterConfig::example().to_yaml()?;

    // Add comments
    let content = format!(
        r#"# KPI Exporter Configuration
# Generated by kpi-exporter gen-config
#
# Topic types: histogram, top-k, or omit `type` and declare `fields`
# (entry key -> number | string).

{}"#,
        yaml
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    match ExporterConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!(
                "InfluxDB: {} (database {}, precision {})",
                config.influxdb.url, config.influxdb.database, config.influxdb.precision
            );
            println!("Topics: {}", config.topics.len());
            for (i, topic) in config.topics.iter().enumerate() {
                let shape = if topic.shape.is_whole_message() {
                    topic.shape.as_str().to_string()
                } else {
                    format!("{} declared fields", topic.fields.len())
                };
                println!(
                    "  [{}] {} ({}){}",
                    i,
                    topic.topic,
                    shape,
                    match &topic.key_format {
                        Some(format) => format!(" keys {}", format),
                        None => String::new(),
                    }
                );
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

async fn cmd_ingest(args: IngestArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.batch_size == 0 {
        return Err("--batch-size must be at least 1".into());
    }

    let config = ExporterConfig::from_file(&args.config)?;
    let topic = config
        .topic(&args.topic)
        .ok_or_else(|| format!("topic \"{}\" is not configured", args.topic))?
        .clone();

    let influxdb = match &args.influxdb {
        Some(connect) => InfluxDbConfig {
            retention_policy: config.influxdb.retention_policy.clone(),
            precision: config.influxdb.precision.clone(),
            timeout_ms: config.influxdb.timeout_ms,
            ..InfluxDbConfig::from_connect_string(connect, config.influxdb.database.clone())?
        },
        None => config.influxdb.clone(),
    };

    let input: Box<dyn AsyncRead + Unpin + Send> = match &args.input {
        Some(path) => Box::new(tokio::fs::File::open(path).await?),
        None => Box::new(tokio::io::stdin()),
    };
    let mut lines = BufReader::new(input).lines();

    // Ctrl+C cancels the in-flight batch and stops reading
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nShutting down...");
            on_signal.cancel();
        }
    });

    let summary = if args.dry_run {
        let client = LineProtocolWriter::new(std::io::stdout(), influxdb.batch_config());
        run_ingest(Exporter::new(client), &topic, &mut lines, &args, &cancel).await?
    } else {
        tracing::info!(url = %influxdb.url, database = %influxdb.database, "writing to InfluxDB");
        let client = HttpWriteClient::new(influxdb)?;
        run_ingest(Exporter::new(client), &topic, &mut lines, &args, &cancel).await?
    };

    eprintln!();
    eprintln!("--- Ingest Statistics ({}) ---", topic.topic);
    eprintln!(
        "  {} messages, {} points, {} messages skipped, {} fields skipped",
        summary.stats.messages,
        summary.stats.points,
        summary.stats.messages_skipped,
        summary.stats.fields_skipped
    );
    eprintln!(
        "  {} batches written, {} batches failed",
        summary.batches_written, summary.batches_failed
    );

    Ok(())
}

async fn run_ingest<C: WriteClient>(
    exporter: Exporter<C>,
    topic: &TopicConfig,
    lines: &mut InputLines,
    args: &IngestArgs,
    cancel: &CancellationToken,
) -> Result<IngestSummary, Box<dyn std::error::Error>> {
    let mut summary = IngestSummary::default();

    loop {
        let mut messages = Vec::with_capacity(args.batch_size);
        let mut timestamps = Vec::with_capacity(args.batch_size);

        while messages.len() < args.batch_size {
            let line = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                line = lines.next_line() => line?,
            };
            // EOF or Ctrl+C
            let Some(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            timestamps.push(Utc::now());
            messages.push(line);
        }

        if cancel.is_cancelled() {
            if !messages.is_empty() {
                tracing::warn!("discarding {} unsent messages", messages.len());
            }
            break;
        }
        if messages.is_empty() {
            break;
        }
        let eof = messages.len() < args.batch_size;

        let batch_cancel = cancel.child_token();
        let deadline = (args.write_timeout > 0).then(|| {
            let token = batch_cancel.clone();
            let timeout = Duration::from_secs(args.write_timeout);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                token.cancel();
            })
        });

        let result = exporter
            .process(&batch_cancel, topic, &messages, &timestamps)
            .await;
        if let Some(deadline) = deadline {
            deadline.abort();
        }

        match result {
            Ok(stats) => {
                summary.stats.merge(&stats);
                summary.batches_written += 1;
            }
            Err(ExportError::Cancelled) if cancel.is_cancelled() => break,
            Err(e) => {
                tracing::error!(
                    topic = %topic.topic,
                    "batch of {} messages lost: {}",
                    messages.len(),
                    e
                );
                summary.batches_failed += 1;
            }
        }

        if eof {
            break;
        }
    }

    Ok(summary)
}
