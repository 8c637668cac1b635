/*
 * Copyright 2024 ArpNetworking
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! # Metrics Aggregator
//!
//! A metrics aggregation stage for telemetry pipelines. Metric points are
//! grouped by name, kind and attributes (after dropping configured keys),
//! folded per kind, and flushed to a downstream sink once per reporting
//! interval.
//!
//! ## Features
//!
//! - **Configurable identity**: drop resource or label keys to collapse series
//! - **Per-kind folding**: counters sum, gauges keep the latest value,
//!   histograms and summaries merge bucket counts
//! - **Fixed-rate flushing**: windows are swapped on a drift-free schedule and
//!   flushed once more on shutdown
//! - **Concurrent ingestion**: per-key updates, never blocked by a slow sink
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use metrics_aggregator::{config::AggregatorConfig, sinks::LogSink, Daemon};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AggregatorConfig::from_file("aggregator.json")?;
//!     let daemon = Daemon::new(config, Arc::new(LogSink::new("log")))?;
//!     daemon.start().await?;
//!     daemon.wait_for_shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use tokio::io::AsyncBufRead;
use tokio::signal;
use tokio::sync::Notify;
use tracing::{info, warn};

pub mod aggregation;
pub mod config;
pub mod error;
pub mod factory;
pub mod model;
pub mod sinks;
pub mod sources;

use aggregation::AggregationEngine;
use config::AggregatorConfig;
use error::Result;
use factory::AggregatorFactory;
use sinks::MetricsSink;
use sources::{JsonLinesSource, MetricsConsumer, SourceSummary};

/// Host process wiring a source, the aggregation engine and a sink
pub struct Daemon {
    engine: Arc<AggregationEngine>,
    shutdown_notify: Arc<Notify>,
}

impl Daemon {
    /// Build the engine from configuration
    pub fn new(config: AggregatorConfig, sink: Arc<dyn MetricsSink>) -> Result<Self> {
        let engine = AggregatorFactory.create_metrics_processor(&config, sink)?;

        Ok(Self {
            engine: Arc::new(engine),
            shutdown_notify: Arc::new(Notify::new()),
        })
    }

    pub fn engine(&self) -> &Arc<AggregationEngine> {
        &self.engine
    }

    /// Start the engine and install signal handlers
    pub async fn start(&self) -> Result<()> {
        info!(processor = self.engine.name(), "Starting aggregator");

        self.engine.start().await?;
        self.setup_signal_handlers();

        info!("All services started successfully");
        Ok(())
    }

    /// Feed newline-delimited JSON points from `reader` into the engine
    pub async fn run_source<R>(&self, name: &str, reader: R) -> std::io::Result<SourceSummary>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let consumer: Arc<dyn MetricsConsumer> = self.engine.clone();
        let source = JsonLinesSource::new(name, consumer);
        source.run(reader).await
    }

    /// Request shutdown without waiting for a signal
    pub fn shutdown(&self) {
        self.shutdown_notify.notify_one();
    }

    /// Wait for shutdown, then flush and stop the engine
    pub async fn wait_for_shutdown(&self) -> Result<()> {
        self.shutdown_notify.notified().await;
        info!("Shutdown requested, flushing aggregated metrics...");

        self.engine.stop().await
    }

    fn setup_signal_handlers(&self) {
        let shutdown_notify = Arc::clone(&self.shutdown_notify);

        tokio::spawn(async move {
            match signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received SIGINT, initiating shutdown");
                    shutdown_notify.notify_one();
                }
                Err(err) => {
                    warn!("Failed to listen for SIGINT: {}", err);
                }
            }
        });

        #[cfg(unix)]
        {
            let shutdown_notify = Arc::clone(&self.shutdown_notify);
            tokio::spawn(async move {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        info!("Received SIGTERM, initiating shutdown");
                        shutdown_notify.notify_one();
                    }
                    Err(err) => {
                        warn!("Failed to register SIGTERM handler: {}", err);
                    }
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::MemorySink;

    #[tokio::test]
    async fn test_daemon_flushes_source_input_on_shutdown() {
        let sink = Arc::new(MemorySink::new("memory"));
        let daemon = Daemon::new(AggregatorConfig::default(), sink.clone()).unwrap();
        daemon.engine().start().await.unwrap();

        let input = concat!(
            r#"{"name": "requests", "kind": "counter", "value": 1, "timestamp": "2024-05-01T10:00:00Z"}"#,
            "\n",
            r#"{"name": "requests", "kind": "counter", "value": 2, "timestamp": "2024-05-01T10:00:01Z"}"#,
            "\n",
        );
        let summary = daemon.run_source("test", input.as_bytes()).await.unwrap();
        assert_eq!(summary.lines_read, 2);

        daemon.shutdown();
        daemon.wait_for_shutdown().await.unwrap();

        let batches = sink.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].records[0].count, 2);
    }
}
