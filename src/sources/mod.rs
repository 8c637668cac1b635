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

//! Metric sources and the consumer contract they feed
//!
//! Anything that accepts a batch of metric points implements
//! [`MetricsConsumer`]; sources decode external input into batches and hand
//! them to a consumer.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::MetricPoint;

/// Trait for anything that accepts batches of metric points
#[async_trait]
pub trait MetricsConsumer: Send + Sync {
    /// Consume one batch, failing the whole call if the batch was not accepted
    async fn consume_metrics(&self, batch: Vec<MetricPoint>) -> Result<()>;
}

const DEFAULT_BATCH_SIZE: usize = 100;

/// Totals reported when a source reaches the end of its input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceSummary {
    /// Non-blank lines read from the input
    pub lines_read: u64,

    /// Lines that did not decode as a metric point
    pub lines_skipped: u64,

    /// Batches the consumer accepted
    pub batches_sent: u64,

    /// Batches the consumer rejected
    pub batches_failed: u64,
}

/// Reads newline-delimited JSON metric points and forwards them in batches
///
/// Lines that fail to decode are logged and skipped; a batch the consumer
/// rejects is logged and the source moves on.
pub struct JsonLinesSource {
    name: String,
    batch_size: usize,
    consumer: Arc<dyn MetricsConsumer>,
}

impl JsonLinesSource {
    pub fn new(name: impl Into<String>, consumer: Arc<dyn MetricsConsumer>) -> Self {
        Self {
            name: name.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            consumer,
        }
    }

    /// Set the maximum number of points per forwarded batch
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read until end of input
    pub async fn run<R>(&self, reader: R) -> std::io::Result<SourceSummary>
    where
        R: AsyncBufRead + Unpin + Send,
    {
        let mut lines = reader.lines();
        let mut summary = SourceSummary::default();
        let mut batch = Vec::with_capacity(self.batch_size);

        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            summary.lines_read += 1;

            match serde_json::from_str::<MetricPoint>(line) {
                Ok(point) => batch.push(point),
                Err(e) => {
                    summary.lines_skipped += 1;
                    warn!(source = %self.name, error = %e, "Skipping undecodable metric line.");
                    continue;
                }
            }

            if batch.len() >= self.batch_size {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(self.batch_size));
                self.forward(full, &mut summary).await;
            }
        }

        if !batch.is_empty() {
            self.forward(batch, &mut summary).await;
        }

        debug!(source = %self.name, ?summary, "Reached end of input.");
        Ok(summary)
    }

    async fn forward(&self, batch: Vec<MetricPoint>, summary: &mut SourceSummary) {
        let points = batch.len();
        match self.consumer.consume_metrics(batch).await {
            Ok(()) => summary.batches_sent += 1,
            Err(e) => {
                summary.batches_failed += 1;
                warn!(source = %self.name, points, error = %e, "Consumer rejected metric batch.");
            }
        }
    }
}
