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

//! Metric sinks for outputting aggregated data
//!
//! Sinks receive one aggregated batch per flushed window. They are opaque to
//! the aggregator: a batch is either accepted or rejected with an error, and
//! a rejected batch is not retried.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use crate::model::AggregatedBatch;

/// Trait for all metric sinks
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Send aggregated data to this sink
    async fn send(&self, batch: &AggregatedBatch) -> Result<()>;

    /// Close the sink gracefully
    async fn close(&self) -> Result<()> {
        Ok(())
    }

    /// Get the name of this sink
    fn name(&self) -> &str;
}

/// Sink that writes every record as a JSON line through `tracing`
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl MetricsSink for LogSink {
    async fn send(&self, batch: &AggregatedBatch) -> Result<()> {
        for record in &batch.records {
            let line = serde_json::to_string(record)?;
            info!(target: "aggregated", processor = %batch.processor, "{}", line);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Sink that keeps every batch it receives in memory
pub struct MemorySink {
    name: String,
    batches: Mutex<Vec<AggregatedBatch>>,
    closed: AtomicBool,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            batches: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Copies of every batch received so far, oldest first
    pub fn batches(&self) -> Vec<AggregatedBatch> {
        self.batches.lock().clone()
    }

    /// Number of `send` calls that succeeded
    pub fn send_count(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl MetricsSink for MemorySink {
    async fn send(&self, batch: &AggregatedBatch) -> Result<()> {
        if self.is_closed() {
            anyhow::bail!("sink '{}' is closed", self.name);
        }
        self.batches.lock().push(batch.clone());
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn empty_batch() -> AggregatedBatch {
        let now = Utc::now();
        AggregatedBatch {
            processor: "aggregator".to_string(),
            start_time: now,
            end_time: now,
            period: Duration::from_secs(60),
            records: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_memory_sink_retains_batches() {
        let sink = MemorySink::new("memory");
        sink.send(&empty_batch()).await.unwrap();
        sink.send(&empty_batch()).await.unwrap();
        assert_eq!(sink.send_count(), 2);
        assert_eq!(sink.name(), "memory");
    }

    #[tokio::test]
    async fn test_memory_sink_rejects_after_close() {
        let sink = MemorySink::new("memory");
        sink.close().await.unwrap();
        assert!(sink.is_closed());
        assert!(sink.send(&empty_batch()).await.is_err());
    }

    #[tokio::test]
    async fn test_log_sink_accepts_batches() {
        let sink = LogSink::new("log");
        assert!(sink.send(&empty_batch()).await.is_ok());
    }
}
