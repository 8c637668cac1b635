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

//! Timer-driven flush behaviour of the aggregation engine, run on tokio's
//! paused clock.

use async_trait::async_trait;
use chrono::Utc;
use metrics_aggregator::aggregation::AggregationEngine;
use metrics_aggregator::config::AggregatorConfig;
use metrics_aggregator::error::AggregatorError;
use metrics_aggregator::model::{AggregatedBatch, AggregatedValue, MetricPoint};
use metrics_aggregator::sinks::{MemorySink, MetricsSink};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn one_second() -> AggregatorConfig {
    AggregatorConfig::default().with_reporting_interval(Duration::from_secs(1))
}

fn request(route: &str) -> MetricPoint {
    MetricPoint::counter("requests", 1.0, Utc::now()).with_label("route", route)
}

/// Sink that takes a while to accept each batch
struct SlowSink {
    delay: Duration,
    delivered: Mutex<Vec<AggregatedBatch>>,
}

#[async_trait]
impl MetricsSink for SlowSink {
    async fn send(&self, batch: &AggregatedBatch) -> anyhow::Result<()> {
        tokio::time::sleep(self.delay).await;
        self.delivered.lock().push(batch.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// Slow sink that records deliveries completing after it was closed
#[derive(Default)]
struct ClosingSink {
    delivered: AtomicUsize,
    late: AtomicUsize,
    closed: AtomicBool,
}

#[async_trait]
impl MetricsSink for ClosingSink {
    async fn send(&self, _batch: &AggregatedBatch) -> anyhow::Result<()> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        if self.closed.load(Ordering::SeqCst) {
            self.late.fetch_add(1, Ordering::SeqCst);
        }
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "closing"
    }
}

/// Sink that rejects the first `failures` batches
struct FlakySink {
    failures: usize,
    calls: AtomicUsize,
    inner: MemorySink,
}

#[async_trait]
impl MetricsSink for FlakySink {
    async fn send(&self, batch: &AggregatedBatch) -> anyhow::Result<()> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            anyhow::bail!("downstream refused batch");
        }
        self.inner.send(batch).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

#[tokio::test(start_paused = true)]
async fn test_flushes_once_after_interval() {
    let sink = Arc::new(MemorySink::new("memory"));
    let engine = AggregationEngine::new(&one_second(), sink.clone()).unwrap();
    engine.start().await.unwrap();

    let batch: Vec<_> = (0..10)
        .map(|i| request(if i % 2 == 0 { "/a" } else { "/b" }))
        .collect();
    engine.ingest(&batch).unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;

    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].records.len(), 2);
    for record in &batches[0].records {
        assert_eq!(record.count, 5);
        assert_eq!(record.value, AggregatedValue::Sum { sum: 5.0 });
    }

    // Nothing new arrived, so the next tick emits nothing.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(sink.send_count(), 1);

    engine.stop().await.unwrap();
    assert_eq!(sink.send_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_before_first_tick_flushes_buffered_points() {
    let sink = Arc::new(MemorySink::new("memory"));
    let engine = AggregationEngine::new(&AggregatorConfig::default(), sink.clone()).unwrap();
    engine.start().await.unwrap();

    engine.ingest(&[request("/a"), request("/a"), request("/a")]).unwrap();
    engine.stop().await.unwrap();

    let batches = sink.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].records.len(), 1);
    assert_eq!(batches[0].records[0].count, 3);
    assert!(sink.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_points_after_swap_go_to_the_next_window() {
    let sink = Arc::new(MemorySink::new("memory"));
    let engine = AggregationEngine::new(&one_second(), sink.clone()).unwrap();
    engine.start().await.unwrap();

    engine.ingest(&[request("/a")]).unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    engine.ingest(&[request("/a"), request("/a")]).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let batches = sink.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].records[0].count, 1);
    assert_eq!(batches[1].records[0].count, 2);
    assert_eq!(batches[1].start_time, batches[0].end_time);

    engine.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_slow_sink_does_not_block_ingest_and_stop_waits_for_it() {
    let sink = Arc::new(SlowSink {
        delay: Duration::from_secs(5),
        delivered: Mutex::new(Vec::new()),
    });
    let engine = AggregationEngine::new(&one_second(), sink.clone()).unwrap();
    engine.start().await.unwrap();

    engine.ingest(&[request("/a")]).unwrap();

    // The first tick has fired and its delivery is still sleeping in the sink.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(sink.delivered.lock().is_empty());

    engine.ingest(&[request("/b")]).unwrap();
    assert_eq!(engine.pending_keys(), 1);

    engine.stop().await.unwrap();

    let delivered = sink.delivered.lock();
    assert_eq!(delivered.len(), 2);
    assert_eq!(delivered[0].records[0].labels.get("route").map(String::as_str), Some("/a"));
    assert_eq!(delivered[1].records[0].labels.get("route").map(String::as_str), Some("/b"));
}

#[tokio::test(start_paused = true)]
async fn test_delivery_failure_loses_window_but_engine_continues() {
    let sink = Arc::new(FlakySink {
        failures: 1,
        calls: AtomicUsize::new(0),
        inner: MemorySink::new("memory"),
    });
    let engine = AggregationEngine::new(&one_second(), sink.clone()).unwrap();
    engine.start().await.unwrap();

    engine.ingest(&[request("/lost")]).unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;

    engine.ingest(&[request("/kept")]).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let batches = sink.inner.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].records.len(), 1);
    assert_eq!(batches[0].records[0].labels.get("route").map(String::as_str), Some("/kept"));

    let stats = engine.stats();
    assert_eq!(stats.delivery_failures, 1);
    assert_eq!(stats.windows_flushed, 2);

    engine.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_reports_failed_final_delivery() {
    let sink = Arc::new(FlakySink {
        failures: 1,
        calls: AtomicUsize::new(0),
        inner: MemorySink::new("memory"),
    });
    let engine = AggregationEngine::new(&AggregatorConfig::default(), sink.clone()).unwrap();
    engine.start().await.unwrap();

    engine.ingest(&[request("/a")]).unwrap();
    let result = engine.stop().await;

    assert!(matches!(result, Err(AggregatorError::Delivery { records: 1, .. })));
    assert!(engine.stop().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_stops_flush_once() {
    let sink = Arc::new(MemorySink::new("memory"));
    let engine = AggregationEngine::new(&one_second(), sink.clone()).unwrap();
    engine.start().await.unwrap();
    engine.start().await.unwrap();

    engine.ingest(&[request("/a")]).unwrap();
    let (first, second) = tokio::join!(engine.stop(), engine.stop());

    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(sink.send_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_manual_flush_before_closing_sink() {
    let sink = Arc::new(ClosingSink::default());
    let engine = Arc::new(AggregationEngine::new(&AggregatorConfig::default(), sink.clone()).unwrap());
    engine.start().await.unwrap();

    engine.ingest(&[request("/a")]).unwrap();
    let flusher = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.flush().await })
    };

    // The manual flush has swapped its window and is sleeping in the sink.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(sink.delivered.load(Ordering::SeqCst), 0);

    engine.stop().await.unwrap();

    assert!(sink.closed.load(Ordering::SeqCst));
    assert_eq!(sink.delivered.load(Ordering::SeqCst), 1);
    assert_eq!(sink.late.load(Ordering::SeqCst), 0);
    assert_eq!(flusher.await.unwrap().unwrap(), 1);
}
