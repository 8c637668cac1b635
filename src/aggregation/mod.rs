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

//! Time-windowed metrics aggregation engine
//!
//! Incoming points are keyed by [`KeyFilter`], folded into the active
//! [`Window`], and every reporting interval the window is swapped for a fresh
//! one and handed to the [`Emitter`].
//!
//! The active window sits behind a read/write lock. Ingestion holds the read
//! lock for a whole batch and relies on the window's sharded map for per-key
//! updates; the swap takes the write lock. A batch therefore lands entirely in
//! one window, and emission happens after the lock has been released.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::config::AggregatorConfig;
use crate::error::{AggregatorError, Result};
use crate::model::MetricPoint;
use crate::sinks::MetricsSink;
use crate::sources::MetricsConsumer;

pub mod accumulator;
pub mod emitter;
pub mod key;
mod scheduler;
pub mod window;

pub use accumulator::Accumulator;
pub use emitter::Emitter;
pub use key::KeyFilter;
pub use window::{DrainedWindow, Window};

use scheduler::Scheduler;

/// Point-in-time copy of the engine's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Points folded into a window
    pub points_ingested: u64,

    /// Batches rejected as malformed
    pub batches_rejected: u64,

    /// Points dropped for an incompatible bucket layout
    pub shape_mismatches: u64,

    /// Non-empty windows handed to the emitter
    pub windows_flushed: u64,

    /// Records accepted by the sink
    pub records_emitted: u64,

    /// Batches the sink rejected
    pub delivery_failures: u64,
}

#[derive(Default)]
struct Counters {
    points_ingested: AtomicU64,
    batches_rejected: AtomicU64,
    shape_mismatches: AtomicU64,
    windows_flushed: AtomicU64,
    records_emitted: AtomicU64,
    delivery_failures: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> EngineStats {
        EngineStats {
            points_ingested: self.points_ingested.load(Ordering::Relaxed),
            batches_rejected: self.batches_rejected.load(Ordering::Relaxed),
            shape_mismatches: self.shape_mismatches.load(Ordering::Relaxed),
            windows_flushed: self.windows_flushed.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

/// State shared between the engine handle and the flush task
pub(crate) struct Shared {
    name: String,
    reporting_interval: Duration,
    filter: KeyFilter,
    active: RwLock<Window>,
    emitter: Emitter,
    // Only written under the write lock of `active`.
    stopped: AtomicBool,
    // Held shared by every swap-and-emit; `stop` takes it exclusively before closing the sink.
    emit_gate: tokio::sync::RwLock<()>,
    counters: Counters,
}

impl Shared {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn reporting_interval(&self) -> Duration {
        self.reporting_interval
    }

    /// Install a fresh window and return the previous one if it held anything
    ///
    /// With `last` set, the engine stops accepting points in the same critical
    /// section, so nothing can slip into a window that will never be flushed.
    fn swap(&self, last: bool) -> Option<DrainedWindow> {
        let flush_time = Utc::now();
        let previous = {
            let mut active = self.active.write();
            if last {
                self.stopped.store(true, Ordering::Release);
            }
            std::mem::replace(&mut *active, Window::new(flush_time))
        };

        if previous.is_empty() {
            trace!(processor = %self.name, "Skipping flush of empty window.");
            return None;
        }

        debug!(
            processor = %self.name,
            keys = previous.len(),
            window_start = %previous.start_time(),
            "Swapped out aggregation window."
        );
        Some(previous.drain(flush_time))
    }

    pub(crate) async fn flush(&self, last: bool) -> Result<usize> {
        let _gate = self.emit_gate.read().await;
        let Some(window) = self.swap(last) else {
            return Ok(0);
        };

        self.counters.windows_flushed.fetch_add(1, Ordering::Relaxed);
        match self.emitter.emit(window).await {
            Ok(records) => {
                self.counters.records_emitted.fetch_add(records as u64, Ordering::Relaxed);
                Ok(records)
            }
            Err(e) => {
                self.counters.delivery_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }
}

enum Lifecycle {
    Idle,
    Running(Scheduler),
    Stopped,
}

/// Aggregation engine that groups metric points and flushes them periodically
pub struct AggregationEngine {
    shared: Arc<Shared>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

impl AggregationEngine {
    /// Create a new aggregation engine
    ///
    /// The configuration is validated here; nothing is ingested from an engine
    /// built on invalid settings.
    pub fn new(config: &AggregatorConfig, sink: Arc<dyn MetricsSink>) -> Result<Self> {
        config.validate()?;

        let filter = KeyFilter::new(
            config.drop_resource_keys.iter().cloned(),
            config.drop_label_keys.iter().cloned(),
        );
        let emitter = Emitter::new(config.name.clone(), config.reporting_interval, sink);

        Ok(Self {
            shared: Arc::new(Shared {
                name: config.name.clone(),
                reporting_interval: config.reporting_interval,
                filter,
                active: RwLock::new(Window::new(Utc::now())),
                emitter,
                stopped: AtomicBool::new(false),
                emit_gate: tokio::sync::RwLock::new(()),
                counters: Counters::default(),
            }),
            lifecycle: tokio::sync::Mutex::new(Lifecycle::Idle),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn reporting_interval(&self) -> Duration {
        self.shared.reporting_interval
    }

    /// Fold a batch of points into the active window
    ///
    /// The batch is validated up front and rejected as a whole if any point is
    /// malformed. Points whose bucket layout conflicts with an existing
    /// accumulator are reported together after the rest of the batch has been
    /// applied.
    pub fn ingest(&self, batch: &[MetricPoint]) -> Result<()> {
        if let Err(e) = batch.iter().try_for_each(MetricPoint::validate) {
            self.shared.counters.batches_rejected.fetch_add(1, Ordering::Relaxed);
            debug!(processor = %self.shared.name, error = %e, "Rejected metric batch.");
            return Err(e);
        }

        let keys: Vec<_> = batch.iter().map(|point| self.shared.filter.derive(point)).collect();

        let mut mismatches = Vec::new();
        {
            let window = self.shared.active.read();
            if self.shared.stopped.load(Ordering::Acquire) {
                return Err(AggregatorError::Stopped);
            }

            for (key, point) in keys.into_iter().zip(batch) {
                if let Err(mismatch) = window.insert(key, point) {
                    mismatches.push(mismatch);
                }
            }
        }

        let applied = (batch.len() - mismatches.len()) as u64;
        self.shared.counters.points_ingested.fetch_add(applied, Ordering::Relaxed);
        trace!(processor = %self.shared.name, points = applied, "Ingested metric batch.");

        if mismatches.is_empty() {
            Ok(())
        } else {
            self.shared
                .counters
                .shape_mismatches
                .fetch_add(mismatches.len() as u64, Ordering::Relaxed);
            warn!(
                processor = %self.shared.name,
                rejected = mismatches.len(),
                "Dropped points with incompatible bucket layouts."
            );
            Err(AggregatorError::ShapeMismatch(mismatches))
        }
    }

    /// Start the background flush task
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Running(_) => {
                debug!(processor = %self.shared.name, "Aggregation engine already running.");
                Ok(())
            }
            Lifecycle::Stopped => Err(AggregatorError::Stopped),
            Lifecycle::Idle => {
                {
                    // The first window starts with the scheduler, unless points already arrived.
                    let mut active = self.shared.active.write();
                    if active.is_empty() {
                        *active = Window::new(Utc::now());
                    }
                }
                *lifecycle = Lifecycle::Running(Scheduler::spawn(Arc::clone(&self.shared)));
                info!(
                    processor = %self.shared.name,
                    reporting_interval = ?self.shared.reporting_interval,
                    "Aggregation engine started."
                );
                Ok(())
            }
        }
    }

    /// Flush the active window now, outside the regular schedule
    ///
    /// Returns the number of records delivered. A concurrent `stop` waits for
    /// this delivery before closing the sink.
    pub async fn flush(&self) -> Result<usize> {
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(AggregatorError::Stopped);
        }
        self.shared.flush(false).await
    }

    /// Stop the engine, flushing whatever is still buffered
    ///
    /// Waits for an in-flight flush and the final one before returning, then
    /// closes the sink. Calling this again is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        let result = match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped) {
            Lifecycle::Stopped => return Ok(()),
            Lifecycle::Running(scheduler) => scheduler.shutdown().await,
            Lifecycle::Idle => self.shared.flush(true).await.map(|_| ()),
        };

        // Out-of-band flushes may still be delivering; let them finish first.
        let _gate = self.shared.emit_gate.write().await;

        let sink = self.shared.emitter.sink();
        if let Err(e) = sink.close().await {
            warn!(processor = %self.shared.name, sink = sink.name(), error = %e, "Failed to close sink.");
        }

        info!(processor = %self.shared.name, "Aggregation engine stopped.");
        result
    }

    /// Number of grouping keys buffered in the active window
    pub fn pending_keys(&self) -> usize {
        self.shared.active.read().len()
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.counters.snapshot()
    }
}

#[async_trait]
impl MetricsConsumer for AggregationEngine {
    async fn consume_metrics(&self, batch: Vec<MetricPoint>) -> Result<()> {
        self.ingest(&batch)
    }
}
