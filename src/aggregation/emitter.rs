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

//! Conversion of drained windows into output batches

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use super::window::DrainedWindow;
use crate::error::{AggregatorError, Result};
use crate::model::{AggregatedBatch, AggregatedRecord};
use crate::sinks::MetricsSink;

/// Forwards drained windows to the downstream sink
///
/// Delivery is attempted once. A failed batch is reported and dropped.
pub struct Emitter {
    processor: String,
    period: Duration,
    sink: Arc<dyn MetricsSink>,
}

impl Emitter {
    pub fn new(processor: String, period: Duration, sink: Arc<dyn MetricsSink>) -> Self {
        Self {
            processor,
            period,
            sink,
        }
    }

    pub fn sink(&self) -> &Arc<dyn MetricsSink> {
        &self.sink
    }

    /// Build the output batch for a drained window
    pub fn build_batch(&self, window: DrainedWindow) -> AggregatedBatch {
        let start_time = window.start_time();
        let end_time = window.flush_time();

        let records = window
            .into_entries()
            .into_iter()
            .map(|(key, accumulator)| AggregatedRecord {
                name: key.name,
                kind: key.kind,
                resource: key.resource,
                labels: key.labels,
                count: accumulator.count(),
                value: accumulator.into_value(),
                start_time,
                timestamp: end_time,
            })
            .collect();

        AggregatedBatch {
            processor: self.processor.clone(),
            start_time,
            end_time,
            period: self.period,
            records,
        }
    }

    /// Convert the window and hand it to the sink in a single call
    ///
    /// Returns the number of records delivered.
    pub async fn emit(&self, window: DrainedWindow) -> Result<usize> {
        let batch = self.build_batch(window);
        let records = batch.len();

        match self.sink.send(&batch).await {
            Ok(()) => {
                debug!(
                    processor = %self.processor,
                    sink = self.sink.name(),
                    records,
                    "Delivered aggregated batch."
                );
                Ok(records)
            }
            Err(e) => {
                error!(
                    processor = %self.processor,
                    sink = self.sink.name(),
                    records,
                    error = %e,
                    "Failed to deliver aggregated batch."
                );
                Err(AggregatorError::delivery(self.sink.name(), records, e))
            }
        }
    }
}
