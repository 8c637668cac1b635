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

//! Per-key aggregation state
//!
//! Counters sum, gauges keep the latest value by timestamp (later arrival wins
//! a tie), histograms and summaries merge their bucket counts positionally.

use chrono::{DateTime, Utc};

use crate::error::ShapeMismatch;
use crate::model::{AggregatedValue, Distribution, MetricKind, MetricPoint, PointValue};

/// In-progress aggregate for one grouping key
///
/// Never empty: it is created from the first point seen for its key.
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    count: u64,
    state: State,
}

#[derive(Debug, Clone, PartialEq)]
enum State {
    Counter {
        sum: f64,
    },
    Gauge {
        last: f64,
        last_timestamp: DateTime<Utc>,
        sum: f64,
        min: f64,
        max: f64,
    },
    Distribution(Distribution),
}

impl Accumulator {
    /// Create an accumulator holding a single, already validated point
    pub fn new(point: &MetricPoint) -> Self {
        let state = match (&point.value, point.kind) {
            (PointValue::Scalar(value), MetricKind::Counter) => State::Counter { sum: *value },
            (PointValue::Scalar(value), MetricKind::Gauge) => State::Gauge {
                last: *value,
                last_timestamp: point.timestamp,
                sum: *value,
                min: *value,
                max: *value,
            },
            (PointValue::Distribution(distribution), MetricKind::Histogram | MetricKind::Summary) => {
                State::Distribution(distribution.clone())
            }
            (_, kind) => unreachable!("{} point with mismatched value passed validation", kind),
        };

        Self { count: 1, state }
    }

    /// Fold another point with the same grouping key into this accumulator
    ///
    /// A bucket layout mismatch leaves the accumulator untouched. Bucket
    /// counts saturate at `u64::MAX` rather than wrapping.
    pub fn fold(&mut self, point: &MetricPoint) -> Result<(), ShapeMismatch> {
        match (&mut self.state, &point.value) {
            (State::Counter { sum }, PointValue::Scalar(value)) => {
                *sum += value;
            }
            (
                State::Gauge {
                    last,
                    last_timestamp,
                    sum,
                    min,
                    max,
                },
                PointValue::Scalar(value),
            ) => {
                if point.timestamp >= *last_timestamp {
                    *last = *value;
                    *last_timestamp = point.timestamp;
                }
                *sum += value;
                *min = f64::min(*min, *value);
                *max = f64::max(*max, *value);
            }
            (State::Distribution(existing), PointValue::Distribution(incoming)) => {
                if existing.bounds != incoming.bounds {
                    return Err(ShapeMismatch {
                        metric: point.name.clone(),
                        expected_bounds: existing.bounds.clone(),
                        actual_bounds: incoming.bounds.clone(),
                    });
                }
                for (total, added) in existing.bucket_counts.iter_mut().zip(&incoming.bucket_counts) {
                    *total = total.saturating_add(*added);
                }
                existing.count = existing.count.saturating_add(incoming.count);
                existing.sum += incoming.sum;
            }
            _ => unreachable!("kind is part of the grouping key; '{}' folded into a foreign accumulator", point.name),
        }

        self.count = self.count.saturating_add(1);
        Ok(())
    }

    /// Number of points folded in so far
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn value(&self) -> AggregatedValue {
        match &self.state {
            State::Counter { sum } => AggregatedValue::Sum { sum: *sum },
            State::Gauge {
                last,
                last_timestamp,
                sum,
                min,
                max,
            } => AggregatedValue::Gauge {
                last: *last,
                last_timestamp: *last_timestamp,
                sum: *sum,
                min: *min,
                max: *max,
            },
            State::Distribution(distribution) => AggregatedValue::Distribution(distribution.clone()),
        }
    }

    pub(crate) fn into_value(self) -> AggregatedValue {
        match self.state {
            State::Distribution(distribution) => AggregatedValue::Distribution(distribution),
            _ => self.value(),
        }
    }
}
