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

//! Core data model for metrics aggregation
//!
//! Defines the incoming metric points, the grouping key derived from them, and
//! the aggregated records handed to sinks.

use ahash::HashMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::error::{AggregatorError, Result};

/// Attribute set as received on a point (unordered)
pub type Attributes = HashMap<String, String>;

/// Attribute set as held by a grouping key (sorted, so equality and hashing
/// ignore the original insertion order)
pub type SortedAttributes = BTreeMap<String, String>;

/// Kind of metric, which decides how points are folded together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Monotonic counter, aggregated by summation
    Counter,
    /// Point-in-time value, aggregated by last-value-wins
    Gauge,
    /// Bucketed distribution, aggregated by positional merge
    Histogram,
    /// Pre-aggregated distribution, aggregated by positional merge
    Summary,
}

impl MetricKind {
    /// Whether points of this kind carry a [`Distribution`] payload
    pub const fn is_distribution(self) -> bool {
        matches!(self, MetricKind::Histogram | MetricKind::Summary)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Summary => "summary",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bucket layout plus counts for histogram and summary points
///
/// `bucket_counts` has one more entry than `bounds`: bucket `i` covers values
/// up to `bounds[i]`, and the last bucket covers everything above the last
/// bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    /// Upper bounds of the buckets, strictly increasing
    pub bounds: Vec<f64>,

    /// Per-bucket sample counts
    pub bucket_counts: Vec<u64>,

    /// Total number of samples
    pub count: u64,

    /// Sum of all samples
    pub sum: f64,
}

impl Distribution {
    /// Check that the layout is internally consistent
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.bucket_counts.len() != self.bounds.len() + 1 {
            return Err(format!(
                "expected {} bucket counts for {} bounds, got {}",
                self.bounds.len() + 1,
                self.bounds.len(),
                self.bucket_counts.len()
            ));
        }
        if self.bounds.iter().any(|b| !b.is_finite()) {
            return Err("bucket bounds must be finite".to_string());
        }
        if self.bounds.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err("bucket bounds must be strictly increasing".to_string());
        }
        if !self.sum.is_finite() {
            return Err("distribution sum must be finite".to_string());
        }
        Ok(())
    }
}

/// Value carried by a single point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValue {
    /// Counter increment or gauge reading
    Scalar(f64),
    /// Histogram or summary payload
    Distribution(Distribution),
}

/// A single observed measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Name of the metric
    pub name: String,

    /// Kind of the metric
    pub kind: MetricKind,

    /// Observed value
    pub value: PointValue,

    /// Time the measurement was taken
    pub timestamp: DateTime<Utc>,

    /// Attributes identifying the origin of the point (host, service, ...)
    #[serde(default)]
    pub resource: Attributes,

    /// Metric-specific dimensions
    #[serde(default)]
    pub labels: Attributes,
}

impl MetricPoint {
    /// Create a counter point with no attributes
    pub fn counter(name: impl Into<String>, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self::new(name, MetricKind::Counter, PointValue::Scalar(value), timestamp)
    }

    /// Create a gauge point with no attributes
    pub fn gauge(name: impl Into<String>, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self::new(name, MetricKind::Gauge, PointValue::Scalar(value), timestamp)
    }

    /// Create a histogram point with no attributes
    pub fn histogram(name: impl Into<String>, distribution: Distribution, timestamp: DateTime<Utc>) -> Self {
        Self::new(
            name,
            MetricKind::Histogram,
            PointValue::Distribution(distribution),
            timestamp,
        )
    }

    fn new(name: impl Into<String>, kind: MetricKind, value: PointValue, timestamp: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            timestamp,
            resource: Attributes::default(),
            labels: Attributes::default(),
        }
    }

    /// Add a resource attribute
    pub fn with_resource(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.resource.insert(key.into(), value.into());
        self
    }

    /// Add a label attribute
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Check the identity fields and the value shape against the kind
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AggregatorError::malformed(&self.name, "metric name is empty"));
        }

        match (&self.value, self.kind.is_distribution()) {
            (PointValue::Scalar(value), false) => {
                if !value.is_finite() {
                    return Err(AggregatorError::malformed(&self.name, "value is not finite"));
                }
            }
            (PointValue::Distribution(distribution), true) => {
                distribution
                    .validate()
                    .map_err(|reason| AggregatorError::malformed(&self.name, reason))?;
            }
            (PointValue::Scalar(_), true) => {
                return Err(AggregatorError::malformed(
                    &self.name,
                    format!("{} point carries a scalar value", self.kind),
                ));
            }
            (PointValue::Distribution(_), false) => {
                return Err(AggregatorError::malformed(
                    &self.name,
                    format!("{} point carries a distribution value", self.kind),
                ));
            }
        }

        Ok(())
    }
}

/// Identity under which points are combined
///
/// Attribute maps are sorted, so two keys built from maps with the same
/// surviving pairs compare and hash equal whatever order they arrived in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupingKey {
    /// Name of the metric
    pub name: String,

    /// Kind of the metric
    pub kind: MetricKind,

    /// Resource attributes left after dropping configured keys
    pub resource: SortedAttributes,

    /// Label attributes left after dropping configured keys
    pub labels: SortedAttributes,
}

/// Aggregated value for one grouping key over one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AggregatedValue {
    /// Summed counter
    Sum { sum: f64 },
    /// Last gauge reading plus summary statistics
    Gauge {
        last: f64,
        last_timestamp: DateTime<Utc>,
        sum: f64,
        min: f64,
        max: f64,
    },
    /// Merged histogram or summary
    Distribution(Distribution),
}

/// One output record, produced per accumulator at flush time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedRecord {
    /// Name of the metric
    pub name: String,

    /// Kind of the metric
    pub kind: MetricKind,

    /// Surviving resource attributes
    pub resource: SortedAttributes,

    /// Surviving label attributes
    pub labels: SortedAttributes,

    /// Number of points folded into this record
    pub count: u64,

    /// Aggregated value
    pub value: AggregatedValue,

    /// Start of the window the record covers
    pub start_time: DateTime<Utc>,

    /// Flush time of the window
    pub timestamp: DateTime<Utc>,
}

/// Everything flushed from one window, delivered to a sink in a single call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedBatch {
    /// Name of the processor that produced the batch
    pub processor: String,

    /// Start time of the window
    pub start_time: DateTime<Utc>,

    /// Flush time of the window
    pub end_time: DateTime<Utc>,

    /// Configured reporting interval
    pub period: Duration,

    /// Aggregated records
    pub records: Vec<AggregatedRecord>,
}

impl AggregatedBatch {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
