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

//! Error types for the aggregator

use thiserror::Error;

/// A histogram or summary point whose bucket layout differs from the one
/// already accumulated under the same grouping key
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeMismatch {
    pub metric: String,
    pub expected_bounds: Vec<f64>,
    pub actual_bounds: Vec<f64>,
}

#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Malformed metric point '{metric}': {reason}")]
    MalformedInput { metric: String, reason: String },

    #[error("{} point(s) rejected due to incompatible bucket layouts (first: '{}')", .0.len(), first_metric(.0))]
    ShapeMismatch(Vec<ShapeMismatch>),

    #[error("Delivery to sink '{sink}' failed for {records} record(s)")]
    Delivery {
        sink: String,
        records: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("Data type '{0}' is not supported by this processor")]
    UnsupportedDataType(String),

    #[error("Aggregator has been stopped")]
    Stopped,

    #[error("Scheduler task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type alias for aggregator operations
pub type Result<T> = std::result::Result<T, AggregatorError>;

impl AggregatorError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn malformed<M: Into<String>, R: Into<String>>(metric: M, reason: R) -> Self {
        Self::MalformedInput {
            metric: metric.into(),
            reason: reason.into(),
        }
    }

    pub fn delivery(sink: &str, records: usize, source: anyhow::Error) -> Self {
        Self::Delivery {
            sink: sink.to_string(),
            records,
            source: source.into(),
        }
    }
}

fn first_metric(mismatches: &[ShapeMismatch]) -> &str {
    mismatches.first().map(|m| m.metric.as_str()).unwrap_or("")
}
