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

//! Construction of processors from configuration
//!
//! A pipeline host only needs [`ProcessorFactory`] to build a processor and
//! [`MetricsConsumer`](crate::sources::MetricsConsumer) to feed it.

use std::sync::Arc;

use crate::aggregation::AggregationEngine;
use crate::config::{AggregatorConfig, TYPE_STR};
use crate::error::{AggregatorError, Result};
use crate::sinks::MetricsSink;

/// Kind of telemetry a pipeline carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Metric,
    Trace,
}

impl DataType {
    pub const fn as_str(self) -> &'static str {
        match self {
            DataType::Metric => "metrics",
            DataType::Trace => "traces",
        }
    }
}

/// Builds processors of one type from their configuration
pub trait ProcessorFactory: Send + Sync {
    type Config;
    type Processor;

    /// Value of the processor type in pipeline configuration
    fn type_name(&self) -> &'static str;

    fn create_default_config(&self) -> Self::Config;

    /// Data types this processor can sit in the pipeline of
    fn input_data_types(&self) -> &'static [DataType];

    /// Build a processor that forwards its output to `next`
    fn create_processor(
        &self,
        data_type: DataType,
        config: &Self::Config,
        next: Arc<dyn MetricsSink>,
    ) -> Result<Self::Processor>;
}

/// Factory for the aggregation processor
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregatorFactory;

impl AggregatorFactory {
    /// Build an aggregation engine for a metrics pipeline
    pub fn create_metrics_processor(
        &self,
        config: &AggregatorConfig,
        next: Arc<dyn MetricsSink>,
    ) -> Result<AggregationEngine> {
        self.create_processor(DataType::Metric, config, next)
    }
}

impl ProcessorFactory for AggregatorFactory {
    type Config = AggregatorConfig;
    type Processor = AggregationEngine;

    fn type_name(&self) -> &'static str {
        TYPE_STR
    }

    fn create_default_config(&self) -> AggregatorConfig {
        AggregatorConfig::default()
    }

    fn input_data_types(&self) -> &'static [DataType] {
        &[DataType::Metric]
    }

    fn create_processor(
        &self,
        data_type: DataType,
        config: &AggregatorConfig,
        next: Arc<dyn MetricsSink>,
    ) -> Result<AggregationEngine> {
        if !self.input_data_types().contains(&data_type) {
            return Err(AggregatorError::UnsupportedDataType(data_type.as_str().to_string()));
        }
        AggregationEngine::new(config, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::MemorySink;
    use std::time::Duration;

    #[test]
    fn test_type_and_default_config() {
        let factory = AggregatorFactory;
        assert_eq!(factory.type_name(), "aggregator");

        let config = factory.create_default_config();
        assert_eq!(config.name, "aggregator");
        assert_eq!(config.reporting_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_creates_metrics_processor() {
        let config = AggregatorConfig::default()
            .with_reporting_interval(Duration::from_secs(5))
            .with_drop_label_keys(["instance"]);

        let engine = AggregatorFactory
            .create_metrics_processor(&config, Arc::new(MemorySink::new("memory")))
            .unwrap();
        assert_eq!(engine.name(), "aggregator");
        assert_eq!(engine.reporting_interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_trace_pipelines_are_refused() {
        let result = AggregatorFactory.create_processor(
            DataType::Trace,
            &AggregatorConfig::default(),
            Arc::new(MemorySink::new("memory")),
        );
        assert!(matches!(result, Err(AggregatorError::UnsupportedDataType(t)) if t == "traces"));
    }

    #[test]
    fn test_invalid_config_is_refused() {
        let config = AggregatorConfig::default().with_reporting_interval(Duration::ZERO);
        let result = AggregatorFactory.create_metrics_processor(&config, Arc::new(MemorySink::new("memory")));
        assert!(matches!(result, Err(AggregatorError::Config(_))));
    }
}
