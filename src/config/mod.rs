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

//! Aggregator configuration
//!
//! Every recognized option lives on [`AggregatorConfig`] together with its
//! default. The struct is validated once, when an engine is built from it.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{AggregatorError, Result};

/// Value of the processor type in pipeline configuration
pub const TYPE_STR: &str = "aggregator";

/// Aggregator configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatorConfig {
    /// Name of this processor instance
    #[serde(default = "default_name")]
    pub name: String,

    /// How often aggregated state is flushed downstream
    #[serde(default = "default_reporting_interval", with = "duration_serde")]
    pub reporting_interval: Duration,

    /// Resource attribute keys removed from a point's identity
    #[serde(default)]
    pub drop_resource_keys: Vec<String>,

    /// Label attribute keys removed from a point's identity
    #[serde(default)]
    pub drop_label_keys: Vec<String>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            reporting_interval: default_reporting_interval(),
            drop_resource_keys: Vec::new(),
            drop_label_keys: Vec::new(),
        }
    }
}

impl AggregatorConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AggregatorError::config(format!("failed to read config file {}: {}", path.display(), e))
        })?;

        Self::from_json(&contents)
    }

    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| AggregatorError::config(format!("failed to parse configuration: {}", e)))
    }

    /// Set the reporting interval
    pub fn with_reporting_interval(mut self, interval: Duration) -> Self {
        self.reporting_interval = interval;
        self
    }

    /// Set the resource keys to drop
    pub fn with_drop_resource_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.drop_resource_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Set the label keys to drop
    pub fn with_drop_label_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.drop_label_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.reporting_interval.is_zero() {
            return Err(AggregatorError::config("reportingInterval must be greater than zero"));
        }
        if self.name.trim().is_empty() {
            return Err(AggregatorError::config("name must not be empty"));
        }
        if self.drop_resource_keys.iter().any(|k| k.is_empty()) {
            return Err(AggregatorError::config("dropResourceKeys contains an empty key"));
        }
        if self.drop_label_keys.iter().any(|k| k.is_empty()) {
            return Err(AggregatorError::config("dropLabelKeys contains an empty key"));
        }
        Ok(())
    }
}

fn default_name() -> String {
    TYPE_STR.to_string()
}

fn default_reporting_interval() -> Duration {
    Duration::from_secs(60)
}

// Duration serialization helpers
mod duration_serde {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // ISO-8601 duration format (PT1.5S)
        let iso_duration = format!("PT{}S", duration.as_secs_f64());
        serializer.serialize_str(&iso_duration)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(DurationVisitor)
    }

    struct DurationVisitor;

    impl<'de> Visitor<'de> for DurationVisitor {
        type Value = Duration;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an ISO-8601 duration such as \"PT60S\" or a number of seconds")
        }

        fn visit_u64<E: de::Error>(self, secs: u64) -> Result<Duration, E> {
            Ok(Duration::from_secs(secs))
        }

        fn visit_i64<E: de::Error>(self, secs: i64) -> Result<Duration, E> {
            u64::try_from(secs)
                .map(Duration::from_secs)
                .map_err(|_| E::custom(format!("negative duration: {}", secs)))
        }

        fn visit_f64<E: de::Error>(self, secs: f64) -> Result<Duration, E> {
            Duration::try_from_secs_f64(secs).map_err(E::custom)
        }

        fn visit_str<E: de::Error>(self, s: &str) -> Result<Duration, E> {
            let seconds_str = s
                .strip_prefix("PT")
                .and_then(|rest| rest.strip_suffix('S'))
                .ok_or_else(|| E::custom(format!("Invalid duration format: {}", s)))?;
            let seconds: f64 = seconds_str.parse().map_err(E::custom)?;
            Duration::try_from_secs_f64(seconds).map_err(E::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parsing() {
        let json_config = r#"
        {
            "name": "aggregator/edge",
            "reportingInterval": "PT10S",
            "dropResourceKeys": ["host", "pid"],
            "dropLabelKeys": ["instance"]
        }
        "#;

        let config = AggregatorConfig::from_json(json_config).unwrap();
        assert_eq!(config.name, "aggregator/edge");
        assert_eq!(config.reporting_interval, Duration::from_secs(10));
        assert_eq!(config.drop_resource_keys, vec!["host", "pid"]);
        assert_eq!(config.drop_label_keys, vec!["instance"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = AggregatorConfig::from_json("{}").unwrap();
        assert_eq!(config, AggregatorConfig::default());
        assert_eq!(config.name, TYPE_STR);
        assert_eq!(config.reporting_interval, Duration::from_secs(60));
        assert!(config.drop_resource_keys.is_empty());
        assert!(config.drop_label_keys.is_empty());
    }

    #[test]
    fn test_duration_parsing() {
        let config = AggregatorConfig::from_json(r#"{"reportingInterval": "PT5.5S"}"#).unwrap();
        assert_eq!(config.reporting_interval, Duration::from_secs_f64(5.5));

        let config = AggregatorConfig::from_json(r#"{"reportingInterval": 30}"#).unwrap();
        assert_eq!(config.reporting_interval, Duration::from_secs(30));

        assert!(AggregatorConfig::from_json(r#"{"reportingInterval": "5 minutes"}"#).is_err());
        assert!(AggregatorConfig::from_json(r#"{"reportingInterval": -1}"#).is_err());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = AggregatorConfig::from_json(r#"{"reportingInterval": "PT0S"}"#).unwrap();
        assert!(matches!(config.validate(), Err(AggregatorError::Config(_))));
    }

    #[test]
    fn test_empty_drop_key_rejected() {
        let config = AggregatorConfig::default().with_drop_label_keys([""]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_round_trip_keeps_interval() {
        let config = AggregatorConfig::default().with_reporting_interval(Duration::from_millis(1500));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"PT1.5S\""));
        assert_eq!(AggregatorConfig::from_json(&json).unwrap(), config);
    }
}
