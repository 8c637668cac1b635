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

//! Grouping key derivation

use ahash::AHashSet;

use crate::model::{Attributes, GroupingKey, MetricPoint, SortedAttributes};

/// Derives grouping keys by removing the configured resource and label keys
/// from a point's identity
#[derive(Debug, Clone, Default)]
pub struct KeyFilter {
    drop_resource_keys: AHashSet<String>,
    drop_label_keys: AHashSet<String>,
}

impl KeyFilter {
    pub fn new<R, L>(drop_resource_keys: R, drop_label_keys: L) -> Self
    where
        R: IntoIterator<Item = String>,
        L: IntoIterator<Item = String>,
    {
        Self {
            drop_resource_keys: drop_resource_keys.into_iter().collect(),
            drop_label_keys: drop_label_keys.into_iter().collect(),
        }
    }

    pub fn derive(&self, point: &MetricPoint) -> GroupingKey {
        GroupingKey {
            name: point.name.clone(),
            kind: point.kind,
            resource: retain(&point.resource, &self.drop_resource_keys),
            labels: retain(&point.labels, &self.drop_label_keys),
        }
    }
}

fn retain(attributes: &Attributes, dropped: &AHashSet<String>) -> SortedAttributes {
    attributes
        .iter()
        .filter(|(key, _)| !dropped.contains(key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
