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

//! Reporting windows
//!
//! A [`Window`] is the live, shared aggregation target for one reporting
//! interval. Draining it consumes it and yields a [`DrainedWindow`], which can
//! no longer be written to and is handed to the emitter by value.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::accumulator::Accumulator;
use crate::error::ShapeMismatch;
use crate::model::{GroupingKey, MetricPoint};

/// Live accumulators for the current reporting interval
#[derive(Debug)]
pub struct Window {
    start_time: DateTime<Utc>,
    accumulators: DashMap<GroupingKey, Accumulator>,
}

impl Window {
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self {
            start_time,
            accumulators: DashMap::new(),
        }
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn is_empty(&self) -> bool {
        self.accumulators.is_empty()
    }

    /// Number of distinct grouping keys seen in this window
    pub fn len(&self) -> usize {
        self.accumulators.len()
    }

    /// Fold a point into the accumulator for `key`, creating it on first use
    ///
    /// Only the shard holding `key` is locked, so concurrent inserts for
    /// unrelated keys proceed in parallel.
    pub fn insert(&self, key: GroupingKey, point: &MetricPoint) -> Result<(), ShapeMismatch> {
        match self.accumulators.entry(key) {
            Entry::Occupied(mut entry) => entry.get_mut().fold(point),
            Entry::Vacant(entry) => {
                entry.insert(Accumulator::new(point));
                Ok(())
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn get(&self, key: &GroupingKey) -> Option<Accumulator> {
        self.accumulators.get(key).map(|entry| entry.value().clone())
    }

    /// Close the window at `flush_time`
    pub fn drain(self, flush_time: DateTime<Utc>) -> DrainedWindow {
        let mut entries: Vec<_> = self.accumulators.into_iter().collect();
        entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));

        DrainedWindow {
            start_time: self.start_time,
            flush_time,
            entries,
        }
    }
}

/// A window that has left the ingestion path
///
/// Entries are ordered by grouping key so emitted batches are deterministic.
#[derive(Debug)]
pub struct DrainedWindow {
    start_time: DateTime<Utc>,
    flush_time: DateTime<Utc>,
    entries: Vec<(GroupingKey, Accumulator)>,
}

impl DrainedWindow {
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn flush_time(&self) -> DateTime<Utc> {
        self.flush_time
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[(GroupingKey, Accumulator)] {
        &self.entries
    }

    pub(crate) fn into_entries(self) -> Vec<(GroupingKey, Accumulator)> {
        self.entries
    }
}
