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

//! Background flush task

use std::sync::Arc;
use tokio::select;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use super::Shared;
use crate::error::Result;

/// Handle to the running flush task
pub(crate) struct Scheduler {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

impl Scheduler {
    pub(crate) fn spawn(shared: Arc<Shared>) -> Self {
        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run(shared, shutdown_rx));

        Self { shutdown, handle }
    }

    /// Signal the task and wait for its final flush
    pub(crate) async fn shutdown(self) -> Result<()> {
        // The task may already be gone if it panicked; the join reports that.
        let _ = self.shutdown.send(());
        self.handle.await?
    }
}

async fn run(shared: Arc<Shared>, mut shutdown: oneshot::Receiver<()>) -> Result<()> {
    let period = shared.reporting_interval();

    // Ticks land on start + n * period; a slow flush skips ticks instead of
    // shifting the grid.
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    debug!(processor = shared.name(), ?period, "Flush scheduler started.");

    loop {
        select! {
            _ = ticker.tick() => {
                // Delivery failures are logged by the emitter; the next window proceeds normally.
                let _ = shared.flush(false).await;
            },
            // A dropped sender means the engine went away without stopping.
            _ = &mut shutdown => break,
        }
    }

    debug!(processor = shared.name(), "Flush scheduler stopping, flushing final window.");
    shared.flush(true).await.map(|_| ())
}
