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

use anyhow::{Context, Result};
use metrics_aggregator::config::AggregatorConfig;
use metrics_aggregator::sinks::LogSink;
use metrics_aggregator::Daemon;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <config-file>", args[0]);
        std::process::exit(1);
    }

    let config_path = PathBuf::from(&args[1]);
    info!("Starting aggregator with config: {}", config_path.display());

    let config = AggregatorConfig::from_file(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    info!("Configuration loaded successfully");

    let daemon = Arc::new(Daemon::new(config, Arc::new(LogSink::new("log")))?);
    daemon.start().await?;

    // Points arrive on stdin; end of input also ends the process.
    let reader = Arc::clone(&daemon);
    tokio::spawn(async move {
        match reader.run_source("stdin", BufReader::new(tokio::io::stdin())).await {
            Ok(summary) => info!(?summary, "Input closed"),
            Err(e) => warn!(error = %e, "Failed to read input"),
        }
        reader.shutdown();
    });

    daemon.wait_for_shutdown().await?;
    info!("Shutdown complete");

    Ok(())
}
