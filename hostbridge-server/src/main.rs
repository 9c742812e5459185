// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Result;
use clap::Parser;
use hostbridge_server::{config::BridgeConfig, run_server};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long, env = "HOSTBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter directive (overrides config file)
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long)]
    log_json: bool,

    /// Host-thread tick interval in milliseconds (overrides config file)
    #[arg(long, env = "HOSTBRIDGE_TICK_INTERVAL_MS")]
    tick_interval_ms: Option<u64>,

    /// Disable automatic restarts of the serving loop
    #[arg(long)]
    no_auto_restart: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = BridgeConfig::load(args.config)?;

    // Apply CLI overrides
    if let Some(level) = args.log_level {
        config.telemetry.level = level;
    }
    if args.log_json {
        config.telemetry.json = true;
    }
    if let Some(ms) = args.tick_interval_ms {
        config.dispatch.tick_interval_ms = ms;
    }
    if args.no_auto_restart {
        config.supervisor.auto_restart = false;
    }

    run_server(config).await
}
