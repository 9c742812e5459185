// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Hostbridge telemetry (tracing + logging).
//!
//! Log output always goes to stderr: stdout carries the stdio transport.

use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is not set (e.g. "info",
    /// "hostbridge_server=debug").
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,

    #[serde(default = "default_thread_ids")]
    pub with_thread_ids: bool,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_thread_ids() -> bool {
    true
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            with_thread_ids: default_thread_ids(),
        }
    }
}

/// Build the level filter: `RUST_LOG` wins over the configured level.
pub fn env_filter(config: &TelemetryConfig) -> anyhow::Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => Ok(EnvFilter::try_new(&config.level)?),
    }
}

/// Initialize the global tracing subscriber.
///
/// Returns `false` when a subscriber was already installed (tests calling
/// this more than once), in which case the existing one stays active.
pub fn init_telemetry(service_name: &str, config: &TelemetryConfig) -> anyhow::Result<bool> {
    let filter = env_filter(config)?;

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(config.with_thread_ids)
            .with_thread_names(true)
            .with_writer(std::io::stderr)
    });

    let text_layer = (!config.json).then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(config.with_thread_ids)
            .with_thread_names(true)
            .with_writer(std::io::stderr)
    });

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(service = service_name, json = config.json, "Telemetry initialized");
    }
    Ok(installed)
}
