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

//! Hostbridge server
//!
//! A tool-execution engine that lets many concurrent requesters invoke tools
//! which must run on a single host thread. Requests flow through the
//! [`RequestOrchestrator`](orchestrator::RequestOrchestrator); host-bound
//! work is queued on the [`DispatchQueue`](dispatch::DispatchQueue) and
//! drained by the host in capped ticks.

pub mod builtin_tools;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod mcp;
pub mod metrics;
pub mod orchestrator;
pub mod supervisor;
pub mod tool_registry;

use anyhow::{Context, Result};
use cache::{ResponseCache, SharedResponseCache};
use config::BridgeConfig;
use dispatch::{DispatchQueue, HostThread, TickRequester, TickSignal};
use mcp::{stdio_transport_factory, McpHandler, McpServingLoop, TransportFactory};
use orchestrator::RequestOrchestrator;
use std::sync::Arc;
use supervisor::Supervisor;
use tool_registry::{ResourceRegistry, ToolRegistry};

/// The wired-up engine: registries, cache, queue and orchestrator.
pub struct HostBridge {
    config: BridgeConfig,
    queue: Arc<DispatchQueue>,
    cache: SharedResponseCache,
    orchestrator: Arc<RequestOrchestrator>,
}

impl HostBridge {
    /// Build the engine. `tick` is asked for a tick whenever work is queued.
    pub fn new(config: BridgeConfig, tick: Arc<dyn TickRequester>) -> Self {
        let registry = Arc::new(ToolRegistry::new());
        let resources = Arc::new(ResourceRegistry::new());
        let cache = Arc::new(ResponseCache::new(&config.cache));
        let queue = Arc::new(DispatchQueue::new(&config.dispatch, tick));
        let orchestrator = Arc::new(RequestOrchestrator::new(
            registry,
            resources,
            Arc::clone(&cache),
            Arc::clone(&queue),
            &config.dispatch,
        ));
        Self {
            config,
            queue,
            cache,
            orchestrator,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<RequestOrchestrator> {
        &self.orchestrator
    }

    pub fn queue(&self) -> &Arc<DispatchQueue> {
        &self.queue
    }

    pub fn cache(&self) -> &SharedResponseCache {
        &self.cache
    }

    /// MCP serving loop over the given transport source.
    pub fn serving_loop(&self, factory: TransportFactory) -> McpServingLoop {
        let handler = Arc::new(McpHandler::new(
            Arc::clone(&self.orchestrator),
            self.config.server.name.clone(),
        ));
        McpServingLoop::new(handler, factory, self.config.server.heartbeat_interval())
    }
}

/// Run the bridge over stdio until Ctrl-C.
pub async fn run_server(config: BridgeConfig) -> Result<()> {
    hostbridge_telemetry::init_telemetry("hostbridge", &config.telemetry)?;
    config.validate()?;

    tracing::info!(name = %config.server.name, "Starting Hostbridge");
    tracing::debug!("Configuration: {:#?}", config);

    let signal = Arc::new(TickSignal::new());
    let tick: Arc<dyn TickRequester> = signal.clone();
    let bridge = HostBridge::new(config.clone(), tick);
    let host = HostThread::spawn(
        Arc::clone(bridge.queue()),
        signal,
        config.dispatch.tick_interval(),
    )
    .context("Failed to spawn host thread")?;

    builtin_tools::register_builtin_tools(bridge.orchestrator())?;

    let serving = Arc::new(bridge.serving_loop(stdio_transport_factory()));
    let supervisor = Supervisor::new(serving, config.supervisor.clone());
    supervisor.start().await?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    supervisor.shutdown().await;
    let discarded = bridge.queue().close();
    if discarded > 0 {
        tracing::warn!(discarded, "Discarded queued calls on shutdown");
    }
    host.shutdown();
    Ok(())
}
