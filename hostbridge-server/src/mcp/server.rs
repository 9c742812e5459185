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

//! MCP serving loop
//!
//! Reads requests from a transport, answers each one on its own task and
//! writes responses back as they complete. The loop reports its own end
//! (peer gone, transport failure) to the supervisor as a [`LoopExit`].

use crate::mcp::handler::McpHandler;
use crate::mcp::protocol::{JsonRpcError, JsonRpcId, JsonRpcResponse};
use crate::mcp::transport::{LineTransport, McpTransport, TransportError};
use crate::supervisor::{LoopExit, ServingLoop};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Opens a fresh transport for each launch.
pub type TransportFactory =
    Arc<dyn Fn() -> anyhow::Result<Box<dyn McpTransport>> + Send + Sync>;

pub fn stdio_transport_factory() -> TransportFactory {
    Arc::new(|| Ok(Box::new(LineTransport::stdio()) as Box<dyn McpTransport>))
}

/// Millisecond heartbeat relative to a fixed epoch.
#[derive(Debug)]
struct Heartbeat {
    epoch: Instant,
    last_ms: AtomicU64,
}

impl Heartbeat {
    fn new() -> Self {
        Self {
            epoch: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn beat(&self) {
        self.last_ms
            .store(self.epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    fn age(&self) -> Duration {
        let now = self.epoch.elapsed().as_millis() as u64;
        Duration::from_millis(now.saturating_sub(self.last_ms.load(Ordering::Relaxed)))
    }
}

struct RunningLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct McpServingLoop {
    handler: Arc<McpHandler>,
    factory: TransportFactory,
    heartbeat_interval: Duration,
    heartbeat: Arc<Heartbeat>,
    running: Mutex<Option<RunningLoop>>,
}

impl McpServingLoop {
    pub fn new(handler: Arc<McpHandler>, factory: TransportFactory, heartbeat_interval: Duration) -> Self {
        Self {
            handler,
            factory,
            heartbeat_interval,
            heartbeat: Arc::new(Heartbeat::new()),
            running: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ServingLoop for McpServingLoop {
    fn name(&self) -> &str {
        "mcp"
    }

    async fn launch(
        &self,
        generation: u64,
        exits: mpsc::UnboundedSender<LoopExit>,
    ) -> anyhow::Result<()> {
        self.shutdown().await;

        let transport = (self.factory)()?;
        let cancel = CancellationToken::new();
        self.heartbeat.beat();
        let task = tokio::spawn(serve(
            transport,
            Arc::clone(&self.handler),
            cancel.clone(),
            Arc::clone(&self.heartbeat),
            self.heartbeat_interval,
            generation,
            exits,
        ));
        *self.running.lock() = Some(RunningLoop { cancel, task });
        info!(generation, "MCP serving loop launched");
        Ok(())
    }

    async fn shutdown(&self) {
        let running = self.running.lock().take();
        if let Some(running) = running {
            running.cancel.cancel();
            if let Err(e) = running.task.await {
                warn!(error = %e, "MCP serving loop ended abnormally");
            }
        }
    }

    async fn is_responsive(&self) -> bool {
        let alive = self
            .running
            .lock()
            .as_ref()
            .map(|r| !r.task.is_finished())
            .unwrap_or(false);
        alive && self.heartbeat.age() <= self.heartbeat_interval * 3
    }
}

async fn serve(
    mut transport: Box<dyn McpTransport>,
    handler: Arc<McpHandler>,
    cancel: CancellationToken,
    heartbeat: Arc<Heartbeat>,
    heartbeat_interval: Duration,
    generation: u64,
    exits: mpsc::UnboundedSender<LoopExit>,
) {
    let (response_tx, mut response_rx) = mpsc::unbounded_channel::<JsonRpcResponse>();
    let mut in_flight = JoinSet::new();
    let mut ticker = tokio::time::interval(heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(generation, "MCP serving loop cancelled");
                return;
            }
            _ = ticker.tick() => heartbeat.beat(),
            Some(response) = response_rx.recv() => {
                if let Err(e) = transport.send(response).await {
                    break format!("send failed: {}", e);
                }
            }
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
            incoming = transport.recv() => match incoming {
                Ok(request) => {
                    let handler = Arc::clone(&handler);
                    let tx = response_tx.clone();
                    in_flight.spawn(async move {
                        if let Some(response) = handler.handle_request(request).await {
                            let _ = tx.send(response);
                        }
                    });
                }
                Err(TransportError::Json(e)) => {
                    warn!(error = %e, "Invalid JSON-RPC request");
                    let response = JsonRpcResponse::error(
                        JsonRpcId::Null,
                        JsonRpcError::parse_error(format!("Invalid JSON: {}", e)),
                    );
                    if let Err(e) = transport.send(response).await {
                        break format!("send failed: {}", e);
                    }
                }
                Err(TransportError::LineTooLong) => {
                    let response = JsonRpcResponse::error(
                        JsonRpcId::Null,
                        JsonRpcError::invalid_request("Message too large"),
                    );
                    if let Err(e) = transport.send(response).await {
                        break format!("send failed: {}", e);
                    }
                }
                Err(e) => break format!("transport closed: {}", e),
            },
        }
    };

    // Peer stopped sending: finish what is in flight before reporting.
    drop(response_tx);
    while in_flight.join_next().await.is_some() {}
    while let Ok(response) = response_rx.try_recv() {
        if transport.send(response).await.is_err() {
            break;
        }
    }

    info!(generation, reason = %reason, "MCP serving loop exited");
    let _ = exits.send(LoopExit { generation, reason });
}
