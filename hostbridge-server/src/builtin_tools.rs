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

//! Tools every bridge serves regardless of what the host registers.

use crate::orchestrator::RequestOrchestrator;
use crate::tool_registry::{ToolDefinition, ToolRegistryError};
use chrono::Utc;
use hostbridge_core::{handler_fn, HandlerError, ToolResult};
use serde_json::json;
use std::sync::{Arc, Weak};

pub const PING_TOOL: &str = "ping";
pub const STATS_TOOL: &str = "bridge_stats";

/// Register `ping` (host thread) and `bridge_stats` (free-threaded).
pub fn register_builtin_tools(orchestrator: &Arc<RequestOrchestrator>) -> Result<(), ToolRegistryError> {
    orchestrator.register_tool_with(ToolDefinition::new(
        PING_TOOL,
        "Check that the host is responsive",
        handler_fn(|ctx, _args| {
            Ok(ToolResult::json(json!({
                "ok": true,
                "message": "pong",
                "timestamp": Utc::now().to_rfc3339(),
                "onHostThread": ctx.on_host_thread,
            })))
        }),
    ))?;

    // The registry owns this handler, so hold the orchestrator weakly.
    let weak: Weak<RequestOrchestrator> = Arc::downgrade(orchestrator);
    orchestrator.register_tool_with(
        ToolDefinition::new(
            STATS_TOOL,
            "Report dispatch, cache and per-tool execution statistics",
            handler_fn(move |_ctx, _args| {
                let orchestrator = weak
                    .upgrade()
                    .ok_or_else(|| HandlerError::from("bridge is shutting down"))?;
                let dispatch = orchestrator.queue().stats();
                let cache = orchestrator.cache().stats();
                Ok(ToolResult::json(json!({
                    "requests": orchestrator.metrics(),
                    "dispatch": {
                        "queueDepth": dispatch.queue_depth,
                        "enqueued": dispatch.enqueued,
                        "executed": dispatch.executed,
                        "failed": dispatch.failed,
                        "abandoned": dispatch.abandoned,
                        "skippedExpired": dispatch.skipped_expired,
                        "waiterTimeouts": dispatch.waiter_timeouts,
                        "ticks": dispatch.ticks,
                        "maxQueueWaitMs": dispatch.max_queue_wait.as_millis() as u64,
                    },
                    "cache": cache,
                    "registry": orchestrator.registry().stats(),
                    "tools": orchestrator.registry().all_tool_stats(),
                })))
            }),
        )
        .free_threaded(),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::config::{CacheConfig, DispatchConfig};
    use crate::dispatch::{DispatchQueue, NoopTick};
    use crate::tool_registry::{ResourceRegistry, ToolRegistry};
    use hostbridge_core::ToolCall;

    fn orchestrator() -> Arc<RequestOrchestrator> {
        let config = DispatchConfig::default();
        Arc::new(RequestOrchestrator::new(
            Arc::new(ToolRegistry::new()),
            Arc::new(ResourceRegistry::new()),
            Arc::new(ResponseCache::new(&CacheConfig::default())),
            Arc::new(DispatchQueue::new(&config, Arc::new(NoopTick))),
            &config,
        ))
    }

    #[test]
    fn test_builtins_registered() {
        let orch = orchestrator();
        register_builtin_tools(&orch).unwrap();
        let names: Vec<_> = orch.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["bridge_stats", "ping"]);
        assert!(orch.registry().lookup(PING_TOOL).unwrap().requires_host_thread());
        assert!(!orch.registry().lookup(STATS_TOOL).unwrap().requires_host_thread());
    }

    #[tokio::test]
    async fn test_stats_tool_runs_inline() {
        let orch = orchestrator();
        register_builtin_tools(&orch).unwrap();
        let response = orch
            .execute_tool(ToolCall::new(STATS_TOOL, json!({})))
            .await
            .unwrap();
        let payload = response.result.payload();
        assert_eq!(payload["dispatch"]["queueDepth"], 0);
        assert!(payload["tools"].is_array());
    }
}
