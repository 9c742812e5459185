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

//! Request orchestrator
//!
//! The entry point for incoming requests. For a tool call:
//!
//! 1. read-only tools are answered from the response cache when possible;
//! 2. the tool is looked up (unknown names fail with `NotFound`);
//! 3. host-bound tools go through the dispatch queue, free-threaded tools run
//!    inline on the calling thread;
//! 4. successful read results are cached, and a successful mutating call
//!    invalidates cached reads of the same subject.

use crate::cache::{change_token, SharedResponseCache};
use crate::config::DispatchConfig;
use crate::dispatch::{run_guarded, CallOutcome, DispatchQueue, HostJob};
use crate::metrics::{ExecutionMetrics, MetricsSnapshot};
use crate::tool_registry::{
    ResourceRegistry, ToolDefinition, ToolRegistration, ToolRegistry, ToolRegistryError,
};
use hostbridge_core::{
    CallError, InvocationContext, RequestId, ResourceContents, ResourceDescriptor,
    ResourceHandler, ToolCall, ToolDescriptor, ToolHandler, ToolResult,
};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Result of a tool call plus delivery metadata.
#[derive(Debug, Clone)]
pub struct ToolResponse {
    pub result: ToolResult,
    pub change_token: String,
    pub cache_hit: bool,
    pub elapsed: Duration,
}

pub struct RequestOrchestrator {
    registry: Arc<ToolRegistry>,
    resources: Arc<ResourceRegistry>,
    cache: SharedResponseCache,
    queue: Arc<DispatchQueue>,
    default_deadline: Option<Duration>,
    metrics: ExecutionMetrics,
    inline_call_ids: AtomicU64,
}

impl RequestOrchestrator {
    pub fn new(
        registry: Arc<ToolRegistry>,
        resources: Arc<ResourceRegistry>,
        cache: SharedResponseCache,
        queue: Arc<DispatchQueue>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            registry,
            resources,
            cache,
            queue,
            default_deadline: config.default_deadline(),
            metrics: ExecutionMetrics::new(),
            inline_call_ids: AtomicU64::new(0),
        }
    }

    pub async fn execute_tool(&self, call: ToolCall) -> Result<ToolResponse, CallError> {
        let started = Instant::now();
        let arguments = match call.arguments {
            Value::Null => Value::Object(Default::default()),
            Value::Object(_) => call.arguments,
            _ => {
                let err = CallError::InvalidCall("arguments must be a JSON object".to_string());
                self.metrics.record_failure(&err, started.elapsed());
                return Err(err);
            }
        };

        // Same normalization as the registry, so reads and stores share a key.
        let name = call.name.trim();
        let cacheable = self.cache.should_cache(name);
        if cacheable {
            if let Some(hit) = self.cache.try_get(name, &arguments) {
                let elapsed = started.elapsed();
                self.metrics.record_cache_hit(elapsed);
                return Ok(ToolResponse {
                    result: hit.result,
                    change_token: hit.change_token,
                    cache_hit: true,
                    elapsed,
                });
            }
            self.metrics.record_cache_miss();
        }

        let registration = match self.registry.lookup(name) {
            Ok(registration) => registration,
            Err(err) => {
                tracing::debug!(tool = %name, "Call for unknown tool");
                self.metrics.record_failure(&err, started.elapsed());
                return Err(err);
            }
        };

        let on_host_thread = registration.requires_host_thread();
        self.metrics.record_dispatch(on_host_thread);
        let outcome = if on_host_thread {
            let job = HostJob::Tool {
                registration: Arc::clone(&registration),
                arguments: arguments.clone(),
                request_id: call.request_id.clone(),
            };
            self.queue
                .submit(job, call.deadline.or(self.default_deadline))
                .await
        } else {
            self.run_inline(&registration, &arguments, call.request_id.clone())
        };

        let elapsed = started.elapsed();
        match outcome {
            Ok(result) => {
                self.metrics.record_result(result.is_error, elapsed);
                if !result.is_error {
                    if cacheable {
                        self.cache.put(registration.name(), &arguments, &result);
                    } else {
                        self.invalidate_related(registration.name());
                    }
                }
                tracing::debug!(
                    tool = %registration.name(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    is_error = result.is_error,
                    "Tool call completed"
                );
                Ok(ToolResponse {
                    change_token: change_token(&result),
                    result,
                    cache_hit: false,
                    elapsed,
                })
            }
            Err(err) => {
                self.metrics.record_failure(&err, elapsed);
                tracing::warn!(tool = %registration.name(), error = %err, "Tool call failed");
                Err(err)
            }
        }
    }

    fn run_inline(
        &self,
        registration: &ToolRegistration,
        arguments: &Value,
        request_id: Option<RequestId>,
    ) -> CallOutcome {
        let ctx = InvocationContext {
            call_id: self.inline_call_ids.fetch_add(1, Ordering::Relaxed) + 1,
            tool_name: registration.name().to_string(),
            request_id,
            on_host_thread: false,
        };
        let started = Instant::now();
        let outcome = run_guarded(registration.name(), || {
            registration.handler().invoke(&ctx, arguments)
        });
        let succeeded = matches!(&outcome, Ok(result) if !result.is_error);
        registration.record_execution(started.elapsed(), succeeded);
        outcome
    }

    fn invalidate_related(&self, tool: &str) {
        let Some(pattern) = self.cache.policy().related_read_pattern(tool) else {
            return;
        };
        match self.cache.invalidate_pattern(&pattern) {
            Ok(0) => {}
            Ok(removed) => {
                tracing::debug!(tool = %tool, removed, "Invalidated reads after mutation")
            }
            Err(e) => tracing::warn!(tool = %tool, error = %e, "Bad invalidation pattern"),
        }
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        self.registry.list_all()
    }

    /// Register a host-bound tool.
    pub fn register_tool(
        &self,
        name: &str,
        description: &str,
        handler: impl ToolHandler + 'static,
    ) -> Result<bool, ToolRegistryError> {
        self.register_tool_with(ToolDefinition::new(name, description, handler))
    }

    pub fn register_tool_with(&self, definition: ToolDefinition) -> Result<bool, ToolRegistryError> {
        let name = definition.name.clone();
        let replaced = self.registry.register_definition(definition)?;
        if replaced {
            self.cache.invalidate_tool(&name);
        }
        Ok(replaced)
    }

    pub fn unregister_tool(&self, name: &str) -> bool {
        let removed = self.registry.unregister(name);
        if removed {
            self.cache.invalidate_tool(name);
        }
        removed
    }

    pub fn register_resource(
        &self,
        descriptor: ResourceDescriptor,
        handler: impl ResourceHandler + 'static,
    ) -> bool {
        self.resources.register(descriptor, handler)
    }

    pub fn list_resources(&self) -> Vec<ResourceDescriptor> {
        self.resources.list_all()
    }

    /// Read a resource on the host thread.
    pub async fn read_resource(&self, uri: &str) -> Result<ResourceContents, CallError> {
        let registration = self.resources.lookup(uri)?;
        let result = self
            .queue
            .submit(HostJob::ReadResource { registration }, self.default_deadline)
            .await?;
        let payload = result.structured_content.unwrap_or(Value::Null);
        serde_json::from_value(payload).map_err(|e| CallError::HandlerFailure {
            tool: uri.to_string(),
            message: format!("malformed resource contents: {}", e),
        })
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &SharedResponseCache {
        &self.cache
    }

    pub fn queue(&self) -> &Arc<DispatchQueue> {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::config::CacheConfig;
    use crate::dispatch::NoopTick;
    use hostbridge_core::handler_fn;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn orchestrator() -> RequestOrchestrator {
        let config = DispatchConfig::default();
        RequestOrchestrator::new(
            Arc::new(ToolRegistry::new()),
            Arc::new(ResourceRegistry::new()),
            Arc::new(ResponseCache::new(&CacheConfig::default())),
            Arc::new(DispatchQueue::new(&config, Arc::new(NoopTick))),
            &config,
        )
    }

    fn counting(counter: &Arc<AtomicUsize>) -> impl ToolHandler {
        let counter = Arc::clone(counter);
        handler_fn(move |_ctx, _args| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ToolResult::json(json!({ "n": n })))
        })
    }

    #[tokio::test]
    async fn test_unknown_tool_not_found() {
        let orch = orchestrator();
        let err = orch
            .execute_tool(ToolCall::new("nonexistent_tool", json!({})))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(orch.metrics().not_found, 1);
    }

    #[tokio::test]
    async fn test_rejects_non_object_arguments() {
        let orch = orchestrator();
        let err = orch
            .execute_tool(ToolCall::new("anything", json!([1, 2])))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::InvalidCall(_)));
    }

    #[tokio::test]
    async fn test_free_threaded_runs_inline_and_caches() {
        let orch = orchestrator();
        let calls = Arc::new(AtomicUsize::new(0));
        orch.register_tool_with(
            ToolDefinition::new("list_assets", "List assets", counting(&calls)).free_threaded(),
        )
        .unwrap();

        let first = orch
            .execute_tool(ToolCall::new("list_assets", json!({ "folder": "a" })))
            .await
            .unwrap();
        assert!(!first.cache_hit);

        let second = orch
            .execute_tool(ToolCall::new("LIST_ASSETS", json!({ "folder": "a" })))
            .await
            .unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.result, first.result);
        assert_eq!(second.change_token, first.change_token);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Null arguments mean "no arguments"
        orch.execute_tool(ToolCall::new("list_assets", Value::Null))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_padded_name_reads_cached_result() {
        let orch = orchestrator();
        let calls = Arc::new(AtomicUsize::new(0));
        orch.register_tool_with(
            ToolDefinition::new("get_info", "", counting(&calls)).free_threaded(),
        )
        .unwrap();

        let first = orch
            .execute_tool(ToolCall::new(" get_info", json!({ "id": 7 })))
            .await
            .unwrap();
        assert!(!first.cache_hit);
        let second = orch
            .execute_tool(ToolCall::new(" get_info", json!({ "id": 7 })))
            .await
            .unwrap();
        assert!(second.cache_hit);
        let third = orch
            .execute_tool(ToolCall::new("GET_INFO ", json!({ "id": 7 })))
            .await
            .unwrap();
        assert!(third.cache_hit);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(orch.cache().stats().total_entries, 1);
    }

    #[tokio::test]
    async fn test_mutation_invalidates_related_reads() {
        let orch = orchestrator();
        let reads = Arc::new(AtomicUsize::new(0));
        let writes = Arc::new(AtomicUsize::new(0));
        orch.register_tool_with(
            ToolDefinition::new("list_assets", "", counting(&reads)).free_threaded(),
        )
        .unwrap();
        orch.register_tool_with(
            ToolDefinition::new("create_asset", "", counting(&writes)).free_threaded(),
        )
        .unwrap();

        orch.execute_tool(ToolCall::new("list_assets", json!({})))
            .await
            .unwrap();
        orch.execute_tool(ToolCall::new("create_asset", json!({ "name": "x" })))
            .await
            .unwrap();
        let after = orch
            .execute_tool(ToolCall::new("list_assets", json!({})))
            .await
            .unwrap();

        assert!(!after.cache_hit);
        assert_eq!(reads.load(Ordering::SeqCst), 2);
        assert_eq!(orch.cache().stats().entries_per_tool.get("create_asset"), None);
    }

    #[tokio::test]
    async fn test_failures_not_cached() {
        let orch = orchestrator();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        orch.register_tool_with(
            ToolDefinition::new(
                "get_flaky",
                "",
                handler_fn(move |_ctx, _args| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("backend unavailable".into())
                }),
            )
            .free_threaded(),
        )
        .unwrap();

        for _ in 0..2 {
            let err = orch
                .execute_tool(ToolCall::new("get_flaky", json!({})))
                .await
                .unwrap_err();
            assert!(matches!(err, CallError::HandlerFailure { .. }));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(orch.metrics().handler_failures, 2);
        assert_eq!(orch.registry().tool_stats("get_flaky").unwrap().failure_count, 2);
    }

    #[tokio::test]
    async fn test_unregister_drops_cached_results() {
        let orch = orchestrator();
        let calls = Arc::new(AtomicUsize::new(0));
        orch.register_tool_with(
            ToolDefinition::new("get_info", "", counting(&calls)).free_threaded(),
        )
        .unwrap();
        orch.execute_tool(ToolCall::new("get_info", json!({})))
            .await
            .unwrap();
        assert_eq!(orch.cache().stats().total_entries, 1);

        assert!(orch.unregister_tool("get_info"));
        assert_eq!(orch.cache().stats().total_entries, 0);
        assert!(orch
            .execute_tool(ToolCall::new("get_info", json!({})))
            .await
            .unwrap_err()
            .is_not_found());
    }
}
