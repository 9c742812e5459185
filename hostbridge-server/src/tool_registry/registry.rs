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

//! Tool Registry - registration, lookup and execution statistics

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use hostbridge_core::{CallError, ToolDescriptor, ToolHandler};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;

/// Registry errors
#[derive(Debug, Error)]
pub enum ToolRegistryError {
    #[error("Invalid tool definition: {reason}")]
    InvalidDefinition { reason: String },
}

/// Emitted whenever the set of registered tools changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Registered {
        name: String,
        replaced: bool,
        requires_host_thread: bool,
    },
    Unregistered {
        name: String,
    },
}

/// Everything needed to register a tool.
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub requires_host_thread: bool,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDefinition {
    /// New definition with the default input shape, bound to the host thread.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: ToolDescriptor::default_input_schema(),
            requires_host_thread: true,
            handler: Arc::new(handler),
        }
    }

    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// Run on the calling thread instead of the host thread.
    pub fn free_threaded(mut self) -> Self {
        self.requires_host_thread = false;
        self
    }

    pub fn requires_host_thread(mut self, requires: bool) -> Self {
        self.requires_host_thread = requires;
        self
    }
}

#[derive(Debug, Default)]
struct ToolStatsInternal {
    call_count: AtomicU64,
    failure_count: AtomicU64,
    total_exec_nanos: AtomicU64,
    /// Unix millis of the last recorded execution, 0 when never called
    last_called_ms: AtomicI64,
}

/// Snapshot of one tool's execution statistics.
#[derive(Debug, Clone, Serialize)]
pub struct ToolStats {
    pub name: String,
    pub call_count: u64,
    pub failure_count: u64,
    pub total_execution_time: Duration,
    pub average_execution_time: Duration,
    pub last_called_at: Option<DateTime<Utc>>,
}

/// A registered tool.
pub struct ToolRegistration {
    name: String,
    description: String,
    input_schema: Value,
    requires_host_thread: bool,
    handler: Arc<dyn ToolHandler>,
    registered_at: DateTime<Utc>,
    stats: ToolStatsInternal,
}

impl std::fmt::Debug for ToolRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistration")
            .field("name", &self.name)
            .field("requires_host_thread", &self.requires_host_thread)
            .field("registered_at", &self.registered_at)
            .finish()
    }
}

impl ToolRegistration {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn requires_host_thread(&self) -> bool {
        self.requires_host_thread
    }

    pub fn handler(&self) -> &Arc<dyn ToolHandler> {
        &self.handler
    }

    pub fn registered_at(&self) -> DateTime<Utc> {
        self.registered_at
    }

    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }

    /// Count one execution. Failed executions still count as calls.
    pub fn record_execution(&self, elapsed: Duration, succeeded: bool) {
        self.stats.call_count.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_exec_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        if !succeeded {
            self.stats.failure_count.fetch_add(1, Ordering::Relaxed);
        }
        self.stats
            .last_called_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn stats(&self) -> ToolStats {
        let call_count = self.stats.call_count.load(Ordering::Relaxed);
        let total_nanos = self.stats.total_exec_nanos.load(Ordering::Relaxed);
        let last_ms = self.stats.last_called_ms.load(Ordering::Relaxed);
        ToolStats {
            name: self.name.clone(),
            call_count,
            failure_count: self.stats.failure_count.load(Ordering::Relaxed),
            total_execution_time: Duration::from_nanos(total_nanos),
            average_execution_time: Duration::from_nanos(
                total_nanos.checked_div(call_count).unwrap_or(0),
            ),
            last_called_at: if last_ms > 0 {
                Utc.timestamp_millis_opt(last_ms).single()
            } else {
                None
            },
        }
    }
}

/// Registry-wide counters.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub registered_tools: usize,
    pub host_thread_tools: usize,
    pub total_registrations: u64,
    pub total_lookups: u64,
    pub lookup_misses: u64,
}

#[derive(Debug, Default)]
struct RegistryMetrics {
    total_registrations: AtomicU64,
    total_lookups: AtomicU64,
    lookup_misses: AtomicU64,
}

/// Thread-safe tool registry keyed by case-folded name.
pub struct ToolRegistry {
    tools: DashMap<String, Arc<ToolRegistration>>,
    events: broadcast::Sender<RegistryEvent>,
    metrics: RegistryMetrics,
}

fn registry_key(name: &str) -> String {
    name.trim().to_lowercase()
}

impl ToolRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            tools: DashMap::new(),
            events,
            metrics: RegistryMetrics::default(),
        }
    }

    /// Register a bound-to-host-thread tool with the default input shape.
    pub fn register(
        &self,
        name: &str,
        description: &str,
        handler: impl ToolHandler + 'static,
    ) -> Result<bool, ToolRegistryError> {
        self.register_definition(ToolDefinition::new(name, description, handler))
    }

    /// Insert or replace a tool. Returns `true` when an earlier registration
    /// with the same (case-insensitive) name was replaced.
    pub fn register_definition(&self, definition: ToolDefinition) -> Result<bool, ToolRegistryError> {
        let name = definition.name.trim().to_string();
        if name.is_empty() {
            return Err(ToolRegistryError::InvalidDefinition {
                reason: "tool name must not be empty".to_string(),
            });
        }
        if !definition.input_schema.is_object() {
            return Err(ToolRegistryError::InvalidDefinition {
                reason: format!("input schema for {} must be a JSON object", name),
            });
        }

        let requires_host_thread = definition.requires_host_thread;
        let registration = Arc::new(ToolRegistration {
            name: name.clone(),
            description: definition.description,
            input_schema: definition.input_schema,
            requires_host_thread,
            handler: definition.handler,
            registered_at: Utc::now(),
            stats: ToolStatsInternal::default(),
        });

        let replaced = self
            .tools
            .insert(registry_key(&name), registration)
            .is_some();
        self.metrics
            .total_registrations
            .fetch_add(1, Ordering::Relaxed);

        tracing::info!(
            tool = %name,
            replaced,
            requires_host_thread,
            "Tool registered"
        );
        let _ = self.events.send(RegistryEvent::Registered {
            name,
            replaced,
            requires_host_thread,
        });

        Ok(replaced)
    }

    /// Remove a tool. Returns whether one was present.
    pub fn unregister(&self, name: &str) -> bool {
        match self.tools.remove(&registry_key(name)) {
            Some((_, registration)) => {
                tracing::info!(tool = %registration.name, "Tool unregistered");
                let _ = self.events.send(RegistryEvent::Unregistered {
                    name: registration.name.clone(),
                });
                true
            }
            None => false,
        }
    }

    pub fn lookup(&self, name: &str) -> Result<Arc<ToolRegistration>, CallError> {
        self.metrics.total_lookups.fetch_add(1, Ordering::Relaxed);
        match self.tools.get(&registry_key(name)) {
            Some(entry) => Ok(Arc::clone(entry.value())),
            None => {
                self.metrics.lookup_misses.fetch_add(1, Ordering::Relaxed);
                Err(CallError::NotFound {
                    name: name.to_string(),
                })
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(&registry_key(name))
    }

    /// All tool descriptors, ordered by case-folded name.
    pub fn list_all(&self) -> Vec<ToolDescriptor> {
        let mut entries: Vec<(String, ToolDescriptor)> = self
            .tools
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().descriptor()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, d)| d).collect()
    }

    /// Record one execution of `name`. Returns `false` when no such tool is
    /// registered any more.
    pub fn record_execution(&self, name: &str, elapsed: Duration) -> bool {
        match self.tools.get(&registry_key(name)) {
            Some(entry) => {
                entry.value().record_execution(elapsed, true);
                true
            }
            None => false,
        }
    }

    pub fn tool_stats(&self, name: &str) -> Option<ToolStats> {
        self.tools
            .get(&registry_key(name))
            .map(|entry| entry.value().stats())
    }

    pub fn all_tool_stats(&self) -> Vec<ToolStats> {
        let mut stats: Vec<ToolStats> = self.tools.iter().map(|e| e.value().stats()).collect();
        stats.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        stats
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Subscribe to registration events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            registered_tools: self.tools.len(),
            host_thread_tools: self
                .tools
                .iter()
                .filter(|e| e.value().requires_host_thread)
                .count(),
            total_registrations: self.metrics.total_registrations.load(Ordering::Relaxed),
            total_lookups: self.metrics.total_lookups.load(Ordering::Relaxed),
            lookup_misses: self.metrics.lookup_misses.load(Ordering::Relaxed),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
