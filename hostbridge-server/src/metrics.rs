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

//! Request-level execution metrics.

use hostbridge_core::CallError;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct ExecutionMetrics {
    calls: AtomicU64,
    successes: AtomicU64,
    error_results: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    not_found: AtomicU64,
    handler_failures: AtomicU64,
    timeouts: AtomicU64,
    other_failures: AtomicU64,
    host_thread_calls: AtomicU64,
    free_threaded_calls: AtomicU64,
    total_latency_micros: AtomicU64,
}

/// Point-in-time copy of [`ExecutionMetrics`].
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub calls: u64,
    pub successes: u64,
    /// Handler-produced results flagged as errors.
    pub error_results: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub not_found: u64,
    pub handler_failures: u64,
    pub timeouts: u64,
    pub other_failures: u64,
    pub host_thread_calls: u64,
    pub free_threaded_calls: u64,
    pub average_latency: Duration,
}

impl ExecutionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn finish(&self, latency: Duration) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.total_latency_micros
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self, latency: Duration) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.finish(latency);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch(&self, on_host_thread: bool) {
        if on_host_thread {
            self.host_thread_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.free_threaded_calls.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_result(&self, is_error: bool, latency: Duration) {
        if is_error {
            self.error_results.fetch_add(1, Ordering::Relaxed);
        } else {
            self.successes.fetch_add(1, Ordering::Relaxed);
        }
        self.finish(latency);
    }

    pub fn record_failure(&self, error: &CallError, latency: Duration) {
        let counter = match error {
            CallError::NotFound { .. } | CallError::ResourceNotFound { .. } => &self.not_found,
            CallError::HandlerFailure { .. } => &self.handler_failures,
            CallError::Timeout { .. } => &self.timeouts,
            _ => &self.other_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.finish(latency);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let calls = self.calls.load(Ordering::Relaxed);
        let total = self.total_latency_micros.load(Ordering::Relaxed);
        MetricsSnapshot {
            calls,
            successes: self.successes.load(Ordering::Relaxed),
            error_results: self.error_results.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            other_failures: self.other_failures.load(Ordering::Relaxed),
            host_thread_calls: self.host_thread_calls.load(Ordering::Relaxed),
            free_threaded_calls: self.free_threaded_calls.load(Ordering::Relaxed),
            average_latency: Duration::from_micros(total.checked_div(calls).unwrap_or(0)),
        }
    }
}
