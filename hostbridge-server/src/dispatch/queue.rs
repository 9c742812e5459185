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

//! Cross-thread dispatch queue.
//!
//! Many producers, one consumer. Producers call [`DispatchQueue::submit`]
//! from any thread or task; the host thread calls
//! [`DispatchQueue::drain_tick`] once per tick and nothing else touches the
//! consumer side.

use super::host::TickRequester;
use super::pending::{CallOutcome, Delivery, HostJob, PendingCall, ResultSlot, SettleError};
use super::run_guarded;
use crate::config::{DispatchConfig, ExpiredCallPolicy};
use hostbridge_core::{CallError, InvocationContext, ToolResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::ThreadId;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("drain_tick called from a thread other than the host thread")]
    WrongThread,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub executed: usize,
    pub failed: usize,
    /// Executed calls whose waiter had already given up.
    pub abandoned: usize,
    pub skipped_expired: usize,
    /// Calls still queued after the tick.
    pub remaining: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchStats {
    pub queue_depth: usize,
    pub enqueued: u64,
    pub executed: u64,
    pub failed: u64,
    pub abandoned: u64,
    pub skipped_expired: u64,
    pub waiter_timeouts: u64,
    pub ticks: u64,
    pub max_queue_wait: Duration,
}

#[derive(Debug, Default)]
struct DispatchStatsInternal {
    enqueued: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
    skipped_expired: AtomicU64,
    waiter_timeouts: AtomicU64,
    ticks: AtomicU64,
    max_wait_micros: AtomicU64,
}

struct QueueState {
    calls: VecDeque<PendingCall>,
    next_id: u64,
    closed: bool,
}

pub struct DispatchQueue {
    state: Mutex<QueueState>,
    max_calls_per_tick: usize,
    expired_calls: ExpiredCallPolicy,
    waker: Arc<dyn TickRequester>,
    host_thread: OnceLock<ThreadId>,
    stats: DispatchStatsInternal,
}

impl DispatchQueue {
    pub fn new(config: &DispatchConfig, waker: Arc<dyn TickRequester>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                calls: VecDeque::new(),
                next_id: 1,
                closed: false,
            }),
            max_calls_per_tick: config.max_calls_per_tick.max(1),
            expired_calls: config.expired_calls,
            waker,
            host_thread: OnceLock::new(),
            stats: DispatchStatsInternal::default(),
        }
    }

    /// Enqueue a job and wait for the host thread to settle it.
    ///
    /// With a deadline, the wait ends with [`CallError::Timeout`] once it
    /// elapses. The job itself stays queued and is still executed (unless
    /// the queue is configured to skip expired calls); its result is then
    /// discarded.
    pub async fn submit(&self, job: HostJob, deadline: Option<Duration>) -> CallOutcome {
        let label = job.label().to_string();
        let (slot, rx) = ResultSlot::channel();
        let now = Instant::now();

        let call_id = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(CallError::QueueClosed);
            }
            let id = state.next_id;
            state.next_id += 1;
            state.calls.push_back(PendingCall {
                id,
                job,
                slot,
                enqueued_at: now,
                deadline: deadline.map(|d| now + d),
            });
            id
        };
        self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(call_id, tool = %label, "Call enqueued for host thread");
        self.waker.request_tick();

        let received = match deadline {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.stats.waiter_timeouts.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        call_id,
                        tool = %label,
                        deadline_ms = limit.as_millis() as u64,
                        "Host-thread call timed out; result will be discarded"
                    );
                    return Err(CallError::Timeout {
                        tool: label,
                        waited_ms: limit.as_millis() as u64,
                    });
                }
            },
            None => rx.await,
        };

        // A dropped sender means the call was discarded unsettled.
        received.unwrap_or(Err(CallError::QueueClosed))
    }

    /// Bind the calling thread as the host thread. The first `drain_tick`
    /// does this implicitly.
    pub fn bind_host_thread(&self) -> Result<(), DispatchError> {
        let current = std::thread::current().id();
        if *self.host_thread.get_or_init(|| current) == current {
            Ok(())
        } else {
            Err(DispatchError::WrongThread)
        }
    }

    pub fn is_host_thread(&self) -> bool {
        self.host_thread.get() == Some(&std::thread::current().id())
    }

    /// Execute up to `max_calls_per_tick` queued calls in FIFO order.
    ///
    /// Must be called from the host thread. Calls enqueued while the tick
    /// runs are eligible for this tick if the cap has not been reached.
    pub fn drain_tick(&self) -> Result<TickReport, DispatchError> {
        self.bind_host_thread()?;

        let mut report = TickReport::default();
        let mut taken = 0;
        while taken < self.max_calls_per_tick {
            let next = self.state.lock().calls.pop_front();
            let Some(call) = next else { break };
            taken += 1;

            let now = Instant::now();
            let waited = now.saturating_duration_since(call.enqueued_at);
            self.stats
                .max_wait_micros
                .fetch_max(waited.as_micros() as u64, Ordering::Relaxed);

            if call.is_expired(now) && self.expired_calls == ExpiredCallPolicy::Skip {
                tracing::debug!(call_id = call.id, tool = %call.label(), "Skipping expired call");
                let _ = call.slot.settle(Err(CallError::Timeout {
                    tool: call.label().to_string(),
                    waited_ms: waited.as_millis() as u64,
                }));
                report.skipped_expired += 1;
                self.stats.skipped_expired.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            let outcome = execute(&call);
            report.executed += 1;
            self.stats.executed.fetch_add(1, Ordering::Relaxed);
            if outcome.is_err() {
                report.failed += 1;
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
            }

            match call.slot.settle(outcome) {
                Ok(Delivery::Delivered) => {}
                Ok(Delivery::Abandoned) => {
                    report.abandoned += 1;
                    self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        call_id = call.id,
                        tool = %call.label(),
                        "Waiter gone; discarding result"
                    );
                }
                Err(SettleError::AlreadySettled) => {
                    tracing::warn!(call_id = call.id, tool = %call.label(), "Call settled twice");
                }
            }
        }

        report.remaining = self.len();
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
        if report.executed > 0 || report.skipped_expired > 0 {
            tracing::trace!(
                executed = report.executed,
                remaining = report.remaining,
                "Host tick drained queue"
            );
        }
        Ok(report)
    }

    /// Refuse new submissions and fail every queued call.
    pub fn close(&self) -> usize {
        let drained: Vec<PendingCall> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.calls.drain(..).collect()
        };
        for call in &drained {
            let _ = call.slot.settle(Err(CallError::QueueClosed));
        }
        if !drained.is_empty() {
            tracing::warn!(discarded = drained.len(), "Dispatch queue closed with calls pending");
        }
        drained.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_calls_per_tick(&self) -> usize {
        self.max_calls_per_tick
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            queue_depth: self.len(),
            enqueued: self.stats.enqueued.load(Ordering::Relaxed),
            executed: self.stats.executed.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            abandoned: self.stats.abandoned.load(Ordering::Relaxed),
            skipped_expired: self.stats.skipped_expired.load(Ordering::Relaxed),
            waiter_timeouts: self.stats.waiter_timeouts.load(Ordering::Relaxed),
            ticks: self.stats.ticks.load(Ordering::Relaxed),
            max_queue_wait: Duration::from_micros(
                self.stats.max_wait_micros.load(Ordering::Relaxed),
            ),
        }
    }
}

fn execute(call: &PendingCall) -> CallOutcome {
    match &call.job {
        HostJob::Tool {
            registration,
            arguments,
            request_id,
        } => {
            let ctx = InvocationContext {
                call_id: call.id,
                tool_name: registration.name().to_string(),
                request_id: request_id.clone(),
                on_host_thread: true,
            };
            let started = Instant::now();
            let outcome = run_guarded(registration.name(), || {
                registration.handler().invoke(&ctx, arguments)
            });
            let succeeded = matches!(&outcome, Ok(result) if !result.is_error);
            registration.record_execution(started.elapsed(), succeeded);
            outcome
        }
        HostJob::ReadResource { registration } => run_guarded(registration.uri(), || {
            let contents = registration.handler().read(registration.uri())?;
            Ok(ToolResult::json(serde_json::to_value(contents)?))
        }),
    }
}
