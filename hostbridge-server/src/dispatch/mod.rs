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

//! Cross-Thread Dispatch
//!
//! Moves calls for host-bound tools from whatever thread received them onto
//! the host's single cooperative thread, and carries results back.
//!
//! ## Architecture
//!
//! ```text
//!  request tasks (any thread)                 host thread (one)
//!  ──────────────────────────                 ─────────────────
//!  submit(job, deadline)                       external tick
//!    │ lock; id = next_id++; push_back           │
//!    │ request_tick() ───────── wake ──────────► drain_tick()
//!    │                                            │ pop_front (≤ cap)
//!    ▼                                            │ catch_unwind(handler)
//!  await oneshot (timeout) ◄──── settle once ──── ┘
//! ```
//!
//! ## Guarantees
//!
//! - Calls execute in enqueue order; ids are assigned under the same lock as
//!   the push, so id order is execution order.
//! - A tick runs at most `max_calls_per_tick` calls; the rest wait for the
//!   next tick.
//! - Every call is settled exactly once. A waiter that times out only stops
//!   waiting; the host still executes the call and drops the result.
//! - A panicking handler settles its call with a failure and the tick
//!   continues.

mod host;
mod pending;
mod queue;

pub use host::{HostThread, NoopTick, TickRequester, TickSignal};
pub use pending::{CallOutcome, Delivery, HostJob, PendingCall, ResultSlot, SettleError};
pub use queue::{DispatchError, DispatchQueue, DispatchStats, TickReport};

use hostbridge_core::{CallError, HandlerError, ToolResult};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run a handler, turning both returned errors and panics into
/// [`CallError::HandlerFailure`].
pub(crate) fn run_guarded<F>(tool: &str, f: F) -> CallOutcome
where
    F: FnOnce() -> Result<ToolResult, HandlerError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(err)) => Err(CallError::HandlerFailure {
            tool: tool.to_string(),
            message: err.message,
        }),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(tool = %tool, panic = %message, "Tool handler panicked");
            Err(CallError::HandlerFailure {
                tool: tool.to_string(),
                message,
            })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}
