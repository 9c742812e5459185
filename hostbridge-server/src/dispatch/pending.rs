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

//! Pending calls and their single-settlement result slots.

use crate::tool_registry::{ResourceRegistration, ToolRegistration};
use hostbridge_core::{CallError, RequestId, ToolResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::oneshot;

/// What a settled call delivers to its waiter.
pub type CallOutcome = Result<ToolResult, CallError>;

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum SettleError {
    #[error("Result slot already settled")]
    AlreadySettled,
}

/// Where a settled outcome ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// The waiter stopped waiting (deadline elapsed); the outcome was dropped.
    Abandoned,
}

/// Write-once slot paired with the waiter's receiver.
pub struct ResultSlot {
    sender: Mutex<Option<oneshot::Sender<CallOutcome>>>,
}

impl ResultSlot {
    pub fn channel() -> (Self, oneshot::Receiver<CallOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Settle the slot. Only the first call wins.
    pub fn settle(&self, outcome: CallOutcome) -> Result<Delivery, SettleError> {
        let sender = self
            .sender
            .lock()
            .take()
            .ok_or(SettleError::AlreadySettled)?;
        match sender.send(outcome) {
            Ok(()) => Ok(Delivery::Delivered),
            Err(_) => Ok(Delivery::Abandoned),
        }
    }
}

/// Work the host thread performs for a pending call.
pub enum HostJob {
    Tool {
        registration: Arc<ToolRegistration>,
        arguments: Value,
        request_id: Option<RequestId>,
    },
    ReadResource {
        registration: Arc<ResourceRegistration>,
    },
}

impl HostJob {
    /// Tool name or resource URI, for logs and errors.
    pub fn label(&self) -> &str {
        match self {
            HostJob::Tool { registration, .. } => registration.name(),
            HostJob::ReadResource { registration } => registration.uri(),
        }
    }
}

/// A call waiting for the host thread.
pub struct PendingCall {
    pub(crate) id: u64,
    pub(crate) job: HostJob,
    pub(crate) slot: ResultSlot,
    pub(crate) enqueued_at: Instant,
    pub(crate) deadline: Option<Instant>,
}

impl PendingCall {
    /// Enqueue sequence number.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        self.job.label()
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_once() {
        let (slot, mut rx) = ResultSlot::channel();
        assert_eq!(
            slot.settle(Ok(ToolResult::text("first"))),
            Ok(Delivery::Delivered)
        );
        assert_eq!(
            slot.settle(Ok(ToolResult::text("second"))),
            Err(SettleError::AlreadySettled)
        );

        let delivered = rx.try_recv().unwrap().unwrap();
        assert_eq!(delivered.text_content(), "first");
    }

    #[test]
    fn test_settle_after_waiter_gone_is_abandoned() {
        let (slot, rx) = ResultSlot::channel();
        drop(rx);
        assert_eq!(slot.settle(Err(CallError::QueueClosed)), Ok(Delivery::Abandoned));
    }

    #[test]
    fn test_concurrent_settle_has_single_winner() {
        let (slot, _rx) = ResultSlot::channel();
        let slot = Arc::new(slot);

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let slot = Arc::clone(&slot);
                std::thread::spawn(move || slot.settle(Ok(ToolResult::text(i.to_string()))).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
