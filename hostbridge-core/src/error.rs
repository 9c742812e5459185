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

//! Call failure taxonomy.
//!
//! Every way a call can end without a handler-produced value maps to one
//! variant here, and every variant can be rendered as a failure
//! [`ToolResult`] so the caller always receives a well-formed answer.

use crate::tool::ToolResult;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    #[error("Tool not found: {name}")]
    NotFound { name: String },

    #[error("Resource not found: {uri}")]
    ResourceNotFound { uri: String },

    #[error("Tool {tool} failed: {message}")]
    HandlerFailure { tool: String, message: String },

    #[error("Tool {tool} timed out after {waited_ms}ms")]
    Timeout { tool: String, waited_ms: u64 },

    #[error("Restart attempts exhausted ({attempts} attempts), retry after {retry_after_ms}ms")]
    SupervisorExhausted { attempts: u32, retry_after_ms: u64 },

    #[error("Invalid call: {0}")]
    InvalidCall(String),

    #[error("Dispatch queue closed")]
    QueueClosed,
}

impl CallError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            CallError::NotFound { .. } => "not_found",
            CallError::ResourceNotFound { .. } => "resource_not_found",
            CallError::HandlerFailure { .. } => "handler_failure",
            CallError::Timeout { .. } => "timeout",
            CallError::SupervisorExhausted { .. } => "supervisor_exhausted",
            CallError::InvalidCall(_) => "invalid_call",
            CallError::QueueClosed => "queue_closed",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CallError::NotFound { .. } | CallError::ResourceNotFound { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout { .. })
    }

    /// Render as a failure result for delivery to the caller.
    pub fn to_result(&self) -> ToolResult {
        ToolResult::failure(self.code(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_result() {
        let err = CallError::NotFound {
            name: "nonexistent_tool".into(),
        };
        assert!(err.is_not_found());
        let result = err.to_result();
        assert!(result.is_error);
        assert_eq!(result.text_content(), "Tool not found: nonexistent_tool");
        assert_eq!(result.payload()["error"]["code"], "not_found");
    }

    #[test]
    fn test_timeout_message() {
        let err = CallError::Timeout {
            tool: "slow".into(),
            waited_ms: 1,
        };
        assert!(err.is_timeout());
        assert_eq!(err.to_string(), "Tool slow timed out after 1ms");
    }
}
