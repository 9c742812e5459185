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

//! Tool handler trait.
//!
//! Handlers are synchronous: host-thread handlers run inside the host's tick
//! and must not block on anything the host thread itself has to drive.

use crate::tool::{RequestId, ToolResult};
use serde_json::Value;
use thiserror::Error;

/// Failure raised by a handler.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct HandlerError {
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Error for arguments that do not match the tool's input shape.
    pub fn invalid_arguments(detail: impl std::fmt::Display) -> Self {
        Self::new(format!("Invalid arguments: {}", detail))
    }
}

impl From<String> for HandlerError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for HandlerError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_arguments(err)
    }
}

/// Information about the invocation passed to every handler.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// Enqueue sequence number for host-thread calls, a separate counter for
    /// free-threaded ones.
    pub call_id: u64,
    pub tool_name: String,
    pub request_id: Option<RequestId>,
    pub on_host_thread: bool,
}

/// A callable tool implementation.
pub trait ToolHandler: Send + Sync {
    fn invoke(&self, ctx: &InvocationContext, arguments: &Value) -> Result<ToolResult, HandlerError>;
}

/// Adapter turning a closure into a [`ToolHandler`].
pub struct FnHandler<F>(F);

impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(&InvocationContext, &Value) -> Result<ToolResult, HandlerError> + Send + Sync,
{
    fn invoke(&self, ctx: &InvocationContext, arguments: &Value) -> Result<ToolResult, HandlerError> {
        (self.0)(ctx, arguments)
    }
}

/// Wrap a closure as a tool handler.
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&InvocationContext, &Value) -> Result<ToolResult, HandlerError> + Send + Sync,
{
    FnHandler(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> InvocationContext {
        InvocationContext {
            call_id: 1,
            tool_name: "echo".into(),
            request_id: None,
            on_host_thread: false,
        }
    }

    #[test]
    fn test_handler_fn_invokes_closure() {
        let handler = handler_fn(|_ctx, args| Ok(ToolResult::json(args.clone())));
        let result = handler.invoke(&ctx(), &json!({ "x": 1 })).unwrap();
        assert_eq!(result.structured_content, Some(json!({ "x": 1 })));
    }

    #[test]
    fn test_serde_error_becomes_invalid_arguments() {
        #[derive(serde::Deserialize, Debug)]
        #[allow(dead_code)]
        struct Args {
            path: String,
        }

        let handler = handler_fn(|_ctx, args| {
            let parsed: Args = serde_json::from_value(args.clone())?;
            Ok(ToolResult::text(parsed.path))
        });
        let err = handler.invoke(&ctx(), &json!({})).unwrap_err();
        assert!(err.message.starts_with("Invalid arguments"));
    }
}
