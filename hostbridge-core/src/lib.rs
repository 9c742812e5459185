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

//! Hostbridge core types
//!
//! Shared vocabulary for the tool-execution engine: what a tool looks like
//! from the outside, what a call carries, what a handler returns and how a
//! call can fail. Nothing in this crate owns threads or async state.

pub mod error;
pub mod handler;
pub mod resource;
pub mod tool;

pub use error::CallError;
pub use handler::{handler_fn, FnHandler, HandlerError, InvocationContext, ToolHandler};
pub use resource::{
    resource_fn, FnResourceHandler, ResourceContents, ResourceDescriptor, ResourceHandler,
};
pub use tool::{RequestId, ToolCall, ToolContent, ToolDescriptor, ToolResult};
