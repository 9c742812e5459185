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

//! Model Context Protocol (MCP) front end
//!
//! Exposes the orchestrator to MCP clients over newline-delimited JSON-RPC
//! 2.0, normally on stdin/stdout:
//!
//! - **Tools**: `tools/list`, `tools/call`
//! - **Resources**: `resources/list`, `resources/read`
//! - **Lifecycle**: `initialize`, `ping`
//!
//! The serving loop is a [`ServingLoop`](crate::supervisor::ServingLoop), so
//! the supervisor restarts it when the transport dies.

pub mod handler;
pub mod protocol;
pub mod server;
pub mod transport;

pub use handler::McpHandler;
pub use protocol::*;
pub use server::{stdio_transport_factory, McpServingLoop, TransportFactory};
pub use transport::{ChannelClient, ChannelTransport, LineTransport, McpTransport, TransportError};
