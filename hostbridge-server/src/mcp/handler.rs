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

//! MCP Request Handlers
//!
//! Maps JSON-RPC methods onto the request orchestrator. Tool failures are
//! reported in-band as `isError` results; protocol problems (unknown method,
//! bad params) become JSON-RPC errors.

use crate::mcp::protocol::*;
use crate::orchestrator::RequestOrchestrator;
use hostbridge_core::{CallError, ToolCall};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct McpHandler {
    orchestrator: Arc<RequestOrchestrator>,
    server_name: String,
}

type MethodResult = Result<Value, JsonRpcError>;

fn parse_params<T: DeserializeOwned>(params: Option<Value>, method: &str) -> Result<T, JsonRpcError> {
    let params = params.ok_or_else(|| JsonRpcError::invalid_params(format!("Missing {} params", method)))?;
    serde_json::from_value(params)
        .map_err(|e| JsonRpcError::invalid_params(format!("Invalid {} params: {}", method, e)))
}

fn to_value<T: serde::Serialize>(value: T) -> MethodResult {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}

impl McpHandler {
    pub fn new(orchestrator: Arc<RequestOrchestrator>, server_name: impl Into<String>) -> Self {
        Self {
            orchestrator,
            server_name: server_name.into(),
        }
    }

    /// Handle a JSON-RPC request. Notifications produce no response.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let Some(id) = request.id else {
            debug!(method = %request.method, "MCP notification received");
            return None;
        };
        debug!(method = %request.method, "MCP request received");

        let result = match request.method.as_str() {
            "ping" => Ok(json!({})),
            "initialize" => self.handle_initialize(),
            "tools/list" => to_value(ListToolsResult {
                tools: self.orchestrator.list_tools(),
            }),
            "tools/call" => self.handle_tools_call(&id, request.params).await,
            "resources/list" => to_value(ListResourcesResult {
                resources: self.orchestrator.list_resources(),
            }),
            "resources/read" => self.handle_resources_read(request.params).await,
            other => {
                warn!(method = %other, "Unknown MCP method");
                Err(JsonRpcError::method_not_found(other))
            }
        };

        Some(match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(error) => JsonRpcResponse::error(id, error),
        })
    }

    fn handle_initialize(&self) -> MethodResult {
        to_value(InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                resources: Some(ResourcesCapability {
                    subscribe: false,
                    list_changed: false,
                }),
                tools: Some(ToolsCapability { list_changed: true }),
            },
            server_info: ServerInfo {
                name: self.server_name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        })
    }

    async fn handle_tools_call(&self, id: &JsonRpcId, params: Option<Value>) -> MethodResult {
        let params: CallToolParams = parse_params(params, "tools/call")?;
        let mut call = ToolCall::new(params.name, params.arguments);
        if let Some(request_id) = id.as_request_id() {
            call = call.with_request_id(request_id);
        }
        if let Some(ms) = params.meta.and_then(|m| m.timeout_ms) {
            call = call.with_deadline(Duration::from_millis(ms));
        }

        match self.orchestrator.execute_tool(call).await {
            Ok(response) => {
                let mut value = to_value(&response.result)?;
                if let Value::Object(map) = &mut value {
                    map.insert(
                        "_meta".to_string(),
                        json!({
                            "etag": response.change_token,
                            "cacheHit": response.cache_hit,
                        }),
                    );
                }
                Ok(value)
            }
            Err(CallError::InvalidCall(reason)) => Err(JsonRpcError::invalid_params(reason)),
            Err(err) => to_value(err.to_result()),
        }
    }

    async fn handle_resources_read(&self, params: Option<Value>) -> MethodResult {
        let params: ReadResourceParams = parse_params(params, "resources/read")?;
        match self.orchestrator.read_resource(&params.uri).await {
            Ok(contents) => to_value(ReadResourceResult {
                contents: vec![contents],
            }),
            Err(CallError::ResourceNotFound { uri }) => Err(JsonRpcError::resource_not_found(&uri)),
            Err(err) => Err(JsonRpcError::internal_error(err.to_string())),
        }
    }
}
