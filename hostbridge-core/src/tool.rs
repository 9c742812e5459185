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

//! Tool descriptors, calls and results.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::time::Duration;

/// Identifier of the outer request a call belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{}", s),
            RequestId::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Public description of a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl ToolDescriptor {
    /// Input shape accepted when a tool does not declare one.
    pub fn default_input_schema() -> Value {
        json!({ "type": "object" })
    }
}

/// A parsed invocation request.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
    pub request_id: Option<RequestId>,
    /// Per-call deadline; overrides the engine default when set.
    pub deadline: Option<Duration>,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
            request_id: None,
            deadline: None,
        }
    }

    pub fn with_request_id(mut self, id: RequestId) -> Self {
        self.request_id = Some(id);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// One block of tool output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
}

/// Outcome of running a tool handler.
///
/// `is_error` marks a result that describes a failure. Such results are
/// delivered to the caller like any other but are never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<ToolContent>,
    #[serde(
        rename = "structuredContent",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub structured_content: Option<Value>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolResult {
    /// Successful plain-text result.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            structured_content: None,
            is_error: false,
        }
    }

    /// Successful structured result. The value is also rendered as text so
    /// clients that only read text content still see it.
    pub fn json(value: Value) -> Self {
        let text = value.to_string();
        Self {
            content: vec![ToolContent::Text { text }],
            structured_content: Some(value),
            is_error: false,
        }
    }

    /// Failure result carrying a message and a machine-readable code.
    pub fn failure(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            content: vec![ToolContent::Text {
                text: message.clone(),
            }],
            structured_content: Some(json!({ "error": { "code": code, "message": message } })),
            is_error: true,
        }
    }

    /// Concatenated text content.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .map(|c| match c {
                ToolContent::Text { text } => text.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Value used to derive the change token: structured content when
    /// present, otherwise the text blocks.
    pub fn payload(&self) -> Value {
        match &self.structured_content {
            Some(value) => value.clone(),
            None => Value::String(self.text_content()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_result_serializes_mcp_shape() {
        let result = ToolResult::json(json!({ "ok": true }));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["structuredContent"]["ok"], true);
        assert_eq!(value["isError"], false);
    }

    #[test]
    fn test_failure_result_is_error() {
        let result = ToolResult::failure("not_found", "Tool not found: nope");
        assert!(result.is_error);
        assert_eq!(result.text_content(), "Tool not found: nope");
        assert_eq!(result.payload()["error"]["code"], "not_found");
    }

    #[test]
    fn test_request_id_untagged() {
        let id: RequestId = serde_json::from_value(json!(7)).unwrap();
        assert_eq!(id, RequestId::Number(7));
        let id: RequestId = serde_json::from_value(json!("abc")).unwrap();
        assert_eq!(id.to_string(), "abc");
    }
}
