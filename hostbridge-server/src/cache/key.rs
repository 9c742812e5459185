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

//! Cache keys and change tokens.
//!
//! Both are blake3 digests of a canonical JSON rendering in which object
//! keys are sorted at every depth, so logically equal arguments hash the
//! same regardless of the order a client wrote them in.

use hostbridge_core::ToolResult;
use serde_json::Value;
use std::fmt;

/// Key of one cached response: trimmed, case-folded tool name plus argument
/// digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub tool: String,
    pub digest: String,
}

impl CacheKey {
    pub fn new(tool: &str, arguments: &Value) -> Self {
        Self {
            tool: tool.trim().to_lowercase(),
            digest: digest_hex(arguments),
        }
    }
}

/// Rendered as `tool:digest`; invalidation patterns match against this form.
impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tool, self.digest)
    }
}

/// Opaque token that changes exactly when the result content changes.
/// Quoted so it can be used verbatim as an HTTP-style ETag.
pub fn change_token(result: &ToolResult) -> String {
    let hash = blake3::hash(canonical_json(&result.payload()).as_bytes());
    format!("\"{}\"", hex::encode(&hash.as_bytes()[..16]))
}

fn digest_hex(value: &Value) -> String {
    hex::encode(blake3::hash(canonical_json(value).as_bytes()).as_bytes())
}

/// JSON text with object keys sorted recursively.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
