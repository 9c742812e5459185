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

//! Readable resources addressed by URI.

use crate::handler::HandlerError;
use serde::{Deserialize, Serialize};

/// Public description of a registered resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub uri: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Contents returned by a resource read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceContents {
    pub uri: String,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub text: String,
}

impl ResourceContents {
    pub fn text(uri: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: Some("text/plain".to_string()),
            text: text.into(),
        }
    }

    pub fn json(uri: impl Into<String>, value: &serde_json::Value) -> Self {
        Self {
            uri: uri.into(),
            mime_type: Some("application/json".to_string()),
            text: value.to_string(),
        }
    }
}

pub trait ResourceHandler: Send + Sync {
    fn read(&self, uri: &str) -> Result<ResourceContents, HandlerError>;
}

pub struct FnResourceHandler<F>(F);

impl<F> ResourceHandler for FnResourceHandler<F>
where
    F: Fn(&str) -> Result<ResourceContents, HandlerError> + Send + Sync,
{
    fn read(&self, uri: &str) -> Result<ResourceContents, HandlerError> {
        (self.0)(uri)
    }
}

/// Wrap a closure as a resource handler.
pub fn resource_fn<F>(f: F) -> FnResourceHandler<F>
where
    F: Fn(&str) -> Result<ResourceContents, HandlerError> + Send + Sync,
{
    FnResourceHandler(f)
}
