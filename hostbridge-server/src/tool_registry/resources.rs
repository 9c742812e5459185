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

//! Resource registry keyed by exact URI.

use dashmap::DashMap;
use hostbridge_core::{CallError, ResourceDescriptor, ResourceHandler};
use std::sync::Arc;

pub struct ResourceRegistration {
    descriptor: ResourceDescriptor,
    handler: Arc<dyn ResourceHandler>,
}

impl ResourceRegistration {
    pub fn uri(&self) -> &str {
        &self.descriptor.uri
    }

    pub fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }

    pub fn handler(&self) -> &Arc<dyn ResourceHandler> {
        &self.handler
    }
}

#[derive(Default)]
pub struct ResourceRegistry {
    resources: DashMap<String, Arc<ResourceRegistration>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace. Returns `true` when a resource with the same URI
    /// was replaced.
    pub fn register(
        &self,
        descriptor: ResourceDescriptor,
        handler: impl ResourceHandler + 'static,
    ) -> bool {
        let uri = descriptor.uri.clone();
        let replaced = self
            .resources
            .insert(
                uri.clone(),
                Arc::new(ResourceRegistration {
                    descriptor,
                    handler: Arc::new(handler),
                }),
            )
            .is_some();
        tracing::info!(uri = %uri, replaced, "Resource registered");
        replaced
    }

    pub fn unregister(&self, uri: &str) -> bool {
        self.resources.remove(uri).is_some()
    }

    pub fn lookup(&self, uri: &str) -> Result<Arc<ResourceRegistration>, CallError> {
        self.resources
            .get(uri)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| CallError::ResourceNotFound {
                uri: uri.to_string(),
            })
    }

    /// All descriptors ordered by URI.
    pub fn list_all(&self) -> Vec<ResourceDescriptor> {
        let mut list: Vec<ResourceDescriptor> = self
            .resources
            .iter()
            .map(|entry| entry.value().descriptor.clone())
            .collect();
        list.sort_by(|a, b| a.uri.cmp(&b.uri));
        list
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostbridge_core::{resource_fn, ResourceContents};

    fn descriptor(uri: &str) -> ResourceDescriptor {
        ResourceDescriptor {
            uri: uri.to_string(),
            name: uri.rsplit('/').next().unwrap_or(uri).to_string(),
            description: None,
            mime_type: Some("text/plain".into()),
        }
    }

    #[test]
    fn test_register_lookup_exact_uri() {
        let registry = ResourceRegistry::new();
        registry.register(
            descriptor("host://scene/hierarchy"),
            resource_fn(|uri| Ok(ResourceContents::text(uri, "root"))),
        );

        let resource = registry.lookup("host://scene/hierarchy").unwrap();
        let contents = resource.handler().read(resource.uri()).unwrap();
        assert_eq!(contents.text, "root");

        assert!(matches!(
            registry.lookup("host://scene/Hierarchy"),
            Err(CallError::ResourceNotFound { .. })
        ));
    }

    #[test]
    fn test_list_sorted_and_unregister() {
        let registry = ResourceRegistry::new();
        let handler = || resource_fn(|uri| Ok(ResourceContents::text(uri, "")));
        registry.register(descriptor("host://b"), handler());
        registry.register(descriptor("host://a"), handler());
        assert!(registry.register(descriptor("host://a"), handler()));

        let uris: Vec<String> = registry.list_all().into_iter().map(|d| d.uri).collect();
        assert_eq!(uris, vec!["host://a", "host://b"]);

        assert!(registry.unregister("host://a"));
        assert_eq!(registry.len(), 1);
    }
}
