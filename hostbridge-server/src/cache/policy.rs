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

//! Name-based classification of tools into read-only and mutating.

use crate::config::CacheConfig;

#[derive(Debug, Clone)]
pub struct CachePolicy {
    allow_prefixes: Vec<String>,
    allow_suffixes: Vec<String>,
    deny_prefixes: Vec<String>,
}

fn lowered(patterns: &[String]) -> Vec<String> {
    patterns.iter().map(|p| p.to_lowercase()).collect()
}

impl CachePolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            allow_prefixes: lowered(&config.allow_prefixes),
            allow_suffixes: lowered(&config.allow_suffixes),
            deny_prefixes: lowered(&config.deny_prefixes),
        }
    }

    /// True for tools whose name marks them as mutating.
    pub fn is_mutating(&self, tool: &str) -> bool {
        self.matched_deny_prefix(&tool.to_lowercase()).is_some()
    }

    /// Read-only by name and not mutating. Deny always wins.
    pub fn should_cache(&self, tool: &str) -> bool {
        let name = tool.to_lowercase();
        if self.matched_deny_prefix(&name).is_some() {
            return false;
        }
        self.allow_prefixes.iter().any(|p| name.starts_with(p.as_str()))
            || self.allow_suffixes.iter().any(|s| name.ends_with(s.as_str()))
    }

    /// Pattern selecting cached read results made stale by a successful
    /// call to `tool`, e.g. `create_asset` yields a pattern matching keys of
    /// `list_assets` and `get_asset_info`. `None` for non-mutating tools.
    pub fn related_read_pattern(&self, tool: &str) -> Option<String> {
        let name = tool.to_lowercase();
        let prefix = self.matched_deny_prefix(&name)?;
        let subject = name[prefix.len()..].trim_matches('_');
        let subject = match subject.strip_suffix('s') {
            Some(singular) if singular.len() >= 3 => singular,
            _ => subject,
        };
        if subject.is_empty() {
            return None;
        }
        // Keys render as `tool:<64 hex digits>`; anchor on the digest so the
        // subject can only match inside the tool name.
        Some(format!("^.*{}.*:[0-9a-f]{{64}}$", regex::escape(subject)))
    }

    fn matched_deny_prefix(&self, name: &str) -> Option<&str> {
        self.deny_prefixes
            .iter()
            .find(|p| name.starts_with(p.as_str()))
            .map(|p| p.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn policy() -> CachePolicy {
        CachePolicy::from_config(&CacheConfig::default())
    }

    #[test]
    fn test_allow_patterns() {
        let policy = policy();
        let names = [
            "get_scene_info",
            "list_assets",
            "find_objects",
            "search_docs",
            "query_items",
            "check_compile",
            "editor_status",
            "Project_Info",
            "component_list",
        ];
        for name in names {
            assert!(policy.should_cache(name), "{} should be cacheable", name);
        }
    }

    #[test]
    fn test_unmatched_not_cached() {
        let policy = policy();
        assert!(!policy.should_cache("ping"));
        assert!(!policy.should_cache("compile"));
    }

    #[test]
    fn test_deny_wins_over_allow() {
        let policy = policy();
        assert!(!policy.should_cache("create_object"));
        assert!(!policy.should_cache("create_object_info"));
        assert!(!policy.should_cache("delete_asset_list"));
        assert!(!policy.should_cache("SET_status"));
        assert!(!policy.should_cache("execute_menu_item"));
        assert!(policy.is_mutating("update_asset"));
        assert!(!policy.is_mutating("get_asset"));
    }

    #[test]
    fn test_related_read_pattern() {
        let policy = policy();
        let pattern = policy.related_read_pattern("create_asset").unwrap();
        let re = Regex::new(&pattern).unwrap();
        let digest = "a".repeat(64);

        assert!(re.is_match(&format!("list_assets:{}", digest)));
        assert!(re.is_match(&format!("get_asset_info:{}", digest)));
        assert!(!re.is_match(&format!("list_scenes:{}", digest)));

        let plural = policy.related_read_pattern("delete_assets").unwrap();
        assert_eq!(plural, pattern);

        assert!(policy.related_read_pattern("get_asset").is_none());
        assert!(policy.related_read_pattern("create_").is_none());
    }

    #[test]
    fn test_related_pattern_ignores_digest_matches() {
        let policy = policy();
        let re = Regex::new(&policy.related_read_pattern("update_face").unwrap()).unwrap();
        let digest = format!("face{}", "0".repeat(60));
        assert!(!re.is_match(&format!("list_meshes:{}", digest)));
        assert!(re.is_match(&format!("get_face_info:{}", digest)));
    }
}
