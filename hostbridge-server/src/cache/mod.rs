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

//! Response cache for read-only tools.
//!
//! Memoizes successful results of tools the [`CachePolicy`] classifies as
//! read-only, keyed by tool name and canonical arguments. Entries expire
//! after a per-tool TTL; an expired entry is never served and is removed by
//! the lookup that finds it.

mod key;
mod policy;

pub use key::{canonical_json, change_token, CacheKey};
pub use policy::CachePolicy;

use crate::config::CacheConfig;
use dashmap::DashMap;
use hostbridge_core::ToolResult;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct CacheEntry {
    result: ToolResult,
    change_token: String,
    stored_at: Instant,
    expires_at: Instant,
}

/// A cache hit.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub result: ToolResult,
    pub change_token: String,
    pub age: Duration,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub entries_per_tool: BTreeMap<String, usize>,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
}

pub struct ResponseCache {
    entries: DashMap<CacheKey, CacheEntry>,
    policy: CachePolicy,
    enabled: bool,
    default_ttl: Duration,
    tool_ttls: HashMap<String, Duration>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            policy: CachePolicy::from_config(config),
            enabled: config.enabled,
            default_ttl: config.default_ttl(),
            tool_ttls: config
                .tool_ttl_secs
                .iter()
                .map(|(tool, secs)| (tool.to_lowercase(), Duration::from_secs(*secs)))
                .collect(),
            max_entries: config.max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn should_cache(&self, tool: &str) -> bool {
        self.enabled && self.policy.should_cache(tool)
    }

    pub fn ttl_for(&self, tool: &str) -> Duration {
        self.tool_ttls
            .get(&tool.to_lowercase())
            .copied()
            .unwrap_or(self.default_ttl)
    }

    pub fn try_get(&self, tool: &str, arguments: &Value) -> Option<CachedResponse> {
        self.try_get_at(tool, arguments, Instant::now())
    }

    pub(crate) fn try_get_at(
        &self,
        tool: &str,
        arguments: &Value,
        now: Instant,
    ) -> Option<CachedResponse> {
        if !self.should_cache(tool) {
            return None;
        }
        let key = CacheKey::new(tool, arguments);

        // The shard guard must be released before removing from the map.
        let found = self.entries.get(&key).map(|entry| {
            if now < entry.expires_at {
                Some(CachedResponse {
                    result: entry.result.clone(),
                    change_token: entry.change_token.clone(),
                    age: now.saturating_duration_since(entry.stored_at),
                })
            } else {
                None
            }
        });

        match found {
            Some(Some(hit)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(tool = %tool, age_ms = hit.age.as_millis() as u64, "Cache hit");
                Some(hit)
            }
            Some(None) => {
                if self
                    .entries
                    .remove_if(&key, |_, entry| now >= entry.expires_at)
                    .is_some()
                {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a successful result. Returns whether it was stored; failures,
    /// non-cacheable tools and zero TTLs are skipped.
    pub fn put(&self, tool: &str, arguments: &Value, result: &ToolResult) -> bool {
        self.put_at(tool, arguments, result, Instant::now())
    }

    pub(crate) fn put_at(
        &self,
        tool: &str,
        arguments: &Value,
        result: &ToolResult,
        now: Instant,
    ) -> bool {
        if result.is_error || !self.should_cache(tool) {
            return false;
        }
        let ttl = self.ttl_for(tool);
        if ttl.is_zero() {
            return false;
        }

        let key = CacheKey::new(tool, arguments);
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.purge_expired_at(now);
            if self.entries.len() >= self.max_entries {
                tracing::debug!(tool = %tool, max_entries = self.max_entries, "Cache full; not storing");
                return false;
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                result: result.clone(),
                change_token: change_token(result),
                stored_at: now,
                expires_at: now + ttl,
            },
        );
        true
    }

    /// Remove every entry of one tool.
    pub fn invalidate_tool(&self, tool: &str) -> usize {
        let tool = tool.to_lowercase();
        let mut removed = 0;
        self.entries.retain(|key, _| {
            let keep = key.tool != tool;
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            tracing::debug!(tool = %tool, removed, "Invalidated cached results");
        }
        removed
    }

    /// Remove every entry whose rendered key (`tool:digest`) matches the
    /// regular expression.
    pub fn invalidate_pattern(&self, pattern: &str) -> Result<usize, regex::Error> {
        let re = Regex::new(pattern)?;
        let mut removed = 0;
        self.entries.retain(|key, _| {
            let keep = !re.is_match(&key.to_string());
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            tracing::debug!(pattern, removed, "Invalidated cached results by pattern");
        }
        Ok(removed)
    }

    pub fn invalidate_all(&self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        removed
    }

    /// Drop all expired entries.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = now < entry.expires_at;
            if !keep {
                removed += 1;
            }
            keep
        });
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn stats(&self) -> CacheStats {
        self.stats_at(Instant::now())
    }

    pub(crate) fn stats_at(&self, now: Instant) -> CacheStats {
        let mut total = 0;
        let mut expired = 0;
        let mut per_tool: BTreeMap<String, usize> = BTreeMap::new();
        for entry in self.entries.iter() {
            total += 1;
            if now >= entry.value().expires_at {
                expired += 1;
            }
            *per_tool.entry(entry.key().tool.clone()).or_default() += 1;
        }

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            total_entries: total,
            expired_entries: expired,
            entries_per_tool: per_tool,
            hits,
            misses,
            hit_rate: if lookups > 0 {
                hits as f64 / lookups as f64
            } else {
                0.0
            },
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

/// Shared cache instance
pub type SharedResponseCache = Arc<ResponseCache>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache() -> ResponseCache {
        let mut config = CacheConfig::default();
        config.default_ttl_secs = 30;
        config.tool_ttl_secs.insert("Get_Scene_Info".into(), 5);
        ResponseCache::new(&config)
    }

    #[test]
    fn test_put_then_get() {
        let cache = cache();
        let args = json!({ "path": "a.png" });
        let result = ToolResult::json(json!({ "size": 10 }));

        assert!(cache.try_get("get_asset", &args).is_none());
        assert!(cache.put("get_asset", &args, &result));

        let hit = cache.try_get("GET_ASSET", &args).unwrap();
        assert_eq!(hit.result, result);
        assert_eq!(hit.change_token, change_token(&result));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
    }

    #[test]
    fn test_never_serves_expired() {
        let cache = cache();
        let args = json!({});
        let now = Instant::now();
        cache.put_at("get_scene_info", &args, &ToolResult::text("scene"), now);

        assert!(cache
            .try_get_at("get_scene_info", &args, now + Duration::from_secs(4))
            .is_some());

        let later = now + Duration::from_secs(5);
        assert_eq!(cache.stats_at(later).expired_entries, 1);
        assert!(cache.try_get_at("get_scene_info", &args, later).is_none());
        // Evicted by the lookup
        assert_eq!(cache.stats_at(later).total_entries, 0);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_default_ttl_applies_without_override() {
        let cache = cache();
        assert_eq!(cache.ttl_for("list_assets"), Duration::from_secs(30));
        assert_eq!(cache.ttl_for("GET_SCENE_INFO"), Duration::from_secs(5));
    }

    #[test]
    fn test_failures_and_mutations_not_cached() {
        let cache = cache();
        let args = json!({});
        assert!(!cache.put("get_asset", &args, &ToolResult::failure("handler_failure", "nope")));
        assert!(!cache.put("create_asset", &args, &ToolResult::text("made")));
        assert!(!cache.put("ping", &args, &ToolResult::text("pong")));
        assert_eq!(cache.stats().total_entries, 0);
    }

    #[test]
    fn test_disabled_cache() {
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        let cache = ResponseCache::new(&config);
        assert!(!cache.put("get_asset", &json!({}), &ToolResult::text("x")));
        assert!(cache.try_get("get_asset", &json!({})).is_none());
    }

    #[test]
    fn test_invalidate_tool() {
        let cache = cache();
        let result = ToolResult::text("x");
        cache.put("list_assets", &json!({ "page": 1 }), &result);
        cache.put("list_assets", &json!({ "page": 2 }), &result);
        cache.put("get_scene_info", &json!({}), &result);

        assert_eq!(cache.invalidate_tool("List_Assets"), 2);
        let stats = cache.stats();
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.entries_per_tool.get("get_scene_info"), Some(&1));
    }

    #[test]
    fn test_invalidate_pattern() {
        let cache = cache();
        let result = ToolResult::text("x");
        cache.put("list_assets", &json!({}), &result);
        cache.put("get_asset_info", &json!({ "id": 3 }), &result);
        cache.put("list_scenes", &json!({}), &result);

        let pattern = cache.policy().related_read_pattern("create_asset").unwrap();
        assert_eq!(cache.invalidate_pattern(&pattern).unwrap(), 2);
        assert!(cache.try_get("list_assets", &json!({})).is_none());
        assert!(cache.try_get("list_scenes", &json!({})).is_some());

        assert!(cache.invalidate_pattern("(").is_err());
    }

    #[test]
    fn test_capacity_purges_expired_first() {
        let config = CacheConfig {
            max_entries: 2,
            default_ttl_secs: 10,
            ..CacheConfig::default()
        };
        let cache = ResponseCache::new(&config);
        let result = ToolResult::text("x");
        let now = Instant::now();

        assert!(cache.put_at("get_a", &json!({}), &result, now));
        assert!(cache.put_at("get_b", &json!({}), &result, now));
        assert!(!cache.put_at("get_c", &json!({}), &result, now));

        let later = now + Duration::from_secs(11);
        assert!(cache.put_at("get_c", &json!({}), &result, later));
        assert_eq!(cache.stats_at(later).total_entries, 1);
    }

    #[test]
    fn test_concurrent_reads_during_invalidation() {
        let cache = Arc::new(cache());
        let result = ToolResult::text("x");
        for i in 0..200 {
            cache.put("list_assets", &json!({ "page": i }), &result);
        }

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let _ = cache.try_get("list_assets", &json!({ "page": i }));
                    }
                })
            })
            .collect();
        let removed = cache.invalidate_pattern("^list_assets:").unwrap();
        for reader in readers {
            reader.join().unwrap();
        }

        assert_eq!(removed, 200);
        assert_eq!(cache.stats().total_entries, 0);
    }
}
