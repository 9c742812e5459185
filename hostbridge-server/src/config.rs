// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Result;
use hostbridge_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Hostbridge configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSection {
    /// Name reported to clients during initialization
    #[serde(default = "default_server_name")]
    pub name: String,

    /// How often the serving loop refreshes its heartbeat
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

/// What the host thread does with a call whose waiter already gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpiredCallPolicy {
    /// Run the handler anyway and discard the result.
    #[default]
    Execute,
    /// Drop the call without running it.
    Skip,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatchConfig {
    /// Maximum host-thread calls executed per tick
    #[serde(default = "default_max_calls_per_tick")]
    pub max_calls_per_tick: usize,

    /// Deadline applied to calls that do not carry their own (None = wait
    /// until the host thread settles the call)
    #[serde(default)]
    pub default_deadline_ms: Option<u64>,

    #[serde(default)]
    pub expired_calls: ExpiredCallPolicy,

    /// Tick period of the built-in host thread used by the binary
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Per-tool TTL overrides in seconds, keyed by tool name
    #[serde(default)]
    pub tool_ttl_secs: HashMap<String, u64>,

    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_allow_prefixes")]
    pub allow_prefixes: Vec<String>,

    #[serde(default = "default_allow_suffixes")]
    pub allow_suffixes: Vec<String>,

    /// Deny patterns win over allow patterns
    #[serde(default = "default_deny_prefixes")]
    pub deny_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SupervisorConfig {
    #[serde(default = "default_true")]
    pub auto_restart: bool,

    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,

    /// Window in which `max_restart_attempts` may be spent
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    #[serde(default = "default_liveness_interval_secs")]
    pub liveness_interval_secs: u64,

    /// Pause before relaunching the serving loop
    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_server_name() -> String {
    "hostbridge".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

fn default_max_calls_per_tick() -> usize {
    32
}

fn default_tick_interval_ms() -> u64 {
    10
}

fn default_cache_ttl_secs() -> u64 {
    30
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_allow_prefixes() -> Vec<String> {
    ["get_", "list_", "find_", "search_", "query_", "check_", "read_", "describe_"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_allow_suffixes() -> Vec<String> {
    ["_info", "_status", "_list"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_deny_prefixes() -> Vec<String> {
    [
        "create_", "delete_", "update_", "set_", "execute_", "add_", "remove_", "modify_",
        "move_", "rename_", "run_", "write_", "apply_", "import_", "destroy_", "save_",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_restart_attempts() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_liveness_interval_secs() -> u64 {
    5
}

fn default_restart_delay_ms() -> u64 {
    500
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_calls_per_tick: default_max_calls_per_tick(),
            default_deadline_ms: None,
            expired_calls: ExpiredCallPolicy::default(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: default_cache_ttl_secs(),
            tool_ttl_secs: HashMap::new(),
            max_entries: default_cache_max_entries(),
            allow_prefixes: default_allow_prefixes(),
            allow_suffixes: default_allow_suffixes(),
            deny_prefixes: default_deny_prefixes(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            auto_restart: true,
            max_restart_attempts: default_max_restart_attempts(),
            cooldown_secs: default_cooldown_secs(),
            liveness_interval_secs: default_liveness_interval_secs(),
            restart_delay_ms: default_restart_delay_ms(),
        }
    }
}

impl ServerSection {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

impl DispatchConfig {
    pub fn default_deadline(&self) -> Option<Duration> {
        self.default_deadline_ms.map(Duration::from_millis)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

impl SupervisorConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl BridgeConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - HOSTBRIDGE_AUTO_RESTART: Restart the serving loop after failures (default: true)
    /// - HOSTBRIDGE_MAX_RESTART_ATTEMPTS: Restart attempts per cooldown window (default: 3)
    /// - HOSTBRIDGE_RESTART_COOLDOWN_SECS: Cooldown window in seconds (default: 60)
    /// - HOSTBRIDGE_MAX_CALLS_PER_TICK: Host-thread drain cap (default: 32)
    /// - HOSTBRIDGE_CACHE_TTL_SECS: Default response cache TTL (default: 30)
    /// - HOSTBRIDGE_DEFAULT_DEADLINE_MS: Default call deadline (default: none)
    /// - HOSTBRIDGE_LOG_LEVEL: Log filter directive (default: info)
    /// - HOSTBRIDGE_LOG_JSON: Emit JSON logs (default: false)
    pub fn merge_with_env(mut self) -> Self {
        if let Some(v) = env_parse("HOSTBRIDGE_AUTO_RESTART") {
            self.supervisor.auto_restart = v;
        }
        if let Some(v) = env_parse("HOSTBRIDGE_MAX_RESTART_ATTEMPTS") {
            self.supervisor.max_restart_attempts = v;
        }
        if let Some(v) = env_parse("HOSTBRIDGE_RESTART_COOLDOWN_SECS") {
            self.supervisor.cooldown_secs = v;
        }
        if let Some(v) = env_parse("HOSTBRIDGE_MAX_CALLS_PER_TICK") {
            self.dispatch.max_calls_per_tick = v;
        }
        if let Some(v) = env_parse("HOSTBRIDGE_CACHE_TTL_SECS") {
            self.cache.default_ttl_secs = v;
        }
        if let Some(v) = env_parse("HOSTBRIDGE_DEFAULT_DEADLINE_MS") {
            self.dispatch.default_deadline_ms = Some(v);
        }
        if let Ok(level) = std::env::var("HOSTBRIDGE_LOG_LEVEL") {
            self.telemetry.level = level;
        }
        if let Some(v) = env_parse("HOSTBRIDGE_LOG_JSON") {
            self.telemetry.json = v;
        }
        self
    }

    /// Load configuration with priority: env > file > defaults
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };

        Ok(config.merge_with_env())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.max_calls_per_tick == 0 {
            anyhow::bail!("dispatch.max_calls_per_tick must be at least 1");
        }
        if self.dispatch.tick_interval_ms == 0 {
            anyhow::bail!("dispatch.tick_interval_ms must be at least 1");
        }
        if self.supervisor.auto_restart && self.supervisor.max_restart_attempts == 0 {
            anyhow::bail!("Auto-restart enabled but supervisor.max_restart_attempts is 0");
        }
        if self.supervisor.cooldown_secs == 0 {
            anyhow::bail!("supervisor.cooldown_secs must be at least 1");
        }
        if self.supervisor.liveness_interval_secs == 0 {
            anyhow::bail!("supervisor.liveness_interval_secs must be at least 1");
        }
        if self.server.heartbeat_interval_ms == 0 {
            anyhow::bail!("server.heartbeat_interval_ms must be at least 1");
        }

        let patterns = self
            .cache
            .allow_prefixes
            .iter()
            .chain(&self.cache.allow_suffixes)
            .chain(&self.cache.deny_prefixes);
        for pattern in patterns {
            if pattern.trim().is_empty() {
                anyhow::bail!("Cache classification patterns must not be empty");
            }
        }

        Ok(())
    }
}
