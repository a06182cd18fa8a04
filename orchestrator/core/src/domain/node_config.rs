// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Courier Node Configuration
//
// Defines the configuration schema for a Courier A2A node, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Node identity used for self-registration in the peer registry
// - Storage backend and connection pool sizing
// - Delegation queue timeouts and admission limit
// - Peer registry liveness sweep and orphan reaping
// - Outbound client retry budget and bearer credential source
// - Network and observability settings
//
// Every numeric knob has a default and is clamped to a safe range when read
// through the accessor methods, so a bad file can never produce a zero-length
// sweep interval or an unbounded wait.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::repository::{SqliteConfig, StorageBackend};

pub const API_VERSION: &str = "100monkeys.ai/v1";
pub const KIND: &str = "CourierConfig";

pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 300;
pub const MIN_TASK_TIMEOUT_SECS: u64 = 5;
pub const MAX_TASK_TIMEOUT_SECS: u64 = 3600;

/// Top-level Kubernetes-style node configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierConfigManifest {
    /// API version (must be "100monkeys.ai/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "CourierConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: CourierConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable node name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Node configuration specification (content under spec:)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CourierConfigSpec {
    #[serde(default)]
    pub node: NodeIdentity,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub pool: PoolSettings,

    #[serde(default)]
    pub delegation: DelegationConfig,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Agent id this node registers itself under
    pub agent_id: String,

    /// Scheme and host peers use to reach this node (port comes from `network.port`)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Capability tags advertised in the registry
    #[serde(default)]
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    /// Database file for the sqlite backend
    #[serde(default = "default_database_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    #[serde(default = "default_pool_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_seconds: u64,

    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationConfig {
    /// Age after which a pending task is expired to TIMEOUT. A value that is
    /// not a number falls back to the default instead of failing the file.
    #[serde(
        default = "default_task_timeout_secs",
        deserialize_with = "deserialize_task_timeout"
    )]
    pub task_timeout_seconds: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_seconds: u64,

    /// Pending tasks admitted per agent at once
    #[serde(default = "default_max_pending_per_agent")]
    pub max_pending_per_agent: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Heartbeat age after which a non-interactive peer is considered stale
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_seconds: u64,

    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_seconds: u64,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_seconds: u64,

    /// Send SIGTERM to the processes behind stale records before purging them
    #[serde(default)]
    pub reap_orphans: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_max_elapsed_ms")]
    pub max_elapsed_ms: u64,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Environment variable holding the shared bearer token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Reject inbound A2A calls without a matching bearer token
    #[serde(default = "default_true")]
    pub require_inbound: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    #[serde(default = "default_api_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("json" or "text")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus exporter
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "http://127.0.0.1".to_string()
}

fn default_storage_backend() -> String {
    "sqlite".to_string()
}

fn default_database_path() -> String {
    "courier.db".to_string()
}

fn default_pool_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_health_check_interval_secs() -> u64 {
    60
}

fn default_task_timeout_secs() -> u64 {
    DEFAULT_TASK_TIMEOUT_SECS
}

fn deserialize_task_timeout<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawSeconds {
        Seconds(u64),
        Text(String),
        Other(serde::de::IgnoredAny),
    }

    let secs = match RawSeconds::deserialize(deserializer)? {
        RawSeconds::Seconds(secs) => Some(secs),
        RawSeconds::Text(text) => text.trim().parse::<u64>().ok(),
        RawSeconds::Other(_) => None,
    };
    Ok(secs.unwrap_or_else(|| {
        tracing::warn!(
            default = DEFAULT_TASK_TIMEOUT_SECS,
            "delegation.task_timeout_seconds is not a number, using default"
        );
        DEFAULT_TASK_TIMEOUT_SECS
    }))
}

fn default_sweep_interval_secs() -> u64 {
    30
}

fn default_max_pending_per_agent() -> usize {
    crate::application::delegation_queue::MAX_PENDING_TASKS_PER_AGENT
}

fn default_stale_after_secs() -> u64 {
    120
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    200
}

fn default_max_backoff_ms() -> u64 {
    5_000
}

fn default_max_elapsed_ms() -> u64 {
    30_000
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_token_env() -> String {
    "A2A_AUTH_TOKEN".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    4100
}

impl Default for NodeIdentity {
    fn default() -> Self {
        Self {
            agent_id: "courier-local".to_string(),
            base_url: default_base_url(),
            capabilities: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            path: default_database_path(),
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: default_pool_max_connections(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            idle_timeout_seconds: default_idle_timeout_secs(),
            health_check_interval_seconds: default_health_check_interval_secs(),
        }
    }
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            task_timeout_seconds: default_task_timeout_secs(),
            sweep_interval_seconds: default_sweep_interval_secs(),
            max_pending_per_agent: default_max_pending_per_agent(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            stale_after_seconds: default_stale_after_secs(),
            cleanup_interval_seconds: default_cleanup_interval_secs(),
            heartbeat_interval_seconds: default_heartbeat_secs(),
            reap_orphans: false,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_elapsed_ms: default_max_elapsed_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_env: default_token_env(),
            require_inbound: true,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_api_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Default for CourierConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "courier-node".to_string(),
                version: None,
                labels: None,
            },
            spec: CourierConfigSpec::default(),
        }
    }
}

fn clamp_secs(value: u64, min: u64, max: u64) -> Duration {
    Duration::from_secs(value.clamp(min, max))
}

impl DelegationConfig {
    /// Task timeout clamped to [5 s, 3600 s].
    pub fn task_timeout(&self) -> Duration {
        clamp_secs(
            self.task_timeout_seconds,
            MIN_TASK_TIMEOUT_SECS,
            MAX_TASK_TIMEOUT_SECS,
        )
    }

    /// Sweep interval clamped to [1 s, 1 h].
    pub fn sweep_interval(&self) -> Duration {
        clamp_secs(self.sweep_interval_seconds, 1, 3600)
    }

    pub fn max_pending_per_agent(&self) -> usize {
        self.max_pending_per_agent.max(1)
    }
}

impl RegistryConfig {
    /// Stale threshold clamped to [5 s, 24 h].
    pub fn stale_after(&self) -> Duration {
        clamp_secs(self.stale_after_seconds, 5, 24 * 3600)
    }

    pub fn cleanup_interval(&self) -> Duration {
        clamp_secs(self.cleanup_interval_seconds, 1, 3600)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        clamp_secs(self.heartbeat_interval_seconds, 1, 3600)
    }
}

impl AuthConfig {
    /// Bearer token from the configured environment variable, if set and non-empty.
    pub fn resolve_token(&self) -> Option<String> {
        std::env::var(&self.token_env)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// Parse a raw task-timeout value in seconds.
///
/// Non-numeric input falls back to the 300 s default with a warning; numeric
/// input is clamped to [5, 3600].
pub fn parse_task_timeout(raw: &str) -> u64 {
    match raw.trim().parse::<u64>() {
        Ok(secs) => {
            let clamped = secs.clamp(MIN_TASK_TIMEOUT_SECS, MAX_TASK_TIMEOUT_SECS);
            if clamped != secs {
                tracing::warn!(
                    requested = secs,
                    applied = clamped,
                    "Task timeout out of range, clamping"
                );
            }
            clamped
        }
        Err(_) => {
            tracing::warn!(
                value = raw,
                default = DEFAULT_TASK_TIMEOUT_SECS,
                "Task timeout is not a number, using default"
            );
            DEFAULT_TASK_TIMEOUT_SECS
        }
    }
}

impl CourierConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. COURIER_CONFIG_PATH environment variable
    /// 2. ./courier-config.yaml (working directory)
    /// 3. ~/.courier/config.yaml (user home)
    /// 4. /etc/courier/config.yaml (system, Unix) or C:\ProgramData\Courier\config.yaml (Windows)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("COURIER_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./courier-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".courier").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        let system_config = PathBuf::from("/etc/courier/config.yaml");
        #[cfg(windows)]
        let system_config = PathBuf::from("C:\\ProgramData\\Courier\\config.yaml");

        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit CLI path fails if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("COURIER_TASK_TIMEOUT_SECONDS") {
            let secs = parse_task_timeout(&val);
            tracing::info!("Environment override: COURIER_TASK_TIMEOUT_SECONDS={}", secs);
            self.spec.delegation.task_timeout_seconds = secs;
        }

        if let Ok(val) = std::env::var("COURIER_POOL_MAX_CONNECTIONS") {
            match val.trim().parse::<u32>() {
                Ok(n) => {
                    tracing::info!("Environment override: COURIER_POOL_MAX_CONNECTIONS={}", n);
                    self.spec.pool.max_connections = n;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for COURIER_POOL_MAX_CONNECTIONS: '{}'. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("COURIER_DATABASE_PATH") {
            if !val.trim().is_empty() {
                tracing::info!("Environment override: COURIER_DATABASE_PATH={}", val);
                self.spec.storage.path = val;
            }
        }

        if let Ok(val) = std::env::var("COURIER_REAP_ORPHANS") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => {
                    tracing::info!("Environment override: COURIER_REAP_ORPHANS=true");
                    self.spec.registry.reap_orphans = true;
                }
                "false" | "0" | "no" | "off" => {
                    tracing::info!("Environment override: COURIER_REAP_ORPHANS=false");
                    self.spec.registry.reap_orphans = false;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for COURIER_REAP_ORPHANS: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Storage backend selected by `spec.storage`
    pub fn storage_backend(&self) -> anyhow::Result<StorageBackend> {
        match self.spec.storage.backend.as_str() {
            "memory" => Ok(StorageBackend::InMemory),
            "sqlite" => Ok(StorageBackend::Sqlite(SqliteConfig {
                path: PathBuf::from(&self.spec.storage.path),
            })),
            other => anyhow::bail!(
                "Invalid storage backend: '{}'. Must be 'sqlite' or 'memory'",
                other
            ),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if self.spec.node.agent_id.trim().is_empty() {
            anyhow::bail!("spec.node.agent_id cannot be empty");
        }

        let base = url::Url::parse(&self.spec.node.base_url).map_err(|e| {
            anyhow::anyhow!("spec.node.base_url '{}' is invalid: {}", self.spec.node.base_url, e)
        })?;
        if base.scheme() != "http" && base.scheme() != "https" {
            anyhow::bail!("spec.node.base_url must use http or https");
        }

        self.storage_backend()?;
        if self.spec.storage.backend == "sqlite" && self.spec.storage.path.trim().is_empty() {
            anyhow::bail!("spec.storage.path cannot be empty for the sqlite backend");
        }

        if self.spec.auth.token_env.trim().is_empty() {
            anyhow::bail!("spec.auth.token_env cannot be empty");
        }

        match self.spec.observability.logging.format.as_str() {
            "text" | "json" => {}
            other => anyhow::bail!(
                "Invalid logging format: '{}'. Must be 'text' or 'json'",
                other
            ),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = CourierConfigManifest::default();
        assert_eq!(manifest.api_version, API_VERSION);
        assert_eq!(manifest.kind, KIND);
        assert_eq!(manifest.spec.delegation.task_timeout(), Duration::from_secs(300));
        assert_eq!(manifest.spec.delegation.max_pending_per_agent(), 1);
        assert_eq!(manifest.spec.pool.max_connections, 5);
        assert_eq!(manifest.spec.auth.token_env, "A2A_AUTH_TOKEN");
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
apiVersion: 100monkeys.ai/v1
kind: CourierConfig
metadata:
  name: research-node
spec:
  node:
    agent_id: researcher
  delegation:
    task_timeout_seconds: 1
  registry:
    reap_orphans: true
"#;
        let manifest = CourierConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.spec.node.agent_id, "researcher");
        assert_eq!(manifest.spec.node.base_url, "http://127.0.0.1");
        assert_eq!(manifest.spec.delegation.task_timeout(), Duration::from_secs(5));
        assert!(manifest.spec.registry.reap_orphans);
        assert_eq!(manifest.spec.client.max_attempts, 3);
        assert_eq!(manifest.spec.network.port, 4100);
    }

    #[test]
    fn test_non_numeric_task_timeout_in_yaml_uses_default() {
        let manifest_with = |value: &str| {
            let yaml = format!(
                "apiVersion: 100monkeys.ai/v1\nkind: CourierConfig\nmetadata:\n  name: n\nspec:\n  delegation:\n    task_timeout_seconds: {}\n",
                value
            );
            CourierConfigManifest::from_yaml_str(&yaml).unwrap()
        };

        let manifest = manifest_with("\"abc\"");
        assert_eq!(manifest.spec.delegation.task_timeout_seconds, DEFAULT_TASK_TIMEOUT_SECS);
        assert_eq!(manifest.spec.delegation.task_timeout(), Duration::from_secs(300));

        assert_eq!(manifest_with("-10").spec.delegation.task_timeout(), Duration::from_secs(300));
        assert_eq!(manifest_with("\"120\"").spec.delegation.task_timeout(), Duration::from_secs(120));
        assert_eq!(manifest_with("90").spec.delegation.task_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn test_parse_task_timeout() {
        assert_eq!(parse_task_timeout("120"), 120);
        assert_eq!(parse_task_timeout("1"), 5);
        assert_eq!(parse_task_timeout("999999"), 3600);
        assert_eq!(parse_task_timeout("five minutes"), 300);
        assert_eq!(parse_task_timeout("-10"), 300);
    }

    #[test]
    fn test_clamped_accessors() {
        let registry = RegistryConfig {
            stale_after_seconds: 0,
            cleanup_interval_seconds: 0,
            heartbeat_interval_seconds: 100_000,
            reap_orphans: false,
        };
        assert_eq!(registry.stale_after(), Duration::from_secs(5));
        assert_eq!(registry.cleanup_interval(), Duration::from_secs(1));
        assert_eq!(registry.heartbeat_interval(), Duration::from_secs(3600));

        let delegation = DelegationConfig {
            task_timeout_seconds: 10_000,
            sweep_interval_seconds: 0,
            max_pending_per_agent: 0,
        };
        assert_eq!(delegation.task_timeout(), Duration::from_secs(3600));
        assert_eq!(delegation.sweep_interval(), Duration::from_secs(1));
        assert_eq!(delegation.max_pending_per_agent(), 1);
    }

    #[test]
    fn test_storage_backend_selection() {
        let mut manifest = CourierConfigManifest::default();
        assert_eq!(
            manifest.storage_backend().unwrap(),
            StorageBackend::Sqlite(SqliteConfig {
                path: PathBuf::from("courier.db")
            })
        );

        manifest.spec.storage.backend = "memory".to_string();
        assert_eq!(manifest.storage_backend().unwrap(), StorageBackend::InMemory);

        manifest.spec.storage.backend = "postgres".to_string();
        assert!(manifest.storage_backend().is_err());
    }

    #[test]
    fn test_validation() {
        let mut manifest = CourierConfigManifest::default();
        assert!(manifest.validate().is_ok());

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.spec.node.agent_id = "  ".to_string();
        assert!(manifest.validate().is_err());
        manifest.spec.node.agent_id = "writer".to_string();

        manifest.spec.node.base_url = "ftp://example.com".to_string();
        assert!(manifest.validate().is_err());
        manifest.spec.node.base_url = "http://10.0.0.4".to_string();

        manifest.spec.observability.logging.format = "xml".to_string();
        assert!(manifest.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("COURIER_TASK_TIMEOUT_SECONDS", "not-a-number");
        std::env::set_var("COURIER_POOL_MAX_CONNECTIONS", "12");
        std::env::set_var("COURIER_REAP_ORPHANS", "yes");

        let mut manifest = CourierConfigManifest::default();
        manifest.spec.delegation.task_timeout_seconds = 60;
        manifest.apply_env_overrides();

        std::env::remove_var("COURIER_TASK_TIMEOUT_SECONDS");
        std::env::remove_var("COURIER_POOL_MAX_CONNECTIONS");
        std::env::remove_var("COURIER_REAP_ORPHANS");

        assert_eq!(manifest.spec.delegation.task_timeout_seconds, 300);
        assert_eq!(manifest.spec.pool.max_connections, 12);
        assert!(manifest.spec.registry.reap_orphans);
    }
}
