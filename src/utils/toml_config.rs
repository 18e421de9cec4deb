//! TOML-based configuration for deep-research
//!
//! Configuration is read from a TOML file (`research.toml` by default), then
//! selected environment variables override individual fields. Every field has a
//! default, so a missing file yields a working configuration as long as the
//! Anthropic API key is present in the environment.
//!
//! # Hot Reloading
//!
//! `ConfigManager` keeps the current configuration behind an `ArcSwap` and can
//! watch the file for changes. Research limits are read per run, so edits apply
//! to the next query; model names and rate limits are fixed at startup.

use arc_swap::ArcSwap;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Root configuration structure loaded from research.toml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub anthropic: AnthropicConfig,

    #[serde(default)]
    pub models: ModelsConfig,

    #[serde(default)]
    pub research: ResearchSettings,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub rate_limits: RateLimitsConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

// ============= Server Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Environment variable holding a bearer key for the HTTP API (unset = open)
    #[serde(default)]
    pub api_key_env: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            api_key_env: None,
        }
    }
}

// ============= Anthropic Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    /// Environment variable containing the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_anthropic_base")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub timeout_secs: u64,
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_anthropic_base() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_anthropic_base(),
            timeout_secs: default_request_timeout(),
        }
    }
}

// ============= Model Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_lead_model")]
    pub lead: String,

    #[serde(default = "default_worker_model")]
    pub subagent: String,

    #[serde(default = "default_worker_model")]
    pub citation: String,
}

fn default_lead_model() -> String {
    "claude-opus-4-1-20250805".to_string()
}

fn default_worker_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            lead: default_lead_model(),
            subagent: default_worker_model(),
            citation: default_worker_model(),
        }
    }
}

// ============= Research Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchSettings {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_subagents: usize,

    /// Dispatch/evaluate rounds before synthesis is forced
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_context_window")]
    pub context_window_tokens: u64,

    #[serde(default = "default_max_subagents_per_plan")]
    pub max_subagents_per_plan: usize,

    /// Hard cap on OODA iterations inside one subagent
    #[serde(default = "default_max_subagent_iterations")]
    pub max_subagent_iterations: usize,

    /// A subagent stops once it holds this many findings
    #[serde(default = "default_sufficient_findings")]
    pub sufficient_findings: usize,

    #[serde(default = "default_subagent_timeout")]
    pub subagent_timeout_secs: u64,

    /// Findings passed to the synthesizer
    #[serde(default = "default_synthesis_source_limit")]
    pub synthesis_source_limit: usize,
}

fn default_max_concurrent() -> usize {
    5
}

fn default_max_iterations() -> u32 {
    5
}

fn default_context_window() -> u64 {
    200_000
}

fn default_max_subagents_per_plan() -> usize {
    20
}

fn default_max_subagent_iterations() -> usize {
    15
}

fn default_sufficient_findings() -> usize {
    5
}

fn default_subagent_timeout() -> u64 {
    300
}

fn default_synthesis_source_limit() -> usize {
    50
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            max_concurrent_subagents: default_max_concurrent(),
            max_iterations: default_max_iterations(),
            context_window_tokens: default_context_window(),
            max_subagents_per_plan: default_max_subagents_per_plan(),
            max_subagent_iterations: default_max_subagent_iterations(),
            sufficient_findings: default_sufficient_findings(),
            subagent_timeout_secs: default_subagent_timeout(),
            synthesis_source_limit: default_synthesis_source_limit(),
        }
    }
}

// ============= Database Configuration =============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/research.db")
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

// ============= Rate Limit Configuration =============

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BucketConfig {
    pub tokens_per_minute: u32,
    pub burst_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    #[serde(default = "default_llm_bucket")]
    pub llm: BucketConfig,

    #[serde(default = "default_search_bucket")]
    pub web_search: BucketConfig,

    #[serde(default = "default_fetch_bucket")]
    pub web_fetch: BucketConfig,
}

fn default_llm_bucket() -> BucketConfig {
    BucketConfig {
        tokens_per_minute: 100,
        burst_size: 20,
    }
}

fn default_search_bucket() -> BucketConfig {
    BucketConfig {
        tokens_per_minute: 60,
        burst_size: 10,
    }
}

fn default_fetch_bucket() -> BucketConfig {
    BucketConfig {
        tokens_per_minute: 30,
        burst_size: 5,
    }
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            llm: default_llm_bucket(),
            web_search: default_search_bucket(),
            web_fetch: default_fetch_bucket(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base of the exponential wait, in seconds
    #[serde(default = "default_wait_multiplier")]
    pub wait_multiplier_secs: u64,

    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_wait_multiplier() -> u64 {
    2
}

fn default_max_wait() -> u64 {
    60
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            wait_multiplier_secs: default_wait_multiplier(),
            max_wait_secs: default_max_wait(),
        }
    }
}

// ============= Configuration Loading & Validation =============

/// Errors that can occur during configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("Environment variable '{0}' has an invalid value: {1}")]
    InvalidEnvVar(String, String),

    #[error("Watch error: {0}")]
    WatchError(#[from] notify::Error),
}

impl From<ConfigError> for crate::types::AppError {
    fn from(err: ConfigError) -> Self {
        crate::types::AppError::Config(err.to_string())
    }
}

impl ResearchConfig {
    /// Load configuration from a TOML file, apply env overrides and validate.
    ///
    /// A missing file is not an error; defaults are used instead.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let mut config = if path.exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str::<ResearchConfig>(&content)?
        } else {
            info!("No config file at {:?}, using defaults", path);
            ResearchConfig::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from a TOML string without touching the environment
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ResearchConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the supported environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(url) = env_string("ANTHROPIC_BASE_URL") {
            self.anthropic.base_url = url;
        }
        if let Some(model) = env_string("LEAD_AGENT_MODEL") {
            self.models.lead = model;
        }
        if let Some(model) = env_string("SUBAGENT_MODEL") {
            self.models.subagent = model;
        }
        if let Some(model) = env_string("CITATION_AGENT_MODEL") {
            self.models.citation = model;
        }
        if let Some(n) = env_parse::<usize>("MAX_CONCURRENT_SUBAGENTS")? {
            self.research.max_concurrent_subagents = n;
        }
        if let Some(n) = env_parse::<u32>("MAX_ITERATIONS")? {
            self.research.max_iterations = n;
        }
        if let Some(n) = env_parse::<u64>("CONTEXT_WINDOW_TOKENS")? {
            self.research.context_window_tokens = n;
        }
        if let Some(path) = env_string("DATABASE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(level) = env_string("LOG_LEVEL") {
            self.server.log_level = level.to_lowercase();
        }
        Ok(())
    }

    /// Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.research.max_concurrent_subagents == 0 {
            return Err(ConfigError::ValidationError(
                "research.max_concurrent_subagents must be at least 1".to_string(),
            ));
        }
        if self.research.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "research.max_iterations must be at least 1".to_string(),
            ));
        }
        if self.research.max_subagents_per_plan == 0 {
            return Err(ConfigError::ValidationError(
                "research.max_subagents_per_plan must be at least 1".to_string(),
            ));
        }

        for (name, model) in [
            ("lead", &self.models.lead),
            ("subagent", &self.models.subagent),
            ("citation", &self.models.citation),
        ] {
            if model.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "models.{} must not be empty",
                    name
                )));
            }
        }

        if self.anthropic.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "anthropic.base_url must not be empty".to_string(),
            ));
        }

        for (name, bucket) in [
            ("llm", &self.rate_limits.llm),
            ("web_search", &self.rate_limits.web_search),
            ("web_fetch", &self.rate_limits.web_fetch),
        ] {
            if bucket.tokens_per_minute == 0 || bucket.burst_size == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "rate_limits.{} needs a positive rate and burst size",
                    name
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the Anthropic API key from the environment
    pub fn anthropic_api_key(&self) -> Result<String, ConfigError> {
        env_string(&self.anthropic.api_key_env)
            .ok_or_else(|| ConfigError::MissingEnvVar(self.anthropic.api_key_env.clone()))
    }

    /// Get the HTTP API key, if one is configured
    pub fn server_api_key(&self) -> Result<Option<String>, ConfigError> {
        match &self.server.api_key_env {
            Some(name) => env_string(name)
                .map(Some)
                .ok_or_else(|| ConfigError::MissingEnvVar(name.clone())),
            None => Ok(None),
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env_string(name) {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvVar(name.to_string(), raw)),
        None => Ok(None),
    }
}

// ============= Hot Reloading Configuration Manager =============

/// Thread-safe configuration manager with hot reloading support
pub struct ConfigManager {
    config: Arc<ArcSwap<ResearchConfig>>,
    config_path: PathBuf,
    watcher: RwLock<Option<RecommendedWatcher>>,
}

impl ConfigManager {
    /// Create a new configuration manager and load the initial config
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        // Absolute path for reliable file watching
        let path = path.as_ref();
        let path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(ConfigError::ReadError)?
                .join(path)
        };

        let config = ResearchConfig::load(&path)?;

        Ok(Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: path,
            watcher: RwLock::new(None),
        })
    }

    /// Create a config manager directly from a config (useful for testing).
    /// This won't have file watching capabilities.
    pub fn from_config(config: ResearchConfig) -> Self {
        Self {
            config: Arc::new(ArcSwap::from_pointee(config)),
            config_path: PathBuf::from("research.toml"),
            watcher: RwLock::new(None),
        }
    }

    /// Get the current configuration (lockless read)
    pub fn config(&self) -> Arc<ResearchConfig> {
        self.config.load_full()
    }

    /// Path the configuration was loaded from
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Manually reload the configuration from disk
    pub fn reload(&self) -> Result<(), ConfigError> {
        info!("Reloading configuration from {:?}", self.config_path);

        let new_config = ResearchConfig::load(&self.config_path)?;
        self.config.store(Arc::new(new_config));

        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Start watching for configuration file changes
    pub fn start_watching(&self) -> Result<(), ConfigError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        let config_path = self.config_path.clone();
        let config_arc = Arc::clone(&self.config);
        let file_name = config_path.file_name().map(|n| n.to_os_string());

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            match res {
                Ok(event) => {
                    let touches_config = event
                        .paths
                        .iter()
                        .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
                    if touches_config && (event.kind.is_modify() || event.kind.is_create()) {
                        let _ = tx.send(());
                    }
                }
                Err(e) => {
                    error!("Config watcher error: {:?}", e);
                }
            }
        })?;

        // Editors replace files, so watch the parent directory
        if let Some(parent) = self.config_path.parent() {
            watcher.watch(parent, RecursiveMode::NonRecursive)?;
        }

        *self.watcher.write() = Some(watcher);

        tokio::spawn(reload_on_change(
            rx,
            config_path,
            config_arc,
            Duration::from_millis(500),
        ));

        info!("Configuration hot-reload watcher started");
        Ok(())
    }

    /// Stop watching for configuration changes
    pub fn stop_watching(&self) {
        *self.watcher.write() = None;
        info!("Configuration hot-reload watcher stopped");
    }
}

/// Reload once a burst of change events has been quiet for `quiet`, so the
/// last write in a burst is always the one loaded
async fn reload_on_change(
    mut rx: mpsc::UnboundedReceiver<()>,
    config_path: PathBuf,
    config: Arc<ArcSwap<ResearchConfig>>,
    quiet: Duration,
) {
    while rx.recv().await.is_some() {
        let mut closed = false;
        loop {
            match tokio::time::timeout(quiet, rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => {
                    closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        match ResearchConfig::load(&config_path) {
            Ok(new_config) => {
                config.store(Arc::new(new_config));
                info!("Configuration hot-reloaded successfully");
            }
            Err(e) => {
                warn!(
                    "Failed to hot-reload config: {}. Keeping previous config.",
                    e
                );
            }
        }

        if closed {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> String {
        r#"
[server]
host = "0.0.0.0"
port = 8080
log_level = "debug"

[anthropic]
api_key_env = "TEST_ANTHROPIC_KEY"
base_url = "http://localhost:9999"

[models]
lead = "lead-model"
subagent = "worker-model"

[research]
max_concurrent_subagents = 3
max_iterations = 2

[database]
path = "./data/test.db"

[rate_limits.web_fetch]
tokens_per_minute = 10
burst_size = 2
"#
        .to_string()
    }

    #[test]
    fn test_parse_config() {
        let config = ResearchConfig::from_toml_str(&create_test_config()).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.anthropic.api_key_env, "TEST_ANTHROPIC_KEY");
        assert_eq!(config.models.lead, "lead-model");
        assert_eq!(config.models.subagent, "worker-model");
        // Not set in the file, falls back
        assert_eq!(config.models.citation, "claude-sonnet-4-20250514");
        assert_eq!(config.research.max_concurrent_subagents, 3);
        assert_eq!(config.research.max_iterations, 2);
        assert_eq!(config.rate_limits.web_fetch.tokens_per_minute, 10);
        assert_eq!(config.rate_limits.web_search.tokens_per_minute, 60);
    }

    #[test]
    fn test_defaults() {
        let config = ResearchConfig::default();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.anthropic.base_url, "https://api.anthropic.com");
        assert_eq!(config.models.lead, "claude-opus-4-1-20250805");
        assert_eq!(config.research.max_concurrent_subagents, 5);
        assert_eq!(config.research.max_iterations, 5);
        assert_eq!(config.research.context_window_tokens, 200_000);
        assert_eq!(config.database.path, PathBuf::from("./data/research.db"));
        assert_eq!(config.rate_limits.llm.tokens_per_minute, 100);
        assert_eq!(config.rate_limits.llm.burst_size, 20);
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_file_is_all_defaults() {
        let config = ResearchConfig::from_toml_str("").unwrap();
        assert_eq!(config.research.max_iterations, 5);
    }

    #[test]
    fn test_validation_rejects_zero_concurrency() {
        let result = ResearchConfig::from_toml_str("[research]\nmax_concurrent_subagents = 0\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validation_rejects_zero_rate() {
        let toml = "[rate_limits.llm]\ntokens_per_minute = 0\nburst_size = 5\n";
        let result = ResearchConfig::from_toml_str(toml);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validation_rejects_empty_model() {
        let result = ResearchConfig::from_toml_str("[models]\nlead = \"  \"\n");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_invalid_toml() {
        let result = ResearchConfig::from_toml_str("[research\nmax_iterations = ");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ResearchConfig::load(dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_missing_api_key() {
        let mut config = ResearchConfig::default();
        config.anthropic.api_key_env = "DEEP_RESEARCH_TEST_KEY_THAT_IS_NEVER_SET".to_string();
        assert!(matches!(
            config.anthropic_api_key(),
            Err(ConfigError::MissingEnvVar(_))
        ));
    }

    #[test]
    fn test_server_api_key_optional() {
        let config = ResearchConfig::default();
        assert_eq!(config.server_api_key().unwrap(), None);
    }

    #[test]
    fn test_config_manager_from_config() {
        let config = ResearchConfig::from_toml_str(&create_test_config()).unwrap();
        let manager = ConfigManager::from_config(config);

        let loaded = manager.config();
        assert_eq!(loaded.server.port, 8080);
    }

    #[test]
    fn test_config_manager_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("research.toml");
        std::fs::write(&path, "[research]\nmax_iterations = 2\n").unwrap();

        let manager = ConfigManager::new(&path).unwrap();
        assert_eq!(manager.config().research.max_iterations, 2);

        std::fs::write(&path, "[research]\nmax_iterations = 4\n").unwrap();
        manager.reload().unwrap();
        assert_eq!(manager.config().research.max_iterations, 4);
    }

    #[test]
    fn test_failed_reload_keeps_previous_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("research.toml");
        std::fs::write(&path, "[research]\nmax_iterations = 2\n").unwrap();

        let manager = ConfigManager::new(&path).unwrap();
        std::fs::write(&path, "[research]\nmax_iterations = 0\n").unwrap();

        assert!(manager.reload().is_err());
        assert_eq!(manager.config().research.max_iterations, 2);
    }

    #[tokio::test]
    async fn test_burst_of_edits_reloads_last_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("research.toml");
        std::fs::write(&path, "[research]\nmax_iterations = 2\n").unwrap();

        let config = Arc::new(ArcSwap::from_pointee(ResearchConfig::load(&path).unwrap()));
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(reload_on_change(
            rx,
            path.clone(),
            Arc::clone(&config),
            Duration::from_millis(100),
        ));

        std::fs::write(&path, "[research]\nmax_iterations = 4\n").unwrap();
        tx.send(()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        std::fs::write(&path, "[research]\nmax_iterations = 7\n").unwrap();
        tx.send(()).unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(config.load().research.max_iterations, 7);

        drop(tx);
        task.await.unwrap();
    }
}
