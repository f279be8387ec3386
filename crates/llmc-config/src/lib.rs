//! LLMC Configuration Management
//!
//! Provides configuration loading with support for:
//! - Global config: `~/.llmc/config.toml`
//! - Local config: `<repo>/.llmc/config.toml`
//! - CLI overrides via `ConfigOverrides`
//!
//! Configuration is merged in order: global → local → CLI overrides.
//!
//! # Example TOML
//!
//! ```toml
//! [storage]
//! index_path = ".llmc/index.db"
//!
//! [embeddings.profiles.code]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dim = 768
//!
//! [enrichment]
//! enabled = true
//! batch_size = 8
//! cooldown_seconds = 600
//! cascade = ["local_small", "remote_cheap"]
//!
//! [enrichment.backends.local_small]
//! kind = "local"
//! endpoint = "http://localhost:11434"
//! model = "qwen2.5-coder:7b"
//! rpm = 120
//! tpm = 200000
//! ```

mod error;
mod loader;

pub use error::ConfigError;
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration for LLMC.
///
/// Represents the fully merged configuration from all sources.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LlmcConfig {
    /// Storage configuration
    pub storage: StorageConfig,

    /// Embedding profiles
    pub embeddings: EmbeddingsConfig,

    /// Enrichment pipeline configuration
    pub enrichment: EnrichmentConfig,

    /// Background daemon configuration
    pub daemon: DaemonConfig,

    /// Query routing configuration
    pub routing: RoutingConfig,
}

impl LlmcConfig {
    /// Validate the merged configuration.
    ///
    /// Checks cross-references (cascade members must name configured
    /// backends, the start tier must be a cascade member) and per-section
    /// value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, profile) in &self.embeddings.profiles {
            profile.validate(name)?;
        }
        self.enrichment.validate()?;
        self.daemon.validate()?;
        self.routing.validate()?;
        Ok(())
    }

    /// Apply CLI overrides on top of the merged configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref path) = overrides.index_path {
            self.storage.index_path = path.clone();
        }
        if let Some(enabled) = overrides.enrichment_enabled {
            self.enrichment.enabled = enabled;
        }
        if let Some(ref tier) = overrides.start_tier {
            self.enrichment.start_tier = Some(tier.clone());
        }
        if let Some(tick) = overrides.daemon_tick_seconds {
            self.daemon.tick_seconds = tick;
        }
    }
}

/// CLI override values that take precedence over file configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override for `storage.index_path`
    pub index_path: Option<PathBuf>,

    /// Override for `enrichment.enabled`
    pub enrichment_enabled: Option<bool>,

    /// Override for `enrichment.start_tier`
    pub start_tier: Option<String>,

    /// Override for `daemon.tick_seconds`
    pub daemon_tick_seconds: Option<u64>,
}

// ============================================================================
// Storage
// ============================================================================

/// Storage configuration for the index store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// On-disk location of the index store, relative to the repo root.
    pub index_path: PathBuf,

    /// Location of the index status snapshot for external readers.
    pub status_path: PathBuf,

    /// Append-only enrichment metrics log (JSONL, one event per line).
    pub metrics_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            index_path: PathBuf::from(".llmc/index.db"),
            status_path: PathBuf::from(".llmc/rag_index_status.json"),
            metrics_path: PathBuf::from("logs/enrichment_metrics.jsonl"),
        }
    }
}

// ============================================================================
// Embeddings
// ============================================================================

/// Embedding configuration: named profiles plus batching behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    /// Named embedding profiles. Each profile maps to its own set of
    /// vectors in the store; switching a profile's model or dim
    /// invalidates that profile's embeddings.
    pub profiles: BTreeMap<String, ProfileConfig>,

    /// How many texts are sent per provider call.
    pub batch_size: usize,

    /// Bounded work unit per daemon tick.
    pub max_spans_per_cycle: usize,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert("code".to_string(), ProfileConfig::default());
        Self {
            profiles,
            batch_size: 16,
            max_spans_per_cycle: 256,
        }
    }
}

/// A named embedding profile `(provider, model, dim)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProfileConfig {
    /// Provider kind: "openai" (OpenAI-compatible HTTP) or "local".
    pub provider: String,

    /// Model identifier passed to the provider.
    pub model: String,

    /// Expected vector dimension.
    pub dim: usize,

    /// Provider endpoint. Defaults per provider kind when empty.
    pub endpoint: String,

    /// Environment variable holding the API key, if the provider needs one.
    pub api_key_env: Option<String>,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            dim: 768,
            endpoint: "http://localhost:11434/v1".to_string(),
            api_key_env: None,
        }
    }
}

impl ProfileConfig {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.dim == 0 {
            return Err(ConfigError::validation(format!(
                "embeddings.profiles.{name}.dim must be non-zero"
            )));
        }
        match self.provider.as_str() {
            "openai" | "local" => Ok(()),
            other => Err(ConfigError::validation(format!(
                "embeddings.profiles.{name}.provider '{other}' is unknown (expected 'openai' or 'local')"
            ))),
        }
    }
}

// ============================================================================
// Enrichment
// ============================================================================

/// Enrichment pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    /// Master switch for the pipeline.
    pub enabled: bool,

    /// Adjacent pending spans from the same file are batched into one
    /// prompt up to this many per request.
    pub batch_size: usize,

    /// Minimum run of adjacent pending spans before batching kicks in.
    pub batch_min_spans: usize,

    /// Maximum line gap between spans considered adjacent for batching.
    pub max_line_gap: u32,

    /// Bounded work unit per daemon tick.
    pub max_spans_per_cycle: usize,

    /// Spans touched more recently than this many seconds are excluded
    /// from the queue. 0 disables the cooldown; 600 is recommended while
    /// actively editing.
    pub cooldown_seconds: u64,

    /// Cascade starting tier. When unset the router decides per span.
    pub start_tier: Option<String>,

    /// Let the router pick a per-span start tier; disabled, every span
    /// starts at `start_tier` (or the first cascade member).
    pub router: bool,

    /// Ordered tier cascade; each entry names a backend below.
    pub cascade: Vec<String>,

    /// Orphan enrichments older than this many days are reaped.
    pub orphan_ttl_days: u32,

    /// Backend definitions, keyed by tier name.
    pub backends: BTreeMap<String, BackendSettings>,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        let mut backends = BTreeMap::new();
        backends.insert("local_small".to_string(), BackendSettings::default());
        Self {
            enabled: true,
            batch_size: 8,
            batch_min_spans: 2,
            max_line_gap: 40,
            max_spans_per_cycle: 64,
            cooldown_seconds: 0,
            start_tier: None,
            router: true,
            cascade: vec!["local_small".to_string()],
            orphan_ttl_days: 7,
            backends,
        }
    }
}

impl EnrichmentConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.cascade.is_empty() {
            return Err(ConfigError::validation(
                "enrichment.cascade must name at least one backend",
            ));
        }
        for tier in &self.cascade {
            if !self.backends.contains_key(tier) {
                return Err(ConfigError::validation(format!(
                    "enrichment.cascade references unknown backend '{tier}'"
                )));
            }
        }
        if let Some(ref tier) = self.start_tier {
            if !self.cascade.contains(tier) {
                return Err(ConfigError::validation(format!(
                    "enrichment.start_tier '{tier}' is not a cascade member"
                )));
            }
        }
        for (name, backend) in &self.backends {
            backend.validate(name)?;
        }
        Ok(())
    }
}

/// Parameters for one cascade member.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Backend kind: "local" (Ollama-style generate endpoint) or
    /// "openai" (chat-completions endpoint).
    pub kind: String,

    /// HTTP endpoint base URL.
    pub endpoint: String,

    /// Model identifier.
    pub model: String,

    /// Environment variable holding the API key, if any.
    pub api_key_env: Option<String>,

    /// Requests per minute admitted by the token bucket.
    pub rpm: u32,

    /// Tokens per minute admitted by the token bucket.
    pub tpm: u32,

    /// Daily spend ceiling in USD ($0.001 precision).
    pub daily_usd_cap: f64,

    /// Monthly spend ceiling in USD ($0.001 precision).
    pub monthly_usd_cap: f64,

    /// Price per 1k prompt tokens, USD.
    pub usd_per_1k_tokens_in: f64,

    /// Price per 1k completion tokens, USD.
    pub usd_per_1k_tokens_out: f64,

    /// Retry attempts for retryable failures.
    pub retry_attempts: u32,

    /// Per-request timeout in seconds.
    pub timeout_s: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: "local".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            model: "qwen2.5-coder:7b".to_string(),
            api_key_env: None,
            rpm: 120,
            tpm: 200_000,
            daily_usd_cap: 0.0,
            monthly_usd_cap: 0.0,
            usd_per_1k_tokens_in: 0.0,
            usd_per_1k_tokens_out: 0.0,
            retry_attempts: 5,
            timeout_s: 30,
        }
    }
}

impl BackendSettings {
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        match self.kind.as_str() {
            "local" | "openai" => {}
            other => {
                return Err(ConfigError::validation(format!(
                    "enrichment.backends.{name}.kind '{other}' is unknown (expected 'local' or 'openai')"
                )))
            }
        }
        if self.endpoint.is_empty() {
            return Err(ConfigError::validation(format!(
                "enrichment.backends.{name}.endpoint is required"
            )));
        }
        if self.rpm == 0 || self.tpm == 0 {
            return Err(ConfigError::validation(format!(
                "enrichment.backends.{name}: rpm and tpm must be non-zero"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Daemon
// ============================================================================

/// Background daemon pacing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Base tick interval in seconds.
    pub tick_seconds: u64,

    /// Process nice level applied at startup (best effort).
    pub nice_level: i32,

    /// First idle sleep in seconds; doubles after each tick with no work.
    pub idle_backoff_base: u64,

    /// Idle backoff cap in seconds.
    pub idle_backoff_max: u64,

    /// Per-phase deadline in seconds; a stuck phase is abandoned.
    pub phase_deadline_seconds: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick_seconds: 180,
            nice_level: 10,
            idle_backoff_base: 180,
            idle_backoff_max: 1800,
            phase_deadline_seconds: 600,
        }
    }
}

impl DaemonConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_seconds == 0 {
            return Err(ConfigError::validation("daemon.tick_seconds must be non-zero"));
        }
        if self.idle_backoff_max < self.idle_backoff_base {
            return Err(ConfigError::validation(
                "daemon.idle_backoff_max must be >= daemon.idle_backoff_base",
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Routing
// ============================================================================

/// Query classifier knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// When code and domain signals tie, prefer the code route.
    pub prefer_code_on_conflict: bool,

    /// Score margin applied to the preferred side on conflict.
    pub conflict_margin: f32,

    /// Domain/ERP identifiers recognized by the classifier.
    pub erp_keywords: Vec<String>,

    /// Regex matched against the query to detect code structure.
    pub code_struct_regex: String,

    /// Graph expansion goes to two hops when query complexity reaches
    /// this many significant tokens.
    pub two_hop_complexity: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            prefer_code_on_conflict: true,
            conflict_margin: 0.1,
            erp_keywords: vec![
                "invoice".to_string(),
                "ledger".to_string(),
                "purchase_order".to_string(),
                "warehouse".to_string(),
            ],
            code_struct_regex: r"(?x)(::|->|=>|\(\)|\{|\}|\bfn\b|\bdef\b|\bclass\b|\bimpl\b)".to_string(),
            two_hop_complexity: 8,
        }
    }
}

impl RoutingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        regex::Regex::new(&self.code_struct_regex)
            .map(|_| ())
            .map_err(|e| {
                ConfigError::validation(format!("routing.code_struct_regex is invalid: {e}"))
            })
    }
}
