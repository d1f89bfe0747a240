//! Configuration loading from TOML files and environment variables.
//!
//! Every field has a default. `load()` starts from the defaults and applies
//! `COURIER_*` environment variables; `load_with_file` does the same on top
//! of a TOML file. Invalid environment values fall back without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `COURIER_NETWORK_THREADS` | 4 | Network dispatcher threads (0 = one per core) |
//! | `COURIER_STALE_POLICY` | strict | `strict` or `always_deliver` |
//! | `COURIER_MAX_RETRIES` | 0 | Default retry budget per request |
//! | `COURIER_TIMEOUT_MS` | 2500 | Initial per-attempt timeout (ms) |
//! | `COURIER_BACKOFF_MULTIPLIER` | 1.0 | Timeout growth per retry |
//! | `COURIER_CACHE_KIND` | memory | `memory`, `disk` or `none` |
//! | `COURIER_CACHE_MAX_BYTES` | 5242880 | Cache byte budget |
//! | `COURIER_CACHE_DIR` | `$TMPDIR/courier-cache` | Disk cache directory |
//! | `COURIER_SHUTDOWN_TIMEOUT` | 30 | Drain timeout (secs) |
//! | `COURIER_SLOW_REQUEST_MS` | 3000 | Slow request warning threshold (ms) |
//! | `COURIER_LOG_LEVEL` | info | `EnvFilter` directive |

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{
    Cache, CacheDefaults, DiskCache, DiskCacheConfig, MemoryCache, MemoryCacheConfig, NoCache,
    DEFAULT_MAX_BYTES,
};
use crate::error::ConfigError;
use crate::retry::RetryConfig;
use crate::scheduler::{DispatcherConfig, StalePolicy, DEFAULT_NETWORK_THREADS};
use crate::telemetry::LogConfig;

const DEFAULT_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_SLOW_REQUEST_MS: u64 = 3000;

/// Which cache implementation backs the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    #[default]
    Memory,
    Disk,
    None,
}

impl FromStr for CacheKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "disk" => Ok(Self::Disk),
            "none" => Ok(Self::None),
            other => Err(ConfigError::Invalid(format!("unknown cache kind {other:?}"))),
        }
    }
}

/// `[dispatch]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DispatchSection {
    /// 0 means one thread per core.
    pub network_threads: usize,
    pub thread_name_prefix: String,
    pub stack_size: usize,
    pub stale_policy: StalePolicy,
    pub slow_request_threshold_ms: u64,
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            network_threads: DEFAULT_NETWORK_THREADS,
            thread_name_prefix: "courier".to_string(),
            stack_size: 0,
            stale_policy: StalePolicy::Strict,
            slow_request_threshold_ms: DEFAULT_SLOW_REQUEST_MS,
        }
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub kind: CacheKind,
    pub max_bytes: usize,
    pub directory: Option<PathBuf>,
    /// Freshness for responses without caching headers.
    pub default_soft_ttl_secs: u64,
    pub default_ttl_secs: u64,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            kind: CacheKind::Memory,
            max_bytes: DEFAULT_MAX_BYTES,
            directory: None,
            default_soft_ttl_secs: 0,
            default_ttl_secs: 0,
        }
    }
}

impl CacheSection {
    /// Configured directory, or `courier-cache` under the temp dir.
    pub fn directory(&self) -> PathBuf {
        self.directory
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("courier-cache"))
    }

    pub fn defaults(&self) -> CacheDefaults {
        CacheDefaults::new(
            Duration::from_secs(self.default_soft_ttl_secs),
            Duration::from_secs(self.default_ttl_secs),
        )
    }

    /// Build the configured cache. Disk initialization happens later, on
    /// the cache dispatcher.
    pub fn build(&self) -> Arc<dyn Cache> {
        match self.kind {
            CacheKind::Memory => Arc::new(MemoryCache::new(MemoryCacheConfig {
                max_bytes: self.max_bytes,
            })),
            CacheKind::Disk => Arc::new(DiskCache::new(DiskCacheConfig {
                directory: self.directory(),
                max_bytes: self.max_bytes,
            })),
            CacheKind::None => Arc::new(NoCache),
        }
    }
}

/// Complete courier configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub dispatch: DispatchSection,
    pub retry: RetryConfig,
    pub cache: CacheSection,
    pub shutdown_timeout_secs: u64,
    pub log: LogConfig,
}

impl Default for CourierConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchSection::default(),
            retry: RetryConfig::default(),
            cache: CacheSection::default(),
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_SECS,
            log: LogConfig::default(),
        }
    }
}

impl CourierConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(s)?;
        config.validate()?;
        config.clamp();
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Override fields from `COURIER_*` environment variables.
    pub fn apply_env(&mut self) {
        self.dispatch.network_threads =
            parse_usize("COURIER_NETWORK_THREADS", self.dispatch.network_threads);
        self.dispatch.slow_request_threshold_ms =
            parse_u64("COURIER_SLOW_REQUEST_MS", self.dispatch.slow_request_threshold_ms);
        if let Some(policy) = env_var("COURIER_STALE_POLICY").and_then(|v| parse_stale_policy(&v)) {
            self.dispatch.stale_policy = policy;
        }

        self.retry.max_retries = parse_u32("COURIER_MAX_RETRIES", self.retry.max_retries);
        self.retry.initial_timeout_ms =
            parse_u64("COURIER_TIMEOUT_MS", self.retry.initial_timeout_ms);
        self.retry.backoff_multiplier =
            parse_f32("COURIER_BACKOFF_MULTIPLIER", self.retry.backoff_multiplier);

        if let Some(kind) = env_var("COURIER_CACHE_KIND").and_then(|v| v.parse().ok()) {
            self.cache.kind = kind;
        }
        self.cache.max_bytes = parse_usize("COURIER_CACHE_MAX_BYTES", self.cache.max_bytes);
        if let Some(dir) = env_var("COURIER_CACHE_DIR").filter(|v| !v.trim().is_empty()) {
            self.cache.directory = Some(PathBuf::from(dir));
        }

        self.shutdown_timeout_secs =
            parse_u64("COURIER_SHUTDOWN_TIMEOUT", self.shutdown_timeout_secs);
        if let Some(level) = env_var("COURIER_LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
            self.log.level = level;
        }

        self.clamp();
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.thread_name_prefix.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "dispatch.thread_name_prefix must not be empty".into(),
            ));
        }
        if !self.retry.backoff_multiplier.is_finite() {
            return Err(ConfigError::Invalid("retry.backoff_multiplier must be finite".into()));
        }
        Ok(())
    }

    fn clamp(&mut self) {
        if !self.retry.backoff_multiplier.is_finite() {
            self.retry.backoff_multiplier = RetryConfig::default().backoff_multiplier;
        }
        self.retry.backoff_multiplier = self.retry.backoff_multiplier.max(0.0);
        self.retry.initial_timeout_ms = self.retry.initial_timeout_ms.max(1);
        self.shutdown_timeout_secs = self.shutdown_timeout_secs.max(1);
        self.cache.default_soft_ttl_secs = self
            .cache
            .default_soft_ttl_secs
            .min(self.cache.default_ttl_secs);
    }

    /// Network threads after resolving 0 to the core count.
    pub fn network_threads(&self) -> NonZeroUsize {
        let threads = match self.dispatch.network_threads {
            0 => num_cpus::get(),
            n => n,
        };
        NonZeroUsize::new(threads).unwrap_or(NonZeroUsize::MIN)
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            network_threads: self.network_threads(),
            stack_size: self.dispatch.stack_size,
            thread_name_prefix: self.dispatch.thread_name_prefix.clone(),
            stale_policy: self.dispatch.stale_policy,
            cache_defaults: self.cache.defaults(),
            default_retry: self.retry,
            slow_request_threshold: self.slow_request_threshold(),
            ..DispatcherConfig::default()
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn slow_request_threshold(&self) -> Duration {
        Duration::from_millis(self.dispatch.slow_request_threshold_ms)
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u32` env var, returning `default` on missing or invalid.
fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_f32(key: &str, default: f32) -> f32 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<f32>().ok().filter(|v| v.is_finite()).unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_stale_policy(value: &str) -> Option<StalePolicy> {
    match value.trim().to_ascii_lowercase().as_str() {
        "strict" => Some(StalePolicy::Strict),
        "always_deliver" | "always-deliver" => Some(StalePolicy::AlwaysDeliver),
        _ => None,
    }
}

/// Defaults plus environment overrides.
pub fn load() -> CourierConfig {
    let mut config = CourierConfig::default();
    config.apply_env();
    config
}

/// `path` plus environment overrides.
pub fn load_with_file(path: impl AsRef<Path>) -> Result<CourierConfig, ConfigError> {
    let mut config = CourierConfig::from_file(path)?;
    config.apply_env();
    Ok(config)
}
