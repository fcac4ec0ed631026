use config::{Config, Environment, File};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);
const MIN_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_RETRY_ATTEMPTS: u32 = 10;

// `source_name`, not `source`: thiserror reserves the latter for a cause.
#[derive(Debug, Error)]
pub enum ScoutConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("source `{source_name}`: retry_attempts {value} exceeds the maximum of {MAX_RETRY_ATTEMPTS}")]
    RetryAttemptsOutOfRange { source_name: String, value: u32 },
    #[error("source `{source_name}`: retry_delay {value:?} must be within [{MIN_RETRY_DELAY:?}, {MAX_RETRY_DELAY:?}]")]
    RetryDelayOutOfRange { source_name: String, value: Duration },
    #[error("source `{source_name}`: timeout {value:?} must be within [{MIN_TIMEOUT:?}, {MAX_TIMEOUT:?}]")]
    TimeoutOutOfRange { source_name: String, value: Duration },
    #[error("source `{source_name}`: rate_limit.max_requests must be at least 1")]
    RateLimitZero { source_name: String },
    #[error("source `{source_name}`: rate_limit.window must be non-zero")]
    RateLimitWindowZero { source_name: String },
    #[error("source `{source_name}`: cache.ttl must be non-zero")]
    CacheTtlZero { source_name: String },
    #[error("source `{source_name}`: health_check.interval must be non-zero")]
    HealthIntervalZero { source_name: String },
    #[error("aggregation.confidence_threshold {value} must be within [0, 1]")]
    ConfidenceThresholdOutOfRange { value: f64 },
}

/// Top-level engine configuration: one entry per source key plus the
/// aggregation policy shared by every discovery pass.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScoutConfig {
    #[serde(default)]
    pub sources: BTreeMap<String, SourceEntry>,
    #[serde(default)]
    pub aggregation: AggregationSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Lower numbers win ordering decisions during merge and display.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Optional periodic re-discovery interval, e.g. "30s".
    #[serde(default, with = "humantime_serde::option")]
    pub schedule: Option<Duration>,
    #[serde(default)]
    pub config: SourceSettings,
}

impl Default for SourceEntry {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: default_priority(),
            schedule: None,
            config: SourceSettings::default(),
        }
    }
}

/// Per-source resilience settings plus the opaque blob handed to the
/// concrete source implementation.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSettings {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay", with = "humantime_serde")]
    pub retry_delay: Duration,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default)]
    pub rate_limit: Option<RateLimitSettings>,
    #[serde(default)]
    pub cache: Option<CacheSettings>,
    #[serde(default)]
    pub health_check: Option<HealthCheckSettings>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
            timeout: default_timeout(),
            rate_limit: None,
            cache: None,
            health_check: None,
            extra: BTreeMap::new(),
        }
    }
}

impl SourceSettings {
    /// Range-check the resilience schema for one source.
    pub fn validate(&self, source_name: &str) -> Result<(), ScoutConfigError> {
        if self.retry_attempts > MAX_RETRY_ATTEMPTS {
            return Err(ScoutConfigError::RetryAttemptsOutOfRange {
                source_name: source_name.to_string(),
                value: self.retry_attempts,
            });
        }
        if self.retry_delay < MIN_RETRY_DELAY || self.retry_delay > MAX_RETRY_DELAY {
            return Err(ScoutConfigError::RetryDelayOutOfRange {
                source_name: source_name.to_string(),
                value: self.retry_delay,
            });
        }
        if self.timeout < MIN_TIMEOUT || self.timeout > MAX_TIMEOUT {
            return Err(ScoutConfigError::TimeoutOutOfRange {
                source_name: source_name.to_string(),
                value: self.timeout,
            });
        }
        if let Some(rate_limit) = &self.rate_limit {
            if rate_limit.max_requests == 0 {
                return Err(ScoutConfigError::RateLimitZero {
                    source_name: source_name.to_string(),
                });
            }
            if rate_limit.window.is_zero() {
                return Err(ScoutConfigError::RateLimitWindowZero {
                    source_name: source_name.to_string(),
                });
            }
        }
        if let Some(cache) = &self.cache {
            if cache.ttl.is_zero() {
                return Err(ScoutConfigError::CacheTtlZero {
                    source_name: source_name.to_string(),
                });
            }
        }
        if let Some(health) = &self.health_check {
            if health.interval.is_zero() {
                return Err(ScoutConfigError::HealthIntervalZero {
                    source_name: source_name.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct CacheSettings {
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct HealthCheckSettings {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeduplicationStrategy {
    Latest,
    HighestConfidence,
    Merge,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AggregationSettings {
    #[serde(default = "default_strategy")]
    pub deduplication_strategy: DeduplicationStrategy,
    #[serde(default = "default_true")]
    pub relationship_inference: bool,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

impl Default for AggregationSettings {
    fn default() -> Self {
        Self {
            deduplication_strategy: default_strategy(),
            relationship_inference: true,
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

impl ScoutConfig {
    /// Load from `config/scout.{yaml,toml,...}` plus `SCOUT__` env overrides.
    pub fn load() -> Result<Self, ScoutConfigError> {
        Self::load_from("config/scout")
    }

    pub fn load_from(path: &str) -> Result<Self, ScoutConfigError> {
        let parsed: ScoutConfig = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("SCOUT").separator("__"))
            .build()?
            .try_deserialize()?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Validate the aggregation policy and every source entry.
    ///
    /// Resilience-schema violations are also re-checked at source
    /// initialization time; checking here lets `scout validate` report
    /// problems without constructing anything.
    pub fn validate(&self) -> Result<(), ScoutConfigError> {
        let threshold = self.aggregation.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) || threshold.is_nan() {
            return Err(ScoutConfigError::ConfidenceThresholdOutOfRange { value: threshold });
        }
        for (name, entry) in &self.sources {
            entry.config.validate(name)?;
        }
        Ok(())
    }

    /// Source keys that are enabled, ordered by priority then name.
    pub fn enabled_sources(&self) -> Vec<&str> {
        let mut keys: Vec<(&str, i32)> = self
            .sources
            .iter()
            .filter(|(_, entry)| entry.enabled)
            .map(|(name, entry)| (name.as_str(), entry.priority))
            .collect();
        keys.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)));
        keys.into_iter().map(|(name, _)| name).collect()
    }
}

const fn default_true() -> bool {
    true
}

const fn default_priority() -> i32 {
    100
}

const fn default_retry_attempts() -> u32 {
    3
}

const fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

const fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_strategy() -> DeduplicationStrategy {
    DeduplicationStrategy::Merge
}

const fn default_confidence_threshold() -> f64 {
    0.5
}
