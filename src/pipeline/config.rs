//! Workflow configuration.
//!
//! Configuration is layered: defaults, then an optional YAML file, then
//! `DEVFLOW_*` environment variables. The result is validated once.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::backoff::RetryPolicy;
use crate::scheduler::PriorityWeights;
use crate::task::Stage;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration for a workflow run.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowConfig {
    // Scheduling
    /// Maximum number of tasks executing a stage at once.
    pub max_concurrency: usize,
    /// Validation retries per stage after the first attempt.
    pub max_retries: u32,
    /// Per-stage overrides of `max_retries`.
    pub stage_max_retries: BTreeMap<Stage, u32>,
    pub priority: PriorityWeights,

    // Capability calls
    pub retry: RetryPolicy,
    /// Bound on a single capability call.
    pub call_timeout: Duration,
    /// Bound on a task's time in one active state.
    pub stage_timeout: Duration,

    // LLM settings
    /// Model for every stage. `None` uses the provider default.
    pub model: Option<String>,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_retries: 2,
            stage_max_retries: BTreeMap::new(),
            priority: PriorityWeights::default(),

            retry: RetryPolicy::default(),
            call_timeout: Duration::from_secs(120),
            stage_timeout: Duration::from_secs(900),

            model: None,
            temperature: 0.3,
            max_tokens: 4096,
        }
    }
}

impl WorkflowConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validation retries allowed for `stage`.
    pub fn max_retries_for(&self, stage: Stage) -> u32 {
        self.stage_max_retries
            .get(&stage)
            .copied()
            .unwrap_or(self.max_retries)
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DEVFLOW_MAX_CONCURRENCY`: Concurrent stage executions (default: 4)
    /// - `DEVFLOW_MAX_RETRIES`: Validation retries per stage (default: 2)
    /// - `DEVFLOW_RETRY_INITIAL_DELAY_MS`: First backoff delay (default: 500)
    /// - `DEVFLOW_RETRY_MULTIPLIER`: Backoff multiplier (default: 2.0)
    /// - `DEVFLOW_RETRY_MAX_DELAY_MS`: Backoff delay cap (default: 30000)
    /// - `DEVFLOW_RETRY_MAX_ATTEMPTS`: Attempts per capability call (default: 4)
    /// - `DEVFLOW_CALL_TIMEOUT_SECS`: Capability call timeout (default: 120)
    /// - `DEVFLOW_STAGE_TIMEOUT_SECS`: Active stage budget (default: 900)
    /// - `DEVFLOW_AGE_CAP_HOURS`: Age boost cap (default: 20)
    /// - `DEVFLOW_DEPENDENCY_BOOST`: Boost for blocking tasks (default: 10)
    /// - `DEVFLOW_FAILURE_BOOST`: Boost for tasks mid-retry (default: 15)
    /// - `DEVFLOW_MODEL`: Model for every stage (default: provider default)
    /// - `DEVFLOW_TEMPERATURE`: Generation temperature (default: 0.3)
    /// - `DEVFLOW_MAX_TOKENS`: Generation token cap (default: 4096)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::default().apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional YAML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let base = match path {
            Some(path) => Self::default().apply_file(read_file(path)?),
            None => Self::default(),
        };
        let config = base.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file. Missing keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::default().apply_file(read_file(path)?);
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let file: WorkflowConfigFile = serde_yaml::from_str(yaml)?;
        let config = Self::default().apply_file(file);
        config.validate()?;
        Ok(config)
    }

    /// Render as YAML in the same shape `from_yaml_str` reads.
    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(&WorkflowConfigFile::from(self))?)
    }

    /// Apply overrides from a variable lookup.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("DEVFLOW_MAX_CONCURRENCY") {
            self.max_concurrency = parse_env_value(&val, "DEVFLOW_MAX_CONCURRENCY")?;
        }

        if let Some(val) = lookup("DEVFLOW_MAX_RETRIES") {
            self.max_retries = parse_env_value(&val, "DEVFLOW_MAX_RETRIES")?;
        }

        // Backoff
        if let Some(val) = lookup("DEVFLOW_RETRY_INITIAL_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "DEVFLOW_RETRY_INITIAL_DELAY_MS")?;
            self.retry.initial_delay = Duration::from_millis(ms);
        }

        if let Some(val) = lookup("DEVFLOW_RETRY_MULTIPLIER") {
            self.retry.multiplier = parse_env_value(&val, "DEVFLOW_RETRY_MULTIPLIER")?;
        }

        if let Some(val) = lookup("DEVFLOW_RETRY_MAX_DELAY_MS") {
            let ms: u64 = parse_env_value(&val, "DEVFLOW_RETRY_MAX_DELAY_MS")?;
            self.retry.max_delay = Duration::from_millis(ms);
        }

        if let Some(val) = lookup("DEVFLOW_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_env_value(&val, "DEVFLOW_RETRY_MAX_ATTEMPTS")?;
        }

        // Time budgets
        if let Some(val) = lookup("DEVFLOW_CALL_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "DEVFLOW_CALL_TIMEOUT_SECS")?;
            self.call_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("DEVFLOW_STAGE_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "DEVFLOW_STAGE_TIMEOUT_SECS")?;
            self.stage_timeout = Duration::from_secs(secs);
        }

        // Priority weights
        if let Some(val) = lookup("DEVFLOW_AGE_CAP_HOURS") {
            self.priority.age_cap_hours = parse_env_value(&val, "DEVFLOW_AGE_CAP_HOURS")?;
        }

        if let Some(val) = lookup("DEVFLOW_DEPENDENCY_BOOST") {
            self.priority.dependency_boost = parse_env_value(&val, "DEVFLOW_DEPENDENCY_BOOST")?;
        }

        if let Some(val) = lookup("DEVFLOW_FAILURE_BOOST") {
            self.priority.failure_boost = parse_env_value(&val, "DEVFLOW_FAILURE_BOOST")?;
        }

        // LLM settings
        if let Some(val) = lookup("DEVFLOW_MODEL") {
            let val = val.trim();
            self.model = (!val.is_empty()).then(|| val.to_string());
        }

        if let Some(val) = lookup("DEVFLOW_TEMPERATURE") {
            self.temperature = parse_env_value(&val, "DEVFLOW_TEMPERATURE")?;
        }

        if let Some(val) = lookup("DEVFLOW_MAX_TOKENS") {
            self.max_tokens = parse_env_value(&val, "DEVFLOW_MAX_TOKENS")?;
        }

        Ok(self)
    }

    fn apply_file(mut self, file: WorkflowConfigFile) -> Self {
        if let Some(v) = file.max_concurrency {
            self.max_concurrency = v;
        }
        if let Some(v) = file.max_retries {
            self.max_retries = v;
        }
        self.stage_max_retries.extend(file.stage_max_retries);
        if let Some(v) = file.priority {
            self.priority = v;
        }
        if let Some(retry) = file.retry {
            if let Some(ms) = retry.initial_delay_ms {
                self.retry.initial_delay = Duration::from_millis(ms);
            }
            if let Some(m) = retry.multiplier {
                self.retry.multiplier = m;
            }
            if let Some(ms) = retry.max_delay_ms {
                self.retry.max_delay = Duration::from_millis(ms);
            }
            if let Some(n) = retry.max_attempts {
                self.retry.max_attempts = n;
            }
        }
        if let Some(secs) = file.call_timeout_secs {
            self.call_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.stage_timeout_secs {
            self.stage_timeout = Duration::from_secs(secs);
        }
        if file.model.is_some() {
            self.model = file.model;
        }
        if let Some(v) = file.temperature {
            self.temperature = v;
        }
        if let Some(v) = file.max_tokens {
            self.max_tokens = v;
        }
        self
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrency must be greater than 0".to_string(),
            ));
        }

        // Backoff validation
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "retry.max_attempts must be greater than 0".to_string(),
            ));
        }

        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(ConfigError::ValidationFailed(
                "retry.multiplier must be a finite number >= 1.0".to_string(),
            ));
        }

        if self.retry.initial_delay > self.retry.max_delay {
            return Err(ConfigError::ValidationFailed(
                "retry.initial_delay cannot exceed retry.max_delay".to_string(),
            ));
        }

        // Time budget validation
        if self.call_timeout.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "call_timeout must be greater than 0".to_string(),
            ));
        }

        if self.stage_timeout < self.call_timeout {
            return Err(ConfigError::ValidationFailed(
                "stage_timeout cannot be shorter than call_timeout".to_string(),
            ));
        }

        // Priority validation
        let weights = [
            ("age_cap_hours", self.priority.age_cap_hours),
            ("dependency_boost", self.priority.dependency_boost),
            ("failure_boost", self.priority.failure_boost),
        ];
        for (name, value) in weights {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::ValidationFailed(format!(
                    "priority.{} must be a finite non-negative number",
                    name
                )));
            }
        }

        // LLM validation
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationFailed(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_tokens must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set max concurrency.
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Builder method to set the default validation retries.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Builder method to override validation retries for one stage.
    pub fn with_stage_max_retries(mut self, stage: Stage, retries: u32) -> Self {
        self.stage_max_retries.insert(stage, retries);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = timeout;
        self
    }

    pub fn with_priority_weights(mut self, weights: PriorityWeights) -> Self {
        self.priority = weights;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temp: f64) -> Self {
        self.temperature = temp;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// On-disk shape of a configuration file.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkflowConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    stage_max_retries: BTreeMap<Stage, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    priority: Option<PriorityWeights>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    retry: Option<RetryFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    call_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    stage_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetryFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    initial_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    multiplier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_attempts: Option<u32>,
}

impl From<&WorkflowConfig> for WorkflowConfigFile {
    fn from(config: &WorkflowConfig) -> Self {
        Self {
            max_concurrency: Some(config.max_concurrency),
            max_retries: Some(config.max_retries),
            stage_max_retries: config.stage_max_retries.clone(),
            priority: Some(config.priority),
            retry: Some(RetryFile {
                initial_delay_ms: Some(config.retry.initial_delay.as_millis() as u64),
                multiplier: Some(config.retry.multiplier),
                max_delay_ms: Some(config.retry.max_delay.as_millis() as u64),
                max_attempts: Some(config.retry.max_attempts),
            }),
            call_timeout_secs: Some(config.call_timeout.as_secs()),
            stage_timeout_secs: Some(config.stage_timeout.as_secs()),
            model: config.model.clone(),
            temperature: Some(config.temperature),
            max_tokens: Some(config.max_tokens),
        }
    }
}

fn read_file(path: &Path) -> Result<WorkflowConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_yaml::from_str(&contents)?)
}

/// Parses an environment variable value into the target type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = WorkflowConfig::default();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.call_timeout, Duration::from_secs(120));
        assert_eq!(config.stage_timeout, Duration::from_secs(900));
        assert_eq!(config.priority.failure_boost, 15.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = WorkflowConfig::new()
            .with_max_concurrency(1)
            .with_max_retries(3)
            .with_stage_max_retries(Stage::Testing, 5)
            .with_model("gpt-4o")
            .with_temperature(0.0);

        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.max_retries_for(Stage::Decomposition), 3);
        assert_eq!(config.max_retries_for(Stage::Testing), 5);
        assert_eq!(config.model.as_deref(), Some("gpt-4o"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(WorkflowConfig::new().with_max_concurrency(0).validate().is_err());
        assert!(WorkflowConfig::new().with_temperature(2.5).validate().is_err());
        assert!(WorkflowConfig::new()
            .with_stage_timeout(Duration::from_secs(10))
            .validate()
            .is_err());

        let mut config = WorkflowConfig::new();
        config.retry.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = WorkflowConfig::new();
        config.priority.failure_boost = -1.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("failure_boost"));
    }

    #[test]
    fn test_env_overrides() {
        let config = WorkflowConfig::default()
            .apply_env(lookup(&[
                ("DEVFLOW_MAX_CONCURRENCY", "8"),
                ("DEVFLOW_RETRY_INITIAL_DELAY_MS", "250"),
                ("DEVFLOW_FAILURE_BOOST", " 20.5 "),
                ("DEVFLOW_MODEL", "openai/gpt-4o"),
            ]))
            .unwrap();

        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(250));
        assert_eq!(config.priority.failure_boost, 20.5);
        assert_eq!(config.model.as_deref(), Some("openai/gpt-4o"));
    }

    #[test]
    fn test_env_invalid_value() {
        let err = WorkflowConfig::default()
            .apply_env(lookup(&[("DEVFLOW_MAX_RETRIES", "many")]))
            .unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "DEVFLOW_MAX_RETRIES"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_yaml_overlay_keeps_defaults() {
        let config = WorkflowConfig::from_yaml_str(
            "max_retries: 1\nstage_max_retries:\n  quality_assessment: 4\nretry:\n  max_attempts: 2\n",
        )
        .unwrap();

        assert_eq!(config.max_retries, 1);
        assert_eq!(config.max_retries_for(Stage::QualityAssessment), 4);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.initial_delay, Duration::from_millis(500));
        assert_eq!(config.max_concurrency, 4);
    }

    #[test]
    fn test_yaml_unknown_key_rejected() {
        let err = WorkflowConfig::from_yaml_str("max_concurrancy: 2\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_yaml_file_round_trip() {
        let original = WorkflowConfig::new()
            .with_max_concurrency(2)
            .with_stage_max_retries(Stage::Integration, 0)
            .with_model("m");

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(original.to_yaml().unwrap().as_bytes()).unwrap();

        let loaded = WorkflowConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = WorkflowConfig::from_yaml_file(&dir.path().join("absent.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
