//! Engine configuration
//!
//! Settings load from TOML or JSON files (picked by extension), then `VITALS_*`
//! environment overrides are applied and the result is validated. Durations are
//! written as millisecond integers in files.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::alerts::AlertConfig;
use crate::health::AnomalyConfig;
use crate::recovery::{
    ActionKind, ComparisonOperator, RecoveryAction, RecoveryStrategy, SuccessCriterion,
    TriggerCondition,
};
use crate::reliability::CircuitBreakerConfig;
use crate::types::{ComponentId, Threshold, ThresholdSet};

/// Configuration errors, rejected synchronously at load or registration time
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid threshold for '{component}.{metric}': {reason}")]
    InvalidThreshold {
        component: ComponentId,
        metric: String,
        reason: String,
    },

    #[error("Component '{0}' is already registered")]
    DuplicateComponent(ComponentId),

    #[error("Component '{0}' is not registered")]
    UnknownComponent(ComponentId),

    #[error("Invalid recovery strategy '{id}': {reason}")]
    InvalidStrategy { id: String, reason: String },

    #[error("Invalid setting '{field}': {reason}")]
    InvalidSetting { field: &'static str, reason: String },

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// Serde adapter storing a `Duration` as integer milliseconds
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Declarative component registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentConfig {
    pub id: ComponentId,
    #[serde(default)]
    pub thresholds: ThresholdSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breaker: Option<CircuitBreakerConfig>,
}

/// Recovery dispatch settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Run applicable strategies from the periodic loop
    pub auto_recover: bool,

    /// Wait before collecting metrics to verify success criteria
    #[serde(rename = "verification_delay_ms", with = "duration_ms")]
    pub verification_delay: Duration,

    /// Finished attempts kept for inspection
    pub history_capacity: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            auto_recover: true,
            verification_delay: Duration::ZERO,
            history_capacity: 256,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    #[serde(rename = "evaluation_interval_ms", with = "duration_ms")]
    pub evaluation_interval: Duration,

    #[serde(rename = "health_check_timeout_ms", with = "duration_ms")]
    pub health_check_timeout: Duration,

    /// Samples retained per component
    pub history_capacity: usize,

    /// Count a Critical evaluation as a breaker failure observation
    pub trip_breaker_on_critical: bool,

    /// Buffered events per subscriber before the slowest one lags
    pub event_channel_capacity: usize,

    pub anomaly: AnomalyConfig,
    pub alerts: AlertConfig,
    pub breaker: CircuitBreakerConfig,
    pub recovery: RecoveryConfig,

    pub components: Vec<ComponentConfig>,
    pub strategies: Vec<RecoveryStrategy>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            evaluation_interval: Duration::from_secs(5),
            health_check_timeout: Duration::from_secs(5),
            history_capacity: 120,
            trip_breaker_on_critical: true,
            event_channel_capacity: 256,
            anomaly: AnomalyConfig::default(),
            alerts: AlertConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            recovery: RecoveryConfig::default(),
            components: Vec::new(),
            strategies: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Validate every setting, component and strategy
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.evaluation_interval.is_zero() {
            return Err(ConfigError::InvalidSetting {
                field: "evaluation_interval_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.health_check_timeout.is_zero() {
            return Err(ConfigError::InvalidSetting {
                field: "health_check_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.history_capacity < self.anomaly.window {
            return Err(ConfigError::InvalidSetting {
                field: "history_capacity",
                reason: format!(
                    "must hold at least the anomaly window ({} samples)",
                    self.anomaly.window
                ),
            });
        }
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::InvalidSetting {
                field: "event_channel_capacity",
                reason: "must be greater than zero".to_string(),
            });
        }
        self.anomaly.validate()?;
        self.alerts.validate()?;
        self.breaker
            .validate()
            .map_err(|e| ConfigError::InvalidSetting {
                field: "breaker",
                reason: e.to_string(),
            })?;

        let mut seen = HashSet::new();
        for component in &self.components {
            if !seen.insert(component.id.clone()) {
                return Err(ConfigError::DuplicateComponent(component.id.clone()));
            }
            validate_thresholds(&component.id, &component.thresholds)?;
            if let Some(breaker) = &component.breaker {
                breaker.validate().map_err(|e| ConfigError::InvalidSetting {
                    field: "components.breaker",
                    reason: format!("{}: {e}", component.id),
                })?;
            }
        }

        let mut strategy_ids = HashSet::new();
        for strategy in &self.strategies {
            strategy.validate()?;
            if !strategy_ids.insert(strategy.id.as_str()) {
                return Err(ConfigError::InvalidStrategy {
                    id: strategy.id.clone(),
                    reason: "duplicate strategy id".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Reject thresholds whose warning level is not strictly less severe than critical
pub fn validate_thresholds(
    component: &ComponentId,
    thresholds: &ThresholdSet,
) -> Result<(), ConfigError> {
    for (metric, threshold) in thresholds {
        threshold
            .validate()
            .map_err(|reason| ConfigError::InvalidThreshold {
                component: component.clone(),
                metric: metric.clone(),
                reason,
            })?;
    }
    Ok(())
}

/// Loads `EngineConfig` from the first config file found, then applies env overrides
pub struct ConfigLoader {
    config_paths: Vec<PathBuf>,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            config_paths: Self::default_config_paths(),
            env_prefix: "VITALS_".to_string(),
        }
    }

    /// Search `path` before the default locations
    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.config_paths.insert(0, path);
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    fn default_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("vitals.toml"), PathBuf::from("vitals.json")];

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("vitals").join("config.toml"));
            paths.push(config_dir.join("vitals").join("config.json"));
        }

        paths.push(PathBuf::from("/etc/vitals/config.toml"));
        paths
    }

    /// Defaults, then the first readable file, then environment overrides
    pub async fn load(&self) -> Result<EngineConfig, ConfigError> {
        let mut config = EngineConfig::default();

        for path in &self.config_paths {
            if !path.exists() {
                continue;
            }
            match Self::load_file(path).await {
                Ok(file_config) => {
                    info!(path = %path.display(), "Loaded engine configuration");
                    config = file_config;
                    break;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable config file");
                }
            }
        }

        let config = self.apply_overrides(config, |key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a single file without overrides or validation
    pub async fn load_file(path: &Path) -> Result<EngineConfig, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");
        let parse_error = |reason: String| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        };

        match extension {
            "json" => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string())),
            _ => toml::from_str(&content).map_err(|e| parse_error(e.to_string())),
        }
    }

    /// Apply `<prefix>*` overrides read through `lookup`
    pub fn apply_overrides<F>(
        &self,
        mut config: EngineConfig,
        lookup: F,
    ) -> Result<EngineConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", self.env_prefix, name));

        if let Some(value) = var("EVALUATION_INTERVAL_MS") {
            config.evaluation_interval =
                Duration::from_millis(parse_override("evaluation_interval_ms", &value)?);
        }
        if let Some(value) = var("HEALTH_CHECK_TIMEOUT_MS") {
            config.health_check_timeout =
                Duration::from_millis(parse_override("health_check_timeout_ms", &value)?);
        }
        if let Some(value) = var("HISTORY_CAPACITY") {
            config.history_capacity = parse_override("history_capacity", &value)?;
        }
        if let Some(value) = var("BREAKER_FAILURE_THRESHOLD") {
            config.breaker.failure_threshold = parse_override("breaker.failure_threshold", &value)?;
        }
        if let Some(value) = var("BREAKER_RESET_TIMEOUT_MS") {
            config.breaker.reset_timeout =
                Duration::from_millis(parse_override("breaker.reset_timeout_ms", &value)?);
        }
        if let Some(value) = var("HYSTERESIS_MARGIN") {
            config.alerts.hysteresis_margin = parse_override("alerts.hysteresis_margin", &value)?;
        }
        if let Some(value) = var("TRIP_BREAKER_ON_CRITICAL") {
            config.trip_breaker_on_critical = matches!(
                value.to_lowercase().as_str(),
                "true" | "1" | "yes"
            );
        }
        if let Some(value) = var("AUTO_RECOVER") {
            config.recovery.auto_recover =
                matches!(value.to_lowercase().as_str(), "true" | "1" | "yes");
        }

        debug!(prefix = %self.env_prefix, "Applied environment overrides");
        Ok(config)
    }

    pub async fn save_config(config: &EngineConfig, path: &Path) -> Result<(), ConfigError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("toml");

        let content = match extension {
            "json" => serde_json::to_string_pretty(config).map_err(|e| e.to_string()),
            _ => toml::to_string_pretty(config).map_err(|e| e.to_string()),
        }
        .map_err(|reason| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        })?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|source| ConfigError::Io {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }

        tokio::fs::write(path, content)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// A representative configuration with a renderer component and one strategy
    pub fn example_config() -> EngineConfig {
        let mut renderer_thresholds = ThresholdSet::new();
        renderer_thresholds.insert("fps".to_string(), Threshold::below(45.0, 30.0));
        renderer_thresholds.insert("frame_time_ms".to_string(), Threshold::above(22.0, 33.0));
        renderer_thresholds.insert("gpu_utilization".to_string(), Threshold::above(85.0, 97.0));

        let mut network_thresholds = ThresholdSet::new();
        network_thresholds.insert("latency_ms".to_string(), Threshold::above(150.0, 400.0));
        network_thresholds.insert("error_count".to_string(), Threshold::above(5.0, 20.0));

        let reduce_quality = RecoveryStrategy::new("renderer-reduce-quality", "Reduce render quality")
            .for_component("renderer")
            .trigger(TriggerCondition::new(
                "fps",
                ComparisonOperator::LessThan,
                30.0,
                Duration::from_secs(10),
            ))
            .action(
                RecoveryAction::new(ActionKind::ClearCache).with_timeout(Duration::from_secs(2)),
            )
            .action(
                RecoveryAction::new(ActionKind::ReduceQuality)
                    .with_param("level", serde_json::json!("medium"))
                    .with_timeout(Duration::from_secs(5))
                    .rollback_on_failure(true),
            )
            .action(
                RecoveryAction::new(ActionKind::Notify)
                    .with_param("message", serde_json::json!("renderer quality reduced"))
                    .non_critical(),
            )
            .success(SuccessCriterion::new("fps", 45.0, 5.0))
            .priority(10)
            .max_retries(3)
            .cooldown(Duration::from_secs(60));

        EngineConfig {
            components: vec![
                ComponentConfig {
                    id: ComponentId::from("renderer"),
                    thresholds: renderer_thresholds,
                    breaker: None,
                },
                ComponentConfig {
                    id: ComponentId::from("network"),
                    thresholds: network_thresholds,
                    breaker: Some(CircuitBreakerConfig {
                        failure_threshold: 3,
                        reset_timeout: Duration::from_secs(15),
                    }),
                },
            ],
            strategies: vec![reduce_quality],
            ..EngineConfig::default()
        }
    }

    pub fn generate_example_config() -> Result<String, ConfigError> {
        toml::to_string_pretty(&Self::example_config()).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<example>"),
            reason: e.to_string(),
        })
    }
}

fn parse_override<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidSetting {
            field,
            reason: format!("'{value}': {e}"),
        })
}
