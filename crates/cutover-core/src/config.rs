//! cutover.toml configuration parser.
//!
//! Every field is optional. Sections resolve into typed settings whose
//! `Default` impls carry the production defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for `{field}`: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CutoverConfig {
    pub flags: Option<FlagsConfig>,
    pub rollout: Option<RolloutConfig>,
    pub monitor: Option<MonitorConfig>,
    pub storage: Option<StorageConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlagsConfig {
    pub cache_ttl: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RolloutConfig {
    pub poll_interval: Option<String>,
    pub soak_window: Option<String>,
    pub metrics_interval: Option<String>,
    pub max_failed_probes_per_poll: Option<u32>,
    pub max_soak_errors: Option<u32>,
    pub min_consistency_pct: Option<f64>,
    pub query_budget_ms: Option<u64>,
    pub sample_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub interval: Option<String>,
    pub metrics_window: Option<String>,
    pub alert_retention: Option<String>,
    pub max_response_time_ms: Option<f64>,
    pub min_consistency_pct: Option<f64>,
    pub consecutive_failure_limit: Option<u32>,
    pub dedup_alerts: Option<bool>,
    pub rollback_on_critical: Option<bool>,
    pub sample_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    pub path: Option<PathBuf>,
}

/// Resolved flag store settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagSettings {
    /// How long a fetched flag record is served from cache.
    pub cache_ttl: Duration,
}

impl Default for FlagSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(30),
        }
    }
}

/// Resolved rollout controller settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RolloutSettings {
    /// Interval between soak polls after a phase change.
    pub poll_interval: Duration,
    /// Total soak window after a phase change.
    pub soak_window: Duration,
    /// Interval of the controller's background metrics loop.
    pub metrics_interval: Duration,
    /// A single soak poll with more failed probes than this aborts the phase.
    pub max_failed_probes_per_poll: u32,
    /// Cumulative failed probes across the soak window that force a rollback.
    pub max_soak_errors: u32,
    /// Minimum consistency score for the consistency probe to pass.
    pub min_consistency_pct: f64,
    /// Response time budget for the aggregate join probe.
    pub query_budget_ms: u64,
    /// Rows sampled by the read probes.
    pub sample_size: usize,
}

impl Default for RolloutSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            soak_window: Duration::from_secs(5 * 60),
            metrics_interval: Duration::from_secs(60),
            max_failed_probes_per_poll: 3,
            max_soak_errors: 10,
            min_consistency_pct: 90.0,
            query_budget_ms: 1000,
            sample_size: 10,
        }
    }
}

/// Resolved health monitor settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSettings {
    pub interval: Duration,
    /// Metrics samples older than this are evicted from history.
    pub metrics_window: Duration,
    /// Alerts older than this are pruned.
    pub alert_retention: Duration,
    pub max_response_time_ms: f64,
    pub min_consistency_pct: f64,
    /// Consecutive pipeline failures that trigger an automatic rollback.
    pub consecutive_failure_limit: u32,
    /// Keep one open alert per condition instead of one per tick.
    pub dedup_alerts: bool,
    /// Roll back as soon as a tick classifies as critical.
    pub rollback_on_critical: bool,
    pub sample_size: usize,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            metrics_window: Duration::from_secs(60 * 60),
            alert_retention: Duration::from_secs(24 * 60 * 60),
            max_response_time_ms: 1000.0,
            min_consistency_pct: 95.0,
            consecutive_failure_limit: 3,
            dedup_alerts: true,
            rollback_on_critical: false,
            sample_size: 10,
        }
    }
}

impl CutoverConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn flag_settings(&self) -> Result<FlagSettings, ConfigError> {
        let defaults = FlagSettings::default();
        let Some(cfg) = &self.flags else {
            return Ok(defaults);
        };
        Ok(FlagSettings {
            cache_ttl: duration_or("flags.cache_ttl", &cfg.cache_ttl, defaults.cache_ttl)?,
        })
    }

    pub fn rollout_settings(&self) -> Result<RolloutSettings, ConfigError> {
        let d = RolloutSettings::default();
        let Some(cfg) = &self.rollout else {
            return Ok(d);
        };
        let settings = RolloutSettings {
            poll_interval: duration_or("rollout.poll_interval", &cfg.poll_interval, d.poll_interval)?,
            soak_window: duration_or("rollout.soak_window", &cfg.soak_window, d.soak_window)?,
            metrics_interval: duration_or(
                "rollout.metrics_interval",
                &cfg.metrics_interval,
                d.metrics_interval,
            )?,
            max_failed_probes_per_poll: cfg
                .max_failed_probes_per_poll
                .unwrap_or(d.max_failed_probes_per_poll),
            max_soak_errors: cfg.max_soak_errors.unwrap_or(d.max_soak_errors),
            min_consistency_pct: cfg.min_consistency_pct.unwrap_or(d.min_consistency_pct),
            query_budget_ms: cfg.query_budget_ms.unwrap_or(d.query_budget_ms),
            sample_size: cfg.sample_size.unwrap_or(d.sample_size),
        };
        check_pct("rollout.min_consistency_pct", settings.min_consistency_pct)?;
        if settings.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "rollout.poll_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if settings.metrics_interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "rollout.metrics_interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if settings.soak_window < settings.poll_interval {
            return Err(ConfigError::InvalidValue {
                field: "rollout.soak_window",
                reason: "must be at least one poll interval".to_string(),
            });
        }
        Ok(settings)
    }

    pub fn monitor_settings(&self) -> Result<MonitorSettings, ConfigError> {
        let d = MonitorSettings::default();
        let Some(cfg) = &self.monitor else {
            return Ok(d);
        };
        let settings = MonitorSettings {
            interval: duration_or("monitor.interval", &cfg.interval, d.interval)?,
            metrics_window: duration_or("monitor.metrics_window", &cfg.metrics_window, d.metrics_window)?,
            alert_retention: duration_or(
                "monitor.alert_retention",
                &cfg.alert_retention,
                d.alert_retention,
            )?,
            max_response_time_ms: cfg.max_response_time_ms.unwrap_or(d.max_response_time_ms),
            min_consistency_pct: cfg.min_consistency_pct.unwrap_or(d.min_consistency_pct),
            consecutive_failure_limit: cfg
                .consecutive_failure_limit
                .unwrap_or(d.consecutive_failure_limit),
            dedup_alerts: cfg.dedup_alerts.unwrap_or(d.dedup_alerts),
            rollback_on_critical: cfg.rollback_on_critical.unwrap_or(d.rollback_on_critical),
            sample_size: cfg.sample_size.unwrap_or(d.sample_size),
        };
        check_pct("monitor.min_consistency_pct", settings.min_consistency_pct)?;
        if settings.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "monitor.interval",
                reason: "must be greater than zero".to_string(),
            });
        }
        if settings.consecutive_failure_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "monitor.consecutive_failure_limit",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(settings)
    }

    /// Path of the redb file, if configured.
    pub fn storage_path(&self) -> Option<&Path> {
        self.storage.as_ref().and_then(|s| s.path.as_deref())
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Parse a duration string like "500ms", "30s", "5m", "24h".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn duration_or(
    field: &'static str,
    value: &Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(raw) => parse_duration(raw).ok_or_else(|| ConfigError::InvalidDuration {
            field,
            value: raw.clone(),
        }),
    }
}

fn check_pct(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field,
            reason: format!("{value} is outside 0-100"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = CutoverConfig::parse("").unwrap();
        assert_eq!(config.flag_settings().unwrap(), FlagSettings::default());
        assert_eq!(config.rollout_settings().unwrap(), RolloutSettings::default());
        assert_eq!(config.monitor_settings().unwrap(), MonitorSettings::default());
        assert!(config.storage_path().is_none());
    }

    #[test]
    fn defaults_match_documented_values() {
        let rollout = RolloutSettings::default();
        assert_eq!(rollout.poll_interval, Duration::from_secs(30));
        assert_eq!(rollout.soak_window, Duration::from_secs(300));
        assert_eq!(rollout.max_soak_errors, 10);

        let monitor = MonitorSettings::default();
        assert_eq!(monitor.interval, Duration::from_secs(60));
        assert_eq!(monitor.metrics_window, Duration::from_secs(3600));
        assert_eq!(monitor.alert_retention, Duration::from_secs(86_400));
        assert_eq!(monitor.consecutive_failure_limit, 3);

        assert_eq!(FlagSettings::default().cache_ttl, Duration::from_secs(30));
    }

    #[test]
    fn parse_partial_sections() {
        let config = CutoverConfig::parse(
            r#"
[flags]
cache_ttl = "10s"

[rollout]
soak_window = "10m"
max_soak_errors = 4

[monitor]
interval = "15s"
dedup_alerts = false

[storage]
path = "/tmp/cutover.redb"
"#,
        )
        .unwrap();

        assert_eq!(config.flag_settings().unwrap().cache_ttl, Duration::from_secs(10));

        let rollout = config.rollout_settings().unwrap();
        assert_eq!(rollout.soak_window, Duration::from_secs(600));
        assert_eq!(rollout.max_soak_errors, 4);
        assert_eq!(rollout.poll_interval, Duration::from_secs(30));

        let monitor = config.monitor_settings().unwrap();
        assert_eq!(monitor.interval, Duration::from_secs(15));
        assert!(!monitor.dedup_alerts);

        assert_eq!(config.storage_path(), Some(Path::new("/tmp/cutover.redb")));
    }

    #[test]
    fn invalid_duration_is_reported_with_field() {
        let config = CutoverConfig::parse("[monitor]\ninterval = \"soon\"\n").unwrap();
        let err = config.monitor_settings().unwrap_err();
        assert!(err.to_string().contains("monitor.interval"));
    }

    #[test]
    fn soak_window_shorter_than_poll_is_rejected() {
        let config =
            CutoverConfig::parse("[rollout]\npoll_interval = \"1m\"\nsoak_window = \"30s\"\n")
                .unwrap();
        assert!(config.rollout_settings().is_err());
    }

    #[test]
    fn zero_metrics_interval_is_rejected() {
        let config = CutoverConfig::parse("[rollout]\nmetrics_interval = \"0s\"\n").unwrap();
        let err = config.rollout_settings().unwrap_err();
        assert!(err.to_string().contains("rollout.metrics_interval"));
    }

    #[test]
    fn overflowing_durations_are_invalid() {
        assert_eq!(parse_duration(&format!("{}m", u64::MAX)), None);
        assert_eq!(parse_duration(&format!("{}h", u64::MAX / 1000)), None);

        let config =
            CutoverConfig::parse(&format!("[monitor]\nalert_retention = \"{}h\"\n", u64::MAX))
                .unwrap();
        assert!(matches!(
            config.monitor_settings().unwrap_err(),
            ConfigError::InvalidDuration { field: "monitor.alert_retention", .. }
        ));
    }

    #[test]
    fn out_of_range_percentage_is_rejected() {
        let config = CutoverConfig::parse("[monitor]\nmin_consistency_pct = 120.0\n").unwrap();
        assert!(config.monitor_settings().is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cutover.toml");
        std::fs::write(&path, "[flags]\ncache_ttl = \"2m\"\n").unwrap();

        let config = CutoverConfig::from_file(&path).unwrap();
        assert_eq!(config.flag_settings().unwrap().cache_ttl, Duration::from_secs(120));
        assert!(config.to_toml_string().unwrap().contains("cache_ttl"));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("24h"), Some(Duration::from_secs(86_400)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("fast"), None);
    }
}
