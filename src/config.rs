//! Startup configuration, read from TOML.
//!
//! ```toml
//! [repository]
//! lock_stripes = 64
//!
//! [remote]
//! metrics_prefix = "metrics."
//! groups_prefix = "metrics.groups."
//!
//! [aggregate]
//! key_pattern = "d.d.k.d"
//! prefix = "aggregate."
//!
//! [export]
//! delay = "5s"
//! includes = ["counter.*", "gauge.*"]
//! url = "http://localhost:4242/metrics"
//! ```

use std::{path::Path, time::Duration};

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::{
    aggregate::{AggregateMetricReader, DEFAULT_AGGREGATE_PREFIX, DEFAULT_KEY_PATTERN},
    exporter::{NameFilter, TimestampFilter},
    repository::{
        remote::{DEFAULT_GROUPS_PREFIX, DEFAULT_METRICS_PREFIX},
        simple::DEFAULT_LOCK_STRIPES,
        InMemoryMetricRepository, MetricReader, RemoteMetricRepository,
        RemoteMultiMetricRepository, SortedSetStore,
    },
};

const MAX_LOCK_STRIPES: usize = 1 << 16;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    pub repository: RepositoryConfig,
    pub remote: RemoteConfig,
    pub aggregate: AggregateConfig,
    pub export: ExportConfig,
}
impl MetricsConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.repository.validate()?;
        self.remote.validate()?;
        self.aggregate.validate()?;
        self.export.validate()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepositoryConfig {
    pub lock_stripes: usize,
}
impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            lock_stripes: DEFAULT_LOCK_STRIPES,
        }
    }
}
impl RepositoryConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_LOCK_STRIPES).contains(&self.lock_stripes) {
            return Err(invalid(
                "repository.lock_stripes",
                format!("must be between 1 and {MAX_LOCK_STRIPES}"),
            ));
        }
        Ok(())
    }

    pub fn in_memory(&self) -> InMemoryMetricRepository {
        InMemoryMetricRepository::with_stripes(self.lock_stripes)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    pub metrics_prefix: String,
    pub groups_prefix: String,
}
impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            metrics_prefix: DEFAULT_METRICS_PREFIX.to_string(),
            groups_prefix: DEFAULT_GROUPS_PREFIX.to_string(),
        }
    }
}
impl RemoteConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (field, prefix) in [
            ("remote.metrics_prefix", &self.metrics_prefix),
            ("remote.groups_prefix", &self.groups_prefix),
        ] {
            if prefix.trim_end_matches('.').is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
        }
        Ok(())
    }

    pub fn metric_repository<S: SortedSetStore>(&self, store: S) -> RemoteMetricRepository<S> {
        RemoteMetricRepository::with_prefix(store, &self.metrics_prefix)
    }
    pub fn multi_metric_repository<S: SortedSetStore>(
        &self,
        store: S,
    ) -> RemoteMultiMetricRepository<S> {
        RemoteMultiMetricRepository::with_prefix(store, &self.groups_prefix)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AggregateConfig {
    pub key_pattern: String,
    pub prefix: String,
}
impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            key_pattern: DEFAULT_KEY_PATTERN.to_string(),
            prefix: DEFAULT_AGGREGATE_PREFIX.to_string(),
        }
    }
}
impl AggregateConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.key_pattern.split('.').any(str::is_empty) {
            return Err(invalid(
                "aggregate.key_pattern",
                "segments must be non-empty and dot-separated",
            ));
        }
        if !self.key_pattern.split('.').any(|segment| segment == "k") {
            return Err(invalid(
                "aggregate.key_pattern",
                "at least one segment must be `k`",
            ));
        }
        Ok(())
    }

    pub fn reader<R: MetricReader>(&self, source: R) -> AggregateMetricReader<R> {
        AggregateMetricReader::new(source)
            .with_key_pattern(&self.key_pattern)
            .with_prefix(&self.prefix)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExportConfig {
    pub enabled: bool,
    #[serde(deserialize_with = "deserialize_duration")]
    pub delay: Duration,
    pub includes: Vec<String>,
    pub excludes: Vec<String>,
    pub send_counter_deltas: bool,
    pub ignore_timestamps: bool,
    pub url: Option<String>,
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}
impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: Duration::from_secs(5),
            includes: vec![],
            excludes: vec![],
            send_counter_deltas: false,
            ignore_timestamps: false,
            url: None,
            timeout: Duration::from_secs(2),
        }
    }
}
impl ExportConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.delay.is_zero() {
            return Err(invalid("export.delay", "must be positive"));
        }
        if self.timeout.is_zero() {
            return Err(invalid("export.timeout", "must be positive"));
        }
        if let Some(url) = &self.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid("export.url", format!("not an http(s) url: {url}")));
            }
        }
        Ok(())
    }

    pub fn name_filter(&self) -> NameFilter {
        NameFilter::new(self.includes.clone(), self.excludes.clone())
    }
    pub fn timestamp_filter(&self) -> TimestampFilter {
        TimestampFilter::new(0, self.ignore_timestamps)
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    humantime::parse_duration(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::repository::InMemorySortedSetStore;

    #[test]
    fn empty_config_uses_defaults() {
        let config = MetricsConfig::from_toml_str("").unwrap();
        assert_eq!(config.repository.lock_stripes, DEFAULT_LOCK_STRIPES);
        assert_eq!(config.remote.groups_prefix, DEFAULT_GROUPS_PREFIX);
        assert_eq!(config.aggregate.key_pattern, DEFAULT_KEY_PATTERN);
        assert_eq!(config.export.delay, Duration::from_secs(5));
        assert!(config.export.url.is_none());
    }

    #[test]
    fn full_config() {
        let config = MetricsConfig::from_toml_str(
            r#"
            [repository]
            lock_stripes = 8

            [remote]
            metrics_prefix = "app"
            groups_prefix = "app.groups"

            [aggregate]
            key_pattern = "d.k.k"
            prefix = "all"

            [export]
            delay = "250ms"
            includes = ["counter.*"]
            excludes = ["*.debug"]
            send_counter_deltas = true
            url = "http://collector:4242/metrics"
            timeout = "1s"
            "#,
        )
        .unwrap();
        assert_eq!(config.repository.in_memory().count(), 0);
        assert_eq!(config.export.delay, Duration::from_millis(250));
        assert!(config.export.name_filter().accepts("counter.hits"));
        assert!(!config.export.name_filter().accepts("counter.x.debug"));

        let store = Arc::new(InMemorySortedSetStore::new());
        assert_eq!(config.remote.metric_repository(Arc::clone(&store)).prefix(), "app.");
        assert_eq!(
            config.remote.multi_metric_repository(store).keys_key(),
            "keys.app.groups"
        );
    }

    #[test]
    fn aggregate_reader_from_config() {
        let config = MetricsConfig::from_toml_str(
            "[aggregate]\nkey_pattern = \"d.k.k\"\nprefix = \"all\"\n",
        )
        .unwrap();
        let source = InMemoryMetricRepository::new();
        source.set(crate::Metric::at("h1.gauge.cpu", 0.5, 1));
        source.set(crate::Metric::at("h2.gauge.cpu", 0.7, 2));
        let reader = config.aggregate.reader(source);
        assert_eq!(reader.find_one("all.gauge.cpu").unwrap().unwrap().value, 0.7);
    }

    #[test]
    fn rejects_bad_values() {
        let err = MetricsConfig::from_toml_str("[repository]\nlock_stripes = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "repository.lock_stripes",
                ..
            }
        ));
        let err = MetricsConfig::from_toml_str("[export]\ndelay = \"0s\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "export.delay", .. }));
        let err = MetricsConfig::from_toml_str("[export]\nurl = \"ftp://x\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "export.url", .. }));
        let err = MetricsConfig::from_toml_str("[aggregate]\nkey_pattern = \"d.d\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
        let err = MetricsConfig::from_toml_str("[remote]\ngroups_prefix = \".\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn rejects_unknown_fields_and_bad_durations() {
        assert!(matches!(
            MetricsConfig::from_toml_str("[export]\nperiod = \"1s\"\n"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            MetricsConfig::from_toml_str("[export]\ndelay = \"soon\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file() {
        let err = MetricsConfig::from_path("/nonexistent/metrics.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
