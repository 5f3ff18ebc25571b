// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::batch::Precision;
use crate::client::HttpConfig;

pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_BATCH_SIZE: usize = 200;

const ENV_PREFIX: &str = "INFLUX_LOGS_";

#[derive(Debug, PartialEq, thiserror::Error)]
#[allow(clippy::module_name_repetitions)]
pub enum ConfigError {
    #[error("{0} environment variable is not set")]
    Missing(String),

    #[error("invalid value {value:?} for {var}: {reason}")]
    Parse {
        var: String,
        value: String,
        reason: String,
    },
}

/// Hook configuration. Applied when the hook is created and immutable afterwards.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Config {
    /// InfluxDB base url, e.g. `http://localhost:8086`
    pub url: String,
    pub database: String,
    pub measurement: String,
    /// how often to flush buffered points, in seconds
    #[serde(
        default = "default_batch_interval",
        deserialize_with = "deserialize_duration_from_seconds"
    )]
    pub batch_interval: Duration,
    /// number of buffered points that triggers an immediate flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub precision: Precision,
    /// record fields written as tags instead of fields
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub retention_policy: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// HTTP request timeout, in seconds
    #[serde(default, deserialize_with = "deserialize_optional_duration_from_seconds")]
    pub timeout: Option<Duration>,
    /// Upper bound on points kept after failed writes. Unbounded when unset.
    #[serde(default)]
    pub max_buffered_points: Option<usize>,
}

fn default_batch_interval() -> Duration {
    DEFAULT_BATCH_INTERVAL
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn deserialize_duration_from_seconds<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Duration, D::Error> {
    Ok(Duration::from_secs(u64::deserialize(deserializer)?))
}

fn deserialize_optional_duration_from_seconds<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Duration>, D::Error> {
    Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_secs))
}

impl Config {
    pub fn new(url: &str, database: &str, measurement: &str) -> Self {
        Self {
            url: url.to_string(),
            database: database.to_string(),
            measurement: measurement.to_string(),
            batch_interval: DEFAULT_BATCH_INTERVAL,
            batch_size: DEFAULT_BATCH_SIZE,
            precision: Precision::default(),
            tags: Vec::new(),
            retention_policy: None,
            username: None,
            password: None,
            timeout: None,
            max_buffered_points: None,
        }
    }

    /// Reads the configuration from `INFLUX_LOGS_*` environment variables.
    ///
    /// `INFLUX_LOGS_URL`, `INFLUX_LOGS_DATABASE` and `INFLUX_LOGS_MEASUREMENT`
    /// are required, everything else falls back to the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::new(
            &required("URL")?,
            &required("DATABASE")?,
            &required("MEASUREMENT")?,
        );

        if let Some(secs) = parsed::<u64>("BATCH_INTERVAL")? {
            config.batch_interval = Duration::from_secs(secs);
        }
        if let Some(size) = parsed::<usize>("BATCH_SIZE")? {
            config.batch_size = size;
        }
        if let Some(precision) = parsed::<Precision>("PRECISION")? {
            config.precision = precision;
        }
        if let Some(tags) = optional("TAGS") {
            config.tags = tags
                .split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(ToString::to_string)
                .collect();
        }
        config.retention_policy = optional("RETENTION_POLICY");
        config.username = optional("USERNAME");
        config.password = optional("PASSWORD");
        config.timeout = parsed::<u64>("TIMEOUT")?.map(Duration::from_secs);
        config.max_buffered_points = parsed::<usize>("MAX_BUFFERED_POINTS")?;

        Ok(config)
    }

    /// Seconds between forced flushes.
    #[must_use]
    pub fn with_batch_interval(mut self, secs: u64) -> Self {
        self.batch_interval = Duration::from_secs(secs);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, count: usize) -> Self {
        self.batch_size = count;
        self
    }

    #[must_use]
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_retention_policy(mut self, retention_policy: &str) -> Self {
        self.retention_policy = Some(retention_policy.to_string());
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_max_buffered_points(mut self, max: usize) -> Self {
        self.max_buffered_points = Some(max);
        self
    }

    #[must_use]
    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            url: self.url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            timeout: self.timeout,
            user_agent: None,
        }
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{name}"))
        .ok()
        .filter(|value| !value.is_empty())
}

fn required(name: &str) -> Result<String, ConfigError> {
    optional(name).ok_or_else(|| ConfigError::Missing(format!("{ENV_PREFIX}{name}")))
}

fn parsed<T>(name: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional(name)
        .map(|value| {
            value.trim().parse::<T>().map_err(|e| ConfigError::Parse {
                var: format!("{ENV_PREFIX}{name}"),
                value: value.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 12] = [
        "URL",
        "DATABASE",
        "MEASUREMENT",
        "BATCH_INTERVAL",
        "BATCH_SIZE",
        "PRECISION",
        "TAGS",
        "RETENTION_POLICY",
        "USERNAME",
        "PASSWORD",
        "TIMEOUT",
        "MAX_BUFFERED_POINTS",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(format!("{ENV_PREFIX}{var}"));
        }
    }

    fn set_required() {
        env::set_var("INFLUX_LOGS_URL", "http://localhost:8086");
        env::set_var("INFLUX_LOGS_DATABASE", "logs");
        env::set_var("INFLUX_LOGS_MEASUREMENT", "app");
    }

    #[test]
    fn test_defaults() {
        let config = Config::new("http://localhost:8086", "logs", "app");
        assert_eq!(config.batch_interval, Duration::from_secs(5));
        assert_eq!(config.batch_size, 200);
        assert_eq!(config.precision, Precision::Nanoseconds);
        assert!(config.tags.is_empty());
        assert_eq!(config.max_buffered_points, None);
    }

    #[test]
    fn test_builder() {
        let config = Config::new("http://localhost:8086", "logs", "app")
            .with_batch_interval(1)
            .with_batch_size(10)
            .with_precision(Precision::Seconds)
            .with_tags(["host", "service"])
            .with_credentials("user", "pass");

        assert_eq!(config.batch_interval, Duration::from_secs(1));
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.precision, Precision::Seconds);
        assert_eq!(config.tags, vec!["host".to_string(), "service".to_string()]);

        let http = config.http_config();
        assert_eq!(http.username.as_deref(), Some("user"));
        assert_eq!(http.password.as_deref(), Some("pass"));
    }

    #[test]
    #[serial]
    fn test_from_env_missing_required() {
        clear_env();
        env::set_var("INFLUX_LOGS_URL", "http://localhost:8086");

        assert_eq!(
            Config::from_env(),
            Err(ConfigError::Missing("INFLUX_LOGS_DATABASE".to_string()))
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_defaults() {
        clear_env();
        set_required();

        let config = Config::from_env().unwrap();
        assert_eq!(config, Config::new("http://localhost:8086", "logs", "app"));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_overrides() {
        clear_env();
        set_required();
        env::set_var("INFLUX_LOGS_BATCH_INTERVAL", "30");
        env::set_var("INFLUX_LOGS_BATCH_SIZE", "50");
        env::set_var("INFLUX_LOGS_PRECISION", "ms");
        env::set_var("INFLUX_LOGS_TAGS", "host, service,,region");
        env::set_var("INFLUX_LOGS_RETENTION_POLICY", "weekly");
        env::set_var("INFLUX_LOGS_TIMEOUT", "10");
        env::set_var("INFLUX_LOGS_MAX_BUFFERED_POINTS", "10000");

        let config = Config::from_env().unwrap();
        assert_eq!(config.batch_interval, Duration::from_secs(30));
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.precision, Precision::Milliseconds);
        assert_eq!(config.tags, vec!["host", "service", "region"]);
        assert_eq!(config.retention_policy.as_deref(), Some("weekly"));
        assert_eq!(config.timeout, Some(Duration::from_secs(10)));
        assert_eq!(config.max_buffered_points, Some(10000));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_number() {
        clear_env();
        set_required();
        env::set_var("INFLUX_LOGS_BATCH_SIZE", "lots");

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Parse { var, .. }) if var == "INFLUX_LOGS_BATCH_SIZE"
        ));
        clear_env();
    }

    #[test]
    #[serial]
    fn test_from_env_invalid_precision() {
        clear_env();
        set_required();
        env::set_var("INFLUX_LOGS_PRECISION", "weeks");

        assert!(matches!(
            Config::from_env(),
            Err(ConfigError::Parse { var, .. }) if var == "INFLUX_LOGS_PRECISION"
        ));
        clear_env();
    }

    #[test]
    fn test_deserialize() {
        let config: Config = serde_json::from_str(
            r#"{
                "url": "http://localhost:8086",
                "database": "logs",
                "measurement": "app",
                "batch_interval": 2,
                "precision": "s",
                "tags": ["host"],
                "timeout": 3
            }"#,
        )
        .unwrap();

        assert_eq!(config.batch_interval, Duration::from_secs(2));
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.precision, Precision::Seconds);
        assert_eq!(config.tags, vec!["host"]);
        assert_eq!(config.timeout, Some(Duration::from_secs(3)));
    }
}
