// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shipper configuration, read from `LOGSTREAM_*` environment variables.
//!
//! Unset and empty variables fall back to defaults. Malformed values are
//! reported as [`ConfigError::ParseError`] rather than silently ignored.

use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tracing::warn;

use crate::logs::constants::{DEFAULT_QUEUE_CAPACITY, MAX_BATCH_EVENTS};
use crate::logs::error_renderer::StackTraceFormat;

pub const DEFAULT_REGION: &str = "us-west-2";
pub const DEFAULT_LOG_GROUP: &str = "application-logs";
const DEFAULT_FLUSH_PERIOD_SECS: u64 = 5;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, PartialEq, Eq, Error)]
#[allow(clippy::module_name_repetitions)]
pub enum ConfigError {
    #[error("failed to parse {0}")]
    ParseError(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// What the worker does with a batch rejected for a stale token.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum InvalidTokenPolicy {
    /// Adopt the expected token and drop the batch.
    #[default]
    Adopt,
    /// Adopt the expected token and submit the batch once more.
    Resubmit,
}

impl FromStr for InvalidTokenPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adopt" => Ok(Self::Adopt),
            "resubmit" => Ok(Self::Resubmit),
            other => Err(ConfigError::ParseError(format!(
                "LOGSTREAM_INVALID_TOKEN_POLICY: unknown policy {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub region: String,
    /// Overrides the regional endpoint, e.g. for a local store or a test server.
    pub endpoint: Option<String>,
    pub log_group: String,
    pub stream_prefix: String,
    pub flush_period: Duration,
    pub stack_trace: StackTraceFormat,
    pub queue_capacity: usize,
    /// Maximum events per append call.
    pub drain_limit: usize,
    /// The worker only sleeps between cycles while fewer events than this
    /// are queued.
    pub low_water_mark: usize,
    pub shutdown_timeout: Duration,
    pub request_timeout: Duration,
    pub invalid_token_policy: InvalidTokenPolicy,
    pub proxy_https: Option<String>,
    /// Also writes every formatted record to stderr.
    pub echo_stderr: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            log_group: DEFAULT_LOG_GROUP.to_string(),
            stream_prefix: String::new(),
            flush_period: Duration::from_secs(DEFAULT_FLUSH_PERIOD_SECS),
            stack_trace: StackTraceFormat::None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            drain_limit: MAX_BATCH_EVENTS,
            low_water_mark: MAX_BATCH_EVENTS,
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            invalid_token_policy: InvalidTokenPolicy::Adopt,
            proxy_https: None,
            echo_stderr: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Config, ConfigError> {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let region = resolve_region(
            var("LOGSTREAM_REGION").as_deref(),
            var("AWS_REGION").or_else(|| var("AWS_DEFAULT_REGION")).as_deref(),
        );

        let flush_period_secs =
            parse_var(&var, "LOGSTREAM_FLUSH_PERIOD_SECS")?.unwrap_or(DEFAULT_FLUSH_PERIOD_SECS);
        if flush_period_secs == 0 {
            return Err(ConfigError::Invalid(
                "LOGSTREAM_FLUSH_PERIOD_SECS must be greater than zero".to_string(),
            ));
        }

        let queue_capacity =
            parse_var(&var, "LOGSTREAM_QUEUE_CAPACITY")?.unwrap_or(DEFAULT_QUEUE_CAPACITY);
        if queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "LOGSTREAM_QUEUE_CAPACITY must be greater than zero".to_string(),
            ));
        }

        let drain_limit = parse_var::<usize>(&var, "LOGSTREAM_DRAIN_LIMIT")?
            .unwrap_or(MAX_BATCH_EVENTS)
            .clamp(1, MAX_BATCH_EVENTS);
        let low_water_mark =
            parse_var(&var, "LOGSTREAM_LOW_WATER_MARK")?.unwrap_or(drain_limit);
        if low_water_mark == 0 {
            return Err(ConfigError::Invalid(
                "LOGSTREAM_LOW_WATER_MARK must be greater than zero".to_string(),
            ));
        }

        let stack_trace = match var("LOGSTREAM_STACK_TRACE") {
            Some(name) => {
                let format = StackTraceFormat::parse(&name);
                if format == StackTraceFormat::None && !name.eq_ignore_ascii_case("none") {
                    warn!("LOGSTREAM | Unknown stack trace format {name:?}, using none");
                }
                format
            }
            None => StackTraceFormat::None,
        };

        let invalid_token_policy = match var("LOGSTREAM_INVALID_TOKEN_POLICY") {
            Some(policy) => policy.parse()?,
            None => InvalidTokenPolicy::default(),
        };

        Ok(Config {
            region,
            endpoint: var("LOGSTREAM_ENDPOINT"),
            log_group: var("LOGSTREAM_LOG_GROUP").unwrap_or_else(|| DEFAULT_LOG_GROUP.to_string()),
            stream_prefix: var("LOGSTREAM_STREAM_PREFIX")
                .or_else(|| var("LOGSTREAM_ENV"))
                .unwrap_or_default(),
            flush_period: Duration::from_secs(flush_period_secs),
            stack_trace,
            queue_capacity,
            drain_limit,
            low_water_mark,
            shutdown_timeout: Duration::from_millis(
                parse_var(&var, "LOGSTREAM_SHUTDOWN_TIMEOUT_MS")?
                    .unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            ),
            request_timeout: Duration::from_secs(
                parse_var(&var, "LOGSTREAM_REQUEST_TIMEOUT_SECS")?
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
            invalid_token_policy,
            proxy_https: var("LOGSTREAM_PROXY_HTTPS").or_else(|| var("HTTPS_PROXY")),
            echo_stderr: parse_var(&var, "LOGSTREAM_ECHO_STDERR")?.unwrap_or(false),
        })
    }

    /// Base URL of the log store for the configured region.
    #[must_use]
    pub fn endpoint(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None if self.region.starts_with("cn-") => {
                format!("https://logs.{}.amazonaws.com.cn", self.region)
            }
            None => format!("https://logs.{}.amazonaws.com", self.region),
        }
    }
}

fn parse_var<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    var(name)
        .map(|value| {
            value
                .parse::<T>()
                .map_err(|_| ConfigError::ParseError(format!("{name}: {value:?}")))
        })
        .transpose()
}

fn region_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z]{2}(-gov|-iso[a-z]*)?-[a-z]+-\d+$").expect("failed creating regex")
    })
}

/// Picks the explicit region, else the ambient one, else [`DEFAULT_REGION`].
///
/// An unrecognised name is skipped with a warning in favour of the next
/// candidate.
#[must_use]
pub fn resolve_region(explicit: Option<&str>, ambient: Option<&str>) -> String {
    [("LOGSTREAM_REGION", explicit), ("ambient region", ambient)]
        .into_iter()
        .filter_map(|(source, region)| region.map(|region| (source, region)))
        .find_map(|(source, region)| {
            let region = region.to_ascii_lowercase();
            if region_pattern().is_match(&region) {
                Some(region)
            } else {
                warn!("LOGSTREAM | Ignoring unknown region {region:?} from {source}");
                None
            }
        })
        .unwrap_or_else(|| DEFAULT_REGION.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = from_pairs(&[]).unwrap();

        assert_eq!(config.region, "us-west-2");
        assert_eq!(config.log_group, "application-logs");
        assert_eq!(config.stream_prefix, "");
        assert_eq!(config.flush_period, Duration::from_secs(5));
        assert_eq!(config.queue_capacity, 10_000);
        assert_eq!(config.drain_limit, 10_000);
        assert_eq!(config.low_water_mark, 10_000);
        assert_eq!(config.stack_trace, StackTraceFormat::None);
        assert_eq!(config.invalid_token_policy, InvalidTokenPolicy::Adopt);
        assert_eq!(config.endpoint(), "https://logs.us-west-2.amazonaws.com");
    }

    #[test]
    fn test_explicit_values() {
        let config = from_pairs(&[
            ("LOGSTREAM_REGION", "eu-central-1"),
            ("LOGSTREAM_LOG_GROUP", "billing"),
            ("LOGSTREAM_STREAM_PREFIX", "prod"),
            ("LOGSTREAM_FLUSH_PERIOD_SECS", "1"),
            ("LOGSTREAM_STACK_TRACE", "Full+Causes"),
            ("LOGSTREAM_DRAIN_LIMIT", "500"),
            ("LOGSTREAM_INVALID_TOKEN_POLICY", "resubmit"),
            ("LOGSTREAM_ENDPOINT", "http://localhost:4566/"),
        ])
        .unwrap();

        assert_eq!(config.region, "eu-central-1");
        assert_eq!(config.log_group, "billing");
        assert_eq!(config.stream_prefix, "prod");
        assert_eq!(config.flush_period, Duration::from_secs(1));
        assert_eq!(config.stack_trace, StackTraceFormat::FullPlusCauses);
        assert_eq!(config.drain_limit, 500);
        assert_eq!(config.low_water_mark, 500);
        assert_eq!(config.invalid_token_policy, InvalidTokenPolicy::Resubmit);
        assert_eq!(config.endpoint(), "http://localhost:4566");
    }

    #[test]
    fn test_region_falls_back_to_ambient() {
        let config = from_pairs(&[("AWS_DEFAULT_REGION", "ap-southeast-2")]).unwrap();
        assert_eq!(config.region, "ap-southeast-2");

        let config = from_pairs(&[
            ("AWS_REGION", "us-east-1"),
            ("AWS_DEFAULT_REGION", "ap-southeast-2"),
        ])
        .unwrap();
        assert_eq!(config.region, "us-east-1");
    }

    #[test]
    fn test_region_validation() {
        assert_eq!(resolve_region(Some("us-gov-west-1"), None), "us-gov-west-1");
        assert_eq!(resolve_region(Some("CN-NORTH-1"), None), "cn-north-1");
        assert_eq!(resolve_region(None, None), DEFAULT_REGION);
    }

    #[test]
    fn test_unknown_region_falls_through() {
        assert_eq!(resolve_region(Some("mars-1"), Some("us-east-1")), "us-east-1");
        assert_eq!(resolve_region(Some("mars-1"), None), DEFAULT_REGION);
        assert_eq!(resolve_region(Some("mars-1"), Some("moon")), DEFAULT_REGION);

        let config = from_pairs(&[
            ("LOGSTREAM_REGION", "atlantis"),
            ("AWS_REGION", "eu-west-3"),
        ])
        .unwrap();
        assert_eq!(config.region, "eu-west-3");
    }

    #[test]
    fn test_china_endpoint() {
        let config = from_pairs(&[("LOGSTREAM_REGION", "cn-north-1")]).unwrap();
        assert_eq!(config.endpoint(), "https://logs.cn-north-1.amazonaws.com.cn");
    }

    #[test]
    fn test_prefix_falls_back_to_env_name() {
        let config = from_pairs(&[("LOGSTREAM_ENV", "staging")]).unwrap();
        assert_eq!(config.stream_prefix, "staging");
    }

    #[test]
    fn test_drain_limit_is_clamped() {
        let config = from_pairs(&[("LOGSTREAM_DRAIN_LIMIT", "50000")]).unwrap();
        assert_eq!(config.drain_limit, 10_000);

        let config = from_pairs(&[("LOGSTREAM_DRAIN_LIMIT", "0")]).unwrap();
        assert_eq!(config.drain_limit, 1);
    }

    #[test]
    fn test_malformed_number_is_parse_error() {
        let err = from_pairs(&[("LOGSTREAM_QUEUE_CAPACITY", "lots")]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::ParseError("LOGSTREAM_QUEUE_CAPACITY: \"lots\"".to_string())
        );
    }

    #[test]
    fn test_zero_values_are_invalid() {
        assert!(matches!(
            from_pairs(&[("LOGSTREAM_FLUSH_PERIOD_SECS", "0")]),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            from_pairs(&[("LOGSTREAM_QUEUE_CAPACITY", "0")]),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_unknown_policy_is_parse_error() {
        assert!(matches!(
            from_pairs(&[("LOGSTREAM_INVALID_TOKEN_POLICY", "retry")]),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_echo_stderr() {
        assert!(!from_pairs(&[]).unwrap().echo_stderr);
        assert!(from_pairs(&[("LOGSTREAM_ECHO_STDERR", "true")]).unwrap().echo_stderr);
        assert!(matches!(
            from_pairs(&[("LOGSTREAM_ECHO_STDERR", "yes")]),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        env::set_var("LOGSTREAM_LOG_GROUP", "from-env");
        env::set_var("LOGSTREAM_PROXY_HTTPS", "https://proxy.local:3128");
        env::set_var("HTTPS_PROXY", "https://ignored.local:3128");

        let config = Config::from_env().unwrap();

        assert_eq!(config.log_group, "from-env");
        assert_eq!(config.proxy_https.as_deref(), Some("https://proxy.local:3128"));

        env::remove_var("LOGSTREAM_LOG_GROUP");
        env::remove_var("LOGSTREAM_PROXY_HTTPS");
        env::remove_var("HTTPS_PROXY");
    }

    #[test]
    #[serial]
    fn test_https_proxy_fallback() {
        env::remove_var("LOGSTREAM_PROXY_HTTPS");
        env::set_var("HTTPS_PROXY", "https://proxy.local:3128");

        let config = Config::from_env().unwrap();
        assert_eq!(config.proxy_https.as_deref(), Some("https://proxy.local:3128"));

        env::remove_var("HTTPS_PROXY");
    }
}
