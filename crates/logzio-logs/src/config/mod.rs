// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Extension configuration, read once from the process environment.
//!
//! Only the account token is mandatory. Every other setting has a default,
//! and a value that cannot be parsed is reported with a warning and replaced
//! by that default so a typo never keeps the function from starting.

pub mod log_level;

use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::logs::constants;
use log_level::LogLevel;

const ENV_TOKEN: &str = "LOGZIO_LOGS_TOKEN";
const ENV_CUSTOM_LISTENER: &str = "LOGZIO_CUSTOM_LISTENER";
const ENV_LISTENER: &str = "LOGZIO_LISTENER";
const ENV_REGION: &str = "LOGZIO_REGION";
const ENV_MAX_LOG_SIZE: &str = "LOGZIO_MAX_LOG_SIZE_BYTES";
const ENV_MAX_BULK_SIZE: &str = "LOGZIO_MAX_BULK_SIZE_BYTES";
const ENV_THREAD_TIMEOUT: &str = "THREAD_TIMEOUT";
const ENV_SEND_TIMEOUT: &str = "LOGZIO_SEND_TIMEOUT";
const ENV_BATCH_WORKERS: &str = "LOGZIO_BATCH_WORKERS";
const ENV_BULK_WORKERS: &str = "LOGZIO_BULK_WORKERS";
const ENV_USE_COMPRESSION: &str = "LOGZIO_USE_COMPRESSION";
const ENV_ENABLE_PLATFORM_LOGS: &str = "ENABLE_PLATFORM_LOGS";
const ENV_ENABLE_EXTENSION_LOGS: &str = "ENABLE_EXTENSION_LOGS";
const ENV_LOG_LEVEL: &str = "LOGS_EXT_LOG_LEVEL";
const ENV_CUSTOM_FIELDS: &str = "CUSTOM_FIELDS";
const ENV_FLATTEN_NESTED_MESSAGE: &str = "FLATTEN_NESTED_MESSAGE";
const ENV_RUNTIME_API: &str = "AWS_LAMBDA_RUNTIME_API";
const ENV_FUNCTION_NAME: &str = "AWS_LAMBDA_FUNCTION_NAME";
const ENV_AWS_REGION: &str = "AWS_REGION";
const ENV_GROK_PATTERNS: &str = "GROK_PATTERNS";
const ENV_LOGS_FORMAT: &str = "LOGS_FORMAT";

const DEFAULT_LISTENER: &str = "https://listener.logz.io:8071";
const DEFAULT_SEND_TIMEOUT_SECS: u64 = 5;
const DEFAULT_THREAD_TIMEOUT_SECS: u64 = 5;
const DEFAULT_BATCH_WORKERS: usize = 4;
const DEFAULT_BULK_WORKERS: usize = 8;
const DEFAULT_COMPRESSION_LEVEL: u32 = 6;
pub const DEFAULT_RECEIVER_PORT: u16 = 4243;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Logz.io account token, sent as the `token` query parameter.
    pub token: String,
    /// Base URL of the Logz.io listener, without trailing slash.
    pub listener_url: String,
    /// Lines whose size meets or exceeds this are dropped.
    pub max_log_size_bytes: usize,
    /// Upper bound of a single request body before compression.
    pub max_bulk_size_bytes: usize,
    /// How long a drain cycle waits for in-flight batches. `None` waits forever.
    pub completion_timeout: Option<Duration>,
    /// Per-request timeout for a single bulk POST.
    pub send_timeout: Duration,
    pub batch_workers: usize,
    pub bulk_workers: usize,
    pub use_compression: bool,
    pub compression_level: u32,
    pub enable_platform_logs: bool,
    pub enable_extension_logs: bool,
    pub log_level: LogLevel,
    pub custom_fields: BTreeMap<String, String>,
    pub flatten_nested_message: bool,
    pub function_name: Option<String>,
    pub aws_region: Option<String>,
    /// `host:port` of the Lambda runtime API.
    pub runtime_api: Option<String>,
    pub receiver_port: u16,
    pub https_proxy: Option<String>,
    /// Parses text records into fields. Set only when both `GROK_PATTERNS`
    /// and `LOGS_FORMAT` are given.
    pub grok: Option<GrokConfig>,
}

/// User-supplied grok setup for text records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrokConfig {
    /// Raw JSON object mapping pattern names to regular expressions.
    pub patterns: String,
    /// Grok expression a whole line is matched against.
    pub logs_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            token: String::new(),
            listener_url: DEFAULT_LISTENER.to_string(),
            max_log_size_bytes: constants::MAX_LOG_SIZE_BYTES,
            max_bulk_size_bytes: constants::MAX_BULK_SIZE_BYTES,
            completion_timeout: None,
            send_timeout: Duration::from_secs(DEFAULT_SEND_TIMEOUT_SECS),
            batch_workers: DEFAULT_BATCH_WORKERS,
            bulk_workers: DEFAULT_BULK_WORKERS,
            use_compression: true,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            enable_platform_logs: false,
            enable_extension_logs: false,
            log_level: LogLevel::default(),
            custom_fields: BTreeMap::new(),
            flatten_nested_message: false,
            function_name: None,
            aws_region: None,
            runtime_api: None,
            receiver_port: DEFAULT_RECEIVER_PORT,
            https_proxy: None,
            grok: None,
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Config, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name
    /// to its value. Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|val| !val.trim().is_empty());
        let defaults = Config::default();

        let token = get(ENV_TOKEN).ok_or(ConfigError::MissingVariable(ENV_TOKEN))?;

        let listener_url = listener_url(
            get(ENV_CUSTOM_LISTENER).or_else(|| get(ENV_LISTENER)),
            get(ENV_REGION),
        )?;

        let max_log_size_bytes =
            parse_positive(ENV_MAX_LOG_SIZE, get(ENV_MAX_LOG_SIZE), defaults.max_log_size_bytes);
        let max_bulk_size_bytes = parse_positive(
            ENV_MAX_BULK_SIZE,
            get(ENV_MAX_BULK_SIZE),
            defaults.max_bulk_size_bytes,
        );

        let completion_timeout = get(ENV_THREAD_TIMEOUT).map(|val| {
            let secs = match val.trim().parse::<i64>() {
                Ok(secs) => u64::try_from(secs).unwrap_or_else(|_| {
                    warn!("Invalid {ENV_THREAD_TIMEOUT}={val}, reverting to default value: {DEFAULT_THREAD_TIMEOUT_SECS}s");
                    DEFAULT_THREAD_TIMEOUT_SECS
                }),
                Err(e) => {
                    warn!("Could not parse {ENV_THREAD_TIMEOUT}={val}: {e}. Reverting to default value: {DEFAULT_THREAD_TIMEOUT_SECS}s");
                    DEFAULT_THREAD_TIMEOUT_SECS
                }
            };
            Duration::from_secs(secs)
        });
        if completion_timeout.is_none() {
            debug!("{ENV_THREAD_TIMEOUT} not set, batches are awaited without a timeout");
        }
        let send_timeout = Duration::from_secs(parse_positive(
            ENV_SEND_TIMEOUT,
            get(ENV_SEND_TIMEOUT),
            DEFAULT_SEND_TIMEOUT_SECS,
        ));

        let log_level = match get(ENV_LOG_LEVEL) {
            Some(val) => LogLevel::from_str(&val).unwrap_or_else(|e| {
                warn!("{e}. Reverting to default log level: {}", LogLevel::default().as_ref());
                LogLevel::default()
            }),
            None => LogLevel::default(),
        };

        let grok = match (get(ENV_GROK_PATTERNS), get(ENV_LOGS_FORMAT)) {
            (Some(patterns), Some(logs_format)) => Some(GrokConfig {
                patterns,
                logs_format,
            }),
            (None, None) => None,
            _ => {
                warn!("Both {ENV_GROK_PATTERNS} and {ENV_LOGS_FORMAT} must be set to parse logs with grok, ignoring them");
                None
            }
        };

        let custom_fields = get(ENV_CUSTOM_FIELDS)
            .map(|val| parse_custom_fields(&val))
            .unwrap_or_default();
        if !custom_fields.is_empty() {
            debug!("Detected {} custom fields", custom_fields.len());
        }

        Ok(Config {
            token,
            listener_url,
            max_log_size_bytes,
            max_bulk_size_bytes,
            completion_timeout,
            send_timeout,
            batch_workers: parse_positive(
                ENV_BATCH_WORKERS,
                get(ENV_BATCH_WORKERS),
                defaults.batch_workers,
            ),
            bulk_workers: parse_positive(
                ENV_BULK_WORKERS,
                get(ENV_BULK_WORKERS),
                defaults.bulk_workers,
            ),
            use_compression: parse_bool(
                ENV_USE_COMPRESSION,
                get(ENV_USE_COMPRESSION),
                defaults.use_compression,
            ),
            compression_level: defaults.compression_level,
            enable_platform_logs: parse_bool(
                ENV_ENABLE_PLATFORM_LOGS,
                get(ENV_ENABLE_PLATFORM_LOGS),
                false,
            ),
            enable_extension_logs: parse_bool(
                ENV_ENABLE_EXTENSION_LOGS,
                get(ENV_ENABLE_EXTENSION_LOGS),
                false,
            ),
            log_level,
            custom_fields,
            flatten_nested_message: get(ENV_FLATTEN_NESTED_MESSAGE)
                .is_some_and(|val| val.trim().eq_ignore_ascii_case("true")),
            function_name: get(ENV_FUNCTION_NAME),
            aws_region: get(ENV_AWS_REGION),
            runtime_api: get(ENV_RUNTIME_API),
            receiver_port: defaults.receiver_port,
            https_proxy: get("HTTPS_PROXY"),
            grok,
        })
    }

    /// Log level alone, so logging can be set up before the rest of the
    /// configuration is read. Unknown values fall back to the default
    /// silently; [`Config::from_lookup`] reports them once logging is up.
    #[must_use]
    pub fn log_level_from_env() -> LogLevel {
        env::var(ENV_LOG_LEVEL)
            .ok()
            .and_then(|val| LogLevel::from_str(&val).ok())
            .unwrap_or_default()
    }

    /// Record types requested from the Logs API. Function logs are always
    /// shipped; platform and extension logs are opt-in.
    #[must_use]
    pub fn log_types(&self) -> Vec<&'static str> {
        let mut types = vec!["function"];
        if self.enable_platform_logs {
            types.push("platform");
        }
        if self.enable_extension_logs {
            types.push("extension");
        }
        types
    }

    /// Full ingestion URL without the token, which the dispatcher adds as a
    /// query parameter.
    #[must_use]
    pub fn ingest_url(&self) -> String {
        format!("{}/", self.listener_url)
    }
}

/// Resolves the listener base URL. A custom listener wins over the region
/// selector; `us` or no region maps to the default listener.
fn listener_url(custom: Option<String>, region: Option<String>) -> Result<String, ConfigError> {
    if let Some(custom) = custom {
        let custom = custom.trim().trim_end_matches('/').to_string();
        if !custom.starts_with("http://") && !custom.starts_with("https://") {
            return Err(ConfigError::Invalid(format!(
                "custom listener must be an http(s) URL, got '{custom}'"
            )));
        }
        debug!("Using custom listener: {custom}");
        return Ok(custom);
    }

    match region.as_deref().map(str::trim) {
        None | Some("us") => Ok(DEFAULT_LISTENER.to_string()),
        Some(region) => Ok(DEFAULT_LISTENER.replace("listener", &format!("listener-{region}"))),
    }
}

fn parse_positive<T>(key: &str, value: Option<String>, default: T) -> T
where
    T: FromStr + PartialOrd + Default + Copy + std::fmt::Display,
{
    let Some(value) = value else {
        return default;
    };
    match value.trim().parse::<T>() {
        Ok(parsed) if parsed > T::default() => parsed,
        _ => {
            warn!("Could not parse env var {key}={value}, reverting to default value ({default})");
            default
        }
    }
}

fn parse_bool(key: &str, value: Option<String>, default: bool) -> bool {
    let Some(value) = value else {
        return default;
    };
    match value.trim().to_lowercase().as_str() {
        "true" | "1" => true,
        "false" | "0" => false,
        _ => {
            warn!("Could not parse env var {key}={value}, reverting to default value ({default})");
            default
        }
    }
}

/// Parses `k1=v1,k2=v2`. Pairs without a `=` or with an empty key are skipped.
fn parse_custom_fields(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}
