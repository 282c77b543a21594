use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::{DurationPolicy, EngineOptions};
use crate::wal::WAL_FILE_NAME;

/// Process configuration, read once from `CHAIRTIME_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub database_url: Option<String>,
    pub catalog_path: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub store_timeout: Duration,
    pub degraded_reads: bool,
    pub duration_policy: DurationPolicy,
}

#[derive(Debug)]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}={:?}: {}", self.var, self.value, self.reason)
    }
}

impl std::error::Error for ConfigError {}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let Some(raw) = lookup(var).filter(|v| !v.trim().is_empty()) else {
        return Ok(None);
    };
    raw.trim().parse().map(Some).map_err(|e: T::Err| ConfigError {
        var,
        value: raw.clone(),
        reason: e.to_string(),
    })
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<bool, ConfigError> {
    let Some(raw) = lookup(var).filter(|v| !v.trim().is_empty()) else {
        return Ok(false);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError {
            var,
            value: raw,
            reason: "expected true or false".into(),
        }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        Ok(Self {
            bind: text("CHAIRTIME_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_var(&lookup, "CHAIRTIME_PORT")?.unwrap_or(8080),
            data_dir: text("CHAIRTIME_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            database_url: text("CHAIRTIME_DATABASE_URL"),
            catalog_path: text("CHAIRTIME_CATALOG").map(PathBuf::from),
            metrics_port: parse_var(&lookup, "CHAIRTIME_METRICS_PORT")?,
            compact_threshold: parse_var(&lookup, "CHAIRTIME_COMPACT_THRESHOLD")?.unwrap_or(1000),
            store_timeout: Duration::from_millis(
                parse_var(&lookup, "CHAIRTIME_STORE_TIMEOUT_MS")?.unwrap_or(5000),
            ),
            degraded_reads: parse_flag(&lookup, "CHAIRTIME_DEGRADED_READS")?,
            duration_policy: parse_var(&lookup, "CHAIRTIME_DURATION_POLICY")?.unwrap_or_default(),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            degraded_reads: self.degraded_reads,
            duration_policy: self.duration_policy,
        }
    }
}
