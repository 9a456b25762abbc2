//! Configuration loaded with figment from defaults, an optional TOML file and
//! the environment.

use crate::portal::EndpointConfig;
use anyhow::Context;
use chrono_tz::Tz;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "coursegrab.toml";

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_request_timeout", deserialize_with = "deserialize_duration")]
    pub request_timeout: Duration,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_inter_batch_delay", deserialize_with = "deserialize_duration")]
    pub inter_batch_delay: Duration,
    #[serde(default = "default_poll_interval", deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,
    #[serde(default = "default_shutdown_timeout", deserialize_with = "deserialize_duration")]
    pub shutdown_timeout: Duration,
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
    /// School id → endpoint table.
    #[serde(default)]
    pub schools: BTreeMap<String, EndpointConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}
fn default_batch_size() -> usize {
    3
}
fn default_inter_batch_delay() -> Duration {
    Duration::from_secs(1)
}
fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_timezone() -> Tz {
    chrono_tz::Asia::Shanghai
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
            batch_size: default_batch_size(),
            inter_batch_delay: default_inter_batch_delay(),
            poll_interval: default_poll_interval(),
            shutdown_timeout: default_shutdown_timeout(),
            timezone: default_timezone(),
            schools: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load from `path` (or [`DEFAULT_CONFIG_FILE`] when present) and the environment.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut figment = Figment::new();
        match path {
            Some(path) => {
                anyhow::ensure!(path.exists(), "config file {} does not exist", path.display());
                figment = figment.merge(Toml::file(path));
            }
            None => figment = figment.merge(Toml::file(DEFAULT_CONFIG_FILE)),
        }
        Self::extract(figment.merge(Env::raw().only(&ENV_KEYS)))
    }

    fn extract(figment: Figment) -> anyhow::Result<Self> {
        figment.extract().context("Failed to load config")
    }

    pub fn school(&self, school_id: &str) -> anyhow::Result<&EndpointConfig> {
        self.schools.get(school_id).with_context(|| {
            let known: Vec<&str> = self.schools.keys().map(String::as_str).collect();
            format!("unknown school '{school_id}' (configured: {known:?})")
        })
    }
}

/// Top-level keys that may come from the environment.
const ENV_KEYS: [&str; 8] = [
    "log_level",
    "request_timeout",
    "user_agent",
    "batch_size",
    "inter_batch_delay",
    "poll_interval",
    "shutdown_timeout",
    "timezone",
];

#[derive(Deserialize)]
#[serde(untagged)]
enum DurationInput {
    Seconds(u64),
    Float(f64),
    Text(String),
}

/// Accept `30`, `1.5`, `"30s"`, `"500ms"` or `"2m"`.
fn deserialize_duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    match DurationInput::deserialize(deserializer)? {
        DurationInput::Seconds(secs) => Ok(Duration::from_secs(secs)),
        DurationInput::Float(secs) => {
            Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
        }
        DurationInput::Text(text) => parse_duration_text(&text).map_err(serde::de::Error::custom),
    }
}

pub fn parse_duration_text(text: &str) -> Result<Duration, String> {
    fundu::parse_duration(text.trim()).map_err(|e| format!("invalid duration '{text}': {e}"))
}
