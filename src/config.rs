//! Gateway configuration.

use std::{env, num::NonZeroUsize, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    window::{BatchPolicy, WindowPolicy},
};

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Where the entity services live and how queries against them are batched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub products_url: String,
    pub users_url: String,
    pub reviews_url: String,

    /// Timeout for every bulk upstream call.
    pub request_timeout_ms: u64,

    pub batch: BatchPolicy,

    /// If set, a query that hasn't resolved after this long is cancelled.
    pub query_deadline_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            products_url: "http://localhost:8081".to_owned(),
            users_url: "http://localhost:8080".to_owned(),
            reviews_url: "http://localhost:8082".to_owned(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            batch: BatchPolicy::default(),
            query_deadline_ms: None,
        }
    }
}

impl Config {
    /// Defaults overlaid with `PRODUCTS_URL`, `USERS_URL`, `REVIEWS_URL`,
    /// `REQUEST_TIMEOUT_MS`, `BATCH_DELAY_MS`, `BATCH_MAX_KEYS` and
    /// `QUERY_DEADLINE_MS` from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Like [`from_env`](Config::from_env), reading variables through
    /// `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(url) = lookup("PRODUCTS_URL") {
            config.products_url = url;
        }
        if let Some(url) = lookup("USERS_URL") {
            config.users_url = url;
        }
        if let Some(url) = lookup("REVIEWS_URL") {
            config.reviews_url = url;
        }
        if let Some(ms) = parse(&lookup, "REQUEST_TIMEOUT_MS")? {
            config.request_timeout_ms = ms;
        }
        if let Some(millis) = parse(&lookup, "BATCH_DELAY_MS")? {
            config.batch.window = WindowPolicy::Delay { millis };
        }
        if let Some(max_keys) = parse::<NonZeroUsize>(&lookup, "BATCH_MAX_KEYS")? {
            config.batch.max_keys = Some(max_keys);
        }
        if let Some(ms) = parse(&lookup, "QUERY_DEADLINE_MS")? {
            config.query_deadline_ms = Some(ms);
        }

        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn query_deadline(&self) -> Option<Duration> {
        self.query_deadline_ms.map(Duration::from_millis)
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    lookup(name)
        .map(|value| {
            value.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                name,
                reason: e.to_string(),
                value,
            })
        })
        .transpose()
}
