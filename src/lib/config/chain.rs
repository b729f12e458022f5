use serde::Deserialize;
use std::time::Duration;

use crate::api_clients::RetryPolicy;
use crate::error::Error;

fn default_fetch_retry_count() -> u32 {
    3
}

fn default_fetch_retry_delay_ms() -> u64 {
    1000
}

fn default_fetch_retry_jitter_ms() -> u64 {
    0
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

fn default_hyperion_increment_limit() -> u32 {
    1000
}

#[derive(Deserialize)]
struct ConfigFlat {
    nodeos_url: String,
    hyperion_url: String,
    #[serde(default = "default_fetch_retry_count")]
    fetch_retry_count: u32,
    #[serde(default = "default_fetch_retry_delay_ms")]
    fetch_retry_delay_ms: u64,
    #[serde(default = "default_fetch_retry_jitter_ms")]
    fetch_retry_jitter_ms: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    fetch_timeout_secs: u64,
    #[serde(default = "default_hyperion_increment_limit")]
    hyperion_increment_limit: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub nodeos_url: String,
    pub hyperion_url: String,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub hyperion_increment_limit: u32,
}

pub fn load() -> Result<Config, Error> {
    let config_flat = envy::from_env::<ConfigFlat>()?;

    Ok(Config {
        nodeos_url: config_flat.nodeos_url,
        hyperion_url: config_flat.hyperion_url,
        retry: RetryPolicy {
            max_attempts: config_flat.fetch_retry_count.max(1),
            delay: Duration::from_millis(config_flat.fetch_retry_delay_ms),
            jitter: Duration::from_millis(config_flat.fetch_retry_jitter_ms),
        },
        request_timeout: Duration::from_secs(config_flat.fetch_timeout_secs),
        hyperion_increment_limit: config_flat.hyperion_increment_limit,
    })
}
