use chrono::Duration;
use serde::Deserialize;

use crate::error::Error;

fn default_token_list_interval() -> i64 {
    60
}

fn default_token_poll_interval() -> i64 {
    1
}

fn default_rex_poll_interval() -> i64 {
    5
}

fn default_voter_poll_interval() -> i64 {
    1
}

fn default_bp_poll_interval() -> i64 {
    30
}

fn default_tick_interval_secs() -> u64 {
    5
}

fn default_holder_batch_size() -> usize {
    10
}

#[derive(Deserialize)]
struct ConfigFlat {
    #[serde(default = "default_token_list_interval")]
    token_list_interval: i64,
    #[serde(default = "default_token_poll_interval")]
    token_poll_interval: i64,
    #[serde(default = "default_rex_poll_interval")]
    rex_poll_interval: i64,
    #[serde(default = "default_voter_poll_interval")]
    voter_poll_interval: i64,
    #[serde(default = "default_bp_poll_interval")]
    bp_poll_interval: i64,
    #[serde(default = "default_tick_interval_secs")]
    tick_interval_secs: u64,
    #[serde(default = "default_holder_batch_size")]
    holder_batch_size: usize,
}

/// Poll intervals; the env values are in minutes.
#[derive(Debug, Clone)]
pub struct Config {
    pub token_list_interval: Duration,
    pub token_poll_interval: Duration,
    pub rex_poll_interval: Duration,
    pub voter_poll_interval: Duration,
    pub bp_poll_interval: Duration,
    pub tick_interval: std::time::Duration,
    pub holder_batch_size: usize,
}

pub fn load() -> Result<Config, Error> {
    let config_flat = envy::from_env::<ConfigFlat>()?;

    Ok(Config {
        token_list_interval: Duration::minutes(config_flat.token_list_interval),
        token_poll_interval: Duration::minutes(config_flat.token_poll_interval),
        rex_poll_interval: Duration::minutes(config_flat.rex_poll_interval),
        voter_poll_interval: Duration::minutes(config_flat.voter_poll_interval),
        bp_poll_interval: Duration::minutes(config_flat.bp_poll_interval),
        tick_interval: std::time::Duration::from_secs(config_flat.tick_interval_secs),
        holder_batch_size: config_flat.holder_batch_size.max(1),
    })
}
