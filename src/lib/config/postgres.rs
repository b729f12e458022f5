use serde::Deserialize;

use crate::error::Error;

fn default_port() -> u16 {
    5432
}

fn default_poolsize() -> u32 {
    10
}

fn default_connection_timeout_secs() -> u64 {
    10
}

fn default_connection_retries() -> u32 {
    5
}

#[derive(Deserialize)]
pub struct ConfigFlat {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    #[serde(default = "default_poolsize")]
    pub poolsize: u32,
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
    #[serde(default = "default_connection_retries")]
    pub connection_retries: u32,
}

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
    pub pool_size: u32,
    pub connection_timeout_secs: u64,
    pub connection_retries: u32,
}

impl Config {
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

// Keeps the password out of startup logs.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("pool_size", &self.pool_size)
            .field("connection_timeout_secs", &self.connection_timeout_secs)
            .field("connection_retries", &self.connection_retries)
            .finish()
    }
}

pub fn load() -> Result<Config, Error> {
    let config_flat = envy::prefixed("POSTGRES__").from_env::<ConfigFlat>()?;

    Ok(Config {
        host: config_flat.host,
        port: config_flat.port,
        database: config_flat.database,
        user: config_flat.user,
        password: config_flat.password,
        pool_size: config_flat.poolsize,
        connection_timeout_secs: config_flat.connection_timeout_secs,
        connection_retries: config_flat.connection_retries,
    })
}
