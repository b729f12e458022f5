use serde::Deserialize;

use crate::error::Error;

fn default_base_currency_contract() -> String {
    "eosio.token".to_owned()
}

fn default_base_currency_symbol() -> String {
    "TLOS".to_owned()
}

fn default_system_contract() -> String {
    "eosio".to_owned()
}

#[derive(Deserialize)]
pub struct ConfigFlat {
    pub token_list_url: String,
    #[serde(default = "default_base_currency_contract")]
    pub base_currency_contract: String,
    #[serde(default = "default_base_currency_symbol")]
    pub base_currency_symbol: String,
    #[serde(default = "default_system_contract")]
    pub system_contract: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token_list_url: String,
    pub base_currency_contract: String,
    pub base_currency_symbol: String,
    pub system_contract: String,
}

pub fn load() -> Result<Config, Error> {
    let app_config_flat = envy::from_env::<ConfigFlat>()?;

    Ok(Config {
        token_list_url: app_config_flat.token_list_url,
        base_currency_contract: app_config_flat.base_currency_contract,
        base_currency_symbol: app_config_flat.base_currency_symbol,
        system_contract: app_config_flat.system_contract,
    })
}
