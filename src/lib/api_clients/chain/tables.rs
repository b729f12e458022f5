//! Typed rows of the chain tables the indexer reads. Rows are decoded from
//! the node's JSON representation and rejected at the boundary when a field
//! is missing or malformed.

use serde::Deserialize;

use crate::antelope::{de_bool, de_float_string, de_i64, de_u64, Asset};

pub const ACCOUNTS: &str = "accounts";
pub const STAT: &str = "stat";
pub const DELBAND: &str = "delband";
pub const REXBAL: &str = "rexbal";
pub const REXPOOL: &str = "rexpool";
pub const VOTERS: &str = "voters";
pub const PRODUCERS: &str = "producers";

/// `accounts` row of a token contract, scoped by holder.
#[derive(Clone, Debug, Deserialize)]
pub struct AccountRow {
    pub balance: Asset,
}

/// `stat` row of a token contract, scoped by symbol code.
#[derive(Clone, Debug, Deserialize)]
pub struct StatRow {
    pub supply: Asset,
    pub max_supply: Asset,
    pub issuer: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DelegatedBandwidth {
    pub from: String,
    pub to: String,
    pub net_weight: Asset,
    pub cpu_weight: Asset,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RexBalance {
    pub version: u8,
    pub owner: String,
    pub vote_stake: Asset,
    pub rex_balance: Asset,
    #[serde(deserialize_with = "de_i64")]
    pub matured_rex: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RexPool {
    pub version: u8,
    pub total_lent: Asset,
    pub total_unlent: Asset,
    pub total_rent: Asset,
    pub total_lendable: Asset,
    pub total_rex: Asset,
    pub namebid_proceeds: Asset,
    #[serde(deserialize_with = "de_u64")]
    pub loan_num: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct VoterInfo {
    pub owner: String,
    #[serde(default)]
    pub proxy: String,
    #[serde(default)]
    pub producers: Vec<String>,
    #[serde(deserialize_with = "de_i64")]
    pub staked: i64,
    #[serde(deserialize_with = "de_float_string")]
    pub last_vote_weight: String,
    #[serde(deserialize_with = "de_float_string")]
    pub proxied_vote_weight: String,
    #[serde(deserialize_with = "de_bool")]
    pub is_proxy: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ProducerInfo {
    pub owner: String,
    #[serde(deserialize_with = "de_float_string")]
    pub total_votes: String,
    #[serde(default)]
    pub producer_key: String,
    #[serde(deserialize_with = "de_bool")]
    pub is_active: bool,
    #[serde(default)]
    pub url: String,
}

impl ProducerInfo {
    pub fn total_votes(&self) -> f64 {
        self.total_votes.trim().parse().unwrap_or(0.0)
    }
}
