use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rank carried by producers outside the active ranking.
pub const UNRANKED: i32 = -1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerRank {
    pub account: String,
    pub active: bool,
    pub total_votes: f64,
    pub rank: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProducerSnapshot {
    pub date: DateTime<Utc>,
    pub snapshot: BTreeMap<String, ProducerRank>,
}
