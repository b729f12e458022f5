mod scan;
pub mod tables;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::{Error, HttpClient};
use crate::antelope::de_i64;

pub use scan::{find_row, get_head, scan_scopes, scan_table};

/// Read access to an Antelope chain node (`/v1/chain/*`).
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn get_info(&self) -> Result<ChainInfo, Error>;

    async fn get_block(&self, block_num: i64) -> Result<BlockInfo, Error>;

    /// One page of `get_table_rows`.
    async fn get_table_rows(&self, query: &TableQuery) -> Result<TableRowsPage, Error>;

    /// One page of `get_table_by_scope`.
    async fn get_table_by_scope(&self, query: &ScopeQuery) -> Result<ScopePage, Error>;
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChainInfo {
    #[serde(deserialize_with = "de_i64")]
    pub head_block_num: i64,
    #[serde(deserialize_with = "de_i64")]
    pub last_irreversible_block_num: i64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BlockInfo {
    #[serde(deserialize_with = "de_i64")]
    pub block_num: i64,
    #[serde(deserialize_with = "de_block_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Block timestamps come without an offset (`2023-01-01T00:00:00.500`) and are UTC.
fn de_block_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| DateTime::<Utc>::from_utc(naive, Utc))
        .map_err(de::Error::custom)
}

#[derive(Clone, Debug, Serialize)]
pub struct TableQuery {
    pub json: bool,
    pub code: String,
    pub scope: String,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<String>,
    pub limit: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_position: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,
}

impl TableQuery {
    pub fn new(code: impl Into<String>, scope: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            json: true,
            code: code.into(),
            scope: scope.into(),
            table: table.into(),
            lower_bound: None,
            upper_bound: None,
            limit: 500,
            index_position: None,
            key_type: None,
        }
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Restricts the scan to a single primary key.
    pub fn exact(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.lower_bound = Some(key.clone());
        self.upper_bound = Some(key);
        self
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TableRowsPage {
    pub rows: Vec<Value>,
    #[serde(default)]
    pub more: bool,
    #[serde(default)]
    pub next_key: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ScopeQuery {
    pub code: String,
    pub table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<String>,
    pub limit: u32,
}

impl ScopeQuery {
    pub fn new(code: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            table: table.into(),
            lower_bound: None,
            upper_bound: None,
            limit: 500,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ScopeRow {
    pub code: String,
    pub scope: String,
    pub table: String,
    #[serde(default)]
    pub payer: String,
    #[serde(default)]
    pub count: u64,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ScopePage {
    pub rows: Vec<ScopeRow>,
    /// Lower bound of the next page, empty when the scan is complete.
    #[serde(default)]
    pub more: String,
}

#[derive(Serialize)]
struct GetBlockRequest {
    block_num_or_id: i64,
}

#[async_trait]
impl ChainReader for HttpClient {
    async fn get_info(&self) -> Result<ChainInfo, Error> {
        self.post_json("v1/chain/get_info", &serde_json::json!({}))
            .await
    }

    async fn get_block(&self, block_num: i64) -> Result<BlockInfo, Error> {
        self.post_json(
            "v1/chain/get_block",
            &GetBlockRequest {
                block_num_or_id: block_num,
            },
        )
        .await
    }

    async fn get_table_rows(&self, query: &TableQuery) -> Result<TableRowsPage, Error> {
        self.post_json("v1/chain/get_table_rows", query).await
    }

    async fn get_table_by_scope(&self, query: &ScopeQuery) -> Result<ScopePage, Error> {
        self.post_json("v1/chain/get_table_by_scope", query).await
    }
}
