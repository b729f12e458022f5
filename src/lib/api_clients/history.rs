use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Error, HttpClient};
use crate::antelope::{de_i64, Asset};
use crate::error::Error as AppError;

/// Time-windowed queries against a Hyperion history API (`/v2/history/*`).
#[async_trait]
pub trait HistoryReader: Send + Sync {
    async fn get_actions(&self, query: &ActionsQuery) -> Result<Vec<Action>, Error>;

    async fn get_deltas(&self, query: &DeltasQuery) -> Result<Vec<Delta>, Error>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sort {
    Asc,
    Desc,
}

impl Sort {
    fn as_str(&self) -> &'static str {
        match self {
            Sort::Asc => "asc",
            Sort::Desc => "desc",
        }
    }
}

#[derive(Clone, Debug)]
pub struct TimeWindow {
    pub after: DateTime<Utc>,
    pub before: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct ActionsQuery {
    /// Fully-qualified action name, e.g. `eosio:delegatebw`.
    pub filter: String,
    pub window: TimeWindow,
    pub sort: Sort,
    pub limit: u32,
}

#[derive(Clone, Debug)]
pub struct DeltasQuery {
    pub code: String,
    pub table: String,
    pub window: TimeWindow,
    pub sort: Sort,
    pub limit: u32,
}

fn iso(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Serialize)]
struct ActionsParams<'a> {
    filter: &'a str,
    after: String,
    before: String,
    sort: &'a str,
    limit: u32,
    simple: bool,
}

#[derive(Serialize)]
struct DeltasParams<'a> {
    code: &'a str,
    table: &'a str,
    after: String,
    before: String,
    sort: &'a str,
    limit: u32,
}

/// An action in Hyperion's `simple` representation.
#[derive(Clone, Debug, Deserialize)]
pub struct Action {
    #[serde(deserialize_with = "de_i64")]
    pub block: i64,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub contract: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub data: Value,
}

impl Action {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        serde_json::from_value(self.data.clone()).map_err(|err| {
            AppError::InvalidRow(format!(
                "{}:{} at block {}: {}",
                self.contract, self.action, self.block, err
            ))
        })
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Delta {
    pub code: String,
    pub scope: String,
    pub table: String,
    #[serde(deserialize_with = "de_i64")]
    pub block_num: i64,
    #[serde(default)]
    pub data: Value,
}

impl Delta {
    pub fn symbol(&self) -> Option<&str> {
        self.data.get("symbol").and_then(Value::as_str)
    }
}

#[derive(Deserialize)]
struct ActionsResponse {
    #[serde(default)]
    simple_actions: Vec<Action>,
}

#[derive(Deserialize)]
struct DeltasResponse {
    #[serde(default)]
    deltas: Vec<Delta>,
}

#[async_trait]
impl HistoryReader for HttpClient {
    async fn get_actions(&self, query: &ActionsQuery) -> Result<Vec<Action>, Error> {
        let params = ActionsParams {
            filter: &query.filter,
            after: iso(&query.window.after),
            before: iso(&query.window.before),
            sort: query.sort.as_str(),
            limit: query.limit,
            simple: true,
        };
        let resp: ActionsResponse = self.get_json("v2/history/get_actions", &params).await?;
        Ok(resp.simple_actions)
    }

    async fn get_deltas(&self, query: &DeltasQuery) -> Result<Vec<Delta>, Error> {
        let params = DeltasParams {
            code: &query.code,
            table: &query.table,
            after: iso(&query.window.after),
            before: iso(&query.window.before),
            sort: query.sort.as_str(),
            limit: query.limit,
        };
        let resp: DeltasResponse = self.get_json("v2/history/get_deltas", &params).await?;
        Ok(resp.deltas)
    }
}

//
// ACTION PAYLOADS
//

#[derive(Clone, Debug, Deserialize)]
pub struct DelegateBw {
    pub from: String,
    pub receiver: String,
    pub stake_net_quantity: Asset,
    pub stake_cpu_quantity: Asset,
}

#[derive(Clone, Debug, Deserialize)]
pub struct UndelegateBw {
    pub from: String,
    pub receiver: String,
    pub unstake_net_quantity: Asset,
    pub unstake_cpu_quantity: Asset,
}

/// `buyrex` and `sellrex` both carry the acting account as `from`.
#[derive(Clone, Debug, Deserialize)]
pub struct RexAction {
    pub from: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct VoteProducer {
    pub voter: String,
    #[serde(default)]
    pub proxy: String,
    #[serde(default)]
    pub producers: Vec<String>,
}
