//! Scripted chain and history sources for engine tests. Block `n` is
//! produced `n * 500ms` after a fixed epoch, and both mocks use that clock to map
//! time windows back to block ranges.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use reqwest::StatusCode;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use crate::api_clients::chain::{
    BlockInfo, ChainInfo, ChainReader, ScopePage, ScopeQuery, ScopeRow, TableQuery, TableRowsPage,
};
use crate::api_clients::history::{Action, ActionsQuery, Delta, DeltasQuery, HistoryReader};
use crate::api_clients::Error;

pub fn block_time(block_num: i64) -> DateTime<Utc> {
    Utc.ymd(2023, 1, 1).and_hms(0, 0, 0) + Duration::milliseconds(block_num * 500)
}

fn block_at(time: &DateTime<Utc>) -> i64 {
    (*time - block_time(0)).num_milliseconds().div_euclid(500)
}

fn unavailable(what: &str) -> Error {
    Error::InvalidStatus(StatusCode::SERVICE_UNAVAILABLE, what.to_owned())
}

type TableKey = (String, String, String);

struct ChainState {
    head: i64,
    page_size: usize,
    tables: BTreeMap<TableKey, Vec<Value>>,
    failing_scopes: BTreeSet<String>,
    table_requests: usize,
}

pub struct MockChain {
    state: Mutex<ChainState>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self {
            state: Mutex::new(ChainState {
                head: 1000,
                page_size: 100,
                tables: BTreeMap::new(),
                failing_scopes: BTreeSet::new(),
                table_requests: 0,
            }),
        }
    }
}

impl MockChain {
    pub fn set_head(&self, head: i64) {
        self.state.lock().unwrap().head = head;
    }

    pub fn set_page_size(&self, page_size: usize) {
        self.state.lock().unwrap().page_size = page_size.max(1);
    }

    pub fn set_table(
        &self,
        code: impl Into<String>,
        scope: impl Into<String>,
        table: impl Into<String>,
        rows: Vec<Value>,
    ) {
        let key = (code.into(), scope.into(), table.into());
        self.state.lock().unwrap().tables.insert(key, rows);
    }

    /// Row requests for `scope` fail from now on.
    pub fn fail_scope(&self, scope: impl Into<String>) {
        self.state.lock().unwrap().failing_scopes.insert(scope.into());
    }

    pub fn table_requests(&self) -> usize {
        self.state.lock().unwrap().table_requests
    }
}

/// Primary key used by exact lookups: the owning account of the row.
fn primary_key(row: &Value) -> Option<&str> {
    ["owner", "account", "from"]
        .iter()
        .find_map(|field| row.get(*field).and_then(Value::as_str))
}

#[async_trait]
impl ChainReader for MockChain {
    async fn get_info(&self) -> Result<ChainInfo, Error> {
        let head = self.state.lock().unwrap().head;
        Ok(ChainInfo {
            head_block_num: head,
            last_irreversible_block_num: head,
        })
    }

    async fn get_block(&self, block_num: i64) -> Result<BlockInfo, Error> {
        Ok(BlockInfo {
            block_num,
            timestamp: block_time(block_num),
        })
    }

    async fn get_table_rows(&self, query: &TableQuery) -> Result<TableRowsPage, Error> {
        let mut state = self.state.lock().unwrap();
        state.table_requests += 1;

        let scope = query.scope.trim().to_owned();
        if state.failing_scopes.contains(&scope) {
            return Err(unavailable(&scope));
        }

        let key = (query.code.clone(), scope, query.table.clone());
        let rows = state.tables.get(&key).cloned().unwrap_or_default();

        if let (Some(lower), Some(upper)) = (&query.lower_bound, &query.upper_bound) {
            if lower == upper {
                let rows = rows
                    .into_iter()
                    .filter(|row| primary_key(row) == Some(lower.trim()))
                    .take(query.limit as usize)
                    .collect();
                return Ok(TableRowsPage {
                    rows,
                    more: false,
                    next_key: String::new(),
                });
            }
        }

        let offset = query
            .lower_bound
            .as_ref()
            .and_then(|key| key.parse::<usize>().ok())
            .unwrap_or(0);
        let take = state.page_size.min(query.limit as usize).max(1);
        let end = (offset + take).min(rows.len());
        let more = end < rows.len();

        Ok(TableRowsPage {
            rows: rows.get(offset..end).map(<[Value]>::to_vec).unwrap_or_default(),
            more,
            next_key: if more { end.to_string() } else { String::new() },
        })
    }

    async fn get_table_by_scope(&self, query: &ScopeQuery) -> Result<ScopePage, Error> {
        let state = self.state.lock().unwrap();
        let scopes: Vec<String> = state
            .tables
            .iter()
            .filter(|((code, _, table), rows)| {
                *code == query.code && *table == query.table && !rows.is_empty()
            })
            .map(|((_, scope, _), _)| scope.clone())
            .filter(|scope| {
                query
                    .lower_bound
                    .as_ref()
                    .map_or(true, |lower| scope.as_str() >= lower.as_str())
            })
            .collect();

        let take = state.page_size.min(query.limit as usize).max(1);
        let more = scopes.get(take).cloned().unwrap_or_default();
        let rows = scopes
            .into_iter()
            .take(take)
            .map(|scope| ScopeRow {
                code: query.code.clone(),
                scope,
                table: query.table.clone(),
                payer: String::new(),
                count: 1,
            })
            .collect();

        Ok(ScopePage { rows, more })
    }
}

#[derive(Default)]
struct HistoryState {
    actions: Vec<(String, Action)>,
    deltas: Vec<Delta>,
    failing_filters: BTreeSet<String>,
    requests: Vec<ActionsQuery>,
}

#[derive(Default)]
pub struct MockHistory {
    state: Mutex<HistoryState>,
}

pub fn action(block: i64, filter: &str, data: Value) -> Action {
    let (contract, name) = filter.split_once(':').unwrap_or(("", filter));
    Action {
        block,
        timestamp: block_time(block).to_rfc3339(),
        contract: contract.to_owned(),
        action: name.to_owned(),
        data,
    }
}

pub fn delta(block_num: i64, code: &str, scope: &str, table: &str, data: Value) -> Delta {
    Delta {
        code: code.to_owned(),
        scope: scope.to_owned(),
        table: table.to_owned(),
        block_num,
        data,
    }
}

impl MockHistory {
    pub fn push_action(&self, filter: &str, block: i64, data: Value) {
        self.state
            .lock()
            .unwrap()
            .actions
            .push((filter.to_owned(), action(block, filter, data)));
    }

    pub fn push_delta(&self, delta: Delta) {
        self.state.lock().unwrap().deltas.push(delta);
    }

    pub fn fail_filter(&self, filter: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_filters
            .insert(filter.to_owned());
    }

    pub fn action_requests(&self) -> Vec<ActionsQuery> {
        self.state.lock().unwrap().requests.clone()
    }
}

#[async_trait]
impl HistoryReader for MockHistory {
    async fn get_actions(&self, query: &ActionsQuery) -> Result<Vec<Action>, Error> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(query.clone());
        if state.failing_filters.contains(&query.filter) {
            return Err(unavailable(&query.filter));
        }

        let (from, to) = (block_at(&query.window.after), block_at(&query.window.before));
        let mut actions: Vec<Action> = state
            .actions
            .iter()
            .filter(|(filter, a)| *filter == query.filter && a.block >= from && a.block <= to)
            .map(|(_, a)| a.clone())
            .collect();
        actions.sort_by_key(|a| a.block);
        actions.truncate(query.limit as usize);
        Ok(actions)
    }

    async fn get_deltas(&self, query: &DeltasQuery) -> Result<Vec<Delta>, Error> {
        let state = self.state.lock().unwrap();
        let (from, to) = (block_at(&query.window.after), block_at(&query.window.before));
        let mut deltas: Vec<Delta> = state
            .deltas
            .iter()
            .filter(|d| d.code == query.code && d.table == query.table)
            .filter(|d| d.block_num >= from && d.block_num <= to)
            .cloned()
            .collect();
        deltas.sort_by_key(|d| d.block_num);
        deltas.truncate(query.limit as usize);
        Ok(deltas)
    }
}
