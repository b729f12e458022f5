use futures::stream::{self, Stream};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::VecDeque;

use super::{BlockInfo, ChainReader, ScopeQuery, TableQuery};
use crate::api_clients::Error;
use crate::error::Error as AppError;

struct RowsState<'a, C: ?Sized> {
    chain: &'a C,
    query: TableQuery,
    buffer: VecDeque<Value>,
    exhausted: bool,
}

/// Lazily scans every row matching `query`, following `more`/`next_key`
/// until the node reports the table exhausted. Rows are decoded into `T`;
/// a row that does not decode ends the scan with `Error::InvalidRow`.
pub fn scan_table<'a, C, T>(
    chain: &'a C,
    query: TableQuery,
) -> impl Stream<Item = Result<T, AppError>> + Send + 'a
where
    C: ChainReader + ?Sized,
    T: DeserializeOwned + Send + 'a,
{
    let state = RowsState {
        chain,
        query,
        buffer: VecDeque::new(),
        exhausted: false,
    };

    stream::try_unfold(state, |mut state| async move {
        loop {
            if let Some(row) = state.buffer.pop_front() {
                let typed = serde_json::from_value::<T>(row).map_err(|err| {
                    AppError::InvalidRow(format!(
                        "{}/{}/{}: {}",
                        state.query.code, state.query.scope, state.query.table, err
                    ))
                })?;
                return Ok::<_, AppError>(Some((typed, state)));
            }

            if state.exhausted {
                return Ok(None);
            }

            let page = state.chain.get_table_rows(&state.query).await?;

            let next_key = Some(page.next_key.clone());
            if page.more && !page.next_key.is_empty() && next_key != state.query.lower_bound {
                state.query.lower_bound = next_key;
            } else {
                state.exhausted = true;
            }

            state.buffer.extend(page.rows);
        }
    })
}

struct ScopesState<'a, C: ?Sized> {
    chain: &'a C,
    query: ScopeQuery,
    buffer: VecDeque<String>,
    exhausted: bool,
}

/// Lazily enumerates every scope holding `query.table` under `query.code`.
pub fn scan_scopes<'a, C>(
    chain: &'a C,
    query: ScopeQuery,
) -> impl Stream<Item = Result<String, AppError>> + Send + 'a
where
    C: ChainReader + ?Sized,
{
    let state = ScopesState {
        chain,
        query,
        buffer: VecDeque::new(),
        exhausted: false,
    };

    stream::try_unfold(state, |mut state| async move {
        loop {
            if let Some(scope) = state.buffer.pop_front() {
                return Ok::<_, AppError>(Some((scope, state)));
            }

            if state.exhausted {
                return Ok(None);
            }

            let page = state.chain.get_table_by_scope(&state.query).await?;

            let next = Some(page.more.clone());
            if !page.more.is_empty() && next != state.query.lower_bound {
                state.query.lower_bound = next;
            } else {
                state.exhausted = true;
            }

            state
                .buffer
                .extend(page.rows.into_iter().map(|row| row.scope));
        }
    })
}

/// First row of a single page, for point lookups.
pub async fn find_row<C, T>(chain: &C, query: &TableQuery) -> Result<Option<T>, AppError>
where
    C: ChainReader + ?Sized,
    T: DeserializeOwned,
{
    let page = chain.get_table_rows(query).await?;
    match page.rows.into_iter().next() {
        Some(row) => serde_json::from_value(row).map(Some).map_err(|err| {
            AppError::InvalidRow(format!(
                "{}/{}/{}: {}",
                query.code, query.scope, query.table, err
            ))
        }),
        None => Ok(None),
    }
}

/// Last irreversible block with its timestamp.
pub async fn get_head<C>(chain: &C) -> Result<BlockInfo, Error>
where
    C: ChainReader + ?Sized,
{
    let info = chain.get_info().await?;
    chain.get_block(info.last_irreversible_block_num).await
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use serde::Deserialize;
    use serde_json::json;

    use super::{scan_scopes, scan_table};
    use crate::api_clients::chain::{ScopeQuery, TableQuery};
    use crate::indexer::mocks::MockChain;

    #[derive(Deserialize)]
    struct Row {
        id: u64,
    }

    #[tokio::test]
    async fn should_follow_next_key_until_exhausted() {
        let chain = MockChain::default();
        let rows = (0..7).map(|id| json!({ "id": id })).collect();
        chain.set_table("eosio", "eosio", "things", rows);
        chain.set_page_size(3);

        let query = TableQuery::new("eosio", "eosio", "things");
        let ids: Vec<u64> = scan_table::<_, Row>(&chain, query)
            .map_ok(|row| row.id)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(chain.table_requests(), 3);
    }

    #[tokio::test]
    async fn should_stop_early_without_fetching_more_pages() {
        let chain = MockChain::default();
        let rows = (0..10).map(|id| json!({ "id": id })).collect();
        chain.set_table("eosio", "eosio", "things", rows);
        chain.set_page_size(2);

        let query = TableQuery::new("eosio", "eosio", "things");
        let stream = scan_table::<_, Row>(&chain, query);
        futures::pin_mut!(stream);
        let first = stream.try_next().await.unwrap().unwrap();

        assert_eq!(first.id, 0);
        assert_eq!(chain.table_requests(), 1);
    }

    #[tokio::test]
    async fn should_fail_on_undecodable_row() {
        let chain = MockChain::default();
        chain.set_table("eosio", "eosio", "things", vec![json!({ "nope": 1 })]);

        let query = TableQuery::new("eosio", "eosio", "things");
        let res: Result<Vec<Row>, _> = scan_table(&chain, query).try_collect().await;

        assert!(res.is_err());
    }

    #[tokio::test]
    async fn should_enumerate_scopes() {
        let chain = MockChain::default();
        chain.set_page_size(2);
        for holder in &["alice", "bob", "carol"] {
            chain.set_table("eosio.token", *holder, "accounts", vec![json!({})]);
        }

        let scopes: Vec<String> = scan_scopes(&chain, ScopeQuery::new("eosio.token", "accounts"))
            .try_collect()
            .await
            .unwrap();

        assert_eq!(scopes, vec!["alice", "bob", "carol"]);
    }
}
