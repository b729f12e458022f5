//! Replay of history actions between a stored cursor and the chain head.

use anyhow::Result;
use async_trait::async_trait;
use wavesexchange_log::{debug, error, warn};

use super::cursor::CursorStore;
use super::repo::Repo;
use crate::api_clients::chain::{BlockInfo, ChainReader};
use crate::api_clients::history::{Action, ActionsQuery, HistoryReader, Sort, TimeWindow};

/// Actions to apply, and the cursor to store once all of them are applied.
#[derive(Debug)]
pub struct ActionBatch {
    pub actions: Vec<Action>,
    pub cursor: i64,
}

/// Fetches the actions recorded after block `cursor` up to `head`, oldest first.
pub async fn fetch_actions<C, H>(
    chain: &C,
    history: &H,
    filter: &str,
    cursor: i64,
    head: &BlockInfo,
    limit: u32,
) -> Result<ActionBatch>
where
    C: ChainReader + ?Sized,
    H: HistoryReader + ?Sized,
{
    if cursor >= head.block_num {
        return Ok(ActionBatch {
            actions: vec![],
            cursor,
        });
    }

    let after = chain.get_block(cursor + 1).await?.timestamp;
    let query = ActionsQuery {
        filter: filter.to_owned(),
        window: TimeWindow {
            after,
            before: head.timestamp,
        },
        sort: Sort::Asc,
        limit,
    };

    let actions = history.get_actions(&query).await?;
    debug!(
        "{} {} actions between blocks {} and {}",
        actions.len(),
        filter,
        cursor + 1,
        head.block_num
    );

    Ok(settle(filter, actions, limit, head.block_num))
}

/// A page that filled the limit may have been cut in the middle of its last
/// block. Those actions are deferred to the next window, and the cursor
/// stops just before that block.
pub fn settle(filter: &str, mut actions: Vec<Action>, limit: u32, window_end: i64) -> ActionBatch {
    if (actions.len() as u32) < limit.max(1) {
        return ActionBatch {
            actions,
            cursor: window_end,
        };
    }

    let last_block = match actions.last() {
        Some(action) => action.block,
        None => {
            return ActionBatch {
                actions,
                cursor: window_end,
            }
        }
    };

    if actions.iter().all(|a| a.block == last_block) {
        warn!(
            "{} {} actions in block {} fill the whole page, some may be skipped",
            actions.len(),
            filter,
            last_block
        );
        return ActionBatch {
            actions,
            cursor: last_block,
        };
    }

    actions.retain(|a| a.block < last_block);
    ActionBatch {
        actions,
        cursor: last_block - 1,
    }
}

/// Tracks the last block whose actions were all applied, so a failure in
/// the middle of a batch stores a cursor that replays only unfinished blocks.
#[derive(Debug)]
pub struct Progress {
    completed: i64,
    current: Option<i64>,
}

impl Progress {
    pub fn new(cursor: i64) -> Self {
        Progress {
            completed: cursor,
            current: None,
        }
    }

    pub fn enter(&mut self, block: i64) {
        if let Some(current) = self.current {
            if current < block {
                self.completed = current;
            }
        }
        self.current = Some(block);
    }

    pub fn completed(&self) -> i64 {
        self.completed
    }
}

/// Applies one decoded action stream. `kind` tells the handler which stream
/// the action belongs to.
#[async_trait]
pub trait ActionHandler<K: Sync>: Sync {
    async fn handle(&self, kind: &K, action: &Action) -> Result<()>;
}

/// Replays the `filter` stream from its stored cursor, or from `fallback`
/// when none is stored, up to `head`. Returns the number of applied actions.
///
/// When an action fails the cursor only moves past the blocks that were
/// fully applied, and the error is returned.
pub async fn replay<C, H, R, K, A>(
    chain: &C,
    history: &H,
    cursors: &CursorStore<R>,
    handler: &A,
    kind: &K,
    filter: &str,
    fallback: i64,
    head: &BlockInfo,
    limit: u32,
) -> Result<usize>
where
    C: ChainReader + ?Sized,
    H: HistoryReader + ?Sized,
    R: Repo,
    K: Sync,
    A: ActionHandler<K>,
{
    let cursor = cursors.get(filter).await?.unwrap_or(fallback);
    let batch = fetch_actions(chain, history, filter, cursor, head, limit).await?;

    let mut progress = Progress::new(cursor);
    for (applied, action) in batch.actions.iter().enumerate() {
        progress.enter(action.block);
        if let Err(err) = handler.handle(kind, action).await {
            error!(
                "Failed to apply {} at block {}, stopping at block {}: {:?}",
                filter,
                action.block,
                progress.completed(),
                err
            );
            cursors.advance(filter, progress.completed()).await?;
            return Err(err.context(format!("{} replay stopped after {} actions", filter, applied)));
        }
    }

    cursors.advance(filter, batch.cursor).await?;
    Ok(batch.actions.len())
}
