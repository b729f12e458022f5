use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use futures::TryStreamExt;
use itertools::Itertools;
use std::collections::BTreeSet;
use std::sync::Arc;
use wavesexchange_log::{debug, error, info, timer, warn};

use super::models::balance::{BalanceComponent, BalanceUpdate};
use super::repo::{Repo, RepoOperations};
use super::stake::StakeEngine;
use super::timer::Interval;
use super::{Job, SyncSettings};
use crate::antelope::account_scope;
use crate::api_clients::chain::tables::{AccountRow, StatRow, ACCOUNTS, STAT};
use crate::api_clients::chain::{
    get_head, scan_scopes, scan_table, BlockInfo, ChainReader, ScopeQuery, TableQuery,
};
use crate::api_clients::history::{DeltasQuery, HistoryReader, Sort, TimeWindow};
use crate::api_clients::token_list::TokenListSource;
use crate::error::Error as AppError;
use crate::models::Token;

/// Holders a batch refresh could not complete, split by where it failed.
#[derive(Debug, Default)]
struct HolderRefresh {
    fetch_failed: Vec<String>,
    write_failed: Vec<String>,
}

impl HolderRefresh {
    fn failed(&self) -> usize {
        self.fetch_failed.len() + self.write_failed.len()
    }

    /// Progress may only be recorded once every fetched balance is stored.
    fn ensure_stored(&self, token: &Token) -> Result<()> {
        if self.write_failed.is_empty() {
            return Ok(());
        }
        error!(
            "Cannot store {} balances of {}, keeping its last block: {}",
            self.write_failed.len(),
            token,
            self.write_failed.join(", ")
        );
        Err(AppError::DbError(format!(
            "{} {} balance writes failed",
            self.write_failed.len(),
            token
        ))
        .into())
    }
}

/// Keeps the liquid balances of every listed token in sync with the chain.
/// A token without progress (`last_block = 0`) is loaded from the full
/// `accounts` table; afterwards only holders touched by table deltas are
/// refreshed.
pub struct TokenEngine<C, H, R> {
    chain: Arc<C>,
    history: Arc<H>,
    repo: Arc<R>,
    token_list: Arc<dyn TokenListSource>,
    tokens: Vec<Token>,
    stake: StakeEngine<C, H, R>,
    settings: SyncSettings,
    list_interval: Interval,
    poll_interval: Interval,
}

impl<C, H, R> TokenEngine<C, H, R>
where
    C: ChainReader + 'static,
    H: HistoryReader + 'static,
    R: Repo,
{
    pub fn new(
        chain: Arc<C>,
        history: Arc<H>,
        repo: Arc<R>,
        token_list: Arc<dyn TokenListSource>,
        settings: SyncSettings,
    ) -> Self {
        TokenEngine {
            stake: StakeEngine::new(chain.clone(), history.clone(), repo.clone(), settings.clone()),
            list_interval: Interval::new(settings.token_list_interval),
            poll_interval: Interval::new(settings.token_poll_interval),
            tokens: vec![],
            chain,
            history,
            repo,
            token_list,
            settings,
        }
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Replaces the tracked token set. A failed fetch keeps the previous one.
    pub async fn refresh_token_list(&mut self) {
        match self.token_list.fetch_tokens().await {
            Ok(tokens) => {
                let tokens = tokens
                    .into_iter()
                    .unique_by(|token| token.id.clone())
                    .collect_vec();
                info!("Tracking {} tokens", tokens.len());
                self.tokens = tokens;
            }
            Err(err) => error!(
                "Cannot refresh the token list, keeping {} tokens: {}",
                self.tokens.len(),
                err
            ),
        }
    }

    pub async fn sync_token(&mut self, token: &Token, now: DateTime<Utc>) -> Result<()> {
        let token_id = token.id.clone();
        let last_block = self
            .repo
            .execute(move |ops| match ops.get_token_last_block(&token_id)? {
                Some(last_block) => Ok(last_block),
                None => {
                    ops.insert_token(&token_id)?;
                    Ok(0)
                }
            })
            .await?;

        let head = get_head(&*self.chain).await?;

        if last_block == 0 {
            self.load_token(token, &head).await?;
        } else {
            self.sync_token_deltas(token, last_block, &head).await?;
        }

        if token.id == self.settings.base_token_id {
            if let Err(err) = self.stake.run(&head, now).await {
                error!("Stake reconciliation of {} failed: {:?}", token, err);
            }
        }

        let token_id = token.id.clone();
        let removed = self
            .repo
            .execute(move |ops| ops.delete_empty_balances(&token_id))
            .await?;
        if removed > 0 {
            debug!("Removed {} empty {} balances", removed, token);
        }

        Ok(())
    }

    /// Loads every holder of `token` and zeroes the liquid balance of rows
    /// that were not seen. A failed balance write leaves the zeroing and
    /// `last_block` untouched so the next cycle loads the token again.
    pub async fn load_token(&self, token: &Token, head: &BlockInfo) -> Result<()> {
        info!("Loading all {} holders at block {}", token, head.block_num);
        self.refresh_supply(token).await?;

        let holders: Vec<String> = scan_scopes(&*self.chain, ScopeQuery::new(&token.account, ACCOUNTS))
            .try_collect()
            .await?;
        info!("Found {} {} holders", holders.len(), token);

        let block = head.block_num;
        let refresh = self.load_holders(token, &holders, block).await;
        refresh.ensure_stored(token)?;

        let token_id = token.id.clone();
        let listed = holders.clone();
        let zeroed = self
            .repo
            .execute(move |ops| {
                let zeroed =
                    ops.zero_unlisted_balance_component(&token_id, BalanceComponent::Liquid, &listed)?;
                ops.update_token_last_block(&token_id, block)?;
                Ok(zeroed)
            })
            .await?;

        info!(
            "Loaded {} holders of {}, {} failed, {} stale balances zeroed",
            holders.len() - refresh.failed(),
            token,
            refresh.failed(),
            zeroed
        );
        Ok(())
    }

    /// Refreshes the holders named by `accounts` deltas since `last_block`.
    pub async fn sync_token_deltas(&self, token: &Token, last_block: i64, head: &BlockInfo) -> Result<()> {
        if last_block >= head.block_num {
            debug!("{} is synced up to block {}", token, last_block);
            return Ok(());
        }
        self.refresh_supply(token).await?;

        let limit = self.settings.history_limit;
        let query = DeltasQuery {
            code: token.account.clone(),
            table: ACCOUNTS.to_owned(),
            window: TimeWindow {
                after: self.chain.get_block(last_block).await?.timestamp,
                before: head.timestamp,
            },
            sort: Sort::Asc,
            limit,
        };
        let deltas = self.history.get_deltas(&query).await?;

        let mut holders = BTreeSet::new();
        for delta in &deltas {
            if delta.code != token.account {
                error!(
                    "Delta of {} at block {} returned for {}",
                    delta.code, delta.block_num, token
                );
                continue;
            }
            if delta.symbol() == Some(token.symbol.as_str()) {
                holders.insert(delta.scope.trim().to_owned());
            }
        }

        let end_block = match deltas.last() {
            Some(last) if deltas.len() as u32 >= limit => {
                warn!(
                    "{} deltas of {} fill the page, continuing from block {}",
                    deltas.len(),
                    token,
                    last.block_num
                );
                last.block_num.max(last_block + 1)
            }
            _ => head.block_num,
        };

        let holders = holders.into_iter().collect_vec();
        let refresh = self.load_holders(token, &holders, end_block).await;
        refresh.ensure_stored(token)?;

        let token_id = token.id.clone();
        self.repo
            .execute(move |ops| ops.update_token_last_block(&token_id, end_block))
            .await?;

        info!(
            "Refreshed {} of {} {} holders from {} deltas, synced up to block {}",
            holders.len() - refresh.failed(),
            holders.len(),
            token,
            deltas.len(),
            end_block
        );
        Ok(())
    }

    /// Exactly one `stat` row is expected; anything else skips the token.
    async fn refresh_supply(&self, token: &Token) -> Result<()> {
        let query = TableQuery::new(&token.account, &token.symbol, STAT);
        let rows: Vec<StatRow> = scan_table(&*self.chain, query).try_collect().await?;
        if rows.len() != 1 {
            return Err(AppError::MissingUpstreamData(format!(
                "{} {} rows for {}",
                rows.len(),
                STAT,
                token
            ))
            .into());
        }

        let supply = rows[0].supply.to_string();
        let token_id = token.id.clone();
        self.repo
            .execute(move |ops| ops.update_token_supply(&token_id, &supply))
            .await
    }

    /// Refreshes holders in sequential batches of concurrent fetches.
    /// A holder whose fetch fails keeps its row as it is.
    async fn load_holders(&self, token: &Token, holders: &[String], block: i64) -> HolderRefresh {
        let mut refresh = HolderRefresh::default();
        let mut processed = 0;

        for batch in holders.chunks(self.settings.holder_batch_size.max(1)) {
            let results = join_all(batch.iter().map(|holder| self.fetch_holder_balance(token, holder))).await;
            for (holder, result) in batch.iter().zip(results) {
                let amount = match result {
                    Ok(amount) => amount,
                    Err(err) => {
                        warn!("Cannot fetch {} balance of {}: {:?}", token, holder, err);
                        refresh.fetch_failed.push(holder.clone());
                        continue;
                    }
                };
                if let Err(err) = self.store_holder_balance(token, holder, amount, block).await {
                    warn!("Cannot store {} balance of {}: {:?}", token, holder, err);
                    refresh.write_failed.push(holder.clone());
                }
            }

            processed += batch.len();
            if processed % 500 < batch.len() {
                debug!("Refreshed {} of {} {} holders", processed, holders.len(), token);
            }
        }

        refresh
    }

    /// `None` when the holder has no row for the token's symbol.
    async fn fetch_holder_balance(&self, token: &Token, holder: &str) -> Result<Option<i64>> {
        let query = TableQuery::new(&token.account, account_scope(holder), ACCOUNTS);
        let rows: Vec<AccountRow> = scan_table(&*self.chain, query).try_collect().await?;
        Ok(rows
            .into_iter()
            .find(|row| row.balance.symbol == token.symbol)
            .map(|row| row.balance.units))
    }

    async fn store_holder_balance(
        &self,
        token: &Token,
        holder: &str,
        amount: Option<i64>,
        block: i64,
    ) -> Result<()> {
        let token_id = token.id.clone();
        let account = holder.to_owned();
        match amount {
            Some(amount) => {
                let update = BalanceUpdate {
                    token: token_id,
                    account,
                    component: BalanceComponent::Liquid,
                    amount,
                    block,
                };
                self.repo
                    .execute(move |ops| ops.upsert_balance_component(&update))
                    .await
            }
            None => {
                debug!("{} holds no {}", holder, token);
                self.repo
                    .execute(move |ops| {
                        ops.zero_balance_component(&token_id, &account, BalanceComponent::Liquid)
                    })
                    .await
                    .map(|_| ())
            }
        }
    }
}

#[async_trait]
impl<C, H, R> Job for TokenEngine<C, H, R>
where
    C: ChainReader + 'static,
    H: HistoryReader + 'static,
    R: Repo,
{
    fn name(&self) -> &'static str {
        "tokens"
    }

    async fn tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        if self.list_interval.is_due(now) {
            self.refresh_token_list().await;
            self.list_interval.mark(now);
        }

        if !self.poll_interval.is_due(now) {
            return Ok(());
        }
        self.poll_interval.mark(now);

        timer!("tokens sync");

        for token in self.tokens.clone() {
            info!("Syncing {}", token);
            if let Err(err) = self.sync_token(&token, now).await {
                error!("Cannot sync {}: {:?}", token, err);
            }
        }

        Ok(())
    }
}
