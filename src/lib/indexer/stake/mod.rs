//! Staked components of base-currency balances: bandwidth delegated by an
//! account (`resource_stake`) and its REX holdings (`rex_stake`).

pub mod delegations;
pub mod rex;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use wavesexchange_log::{debug, error, info};

use super::cursor::{CursorStore, TOKEN_POLLER};
use super::models::balance::{BalanceComponent, BalanceUpdate};
use super::repo::{Repo, RepoOperations};
use super::timer::Interval;
use super::SyncSettings;
use crate::api_clients::chain::{BlockInfo, ChainReader};
use crate::api_clients::history::HistoryReader;

pub const DELEGATEBW: &str = "delegatebw";
pub const UNDELEGATEBW: &str = "undelegatebw";
pub const BUYREX: &str = "buyrex";
pub const SELLREX: &str = "sellrex";

pub struct StakeEngine<C, H, R> {
    chain: Arc<C>,
    history: Arc<H>,
    repo: Arc<R>,
    cursors: CursorStore<R>,
    settings: SyncSettings,
    interval: Interval,
}

impl<C, H, R> StakeEngine<C, H, R>
where
    C: ChainReader + 'static,
    H: HistoryReader + 'static,
    R: Repo,
{
    pub fn new(chain: Arc<C>, history: Arc<H>, repo: Arc<R>, settings: SyncSettings) -> Self {
        StakeEngine {
            cursors: CursorStore::new(repo.clone(), TOKEN_POLLER),
            interval: Interval::new(settings.rex_poll_interval),
            chain,
            history,
            repo,
            settings,
        }
    }

    /// Reconciles delegations and REX against the chain. Each part is loaded
    /// in full until its cursors are seeded, and replayed from history at
    /// most once per poll interval otherwise.
    pub async fn run(&mut self, head: &BlockInfo, now: DateTime<Utc>) -> Result<()> {
        let last_delegations_block = self
            .repo
            .execute(|ops| ops.last_delegations_block())
            .await?;

        if self.interval.last().is_none() {
            if let Some(block) = last_delegations_block {
                let at = self.chain.get_block(block).await?.timestamp;
                self.interval.mark(at);
            }
        }
        let due = self.interval.is_due(now);

        let mut delegations_seeded = true;
        for action in &[DELEGATEBW, UNDELEGATEBW] {
            if self.cursors.get(&self.settings.system_action(action)).await?.is_none() {
                delegations_seeded = false;
            }
        }

        let delegations = match last_delegations_block {
            None => {
                info!("No delegations stored yet, loading all delegations");
                self.load_delegations(head).await
            }
            Some(_) if !delegations_seeded => {
                info!("Delegation cursors are not seeded, loading all delegations");
                self.load_delegations(head).await
            }
            Some(last_block) if due => self.sync_delegations(last_block, head).await,
            Some(last_block) => {
                debug!("Delegations are synced up to block {}", last_block);
                Ok(())
            }
        };
        if let Err(err) = delegations {
            error!("Delegations sync failed: {:?}", err);
        }

        let rex_cursor = match self.cursors.get(&self.settings.system_action(BUYREX)).await? {
            Some(block) => Some(block),
            None => self.cursors.get(&self.settings.system_action(SELLREX)).await?,
        };

        let rex = match rex_cursor {
            None => {
                info!("No REX cursor stored yet, loading all REX balances");
                self.load_rex(head).await
            }
            Some(cursor) if due => self.sync_rex(cursor, head).await,
            Some(_) => Ok(()),
        };
        if let Err(err) = rex {
            error!("REX sync failed: {:?}", err);
        }

        if due {
            self.interval.mark(now);
        }

        Ok(())
    }

    /// Sets `resource_stake` of `delegator` to the sum of everything it
    /// currently delegates.
    pub(crate) async fn refresh_resource_stake(&self, delegator: &str, block: i64) -> Result<()> {
        let token = self.settings.base_token_id.clone();
        let account = delegator.to_owned();
        self.repo
            .transaction(move |ops| {
                let amount = ops.delegated_stake(&account)?;
                ops.upsert_balance_component(&BalanceUpdate {
                    token,
                    account,
                    component: BalanceComponent::Resource,
                    amount,
                    block,
                })
            })
            .await
    }
}
