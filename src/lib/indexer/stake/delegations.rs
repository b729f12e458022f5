use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use std::collections::BTreeSet;
use wavesexchange_log::{debug, error, info, warn};

use super::{StakeEngine, DELEGATEBW, UNDELEGATEBW};
use crate::antelope::account_scope;
use crate::api_clients::chain::tables::{DelegatedBandwidth, DELBAND};
use crate::api_clients::chain::{scan_scopes, scan_table, BlockInfo, ChainReader, ScopeQuery, TableQuery};
use crate::api_clients::history::{Action, DelegateBw, HistoryReader, UndelegateBw};
use crate::indexer::actions::{replay, ActionHandler};
use crate::indexer::models::delegation::{decrement, Delegation, DelegationChange};
use crate::indexer::repo::{Repo, RepoOperations};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DelegationAction {
    Delegate,
    Undelegate,
}

impl<C, H, R> StakeEngine<C, H, R>
where
    C: ChainReader + 'static,
    H: HistoryReader + 'static,
    R: Repo,
{
    /// Rebuilds the delegations table from every `delband` scope, then seeds
    /// both delegation cursors at `head`.
    pub(super) async fn load_delegations(&self, head: &BlockInfo) -> Result<()> {
        let system = self.settings.system_contract.clone();
        let delegators: Vec<String> = scan_scopes(&*self.chain, ScopeQuery::new(&system, DELBAND))
            .try_collect()
            .await?;
        info!("Loading delegations of {} delegators", delegators.len());

        let mut failed = vec![];
        let mut rows = 0;
        for (index, delegator) in delegators.iter().enumerate() {
            match self.load_delegator(delegator, head.block_num).await {
                Ok(count) => rows += count,
                Err(err) => {
                    error!("Cannot load delegations of {}: {:?}", delegator, err);
                    failed.push(delegator.clone());
                }
            }
            if (index + 1) % 50 == 0 {
                debug!("Loaded delegations of {} of {} delegators", index + 1, delegators.len());
            }
        }

        let block = head.block_num;
        let keep = failed.clone();
        let emptied = self
            .repo
            .execute(move |ops| ops.delete_stale_delegations(block, &keep))
            .await?;

        let mut refresh: BTreeSet<&String> = delegators.iter().collect();
        refresh.extend(emptied.iter());
        for delegator in refresh {
            if failed.contains(delegator) {
                continue;
            }
            if let Err(err) = self.refresh_resource_stake(delegator, block).await {
                error!("Cannot refresh resource stake of {}: {:?}", delegator, err);
            }
        }

        for action in &[DELEGATEBW, UNDELEGATEBW] {
            self.cursors
                .advance(&self.settings.system_action(action), block)
                .await?;
        }

        info!(
            "Loaded {} delegations at block {}, {} delegators failed",
            rows,
            block,
            failed.len()
        );
        Ok(())
    }

    async fn load_delegator(&self, delegator: &str, block: i64) -> Result<usize> {
        let query = TableQuery::new(
            &self.settings.system_contract,
            account_scope(delegator),
            DELBAND,
        );
        let rows: Vec<DelegatedBandwidth> = scan_table(&*self.chain, query).try_collect().await?;
        let count = rows.len();

        self.repo
            .execute(move |ops| {
                rows.iter().try_for_each(|row| {
                    ops.upsert_delegation(&Delegation {
                        from_account: row.from.clone(),
                        to_account: row.to.clone(),
                        cpu: row.cpu_weight.units,
                        net: row.net_weight.units,
                        block,
                    })
                })
            })
            .await?;

        Ok(count)
    }

    /// Replays `delegatebw` and `undelegatebw` since their cursors.
    pub(super) async fn sync_delegations(&self, fallback: i64, head: &BlockInfo) -> Result<()> {
        let streams = [
            (DelegationAction::Delegate, DELEGATEBW),
            (DelegationAction::Undelegate, UNDELEGATEBW),
        ];

        for (kind, action) in streams.iter() {
            let filter = self.settings.system_action(action);
            match replay(
                &*self.chain,
                &*self.history,
                &self.cursors,
                self,
                kind,
                &filter,
                fallback,
                head,
                self.settings.history_limit,
            )
            .await
            {
                Ok(count) => info!("Applied {} {} actions", count, filter),
                Err(err) => error!("{} replay failed: {:?}", filter, err),
            }
        }

        Ok(())
    }

    /// Adds a delegation to the stored row, creating it if needed, and
    /// refreshes the delegator's resource stake.
    pub async fn insert_or_increment(&self, delegation: Delegation) -> Result<()> {
        let from = delegation.from_account.clone();
        let block = delegation.block;
        self.repo
            .execute(move |ops| ops.increment_delegation(&delegation))
            .await?;
        self.refresh_resource_stake(&from, block).await
    }

    /// Subtracts an undelegation from the stored row, deleting it once both
    /// components reach zero. An unknown row is left alone.
    pub async fn delete_or_decrement(&self, undelegation: Delegation) -> Result<()> {
        let from = undelegation.from_account.clone();
        let block = undelegation.block;

        let changed = self
            .repo
            .transaction(move |ops| {
                let existing = match ops.get_delegation(
                    &undelegation.from_account,
                    &undelegation.to_account,
                )? {
                    Some(existing) => existing,
                    None => return Ok(false),
                };

                match decrement(&existing, undelegation.cpu, undelegation.net, block) {
                    DelegationChange::Update(updated) => ops.update_delegation(&updated)?,
                    DelegationChange::Delete => {
                        ops.delete_delegation(&existing.from_account, &existing.to_account)?;
                    }
                }
                Ok(true)
            })
            .await?;

        if !changed {
            warn!("No stored delegation from {} to undelegate at block {}", from, block);
            return Ok(());
        }

        self.refresh_resource_stake(&from, block).await
    }
}

#[async_trait]
impl<C, H, R> ActionHandler<DelegationAction> for StakeEngine<C, H, R>
where
    C: ChainReader + 'static,
    H: HistoryReader + 'static,
    R: Repo,
{
    async fn handle(&self, kind: &DelegationAction, action: &Action) -> Result<()> {
        match kind {
            DelegationAction::Delegate => {
                let data: DelegateBw = match action.decode() {
                    Ok(data) => data,
                    Err(err) => {
                        error!("Skipping malformed delegatebw: {}", err);
                        return Ok(());
                    }
                };
                self.insert_or_increment(Delegation {
                    from_account: data.from,
                    to_account: data.receiver,
                    cpu: data.stake_cpu_quantity.units,
                    net: data.stake_net_quantity.units,
                    block: action.block,
                })
                .await
            }
            DelegationAction::Undelegate => {
                let data: UndelegateBw = match action.decode() {
                    Ok(data) => data,
                    Err(err) => {
                        error!("Skipping malformed undelegatebw: {}", err);
                        return Ok(());
                    }
                };
                self.delete_or_decrement(Delegation {
                    from_account: data.from,
                    to_account: data.receiver,
                    cpu: data.unstake_cpu_quantity.units,
                    net: data.unstake_net_quantity.units,
                    block: action.block,
                })
                .await
            }
        }
    }
}
