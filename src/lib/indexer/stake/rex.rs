use anyhow::Result;
use async_trait::async_trait;
use bigdecimal::{BigDecimal, ToPrimitive, Zero};
use futures::TryStreamExt;
use wavesexchange_log::{debug, error, info, warn};

use super::{StakeEngine, BUYREX, SELLREX};
use crate::antelope::account_scope;
use crate::api_clients::chain::tables::{RexBalance, RexPool, REXBAL, REXPOOL};
use crate::api_clients::chain::{find_row, scan_table, BlockInfo, ChainReader, TableQuery};
use crate::api_clients::history::{Action, HistoryReader, RexAction};
use crate::error::Error as AppError;
use crate::indexer::actions::{replay, ActionHandler};
use crate::indexer::models::balance::{BalanceComponent, BalanceUpdate};
use crate::indexer::repo::{Repo, RepoOperations};

/// Base-currency value of one REX unit: `total_lendable / total_rex`.
/// An empty pool prices REX at zero.
pub fn rex_price(pool: &RexPool) -> BigDecimal {
    if pool.total_rex.units == 0 {
        return BigDecimal::zero();
    }
    BigDecimal::from(pool.total_lendable.units) / BigDecimal::from(pool.total_rex.units)
}

/// Floor of `rex_units * price`, in base-currency units.
pub fn rex_stake(rex_units: i64, price: &BigDecimal) -> i64 {
    (BigDecimal::from(rex_units) * price)
        .with_scale(0)
        .to_i64()
        .unwrap_or(0)
        .max(0)
}

/// Current REX price for a replayed cycle.
#[derive(Clone, Debug)]
pub struct RexReplay {
    pub price: BigDecimal,
}

impl<C, H, R> StakeEngine<C, H, R>
where
    C: ChainReader + 'static,
    H: HistoryReader + 'static,
    R: Repo,
{
    async fn current_rex_price(&self) -> Result<BigDecimal> {
        let system = &self.settings.system_contract;
        let query = TableQuery::new(system, system, REXPOOL).limit(1);
        match find_row::<_, RexPool>(&*self.chain, &query).await? {
            Some(pool) => Ok(rex_price(&pool)),
            None => {
                error!("No {} row found, pricing REX at zero", REXPOOL);
                Ok(BigDecimal::zero())
            }
        }
    }

    /// Recomputes `rex_stake` of every `rexbal` owner, zeroes it for every
    /// other balance row and seeds both REX cursors at `head`. The cursors
    /// stay unseeded when a stake write fails, so the next run loads again.
    pub(super) async fn load_rex(&self, head: &BlockInfo) -> Result<()> {
        let price = self.current_rex_price().await?;
        info!("Loading REX balances at price {}", price);

        let system = &self.settings.system_contract;
        let query = TableQuery::new(system, system, REXBAL).limit(1000);
        let rows = scan_table::<_, RexBalance>(&*self.chain, query);
        futures::pin_mut!(rows);

        let block = head.block_num;
        let mut owners = vec![];
        let mut failed = vec![];
        while let Some(row) = rows.try_next().await? {
            let owner = row.owner.clone();
            owners.push(owner.clone());
            let amount = rex_stake(row.rex_balance.units, &price);
            if let Err(err) = self.store_rex_stake(&owner, amount, block).await {
                error!("Cannot store REX stake of {}: {:?}", owner, err);
                failed.push(owner);
            }
            if owners.len() % 50 == 0 {
                debug!("Loaded {} REX balances", owners.len());
            }
        }

        let count = owners.len();
        let token = self.settings.base_token_id.clone();
        let zeroed = self
            .repo
            .execute(move |ops| ops.zero_unlisted_balance_component(&token, BalanceComponent::Rex, &owners))
            .await?;

        if !failed.is_empty() {
            return Err(AppError::DbError(format!(
                "{} REX stake writes failed: {}",
                failed.len(),
                failed.join(", ")
            ))
            .into());
        }

        for action in &[BUYREX, SELLREX] {
            self.cursors
                .advance(&self.settings.system_action(action), block)
                .await?;
        }

        info!(
            "Loaded {} REX balances at block {}, zeroed {} stale",
            count, block, zeroed
        );
        Ok(())
    }

    /// Replays `buyrex` and `sellrex` since their cursors, refreshing each
    /// acting account from its current `rexbal` row.
    pub(super) async fn sync_rex(&self, fallback: i64, head: &BlockInfo) -> Result<()> {
        let kind = RexReplay {
            price: self.current_rex_price().await?,
        };

        for action in &[BUYREX, SELLREX] {
            let filter = self.settings.system_action(action);
            match replay(
                &*self.chain,
                &*self.history,
                &self.cursors,
                self,
                &kind,
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

    async fn store_rex_stake(&self, account: &str, amount: i64, block: i64) -> Result<()> {
        let update = BalanceUpdate {
            token: self.settings.base_token_id.clone(),
            account: account.to_owned(),
            component: BalanceComponent::Rex,
            amount,
            block,
        };
        self.repo
            .execute(move |ops| ops.upsert_balance_component(&update))
            .await
    }

    async fn find_rex_balance(&self, account: &str) -> Result<Option<RexBalance>> {
        let system = &self.settings.system_contract;
        let query = TableQuery::new(system, system, REXBAL)
            .exact(account_scope(account))
            .limit(1);
        let row = find_row::<_, RexBalance>(&*self.chain, &query).await?;
        Ok(row.filter(|row| row.owner == account))
    }
}

#[async_trait]
impl<C, H, R> ActionHandler<RexReplay> for StakeEngine<C, H, R>
where
    C: ChainReader + 'static,
    H: HistoryReader + 'static,
    R: Repo,
{
    async fn handle(&self, kind: &RexReplay, action: &Action) -> Result<()> {
        let data: RexAction = match action.decode() {
            Ok(data) => data,
            Err(err) => {
                error!("Skipping malformed REX action: {}", err);
                return Ok(());
            }
        };

        match self.find_rex_balance(&data.from).await? {
            Some(row) => {
                let amount = rex_stake(row.rex_balance.units, &kind.price);
                self.store_rex_stake(&data.from, amount, action.block).await
            }
            None => {
                warn!("No {} row of {}, zeroing its REX stake", REXBAL, data.from);
                let token = self.settings.base_token_id.clone();
                let account = data.from;
                self.repo
                    .execute(move |ops| {
                        ops.zero_balance_component(&token, &account, BalanceComponent::Rex)
                    })
                    .await
                    .map(|_| ())
            }
        }
    }
}
