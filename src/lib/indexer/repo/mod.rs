#[cfg(test)]
pub mod memory;
pub mod pg;

use anyhow::Result;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};

use super::models::balance::{Balance, BalanceComponent, BalanceUpdate};
use super::models::delegation::Delegation;
use super::models::producer_snapshot::ProducerSnapshot;
use super::models::voter::Voter;

#[async_trait::async_trait]
pub trait Repo: Send + Sync + 'static {
    type Operations: RepoOperations;

    /// Execute some operations on a pooled connection without creating a database transaction.
    async fn execute<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Self::Operations) -> Result<R> + Send + 'static,
        R: Send + 'static;

    /// Execute some operations within a database transaction.
    async fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Self::Operations) -> Result<R> + Send + 'static,
        R: Send + 'static;
}

pub trait RepoOperations {
    //
    // TOKENS
    //

    fn get_token_last_block(&self, token_id: &str) -> Result<Option<i64>>;

    /// Creates the token row with `last_block = 0` unless it already exists.
    fn insert_token(&self, token_id: &str) -> Result<()>;

    fn update_token_last_block(&self, token_id: &str, block: i64) -> Result<()>;

    fn update_token_supply(&self, token_id: &str, supply: &str) -> Result<()>;

    //
    // BALANCES
    //

    fn get_balance(&self, token: &str, account: &str) -> Result<Option<Balance>>;

    fn token_balances(&self, token: &str) -> Result<Vec<Balance>>;

    /// Writes one component, creating the row if needed, and recomputes
    /// `total_balance` in the same statement.
    fn upsert_balance_component(&self, update: &BalanceUpdate) -> Result<()>;

    /// Sets one component of an existing row to zero. Missing rows are left alone.
    fn zero_balance_component(
        &self,
        token: &str,
        account: &str,
        component: BalanceComponent,
    ) -> Result<usize>;

    /// Zeroes `component` on every row of `token` whose account is not in
    /// `listed`. The total is recomputed from the other two components.
    fn zero_unlisted_balance_component(
        &self,
        token: &str,
        component: BalanceComponent,
        listed: &[String],
    ) -> Result<usize>;

    fn delete_empty_balances(&self, token: &str) -> Result<usize>;

    //
    // DELEGATIONS
    //

    fn get_delegation(&self, from: &str, to: &str) -> Result<Option<Delegation>>;

    /// Inserts the row or overwrites cpu, net and block.
    fn upsert_delegation(&self, delegation: &Delegation) -> Result<()>;

    /// Inserts the row or adds cpu and net to the stored amounts.
    fn increment_delegation(&self, delegation: &Delegation) -> Result<()>;

    fn update_delegation(&self, delegation: &Delegation) -> Result<()>;

    fn delete_delegation(&self, from: &str, to: &str) -> Result<usize>;

    /// Deletes rows whose block differs from `block`, except rows delegated
    /// by an account in `keep`. Returns the distinct delegators affected.
    fn delete_stale_delegations(&self, block: i64, keep: &[String]) -> Result<Vec<String>>;

    /// Sum of cpu and net over every row delegated by `from`.
    fn delegated_stake(&self, from: &str) -> Result<i64>;

    fn last_delegations_block(&self) -> Result<Option<i64>>;

    //
    // VOTERS
    //

    fn get_voter(&self, voter: &str) -> Result<Option<Voter>>;

    fn upsert_voter(&self, voter: &Voter) -> Result<()>;

    fn delete_voter(&self, voter: &str) -> Result<usize>;

    fn delete_stale_voters(&self, block: i64, keep: &[String]) -> Result<usize>;

    /// Returns the number of rows updated, zero when the account is not a voter.
    fn update_voter_weight(&self, voter: &str, weight: &BigDecimal, block: i64) -> Result<usize>;

    fn last_voters_block(&self) -> Result<Option<i64>>;

    //
    // PRODUCERS
    //

    fn insert_producer_snapshot(&self, snapshot: &ProducerSnapshot) -> Result<()>;

    fn last_producer_snapshot_date(&self) -> Result<Option<DateTime<Utc>>>;

    //
    // SYNC STATUS
    //

    fn get_cursor(&self, poller: &str, action: &str) -> Result<Option<i64>>;

    /// Stores the cursor, never moving it backwards.
    fn set_cursor(&self, poller: &str, action: &str, block: i64) -> Result<()>;
}
