use anyhow::{Error, Result};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::dsl::max;
use diesel::pg::upsert::excluded;
use diesel::pg::PgConnection;
use diesel::sql_types::{Array, BigInt, Text};
use diesel::{prelude::*, sql_query};
use itertools::Itertools;
use std::str::FromStr;

use super::super::models::balance::{Balance, BalanceComponent, BalanceUpdate};
use super::super::models::delegation::Delegation;
use super::super::models::producer_snapshot::ProducerSnapshot;
use super::super::models::token::TokenRow;
use super::super::models::voter::Voter;
use super::{Repo, RepoOperations};
use crate::db::{self, PgPool};
use crate::error::Error as AppError;
use crate::schema::{balances, delegations, producer_snapshot, sync_status, tokens, voters};

/// Repo backed by the Postgres connection pool. Every call checks a
/// connection out of the pool and runs on a blocking-capable worker thread.
pub struct PgRepo {
    pool: PgPool,
    connection_retries: u32,
}

pub fn new(pool: PgPool, connection_retries: u32) -> PgRepo {
    PgRepo {
        pool,
        connection_retries,
    }
}

#[async_trait::async_trait]
impl Repo for PgRepo {
    type Operations = PgConnection;

    async fn execute<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Self::Operations) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        tokio::task::block_in_place(move || {
            let conn = db::connection(&self.pool, self.connection_retries)?;
            f(&conn)
        })
    }

    async fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Self::Operations) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        tokio::task::block_in_place(move || {
            let conn = db::connection(&self.pool, self.connection_retries)?;
            conn.transaction::<_, Error, _>(|| f(&conn))
        })
    }
}

#[derive(QueryableByName)]
struct Total {
    #[sql_type = "BigInt"]
    total: i64,
}

#[derive(QueryableByName)]
struct Delegator {
    #[sql_type = "Text"]
    from_account: String,
}

#[derive(QueryableByName)]
struct VoterRow {
    #[sql_type = "Text"]
    voter: String,
    #[sql_type = "Array<Text>"]
    producers: Vec<String>,
    #[sql_type = "Text"]
    vote_weight: String,
    #[sql_type = "BigInt"]
    last_block: i64,
}

/// The two components not named by `component`.
fn other_components(component: BalanceComponent) -> (&'static str, &'static str) {
    match component {
        BalanceComponent::Liquid => ("rex_stake", "resource_stake"),
        BalanceComponent::Rex => ("liquid_balance", "resource_stake"),
        BalanceComponent::Resource => ("liquid_balance", "rex_stake"),
    }
}

fn upsert_component_sql(component: BalanceComponent) -> String {
    let (a, b) = other_components(component);
    format!(
        "INSERT INTO balances (token, account, block, {col}, total_balance) VALUES ($1, $2, $3, $4, $4)
        ON CONFLICT (token, account) DO UPDATE SET
            {col} = EXCLUDED.{col},
            block = EXCLUDED.block,
            total_balance = EXCLUDED.{col} + balances.{a} + balances.{b}",
        col = component.column(),
        a = a,
        b = b,
    )
}

/// Total is recomputed from the remaining components, never adjusted by a delta.
fn zero_component_sql(component: BalanceComponent) -> String {
    let (a, b) = other_components(component);
    format!(
        "UPDATE balances SET {col} = 0, total_balance = {a} + {b} WHERE token = $1 AND account = $2",
        col = component.column(),
        a = a,
        b = b,
    )
}

fn zero_unlisted_component_sql(component: BalanceComponent) -> String {
    let (a, b) = other_components(component);
    format!(
        "UPDATE balances SET {col} = 0, total_balance = {a} + {b}
        WHERE token = $1 AND {col} <> 0 AND NOT (account = ANY($2))",
        col = component.column(),
        a = a,
        b = b,
    )
}

impl RepoOperations for PgConnection {
    //
    // TOKENS
    //

    fn get_token_last_block(&self, token_id: &str) -> Result<Option<i64>> {
        tokens::table
            .filter(tokens::id.eq(token_id))
            .first::<TokenRow>(self)
            .optional()
            .map(|row| row.map(|row| row.last_block))
            .map_err(|err| {
                let context = format!("Cannot get last block of token {}: {}", token_id, err);
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    fn insert_token(&self, token_id: &str) -> Result<()> {
        diesel::insert_into(tokens::table)
            .values((tokens::id.eq(token_id), tokens::last_block.eq(0)))
            .on_conflict_do_nothing()
            .execute(self)
            .map(|_| ())
            .map_err(|err| {
                let context = format!("Cannot insert token {}: {}", token_id, err);
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    fn update_token_last_block(&self, token_id: &str, block: i64) -> Result<()> {
        diesel::update(tokens::table)
            .set(tokens::last_block.eq(block))
            .filter(tokens::id.eq(token_id))
            .execute(self)
            .map(|_| ())
            .map_err(|err| {
                let context = format!("Cannot update last block of token {}: {}", token_id, err);
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    fn update_token_supply(&self, token_id: &str, supply: &str) -> Result<()> {
        diesel::update(tokens::table)
            .set(tokens::supply.eq(supply))
            .filter(tokens::id.eq(token_id))
            .execute(self)
            .map(|_| ())
            .map_err(|err| {
                let context = format!("Cannot update supply of token {}: {}", token_id, err);
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    //
    // BALANCES
    //

    fn get_balance(&self, token: &str, account: &str) -> Result<Option<Balance>> {
        balances::table
            .filter(balances::token.eq(token))
            .filter(balances::account.eq(account))
            .first(self)
            .optional()
            .map_err(|err| {
                let context = format!("Cannot get balance {}/{}: {}", token, account, err);
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    fn token_balances(&self, token: &str) -> Result<Vec<Balance>> {
        balances::table
            .filter(balances::token.eq(token))
            .order(balances::account.asc())
            .load(self)
            .map_err(|err| {
                let context = format!("Cannot load balances of token {}: {}", token, err);
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    fn upsert_balance_component(&self, update: &BalanceUpdate) -> Result<()> {
        let column = update.component.column();
        let q = upsert_component_sql(update.component);

        sql_query(q)
            .bind::<Text, _>(&update.token)
            .bind::<Text, _>(&update.account)
            .bind::<BigInt, _>(update.block)
            .bind::<BigInt, _>(update.amount)
            .execute(self)
            .map(|_| ())
            .map_err(|err| {
                let context = format!(
                    "Cannot upsert {} of {}/{}: {}",
                    column, update.token, update.account, err
                );
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    fn zero_balance_component(
        &self,
        token: &str,
        account: &str,
        component: BalanceComponent,
    ) -> Result<usize> {
        let column = component.column();
        let q = zero_component_sql(component);

        sql_query(q)
            .bind::<Text, _>(token)
            .bind::<Text, _>(account)
            .execute(self)
            .map_err(|err| {
                let context = format!("Cannot zero {} of {}/{}: {}", column, token, account, err);
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    fn zero_unlisted_balance_component(
        &self,
        token: &str,
        component: BalanceComponent,
        listed: &[String],
    ) -> Result<usize> {
        let column = component.column();
        let q = zero_unlisted_component_sql(component);

        sql_query(q)
            .bind::<Text, _>(token)
            .bind::<Array<Text>, _>(listed)
            .execute(self)
            .map_err(|err| {
                let context = format!("Cannot zero unlisted {} of {}: {}", column, token, err);
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    fn delete_empty_balances(&self, token: &str) -> Result<usize> {
        diesel::delete(balances::table)
            .filter(balances::token.eq(token))
            .filter(balances::liquid_balance.eq(0))
            .filter(balances::rex_stake.eq(0))
            .filter(balances::resource_stake.eq(0))
            .execute(self)
            .map_err(|err| {
                let context = format!("Cannot delete empty balances of {}: {}", token, err);
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    //
    // DELEGATIONS
    //

    fn get_delegation(&self, from: &str, to: &str) -> Result<Option<Delegation>> {
        delegations::table
            .filter(delegations::from_account.eq(from))
            .filter(delegations::to_account.eq(to))
            .first(self)
            .optional()
            .map_err(|err| {
                let context = format!("Cannot get delegation {} -> {}: {}", from, to, err);
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    fn upsert_delegation(&self, delegation: &Delegation) -> Result<()> {
        diesel::insert_into(delegations::table)
            .values(delegation)
            .on_conflict((delegations::from_account, delegations::to_account))
            .do_update()
            .set((
                delegations::cpu.eq(excluded(delegations::cpu)),
                delegations::net.eq(excluded(delegations::net)),
                delegations::block.eq(excluded(delegations::block)),
            ))
            .execute(self)
            .map(|_| ())
            .map_err(|err| {
                let context = format!(
                    "Cannot upsert delegation {} -> {}: {}",
                    delegation.from_account, delegation.to_account, err
                );
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    fn increment_delegation(&self, delegation: &Delegation) -> Result<()> {
        sql_query(
            "INSERT INTO delegations (from_account, to_account, cpu, net, block) VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (from_account, to_account) DO UPDATE SET
                cpu = delegations.cpu + EXCLUDED.cpu,
                net = delegations.net + EXCLUDED.net,
                block = EXCLUDED.block",
        )
        .bind::<Text, _>(&delegation.from_account)
        .bind::<Text, _>(&delegation.to_account)
        .bind::<BigInt, _>(delegation.cpu)
        .bind::<BigInt, _>(delegation.net)
        .bind::<BigInt, _>(delegation.block)
        .execute(self)
        .map(|_| ())
        .map_err(|err| {
            let context = format!(
                "Cannot increment delegation {} -> {}: {}",
                delegation.from_account, delegation.to_account, err
            );
            Error::new(AppError::DbDieselError(err)).context(context)
        })
    }

    fn update_delegation(&self, delegation: &Delegation) -> Result<()> {
        diesel::update(delegations::table)
            .set((
                delegations::cpu.eq(delegation.cpu),
                delegations::net.eq(delegation.net),
                delegations::block.eq(delegation.block),
            ))
            .filter(delegations::from_account.eq(&delegation.from_account))
            .filter(delegations::to_account.eq(&delegation.to_account))
            .execute(self)
            .map(|_| ())
            .map_err(|err| {
                let context = format!(
                    "Cannot update delegation {} -> {}: {}",
                    delegation.from_account, delegation.to_account, err
                );
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    fn delete_delegation(&self, from: &str, to: &str) -> Result<usize> {
        diesel::delete(delegations::table)
            .filter(delegations::from_account.eq(from))
            .filter(delegations::to_account.eq(to))
            .execute(self)
            .map_err(|err| {
                let context = format!("Cannot delete delegation {} -> {}: {}", from, to, err);
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    fn delete_stale_delegations(&self, block: i64, keep: &[String]) -> Result<Vec<String>> {
        sql_query(
            "DELETE FROM delegations WHERE block <> $1 AND NOT (from_account = ANY($2)) RETURNING from_account",
        )
        .bind::<BigInt, _>(block)
        .bind::<Array<Text>, _>(keep)
        .load::<Delegator>(self)
        .map(|rows| rows.into_iter().map(|r| r.from_account).unique().collect())
        .map_err(|err| {
            let context = format!("Cannot delete stale delegations: {}", err);
            Error::new(AppError::DbDieselError(err)).context(context)
        })
    }

    fn delegated_stake(&self, from: &str) -> Result<i64> {
        sql_query(
            "SELECT COALESCE(SUM(cpu + net), 0)::BIGINT AS total FROM delegations WHERE from_account = $1",
        )
        .bind::<Text, _>(from)
        .get_result::<Total>(self)
        .map(|row| row.total)
        .map_err(|err| {
            let context = format!("Cannot sum delegations of {}: {}", from, err);
            Error::new(AppError::DbDieselError(err)).context(context)
        })
    }

    fn last_delegations_block(&self) -> Result<Option<i64>> {
        delegations::table
            .select(max(delegations::block))
            .first(self)
            .map_err(|err| {
                let context = format!("Cannot get last delegations block: {}", err);
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    //
    // VOTERS
    //

    fn get_voter(&self, voter: &str) -> Result<Option<Voter>> {
        let row = sql_query(
            "SELECT voter, producers, vote_weight::TEXT AS vote_weight, last_block FROM voters WHERE voter = $1",
        )
        .bind::<Text, _>(voter)
        .get_result::<VoterRow>(self)
        .optional()
        .map_err(|err| {
            let context = format!("Cannot get voter {}: {}", voter, err);
            Error::new(AppError::DbDieselError(err)).context(context)
        })?;

        row.map(|row| {
            let vote_weight = BigDecimal::from_str(&row.vote_weight).map_err(|err| {
                AppError::DbError(format!(
                    "Invalid vote weight {} of voter {}: {}",
                    row.vote_weight, row.voter, err
                ))
            })?;
            Ok(Voter {
                voter: row.voter,
                producers: row.producers,
                vote_weight,
                last_block: row.last_block,
            })
        })
        .transpose()
    }

    fn upsert_voter(&self, voter: &Voter) -> Result<()> {
        sql_query(
            "INSERT INTO voters (voter, producers, vote_weight, last_block) VALUES ($1, $2, $3::NUMERIC, $4)
            ON CONFLICT (voter) DO UPDATE SET
                producers = EXCLUDED.producers,
                vote_weight = EXCLUDED.vote_weight,
                last_block = EXCLUDED.last_block",
        )
        .bind::<Text, _>(&voter.voter)
        .bind::<Array<Text>, _>(&voter.producers)
        .bind::<Text, _>(voter.vote_weight.to_string())
        .bind::<BigInt, _>(voter.last_block)
        .execute(self)
        .map(|_| ())
        .map_err(|err| {
            let context = format!("Cannot upsert voter {}: {}", voter.voter, err);
            Error::new(AppError::DbDieselError(err)).context(context)
        })
    }

    fn delete_voter(&self, voter: &str) -> Result<usize> {
        diesel::delete(voters::table)
            .filter(voters::voter.eq(voter))
            .execute(self)
            .map_err(|err| {
                let context = format!("Cannot delete voter {}: {}", voter, err);
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    fn delete_stale_voters(&self, block: i64, keep: &[String]) -> Result<usize> {
        sql_query("DELETE FROM voters WHERE last_block <> $1 AND NOT (voter = ANY($2))")
            .bind::<BigInt, _>(block)
            .bind::<Array<Text>, _>(keep)
            .execute(self)
            .map_err(|err| {
                let context = format!("Cannot delete stale voters: {}", err);
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    fn update_voter_weight(&self, voter: &str, weight: &BigDecimal, block: i64) -> Result<usize> {
        sql_query("UPDATE voters SET vote_weight = $2::NUMERIC, last_block = $3 WHERE voter = $1")
            .bind::<Text, _>(voter)
            .bind::<Text, _>(weight.to_string())
            .bind::<BigInt, _>(block)
            .execute(self)
            .map_err(|err| {
                let context = format!("Cannot update vote weight of {}: {}", voter, err);
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    fn last_voters_block(&self) -> Result<Option<i64>> {
        voters::table
            .select(max(voters::last_block))
            .first(self)
            .map_err(|err| {
                let context = format!("Cannot get last voters block: {}", err);
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    //
    // PRODUCERS
    //

    fn insert_producer_snapshot(&self, snapshot: &ProducerSnapshot) -> Result<()> {
        let json = serde_json::to_value(&snapshot.snapshot).map_err(AppError::from)?;

        diesel::insert_into(producer_snapshot::table)
            .values((
                producer_snapshot::date.eq(snapshot.date),
                producer_snapshot::snapshot.eq(json),
            ))
            .execute(self)
            .map(|_| ())
            .map_err(|err| {
                let context = format!("Cannot insert producer snapshot: {}", err);
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    fn last_producer_snapshot_date(&self) -> Result<Option<DateTime<Utc>>> {
        producer_snapshot::table
            .select(max(producer_snapshot::date))
            .first(self)
            .map_err(|err| {
                let context = format!("Cannot get last producer snapshot date: {}", err);
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    //
    // SYNC STATUS
    //

    fn get_cursor(&self, poller: &str, action: &str) -> Result<Option<i64>> {
        sync_status::table
            .select(sync_status::block)
            .filter(sync_status::poller.eq(poller))
            .filter(sync_status::action.eq(action))
            .first(self)
            .optional()
            .map_err(|err| {
                let context = format!("Cannot get cursor {}/{}: {}", poller, action, err);
                Error::new(AppError::DbDieselError(err)).context(context)
            })
    }

    fn set_cursor(&self, poller: &str, action: &str, block: i64) -> Result<()> {
        sql_query(
            "INSERT INTO sync_status (poller, action, block) VALUES ($1, $2, $3)
            ON CONFLICT (poller, action) DO UPDATE SET block = GREATEST(sync_status.block, EXCLUDED.block)",
        )
        .bind::<Text, _>(poller)
        .bind::<Text, _>(action)
        .bind::<BigInt, _>(block)
        .execute(self)
        .map(|_| ())
        .map_err(|err| {
            let context = format!("Cannot set cursor {}/{}: {}", poller, action, err);
            Error::new(AppError::DbDieselError(err)).context(context)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{upsert_component_sql, zero_component_sql, zero_unlisted_component_sql};
    use crate::indexer::models::balance::BalanceComponent;

    const COMPONENTS: [BalanceComponent; 3] = [
        BalanceComponent::Liquid,
        BalanceComponent::Rex,
        BalanceComponent::Resource,
    ];

    #[test]
    fn should_recompute_total_from_remaining_components_when_zeroing() {
        assert!(zero_component_sql(BalanceComponent::Rex)
            .contains("rex_stake = 0, total_balance = liquid_balance + resource_stake"));
        assert!(zero_unlisted_component_sql(BalanceComponent::Liquid)
            .contains("liquid_balance = 0, total_balance = rex_stake + resource_stake"));

        for component in COMPONENTS.iter() {
            let single = zero_component_sql(*component);
            let unlisted = zero_unlisted_component_sql(*component);
            assert!(!single.contains("total_balance -"), "{}", single);
            assert!(!unlisted.contains("total_balance -"), "{}", unlisted);
        }
    }

    #[test]
    fn should_not_filter_unlisted_rows_by_block() {
        let sql = zero_unlisted_component_sql(BalanceComponent::Rex);
        assert!(!sql.contains("block"), "{}", sql);
        assert!(sql.contains("NOT (account = ANY($2))"));
    }

    #[test]
    fn should_sum_all_three_components_on_upsert() {
        let sql = upsert_component_sql(BalanceComponent::Resource);
        assert!(sql.contains(
            "total_balance = EXCLUDED.resource_stake + balances.liquid_balance + balances.rex_stake"
        ));
    }
}
