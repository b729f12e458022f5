//! In-memory repo for engine tests. Transactions snapshot the state and
//! restore it when the closure fails.

use anyhow::{anyhow, Result};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use super::super::models::balance::{Balance, BalanceComponent, BalanceUpdate};
use super::super::models::delegation::Delegation;
use super::super::models::producer_snapshot::ProducerSnapshot;
use super::super::models::token::TokenRow;
use super::super::models::voter::Voter;
use super::{Repo, RepoOperations};

#[derive(Clone, Debug, Default)]
pub struct MemoryState {
    pub tokens: BTreeMap<String, TokenRow>,
    pub balances: BTreeMap<(String, String), Balance>,
    pub delegations: BTreeMap<(String, String), Delegation>,
    pub voters: BTreeMap<String, Voter>,
    pub snapshots: Vec<ProducerSnapshot>,
    pub cursors: BTreeMap<(String, String), i64>,
    /// Accounts whose balance writes fail, to exercise error paths.
    pub failing_accounts: BTreeSet<String>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }
}

#[derive(Default)]
pub struct MemoryRepo {
    store: MemoryStore,
}

impl MemoryRepo {
    pub fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.store.lock()
    }

    pub fn balance(&self, token: &str, account: &str) -> Option<Balance> {
        self.store.get_balance(token, account).unwrap()
    }

    pub fn delegation(&self, from: &str, to: &str) -> Option<Delegation> {
        self.store.get_delegation(from, to).unwrap()
    }

    pub fn cursor(&self, poller: &str, action: &str) -> Option<i64> {
        self.store.get_cursor(poller, action).unwrap()
    }
}

#[async_trait::async_trait]
impl Repo for MemoryRepo {
    type Operations = MemoryStore;

    async fn execute<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Self::Operations) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        f(&self.store)
    }

    async fn transaction<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Self::Operations) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let saved = self.store.lock().clone();
        let res = f(&self.store);
        if res.is_err() {
            *self.store.lock() = saved;
        }
        res
    }
}

impl RepoOperations for MemoryStore {
    fn get_token_last_block(&self, token_id: &str) -> Result<Option<i64>> {
        Ok(self.lock().tokens.get(token_id).map(|t| t.last_block))
    }

    fn insert_token(&self, token_id: &str) -> Result<()> {
        self.lock()
            .tokens
            .entry(token_id.to_owned())
            .or_insert_with(|| TokenRow {
                id: token_id.to_owned(),
                supply: None,
                last_block: 0,
            });
        Ok(())
    }

    fn update_token_last_block(&self, token_id: &str, block: i64) -> Result<()> {
        if let Some(token) = self.lock().tokens.get_mut(token_id) {
            token.last_block = block;
        }
        Ok(())
    }

    fn update_token_supply(&self, token_id: &str, supply: &str) -> Result<()> {
        if let Some(token) = self.lock().tokens.get_mut(token_id) {
            token.supply = Some(supply.to_owned());
        }
        Ok(())
    }

    fn get_balance(&self, token: &str, account: &str) -> Result<Option<Balance>> {
        let key = (token.to_owned(), account.to_owned());
        Ok(self.lock().balances.get(&key).cloned())
    }

    fn token_balances(&self, token: &str) -> Result<Vec<Balance>> {
        Ok(self
            .lock()
            .balances
            .values()
            .filter(|b| b.token == token)
            .cloned()
            .collect())
    }

    fn upsert_balance_component(&self, update: &BalanceUpdate) -> Result<()> {
        let mut state = self.lock();
        if state.failing_accounts.contains(&update.account) {
            return Err(anyhow!("write to {} refused", update.account));
        }
        let balance = state
            .balances
            .entry((update.token.clone(), update.account.clone()))
            .or_insert_with(|| Balance::new(&update.token, &update.account, update.block));
        balance.set_component(update.component, update.amount);
        balance.block = update.block;
        Ok(())
    }

    fn zero_balance_component(
        &self,
        token: &str,
        account: &str,
        component: BalanceComponent,
    ) -> Result<usize> {
        let key = (token.to_owned(), account.to_owned());
        match self.lock().balances.get_mut(&key) {
            Some(balance) => {
                balance.set_component(component, 0);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn zero_unlisted_balance_component(
        &self,
        token: &str,
        component: BalanceComponent,
        listed: &[String],
    ) -> Result<usize> {
        let mut count = 0;
        for balance in self.lock().balances.values_mut() {
            if balance.token == token
                && balance.component(component) != 0
                && !listed.contains(&balance.account)
            {
                balance.set_component(component, 0);
                count += 1;
            }
        }
        Ok(count)
    }

    fn delete_empty_balances(&self, token: &str) -> Result<usize> {
        let mut state = self.lock();
        let before = state.balances.len();
        state
            .balances
            .retain(|_, b| !(b.token == token && b.is_empty()));
        Ok(before - state.balances.len())
    }

    fn get_delegation(&self, from: &str, to: &str) -> Result<Option<Delegation>> {
        let key = (from.to_owned(), to.to_owned());
        Ok(self.lock().delegations.get(&key).cloned())
    }

    fn upsert_delegation(&self, delegation: &Delegation) -> Result<()> {
        let key = (
            delegation.from_account.clone(),
            delegation.to_account.clone(),
        );
        self.lock().delegations.insert(key, delegation.clone());
        Ok(())
    }

    fn increment_delegation(&self, delegation: &Delegation) -> Result<()> {
        let key = (
            delegation.from_account.clone(),
            delegation.to_account.clone(),
        );
        let mut state = self.lock();
        match state.delegations.get_mut(&key) {
            Some(existing) => {
                existing.cpu += delegation.cpu;
                existing.net += delegation.net;
                existing.block = delegation.block;
            }
            None => {
                state.delegations.insert(key, delegation.clone());
            }
        }
        Ok(())
    }

    fn update_delegation(&self, delegation: &Delegation) -> Result<()> {
        let key = (
            delegation.from_account.clone(),
            delegation.to_account.clone(),
        );
        if let Some(existing) = self.lock().delegations.get_mut(&key) {
            *existing = delegation.clone();
        }
        Ok(())
    }

    fn delete_delegation(&self, from: &str, to: &str) -> Result<usize> {
        let key = (from.to_owned(), to.to_owned());
        Ok(self.lock().delegations.remove(&key).map_or(0, |_| 1))
    }

    fn delete_stale_delegations(&self, block: i64, keep: &[String]) -> Result<Vec<String>> {
        let mut state = self.lock();
        let mut affected = BTreeSet::new();
        state.delegations.retain(|(from, _), d| {
            let stale = d.block != block && !keep.contains(from);
            if stale {
                affected.insert(from.clone());
            }
            !stale
        });
        Ok(affected.into_iter().collect())
    }

    fn delegated_stake(&self, from: &str) -> Result<i64> {
        Ok(self
            .lock()
            .delegations
            .values()
            .filter(|d| d.from_account == from)
            .map(|d| d.cpu + d.net)
            .sum())
    }

    fn last_delegations_block(&self) -> Result<Option<i64>> {
        Ok(self.lock().delegations.values().map(|d| d.block).max())
    }

    fn get_voter(&self, voter: &str) -> Result<Option<Voter>> {
        Ok(self.lock().voters.get(voter).cloned())
    }

    fn upsert_voter(&self, voter: &Voter) -> Result<()> {
        self.lock().voters.insert(voter.voter.clone(), voter.clone());
        Ok(())
    }

    fn delete_voter(&self, voter: &str) -> Result<usize> {
        Ok(self.lock().voters.remove(voter).map_or(0, |_| 1))
    }

    fn delete_stale_voters(&self, block: i64, keep: &[String]) -> Result<usize> {
        let mut state = self.lock();
        let before = state.voters.len();
        state
            .voters
            .retain(|name, v| v.last_block == block || keep.contains(name));
        Ok(before - state.voters.len())
    }

    fn update_voter_weight(&self, voter: &str, weight: &BigDecimal, block: i64) -> Result<usize> {
        match self.lock().voters.get_mut(voter) {
            Some(existing) => {
                existing.vote_weight = weight.clone();
                existing.last_block = block;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn last_voters_block(&self) -> Result<Option<i64>> {
        Ok(self.lock().voters.values().map(|v| v.last_block).max())
    }

    fn insert_producer_snapshot(&self, snapshot: &ProducerSnapshot) -> Result<()> {
        self.lock().snapshots.push(snapshot.clone());
        Ok(())
    }

    fn last_producer_snapshot_date(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.lock().snapshots.iter().map(|s| s.date).max())
    }

    fn get_cursor(&self, poller: &str, action: &str) -> Result<Option<i64>> {
        let key = (poller.to_owned(), action.to_owned());
        Ok(self.lock().cursors.get(&key).copied())
    }

    fn set_cursor(&self, poller: &str, action: &str, block: i64) -> Result<()> {
        let key = (poller.to_owned(), action.to_owned());
        let mut state = self.lock();
        let cursor = state.cursors.entry(key).or_insert(block);
        *cursor = (*cursor).max(block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::super::models::balance::{Balance, BalanceComponent};
    use super::super::{Repo, RepoOperations};
    use super::MemoryRepo;

    const TLOS: &str = "eosio.token:TLOS";

    fn drifted(account: &str, block: i64) -> Balance {
        Balance {
            token: TLOS.to_owned(),
            account: account.to_owned(),
            block,
            liquid_balance: 10,
            rex_stake: 77,
            resource_stake: 3,
            total_balance: 500,
        }
    }

    #[tokio::test]
    async fn should_never_move_cursor_backwards() {
        let repo = MemoryRepo::default();
        repo.execute(|ops| ops.set_cursor("token", "eosio:buyrex", 100))
            .await
            .unwrap();
        repo.execute(|ops| ops.set_cursor("token", "eosio:buyrex", 90))
            .await
            .unwrap();

        assert_eq!(repo.cursor("token", "eosio:buyrex"), Some(100));
    }

    #[tokio::test]
    async fn should_roll_back_failed_transaction() {
        let repo = MemoryRepo::default();
        let res: anyhow::Result<()> = repo
            .transaction(|ops| {
                ops.insert_token("eosio.token:TLOS")?;
                Err(anyhow::anyhow!("boom"))
            })
            .await;

        assert!(res.is_err());
        assert!(repo.state().tokens.is_empty());
    }

    #[tokio::test]
    async fn should_recompute_total_when_zeroing_component() {
        let repo = MemoryRepo::default();
        repo.state()
            .balances
            .insert((TLOS.to_owned(), "alice".to_owned()), drifted("alice", 5));

        let zeroed = repo
            .execute(|ops| ops.zero_balance_component(TLOS, "alice", BalanceComponent::Rex))
            .await
            .unwrap();

        assert_eq!(zeroed, 1);
        let balance = repo.balance(TLOS, "alice").unwrap();
        assert_eq!(balance.rex_stake, 0);
        assert_eq!(balance.total_balance, 13);
    }

    #[tokio::test]
    async fn should_zero_unlisted_accounts_regardless_of_block() {
        let repo = MemoryRepo::default();
        {
            let mut state = repo.state();
            state
                .balances
                .insert((TLOS.to_owned(), "alice".to_owned()), drifted("alice", 1000));
            state
                .balances
                .insert((TLOS.to_owned(), "bob".to_owned()), drifted("bob", 1000));
        }

        let zeroed = repo
            .execute(|ops| {
                ops.zero_unlisted_balance_component(TLOS, BalanceComponent::Rex, &["bob".to_owned()])
            })
            .await
            .unwrap();

        assert_eq!(zeroed, 1);
        let alice = repo.balance(TLOS, "alice").unwrap();
        assert_eq!(alice.rex_stake, 0);
        assert_eq!(alice.total_balance, 13);
        assert_eq!(alice.block, 1000);
        assert_eq!(repo.balance(TLOS, "bob").unwrap().rex_stake, 77);
    }
}
