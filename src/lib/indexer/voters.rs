use anyhow::Result;
use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use wavesexchange_log::{debug, error, info, timer};

use super::actions::{replay, ActionHandler};
use super::cursor::{CursorStore, VOTER_POLLER};
use super::models::voter::Voter;
use super::producers::ProducerSnapshotEngine;
use super::repo::{Repo, RepoOperations};
use super::stake::{BUYREX, SELLREX};
use super::timer::Interval;
use super::{Job, SyncSettings};
use crate::antelope::{account_scope, integer_part};
use crate::api_clients::chain::tables::{VoterInfo, VOTERS};
use crate::api_clients::chain::{find_row, get_head, scan_table, BlockInfo, ChainReader, TableQuery};
use crate::api_clients::history::{Action, HistoryReader, RexAction, VoteProducer};
use crate::error::Error as AppError;

pub const VOTEPRODUCER: &str = "voteproducer";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VoterAction {
    /// `voteproducer` replaces the producer list.
    Vote,
    /// `buyrex` / `sellrex` only move the vote weight.
    Stake,
}

/// Stored vote weight: the integer part of the chain's float.
pub fn vote_weight(info: &VoterInfo) -> Result<BigDecimal, AppError> {
    BigDecimal::from_str(&integer_part(&info.last_vote_weight)).map_err(|err| {
        AppError::InvalidRow(format!(
            "vote weight {} of {}: {}",
            info.last_vote_weight, info.owner, err
        ))
    })
}

pub struct VoterEngine<C, H, R> {
    chain: Arc<C>,
    history: Arc<H>,
    repo: Arc<R>,
    cursors: CursorStore<R>,
    producers: ProducerSnapshotEngine<C, R>,
    settings: SyncSettings,
    voter_interval: Interval,
    bp_interval: Interval,
    initialized: bool,
    // Weights looked up during one incremental cycle.
    weights: Mutex<HashMap<String, BigDecimal>>,
}

impl<C, H, R> VoterEngine<C, H, R>
where
    C: ChainReader + 'static,
    H: HistoryReader + 'static,
    R: Repo,
{
    pub fn new(chain: Arc<C>, history: Arc<H>, repo: Arc<R>, settings: SyncSettings) -> Self {
        VoterEngine {
            cursors: CursorStore::new(repo.clone(), VOTER_POLLER),
            producers: ProducerSnapshotEngine::new(chain.clone(), repo.clone(), settings.clone()),
            voter_interval: Interval::new(settings.voter_poll_interval),
            bp_interval: Interval::new(settings.bp_poll_interval),
            initialized: false,
            weights: Mutex::new(HashMap::new()),
            chain,
            history,
            repo,
            settings,
        }
    }

    /// Resumes both timers from the stored state: the latest snapshot for
    /// producers and the time of the latest voter block for voters.
    async fn init_timers(&mut self) -> Result<()> {
        if let Some(date) = self
            .repo
            .execute(|ops| ops.last_producer_snapshot_date())
            .await?
        {
            self.bp_interval.mark(date);
        }

        if let Some(block) = self.repo.execute(|ops| ops.last_voters_block()).await? {
            let at = self.chain.get_block(block).await?.timestamp;
            self.voter_interval.mark(at);
        }

        debug!(
            "Voter timers resumed, producers at {:?}, voters at {:?}",
            self.bp_interval.last(),
            self.voter_interval.last()
        );
        Ok(())
    }

    pub async fn sync_voters(&self) -> Result<()> {
        let head = get_head(&*self.chain).await?;
        match self.repo.execute(|ops| ops.last_voters_block()).await? {
            None => self.load_voters(&head).await,
            Some(last_block) => self.replay_voters(last_block, &head).await,
        }
    }

    /// Rebuilds the voters table from the chain and deletes every voter
    /// that was not seen in this pass.
    pub async fn load_voters(&self, head: &BlockInfo) -> Result<()> {
        info!("Loading all voters at block {}", head.block_num);

        let system = &self.settings.system_contract;
        let query = TableQuery::new(system, system, VOTERS).limit(2000);
        let rows = scan_table::<_, VoterInfo>(&*self.chain, query);
        futures::pin_mut!(rows);

        let block = head.block_num;
        let mut failed = vec![];
        let mut count = 0;
        while let Some(row) = rows.try_next().await? {
            let stored = match vote_weight(&row) {
                Ok(weight) => self.apply_vote(&row.owner, row.producers, weight, block).await,
                Err(err) => Err(err.into()),
            };
            if let Err(err) = stored {
                error!("Cannot store voter {}: {:?}", row.owner, err);
                failed.push(row.owner);
            }

            count += 1;
            if count % 1000 == 0 {
                info!("Processed {} voters", count);
            }
        }

        let removed = self
            .repo
            .execute(move |ops| ops.delete_stale_voters(block, &failed))
            .await?;

        info!(
            "Loaded {} voters at block {}, removed {} stale",
            count, block, removed
        );
        Ok(())
    }

    /// Replays vote and REX actions since their cursors. Each stream falls
    /// back to `last_block` when it has no cursor yet.
    pub async fn replay_voters(&self, last_block: i64, head: &BlockInfo) -> Result<()> {
        info!("Replaying voter actions up to block {}", head.block_num);

        let streams = [
            (VoterAction::Vote, VOTEPRODUCER),
            (VoterAction::Stake, BUYREX),
            (VoterAction::Stake, SELLREX),
        ];
        for (kind, action) in &streams {
            let filter = self.settings.system_action(action);
            match replay(
                &*self.chain,
                &*self.history,
                &self.cursors,
                self,
                kind,
                &filter,
                last_block,
                head,
                self.settings.history_limit,
            )
            .await
            {
                Ok(count) => info!("Applied {} {} actions", count, filter),
                Err(err) => error!("{} replay failed: {:?}", filter, err),
            }
        }

        if let Ok(mut weights) = self.weights.lock() {
            weights.clear();
        }
        Ok(())
    }

    /// A voter without producers is not kept.
    async fn apply_vote(
        &self,
        voter: &str,
        producers: Vec<String>,
        weight: BigDecimal,
        block: i64,
    ) -> Result<()> {
        if producers.is_empty() {
            let voter = voter.to_owned();
            let removed = self
                .repo
                .execute(move |ops| ops.delete_voter(&voter))
                .await?;
            if removed > 0 {
                debug!("Voter removed at block {}", block);
            }
            return Ok(());
        }

        let voter = Voter {
            voter: voter.to_owned(),
            producers,
            vote_weight: weight,
            last_block: block,
        };
        self.repo.execute(move |ops| ops.upsert_voter(&voter)).await
    }

    async fn lookup_weight(&self, voter: &str) -> Result<BigDecimal> {
        let cached = self
            .weights
            .lock()
            .ok()
            .and_then(|weights| weights.get(voter).cloned());
        if let Some(weight) = cached {
            return Ok(weight);
        }

        let system = &self.settings.system_contract;
        let query = TableQuery::new(system, system, VOTERS)
            .exact(account_scope(voter))
            .limit(1);
        let row = find_row::<_, VoterInfo>(&*self.chain, &query)
            .await?
            .filter(|row| row.owner == voter);

        match row {
            Some(info) => {
                let weight = vote_weight(&info)?;
                if let Ok(mut weights) = self.weights.lock() {
                    weights.insert(voter.to_owned(), weight.clone());
                }
                Ok(weight)
            }
            None => {
                error!("Voter {} not found, using zero vote weight", voter);
                Ok(BigDecimal::zero())
            }
        }
    }
}

#[async_trait]
impl<C, H, R> ActionHandler<VoterAction> for VoterEngine<C, H, R>
where
    C: ChainReader + 'static,
    H: HistoryReader + 'static,
    R: Repo,
{
    async fn handle(&self, kind: &VoterAction, action: &Action) -> Result<()> {
        match kind {
            VoterAction::Vote => {
                let data: VoteProducer = match action.decode() {
                    Ok(data) => data,
                    Err(err) => {
                        error!("Skipping malformed vote action: {}", err);
                        return Ok(());
                    }
                };
                let weight = self.lookup_weight(&data.voter).await?;
                self.apply_vote(&data.voter, data.producers, weight, action.block)
                    .await
            }
            VoterAction::Stake => {
                let data: RexAction = match action.decode() {
                    Ok(data) => data,
                    Err(err) => {
                        error!("Skipping malformed REX action: {}", err);
                        return Ok(());
                    }
                };
                let weight = self.lookup_weight(&data.from).await?;
                let block = action.block;
                let voter = data.from;
                let updated = self
                    .repo
                    .execute(move |ops| ops.update_voter_weight(&voter, &weight, block))
                    .await?;
                if updated == 0 {
                    debug!("{} at block {} is not a voter", action.action, block);
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<C, H, R> Job for VoterEngine<C, H, R>
where
    C: ChainReader + 'static,
    H: HistoryReader + 'static,
    R: Repo,
{
    fn name(&self) -> &'static str {
        "voters"
    }

    async fn tick(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.initialized {
            self.init_timers().await?;
            self.initialized = true;
        }

        if self.bp_interval.is_due(now) {
            if let Err(err) = self.producers.snapshot(now).await {
                error!("Producer snapshot failed: {:?}", err);
            }
            self.bp_interval.mark(now);
        }

        if self.voter_interval.is_due(now) {
            timer!("voters sync");
            if let Err(err) = self.sync_voters().await {
                error!("Voters sync failed: {:?}", err);
            }
            self.voter_interval.mark(now);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bigdecimal::BigDecimal;
    use chrono::{Duration, TimeZone, Utc};
    use serde_json::json;
    use std::sync::Arc;

    use super::VoterEngine;
    use crate::api_clients::chain::ChainReader;
    use crate::indexer::mocks::{MockChain, MockHistory};
    use crate::indexer::models::voter::Voter;
    use crate::indexer::repo::memory::MemoryRepo;
    use crate::indexer::{test_settings, Job};

    fn fixtures() -> (Arc<MockChain>, Arc<MockHistory>, Arc<MemoryRepo>) {
        Default::default()
    }

    fn engine(
        chain: &Arc<MockChain>,
        history: &Arc<MockHistory>,
        repo: &Arc<MemoryRepo>,
    ) -> VoterEngine<MockChain, MockHistory, MemoryRepo> {
        VoterEngine::new(chain.clone(), history.clone(), repo.clone(), test_settings())
    }

    fn voter_row(owner: &str, producers: &[&str], weight: &str) -> serde_json::Value {
        json!({
            "owner": owner,
            "proxy": "",
            "producers": producers,
            "staked": 10000,
            "last_vote_weight": weight,
            "proxied_vote_weight": "0.00000000000000000",
            "is_proxy": 0
        })
    }

    fn stored(voter: &str, producers: &[&str], weight: i64, block: i64) -> Voter {
        Voter {
            voter: voter.into(),
            producers: producers.iter().map(|p| p.to_string()).collect(),
            vote_weight: BigDecimal::from(weight),
            last_block: block,
        }
    }

    #[tokio::test]
    async fn should_load_voters_and_drop_empty_and_stale_ones() {
        let (chain, history, repo) = fixtures();
        chain.set_table(
            "eosio",
            "eosio",
            "voters",
            vec![
                voter_row("alice", &["bp1", "bp2"], "1234.56780000000"),
                voter_row("bob", &[], "99.0"),
            ],
        );
        {
            let mut state = repo.state();
            state.voters.insert("bob".into(), stored("bob", &["bp1"], 5, 10));
            state.voters.insert("dave".into(), stored("dave", &["bp2"], 5, 10));
        }

        let head = chain.get_block(1000).await.unwrap();
        engine(&chain, &history, &repo).load_voters(&head).await.unwrap();

        let state = repo.state();
        assert_eq!(state.voters.len(), 1);
        assert_eq!(state.voters["alice"], stored("alice", &["bp1", "bp2"], 1234, 1000));
    }

    #[tokio::test]
    async fn should_replay_votes_and_weight_changes() {
        let (chain, history, repo) = fixtures();
        chain.set_table(
            "eosio",
            "eosio",
            "voters",
            vec![voter_row("alice", &["bp1"], "50.9"), voter_row("carol", &["bp3"], "7.25")],
        );
        repo.state()
            .voters
            .insert("alice".into(), stored("alice", &["bp1"], 50, 900));
        history.push_action("eosio:voteproducer", 950, json!({ "voter": "carol", "proxy": "", "producers": ["bp3"] }));
        history.push_action("eosio:voteproducer", 960, json!({ "voter": "alice", "proxy": "", "producers": [] }));
        history.push_action("eosio:buyrex", 970, json!({ "from": "carol", "amount": "1.0000 TLOS" }));
        history.push_action("eosio:sellrex", 980, json!({ "from": "erin", "rex": "1.0000 REX" }));

        let engine = engine(&chain, &history, &repo);
        let head = chain.get_block(1000).await.unwrap();
        engine.replay_voters(900, &head).await.unwrap();

        {
            let state = repo.state();
            assert!(!state.voters.contains_key("alice"));
            assert_eq!(state.voters["carol"], stored("carol", &["bp3"], 7, 970));
            assert!(!state.voters.contains_key("erin"));
        }
        assert_eq!(repo.cursor("voter", "eosio:voteproducer"), Some(1000));
        assert_eq!(repo.cursor("voter", "eosio:sellrex"), Some(1000));
        assert!(engine.weights.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_snapshot_and_load_on_first_tick_then_replay() {
        let (chain, history, repo) = fixtures();
        chain.set_table("eosio", "eosio", "voters", vec![voter_row("alice", &["bp1"], "10.0")]);
        chain.set_table(
            "eosio",
            "eosio",
            "producers",
            vec![json!({ "owner": "bp1", "total_votes": "10.0", "is_active": 1 })],
        );
        let mut engine = engine(&chain, &history, &repo);
        let start = Utc.ymd(2023, 3, 1).and_hms(0, 0, 0);

        engine.tick(start).await.unwrap();
        assert_eq!(repo.state().snapshots.len(), 1);
        assert_eq!(repo.state().voters["alice"].last_block, 1000);

        chain.set_head(1100);
        chain.set_table("eosio", "eosio", "voters", vec![voter_row("alice", &["bp2"], "20.0")]);
        history.push_action("eosio:voteproducer", 1050, json!({ "voter": "alice", "proxy": "", "producers": ["bp2"] }));

        engine.tick(start + Duration::minutes(1)).await.unwrap();

        let state = repo.state();
        assert_eq!(state.snapshots.len(), 1);
        assert_eq!(state.voters["alice"], stored("alice", &["bp2"], 20, 1050));
    }

    #[tokio::test]
    async fn should_resume_voter_timer_from_stored_block() {
        let (chain, history, repo) = fixtures();
        repo.state()
            .voters
            .insert("alice".into(), stored("alice", &["bp1"], 1, 1000));
        let mut engine = engine(&chain, &history, &repo);

        // block 1000 is 500 seconds into 2023
        let now = Utc.ymd(2023, 1, 1).and_hms(0, 8, 40);
        engine.tick(now).await.unwrap();

        assert!(history.action_requests().is_empty());
        assert_eq!(engine.voter_interval.last(), chain.get_block(1000).await.ok().map(|b| b.timestamp));
    }
}
