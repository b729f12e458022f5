use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use wavesexchange_log::{debug, info};

use super::models::producer_snapshot::{ProducerRank, ProducerSnapshot, UNRANKED};
use super::repo::{Repo, RepoOperations};
use super::SyncSettings;
use crate::api_clients::chain::tables::{ProducerInfo, PRODUCERS};
use crate::api_clients::chain::{scan_table, ChainReader, TableQuery};

/// Ranks active producers from 1 in descending vote order. Inactive
/// producers are kept in the map with the `UNRANKED` sentinel.
pub fn rank_producers(producers: Vec<ProducerInfo>) -> BTreeMap<String, ProducerRank> {
    let mut ranks = producers
        .into_iter()
        .map(|producer| ProducerRank {
            total_votes: producer.total_votes(),
            account: producer.owner,
            active: producer.is_active,
            rank: UNRANKED,
        })
        .collect::<Vec<_>>();

    ranks.sort_by(|a, b| {
        b.total_votes
            .partial_cmp(&a.total_votes)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.account.cmp(&b.account))
    });

    let mut next_rank = 1;
    for producer in ranks.iter_mut().filter(|producer| producer.active) {
        producer.rank = next_rank;
        next_rank += 1;
    }

    ranks
        .into_iter()
        .map(|producer| (producer.account.clone(), producer))
        .collect()
}

pub struct ProducerSnapshotEngine<C, R> {
    chain: Arc<C>,
    repo: Arc<R>,
    settings: SyncSettings,
}

impl<C, R> ProducerSnapshotEngine<C, R>
where
    C: ChainReader + 'static,
    R: Repo,
{
    pub fn new(chain: Arc<C>, repo: Arc<R>, settings: SyncSettings) -> Self {
        ProducerSnapshotEngine {
            chain,
            repo,
            settings,
        }
    }

    /// Captures the whole producers table as one immutable snapshot row.
    /// Nothing is written when the table cannot be read completely.
    pub async fn snapshot(&self, now: DateTime<Utc>) -> Result<usize> {
        info!("Taking producer snapshot");

        let system = &self.settings.system_contract;
        let query = TableQuery::new(system, system, PRODUCERS).limit(1000);
        let producers: Vec<ProducerInfo> = scan_table(&*self.chain, query).try_collect().await?;
        debug!("Fetched {} producers", producers.len());

        let snapshot = ProducerSnapshot {
            date: now,
            snapshot: rank_producers(producers),
        };
        let count = snapshot.snapshot.len();
        self.repo
            .execute(move |ops| ops.insert_producer_snapshot(&snapshot))
            .await?;

        info!("Stored snapshot of {} producers", count);
        Ok(count)
    }
}
