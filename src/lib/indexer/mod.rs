pub mod actions;
pub mod cursor;
#[cfg(test)]
pub mod mocks;
pub mod models;
pub mod producers;
pub mod repo;
pub mod stake;
pub mod timer;
pub mod tokens;
pub mod voters;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::time::Instant;
use wavesexchange_log::{debug, error, info};

use crate::antelope::token_id;
use crate::config::IndexerConfig;

/// Settings shared by the sync engines.
#[derive(Clone, Debug)]
pub struct SyncSettings {
    pub system_contract: String,
    pub base_token_id: String,
    pub holder_batch_size: usize,
    pub history_limit: u32,
    pub token_list_interval: Duration,
    pub token_poll_interval: Duration,
    pub rex_poll_interval: Duration,
    pub voter_poll_interval: Duration,
    pub bp_poll_interval: Duration,
}

impl From<&IndexerConfig> for SyncSettings {
    fn from(config: &IndexerConfig) -> Self {
        SyncSettings {
            system_contract: config.app.system_contract.clone(),
            base_token_id: token_id(
                &config.app.base_currency_contract,
                &config.app.base_currency_symbol,
            ),
            holder_batch_size: config.indexer.holder_batch_size,
            history_limit: config.chain.hyperion_increment_limit,
            token_list_interval: config.indexer.token_list_interval,
            token_poll_interval: config.indexer.token_poll_interval,
            rex_poll_interval: config.indexer.rex_poll_interval,
            voter_poll_interval: config.indexer.voter_poll_interval,
            bp_poll_interval: config.indexer.bp_poll_interval,
        }
    }
}

impl SyncSettings {
    /// Fully-qualified name of a system contract action, e.g. `eosio:buyrex`.
    pub fn system_action(&self, action: &str) -> String {
        format!("{}:{}", self.system_contract, action)
    }
}

#[cfg(test)]
pub(crate) fn test_settings() -> SyncSettings {
    SyncSettings {
        system_contract: "eosio".into(),
        base_token_id: "eosio.token:TLOS".into(),
        holder_batch_size: 2,
        history_limit: 100,
        token_list_interval: Duration::minutes(60),
        token_poll_interval: Duration::minutes(1),
        rex_poll_interval: Duration::minutes(5),
        voter_poll_interval: Duration::minutes(1),
        bp_poll_interval: Duration::minutes(30),
    }
}

/// A periodic unit of work. Each job decides on every tick whether any of
/// its own intervals has elapsed.
#[async_trait]
pub trait Job: Send {
    fn name(&self) -> &'static str;

    async fn tick(&mut self, now: DateTime<Utc>) -> Result<()>;
}

pub struct Scheduler {
    jobs: Vec<Box<dyn Job>>,
    tick_interval: std::time::Duration,
}

impl Scheduler {
    pub fn new(tick_interval: std::time::Duration) -> Self {
        Scheduler {
            jobs: vec![],
            tick_interval,
        }
    }

    pub fn with_job(mut self, job: impl Job + 'static) -> Self {
        self.jobs.push(Box::new(job));
        self
    }

    /// Ticks every job once, in registration order. A failing job is logged
    /// and does not prevent the others from running.
    pub async fn run_once(&mut self) {
        for job in self.jobs.iter_mut() {
            let start = Instant::now();
            match job.tick(Utc::now()).await {
                Ok(()) => debug!("{} tick finished in {:?}", job.name(), start.elapsed()),
                Err(err) => error!("{} tick failed: {:?}", job.name(), err),
            }
        }
    }

    pub async fn run(mut self) {
        info!(
            "Starting scheduler with {} jobs, ticking every {:?}",
            self.jobs.len(),
            self.tick_interval
        );

        loop {
            self.run_once().await;
            tokio::time::sleep(self.tick_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Job, Scheduler};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    struct Counting {
        ticks: Arc<AtomicU32>,
        fail: bool,
    }

    #[async_trait]
    impl Job for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn tick(&mut self, _now: DateTime<Utc>) -> Result<()> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(anyhow!("boom"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn should_keep_ticking_after_a_job_fails() {
        let failing = Arc::new(AtomicU32::new(0));
        let healthy = Arc::new(AtomicU32::new(0));
        let mut scheduler = Scheduler::new(std::time::Duration::from_millis(1))
            .with_job(Counting {
                ticks: failing.clone(),
                fail: true,
            })
            .with_job(Counting {
                ticks: healthy.clone(),
                fail: false,
            });

        scheduler.run_once().await;
        scheduler.run_once().await;

        assert_eq!(failing.load(Ordering::SeqCst), 2);
        assert_eq!(healthy.load(Ordering::SeqCst), 2);
    }
}
