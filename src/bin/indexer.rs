use anyhow::{Context, Result};
use app_lib::api_clients::token_list::TokenListSource;
use app_lib::api_clients::HttpClient;
use app_lib::indexer::repo::pg;
use app_lib::indexer::tokens::TokenEngine;
use app_lib::indexer::voters::VoterEngine;
use app_lib::indexer::{Scheduler, SyncSettings};
use app_lib::{config, db};
use std::sync::Arc;
use wavesexchange_log::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_indexer_config()?;

    info!("Starting antelope state indexer with config: {:?}", config);

    let pool = db::pool(&config.postgres).context("Cannot build the Postgres pool")?;
    let repo = Arc::new(pg::new(pool, config.postgres.connection_retries));

    let chain = Arc::new(
        HttpClient::new(&config.chain.nodeos_url, config.chain.request_timeout)?
            .with_retry_policy(config.chain.retry.clone()),
    );
    let history = Arc::new(
        HttpClient::new(&config.chain.hyperion_url, config.chain.request_timeout)?
            .with_retry_policy(config.chain.retry.clone()),
    );
    let token_list: Arc<dyn TokenListSource> = Arc::new(
        HttpClient::new(&config.app.token_list_url, config.chain.request_timeout)?
            .with_retry_policy(config.chain.retry.clone()),
    );

    let settings = SyncSettings::from(&config);

    let tokens = TokenEngine::new(
        chain.clone(),
        history.clone(),
        repo.clone(),
        token_list,
        settings.clone(),
    );
    let voters = VoterEngine::new(chain, history, repo, settings);

    Scheduler::new(config.indexer.tick_interval)
        .with_job(tokens)
        .with_job(voters)
        .run()
        .await;

    Ok(())
}
