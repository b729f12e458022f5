pub mod app;
pub mod chain;
pub mod indexer;
pub mod postgres;

use crate::error::Error;

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    pub app: app::Config,
    pub chain: chain::Config,
    pub indexer: indexer::Config,
    pub postgres: postgres::Config,
}

pub fn load_indexer_config() -> Result<IndexerConfig, Error> {
    let app_config = app::load()?;
    let chain_config = chain::load()?;
    let indexer_config = indexer::load()?;
    let postgres_config = postgres::load()?;

    Ok(IndexerConfig {
        app: app_config,
        chain: chain_config,
        indexer: indexer_config,
        postgres: postgres_config,
    })
}
