use anyhow::Result;
use std::sync::Arc;
use wavesexchange_log::debug;

use super::repo::{Repo, RepoOperations};

pub const TOKEN_POLLER: &str = "token";
pub const VOTER_POLLER: &str = "voter";

/// Last processed block per action, namespaced by poller.
pub struct CursorStore<R> {
    repo: Arc<R>,
    poller: &'static str,
}

impl<R: Repo> CursorStore<R> {
    pub fn new(repo: Arc<R>, poller: &'static str) -> Self {
        CursorStore { repo, poller }
    }

    pub async fn get(&self, action: &str) -> Result<Option<i64>> {
        let poller = self.poller;
        let action = action.to_owned();
        self.repo
            .execute(move |ops| ops.get_cursor(poller, &action))
            .await
    }

    pub async fn advance(&self, action: &str, block: i64) -> Result<()> {
        debug!("Advancing {}/{} cursor to {}", self.poller, action, block);
        let poller = self.poller;
        let action = action.to_owned();
        self.repo
            .execute(move |ops| ops.set_cursor(poller, &action, block))
            .await
    }
}
