use serde::{Deserialize, Serialize};

use crate::antelope::token_id;
use crate::api_clients::token_list::TokenListEntry;

/// A token the indexer tracks, identified by `contract:SYMBOL`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub account: String,
}

impl Token {
    pub fn new(name: impl Into<String>, account: &str, symbol: &str) -> Self {
        Self {
            id: token_id(account, symbol),
            name: name.into(),
            symbol: symbol.to_uppercase(),
            account: account.to_lowercase(),
        }
    }
}

impl From<TokenListEntry> for Token {
    fn from(entry: TokenListEntry) -> Self {
        Token::new(entry.name, &entry.account, &entry.symbol)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.symbol)
    }
}
