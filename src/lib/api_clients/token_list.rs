use async_trait::async_trait;
use serde::Deserialize;

use super::{Error, HttpClient};
use crate::models::Token;

#[derive(Clone, Debug, Deserialize)]
pub struct TokenListEntry {
    pub name: String,
    pub symbol: String,
    pub account: String,
    #[serde(default)]
    pub logo_sm: String,
    #[serde(default)]
    pub logo_lg: String,
}

#[derive(Deserialize)]
struct TokenList {
    tokens: Vec<TokenListEntry>,
}

#[async_trait]
pub trait TokenListSource: Send + Sync {
    async fn fetch_tokens(&self) -> Result<Vec<Token>, Error>;
}

/// The token list is served as a JSON document at the client's root url.
#[async_trait]
impl TokenListSource for HttpClient {
    async fn fetch_tokens(&self) -> Result<Vec<Token>, Error> {
        let list: TokenList = self.get_json("", &()).await?;
        Ok(list.tokens.into_iter().map(Token::from).collect())
    }
}

/// A fixed list, for deployments that pin their tokens.
#[async_trait]
impl TokenListSource for Vec<Token> {
    async fn fetch_tokens(&self) -> Result<Vec<Token>, Error> {
        Ok(self.clone())
    }
}
