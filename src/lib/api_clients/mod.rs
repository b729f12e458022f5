pub mod chain;
mod error;
pub mod history;
mod retry;
pub mod token_list;

use anyhow::{anyhow, Result};
use reqwest::Url;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{str::FromStr, sync::Arc, time::Duration};
use wavesexchange_log::{debug, trace};

pub use error::Error; // reexport Error
pub use retry::RetryPolicy;

#[derive(Clone)]
pub struct HttpClient {
    pub root_url: Url,
    pub client: Arc<reqwest::Client>,
    retry: RetryPolicy,
}

impl HttpClient {
    pub fn new(root_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = Url::from_str(&root_url.into()).map_err(|err| {
            anyhow!(
                "Couldn't parse root_url while initiating HttpClient: {}",
                err
            )
        })?;
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .tcp_keepalive(Duration::from_secs(90))
            .timeout(timeout)
            .build()
            .map_err(|err| anyhow!("Couldn't build http client: {}", err))?;

        Ok(Self {
            root_url: url,
            client: Arc::new(client),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint_url(&self, path: &str) -> String {
        if path.is_empty() {
            return self.root_url.to_string();
        }
        format!("{}/{}", self.root_url.as_str().trim_end_matches('/'), path)
    }

    pub(crate) async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, Error>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        let endpoint_url = &self.endpoint_url(path);
        let client = &self.client;
        trace!("POST {}", endpoint_url);

        self.retry
            .run(endpoint_url, || async move {
                let req_start_time = chrono::Utc::now();
                let resp = client
                    .post(endpoint_url)
                    .json(body)
                    .send()
                    .await
                    .map_err(|err| {
                        Error::HttpRequestError(
                            Arc::new(err),
                            format!("Failed to POST {}", endpoint_url),
                        )
                    })?;
                debug!(
                    "POST {} took {}ms",
                    endpoint_url,
                    (chrono::Utc::now() - req_start_time).num_milliseconds()
                );
                decode_response(endpoint_url, resp).await
            })
            .await
    }

    pub(crate) async fn get_json<Q, T>(&self, path: &str, query: &Q) -> Result<T, Error>
    where
        Q: Serialize + Sync,
        T: DeserializeOwned,
    {
        let endpoint_url = &self.endpoint_url(path);
        let client = &self.client;
        trace!("GET {}", endpoint_url);

        self.retry
            .run(endpoint_url, || async move {
                let req_start_time = chrono::Utc::now();
                let resp = client
                    .get(endpoint_url)
                    .query(query)
                    .send()
                    .await
                    .map_err(|err| {
                        Error::HttpRequestError(
                            Arc::new(err),
                            format!("Failed to GET {}", endpoint_url),
                        )
                    })?;
                debug!(
                    "GET {} took {}ms",
                    endpoint_url,
                    (chrono::Utc::now() - req_start_time).num_milliseconds()
                );
                decode_response(endpoint_url, resp).await
            })
            .await
    }
}

async fn decode_response<T: DeserializeOwned>(
    endpoint_url: &str,
    resp: reqwest::Response,
) -> Result<T, Error> {
    let status = resp.status();
    let body = resp.text().await.map_err(|err| {
        Error::HttpRequestError(
            Arc::new(err),
            format!("Failed to read response body of {}", endpoint_url),
        )
    })?;

    if !status.is_success() {
        return Err(status_error(endpoint_url, status, &body));
    }

    serde_json::from_str(&body).map_err(|err| {
        Error::ResponseParseError(format!(
            "Cannot decode response of {}: {}",
            endpoint_url, err
        ))
    })
}

/// Error body of a rejected node request.
#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    message: String,
    error: RpcErrorInfo,
}

#[derive(Debug, Deserialize)]
struct RpcErrorInfo {
    #[serde(default)]
    what: String,
    #[serde(default)]
    details: Vec<RpcErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorDetail {
    message: String,
}

fn status_error(endpoint_url: &str, status: StatusCode, body: &str) -> Error {
    match serde_json::from_str::<RpcErrorBody>(body) {
        Ok(rpc) => {
            let details = rpc.error.details.iter().map(|d| d.message.as_str()).collect::<Vec<_>>();
            Error::RpcError(
                status,
                format!(
                    "{} rejected the request: {}: {} [{}]",
                    endpoint_url,
                    rpc.message,
                    rpc.error.what,
                    details.join("; ")
                ),
            )
        }
        Err(_) => Error::InvalidStatus(status, format!("{} responded with: {}", endpoint_url, body)),
    }
}
