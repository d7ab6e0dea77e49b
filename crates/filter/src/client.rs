//! `ActivityPub` HTTP client for fetching actor profiles.

#![allow(missing_docs)]

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// `Accept` header sent when fetching actors.
pub const ACTIVITY_JSON: &str = "application/activity+json";

/// Error type for profile fetches.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Fetch failed: {status}")]
    Status { status: u16 },
    #[error("Invalid JSON: {0}")]
    Json(String),
}

/// Fetches an actor profile document.
#[async_trait]
pub trait ProfileFetcher: Send + Sync {
    /// GET the actor URL and return its JSON body.
    async fn fetch_profile(&self, actor_url: &str) -> Result<Value, FetchError>;
}

/// `ActivityPub` client backed by `reqwest`.
#[derive(Clone)]
pub struct ApClient {
    client: Client,
    user_agent: String,
}

impl ApClient {
    /// Create a new client with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        let user_agent = format!("inbox-guard/{}", env!("CARGO_PKG_VERSION"));

        Ok(Self { client, user_agent })
    }
}

#[async_trait]
impl ProfileFetcher for ApClient {
    async fn fetch_profile(&self, actor_url: &str) -> Result<Value, FetchError> {
        debug!(actor_url = %actor_url, "Fetching remote actor");

        let response = self
            .client
            .get(actor_url)
            .header("User-Agent", &self.user_agent)
            .header("Accept", ACTIVITY_JSON)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| FetchError::Json(e.to_string()))
    }
}
