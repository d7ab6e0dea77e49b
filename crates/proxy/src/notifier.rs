//! Best-effort alert delivery.

use async_trait::async_trait;
use inbox_guard_common::config::NotifyConfig;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Somewhere to send a one-line alert. Sending never fails from the
/// caller's point of view.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn send(&self, text: &str);
}

/// POSTs alerts as plain text to an ntfy-style topic URL.
#[derive(Clone)]
pub struct Notifier {
    client: Client,
    channel_url: Option<String>,
    token: Option<String>,
}

impl Notifier {
    /// Create a notifier. Without a channel URL every send is a no-op.
    pub fn new(config: &NotifyConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            channel_url: config.channel_url.clone().filter(|u| !u.is_empty()),
            token: config.token.clone().filter(|t| !t.is_empty()),
        })
    }

    /// Whether a destination is configured.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.channel_url.is_some()
    }
}

#[async_trait]
impl AlertChannel for Notifier {
    async fn send(&self, text: &str) {
        let Some(url) = &self.channel_url else {
            debug!("Notification channel not configured; skipping alert");
            return;
        };

        let mut request = self
            .client
            .post(url)
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(text.to_string());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                info!(channel = %url, "Sent notification");
            }
            Ok(response) => {
                warn!(channel = %url, status = %response.status(), "Notification rejected");
            }
            Err(e) => {
                warn!(channel = %url, error = %e, "Failed to send notification");
            }
        }
    }
}
