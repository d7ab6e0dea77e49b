//! Account creation time lookup, cached per actor URL.

use crate::cache::KvStore;
use crate::client::ProfileFetcher;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Namespace of the account-age cache keys.
pub const CACHE_KEY_PREFIX: &str = "WEBFINGER:";

/// Resolves when an actor's account was created.
///
/// A cache hit never touches the network. A miss costs exactly one profile
/// fetch and one cache write, and the outcome (including "unknown") is
/// written back. Unknown is stored as an empty value, which later reads
/// treat as a miss.
#[derive(Clone)]
pub struct AccountAgeResolver {
    store: Arc<dyn KvStore>,
    fetcher: Arc<dyn ProfileFetcher>,
    ttl: Duration,
}

impl AccountAgeResolver {
    /// Create a resolver.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, fetcher: Arc<dyn ProfileFetcher>, ttl: Duration) -> Self {
        Self {
            store,
            fetcher,
            ttl,
        }
    }

    /// Cache key for an actor URL.
    #[must_use]
    pub fn cache_key(actor_url: &str) -> String {
        format!("{CACHE_KEY_PREFIX}{actor_url}")
    }

    /// Resolve the creation time, or `None` when it cannot be determined.
    pub async fn resolve(&self, actor_url: Option<&str>) -> Option<DateTime<Utc>> {
        let actor_url = actor_url?;
        let key = Self::cache_key(actor_url);

        match self.store.get(&key).await {
            Ok(Some(cached)) => {
                if let Some(created_at) = parse_cached(&cached) {
                    debug!(actor = %actor_url, "Account age cache hit");
                    return Some(created_at);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(actor = %actor_url, error = %e, "Failed to read account age cache"),
        }

        let created_at = self.fetch_created_at(actor_url).await;

        let value = created_at
            .map(|dt| dt.timestamp_millis().to_string())
            .unwrap_or_default();
        if let Err(e) = self.store.put(&key, &value, self.ttl).await {
            warn!(key = %key, error = %e, "Failed to store account age");
        }

        created_at
    }

    async fn fetch_created_at(&self, actor_url: &str) -> Option<DateTime<Utc>> {
        let profile = match self.fetcher.fetch_profile(actor_url).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(actor = %actor_url, error = %e, "Failed to fetch actor");
                return None;
            }
        };

        let published = profile.get("published").and_then(|v| v.as_str());
        let created_at = published.and_then(parse_published);
        if created_at.is_none() {
            debug!(actor = %actor_url, published = ?published, "Actor has no usable published date");
        }
        created_at
    }
}

/// Parse a cached millisecond timestamp. Empty, zero and garbage are misses.
fn parse_cached(value: &str) -> Option<DateTime<Utc>> {
    match value.trim().parse::<i64>() {
        Ok(0) | Err(_) => None,
        Ok(millis) => DateTime::from_timestamp_millis(millis),
    }
}

/// Parse an actor's `published` field.
///
/// Accepts RFC 3339, a zone-less date-time (read as UTC) or a bare date.
#[must_use]
pub fn parse_published(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
