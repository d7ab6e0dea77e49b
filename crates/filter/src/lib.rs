//! Spam classification for federated inbox traffic.
//!
//! This crate holds the decision logic of inbox-guard:
//!
//! - **Message view**: lenient access to `Create` activity fields
//! - **Rules**: the campaign signature, image deny-list, cutoff and tunables
//! - **Classifier**: ordered local gates followed by independent heuristics
//! - **Resolver**: account creation time, cached per actor
//! - **Cache**: Redis and in-memory key-value stores
//! - **Client**: actor profile fetching
//!
//! # Example
//!
//! ```no_run
//! use inbox_guard_filter::{AccountAgeResolver, ApClient, MemoryKvStore, SpamClassifier, SpamRules};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example(body: serde_json::Value) -> Result<(), Box<dyn std::error::Error>> {
//! let rules = SpamRules::default();
//! let resolver = AccountAgeResolver::new(
//!     Arc::new(MemoryKvStore::new()),
//!     Arc::new(ApClient::new(Duration::from_secs(10))?),
//!     rules.account_age_ttl,
//! );
//! let classifier = SpamClassifier::new(rules, resolver);
//! if classifier.classify(&body).await.is_spam() {
//!     println!("blocked");
//! }
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod cache;
pub mod classifier;
pub mod client;
pub mod mentions;
pub mod resolver;
pub mod rules;

pub use activity::{Attachment, FederationMessage, PUBLIC_SCOPE};
pub use cache::{CacheError, KvStore, MemoryKvStore, RedisKvStore};
pub use classifier::{CleanReason, SpamClassifier, SpamReason, Verdict};
pub use client::{ApClient, FetchError, ProfileFetcher};
pub use mentions::is_mentions_only;
pub use resolver::{AccountAgeResolver, parse_published};
pub use rules::{RuleError, SpamRules};
