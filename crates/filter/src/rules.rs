//! Rule tables for the spam heuristics.
//!
//! The defaults below describe the campaign as observed; every value can be
//! replaced from the `[rules]` configuration section without touching the
//! classifier.

use chrono::{DateTime, TimeZone, Utc};
use inbox_guard_common::Heuristic;
use inbox_guard_common::config::RulesConfig;
use regex::Regex;
use std::collections::HashSet;
use std::time::Duration;

/// Phrase pattern plus the campaign's link targets.
///
/// Dots in the domains are escaped, so `ctkpaarr.org` does not also match
/// `ctkpaarrXorg`.
pub const DEFAULT_CONTENT_SIGNATURE: &str = r"(?m)(荒.*共.*栄.*圏)|(https://mastodon-japan\.net/@ap12)|(https://荒らし\.com/)|(https://ctkpaarr\.org)";

/// Fingerprints of the images attached to campaign posts.
pub const DEFAULT_BAD_IMAGES: &[&str] = &[
    "200x200 UkK2FEk8Oas:t1f9V[ae|;agoJofs;bYowjZ",
    "1009x200 UTQcblVY%gIU8w8_%Mxu%2Rjayt7.8?bMxRj",
];

/// More `cc` entries than this are needed for the content signature to count.
pub const DEFAULT_CC_THRESHOLD: usize = 3;

/// Length of the generated usernames.
pub const DEFAULT_USERNAME_LENGTH: usize = 10;

/// Accounts created after this instant (2024-02-18T00:00:00Z) are suspect.
pub const DEFAULT_ACCOUNT_CUTOFF_MILLIS: i64 = 1_708_214_400_000;

/// How long a resolved account creation time stays cached: 1 week.
pub const DEFAULT_ACCOUNT_AGE_TTL: Duration = Duration::from_secs(60 * 60 * 24 * 7);

/// Heuristic evaluation order used when none is configured.
pub const DEFAULT_HEURISTIC_ORDER: &[Heuristic] = &[
    Heuristic::ContentSignature,
    Heuristic::BadImage,
    Heuristic::NewAccount,
];

/// Error building the rule set from configuration.
#[derive(Debug, thiserror::Error)]
pub enum RuleError {
    #[error("Invalid content signature: {0}")]
    InvalidSignature(#[from] regex::Error),
    #[error("Invalid account cutoff {value:?}: {reason}")]
    InvalidCutoff { value: String, reason: String },
    #[error("Heuristic order is empty")]
    EmptyOrder,
}

/// Compiled, ready-to-use spam rules.
#[derive(Debug, Clone)]
pub struct SpamRules {
    pub content_signature: Regex,
    pub bad_images: HashSet<String>,
    pub cc_threshold: usize,
    pub username_length: usize,
    pub account_cutoff: DateTime<Utc>,
    pub heuristic_order: Vec<Heuristic>,
    pub account_age_ttl: Duration,
}

impl SpamRules {
    /// Build the rule set, falling back to the defaults for anything unset.
    pub fn from_config(config: &RulesConfig) -> Result<Self, RuleError> {
        let content_signature = Regex::new(
            config
                .content_signature
                .as_deref()
                .unwrap_or(DEFAULT_CONTENT_SIGNATURE),
        )?;

        let bad_images = match &config.bad_images {
            Some(list) => list.iter().cloned().collect(),
            None => DEFAULT_BAD_IMAGES.iter().map(|s| (*s).to_string()).collect(),
        };

        let account_cutoff = match &config.account_cutoff {
            Some(value) => DateTime::parse_from_rfc3339(value)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| RuleError::InvalidCutoff {
                    value: value.clone(),
                    reason: e.to_string(),
                })?,
            None => default_cutoff(),
        };

        let heuristic_order = match &config.heuristic_order {
            Some(order) if order.is_empty() => return Err(RuleError::EmptyOrder),
            Some(order) => dedup(order),
            None => DEFAULT_HEURISTIC_ORDER.to_vec(),
        };

        Ok(Self {
            content_signature,
            bad_images,
            cc_threshold: config.cc_threshold.unwrap_or(DEFAULT_CC_THRESHOLD),
            username_length: config.username_length.unwrap_or(DEFAULT_USERNAME_LENGTH),
            account_cutoff,
            heuristic_order,
            account_age_ttl: config
                .account_age_ttl_secs
                .map_or(DEFAULT_ACCOUNT_AGE_TTL, Duration::from_secs),
        })
    }

    /// Whether the content matches the campaign signature.
    #[must_use]
    pub fn matches_signature(&self, content: &str) -> bool {
        self.content_signature.is_match(content)
    }

    /// Whether the fingerprint is deny-listed.
    #[must_use]
    pub fn is_bad_image(&self, fingerprint: &str) -> bool {
        self.bad_images.contains(fingerprint)
    }

    /// Whether an account created at `created_at` is newer than the cutoff.
    #[must_use]
    pub fn is_after_cutoff(&self, created_at: DateTime<Utc>) -> bool {
        created_at > self.account_cutoff
    }
}

impl Default for SpamRules {
    #[allow(clippy::expect_used)] // The built-in pattern is covered by tests
    fn default() -> Self {
        Self::from_config(&RulesConfig::default()).expect("default rules must compile")
    }
}

fn default_cutoff() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(DEFAULT_ACCOUNT_CUTOFF_MILLIS)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn dedup(order: &[Heuristic]) -> Vec<Heuristic> {
    let mut seen = HashSet::new();
    order.iter().copied().filter(|h| seen.insert(*h)).collect()
}
