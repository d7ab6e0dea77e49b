//! Spam classification for incoming federation messages.
//!
//! Cheap local gates run first and can only clear a message. The heuristics
//! that follow are independent signatures of one campaign; any single hit
//! flags the message.

use crate::activity::FederationMessage;
use crate::resolver::AccountAgeResolver;
use crate::rules::SpamRules;
use inbox_guard_common::Heuristic;
use serde_json::Value;
use std::fmt;
use tracing::{debug, info};

/// Why a message was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanReason {
    NotCreate,
    NotPublic,
    NoCc,
    OtherLanguage,
    UsernameLength,
    NoMatch,
}

/// Why a message was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpamReason {
    /// Too many cc entries and content matching the signature.
    ContentSignature,
    /// Sole attachment is a deny-listed webp image.
    BadImage,
    /// Account created after the cutoff.
    NewAccount,
}

impl fmt::Display for SpamReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContentSignature => write!(f, "too many CCs and content matches signature"),
            Self::BadImage => write!(f, "bad image"),
            Self::NewAccount => write!(f, "account is too new"),
        }
    }
}

/// Outcome of classifying a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Clean(CleanReason),
    Spam(SpamReason),
}

impl Verdict {
    /// Whether the message should be blocked.
    #[must_use]
    pub const fn is_spam(&self) -> bool {
        matches!(self, Self::Spam(_))
    }
}

/// Classifies federation messages against a [`SpamRules`] set.
#[derive(Clone)]
pub struct SpamClassifier {
    rules: SpamRules,
    resolver: AccountAgeResolver,
}

impl SpamClassifier {
    /// Create a classifier.
    #[must_use]
    pub const fn new(rules: SpamRules, resolver: AccountAgeResolver) -> Self {
        Self { rules, resolver }
    }

    /// The active rule set.
    #[must_use]
    pub const fn rules(&self) -> &SpamRules {
        &self.rules
    }

    /// Classify a parsed request body.
    pub async fn classify(&self, json: &Value) -> Verdict {
        let message = FederationMessage::from_json(json);

        if let Err(reason) = self.gate(&message) {
            return Verdict::Clean(reason);
        }

        debug!(url = ?message.display_url(), "Checking message");

        for heuristic in &self.rules.heuristic_order {
            if let Some(reason) = self.check(*heuristic, &message).await {
                info!(
                    url = ?message.display_url(),
                    actor = ?message.attributed_to,
                    reason = %reason,
                    "Message flagged as spam"
                );
                return Verdict::Spam(reason);
            }
        }

        debug!(url = ?message.display_url(), "No match");
        Verdict::Clean(CleanReason::NoMatch)
    }

    /// The local gates. `Err` carries the reason the message was cleared.
    fn gate(&self, message: &FederationMessage<'_>) -> Result<(), CleanReason> {
        if !message.is_create() {
            return Err(CleanReason::NotCreate);
        }
        if !message.is_public() {
            return Err(CleanReason::NotPublic);
        }
        if message.cc_count == 0 {
            return Err(CleanReason::NoCc);
        }
        if !message.is_japanese_or_unlocalized() {
            return Err(CleanReason::OtherLanguage);
        }

        let username_len = message.username().map(|name| name.chars().count());
        if username_len != Some(self.rules.username_length) {
            debug!(actor = ?message.attributed_to, "Username length does not match");
            return Err(CleanReason::UsernameLength);
        }

        Ok(())
    }

    async fn check(&self, heuristic: Heuristic, message: &FederationMessage<'_>) -> Option<SpamReason> {
        let hit = match heuristic {
            Heuristic::ContentSignature => {
                message.cc_count > self.rules.cc_threshold
                    && self.rules.matches_signature(message.content)
            }
            Heuristic::BadImage => message
                .single_webp_fingerprint()
                .is_some_and(|fp| self.rules.is_bad_image(&fp)),
            Heuristic::NewAccount => self
                .resolver
                .resolve(message.attributed_to)
                .await
                .is_some_and(|created_at| self.rules.is_after_cutoff(created_at)),
        };

        hit.then_some(match heuristic {
            Heuristic::ContentSignature => SpamReason::ContentSignature,
            Heuristic::BadImage => SpamReason::BadImage,
            Heuristic::NewAccount => SpamReason::NewAccount,
        })
    }
}
