//! Mentions-only content detection.
//!
//! Reserved for future gating of the image heuristic; the classifier does
//! not call it.

use std::sync::LazyLock;

use regex::Regex;

#[allow(clippy::expect_used)]
static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

#[allow(clippy::expect_used)]
static MENTIONS_ONLY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s?(@[a-zA-Z0-9._-]+)+)*$").expect("valid mentions regex")
});

/// Whether the HTML content, once tags are stripped, holds nothing but
/// `@mentions` separated by single whitespace characters.
#[must_use]
pub fn is_mentions_only(content: &str) -> bool {
    let text = TAG.replace_all(content, "");
    MENTIONS_ONLY.is_match(&text)
}
