//! Inline moderation proxy for federated inboxes.
//!
//! Every request is relayed to the origin unchanged, except POST bodies
//! that the [`SpamClassifier`](inbox_guard_filter::SpamClassifier) flags:
//! those raise an alert and are answered with `400 {}` instead.

pub mod handler;
pub mod notifier;
pub mod upstream;

use axum::Router;

pub use handler::{ProxyState, alert_text, proxy_handler, rejection};
pub use notifier::{AlertChannel, Notifier};
pub use upstream::{HttpUpstream, OutboundBody, OutboundRequest, Upstream};

/// Build the proxy router. Every path and method lands in [`proxy_handler`].
pub fn router(state: ProxyState) -> Router {
    Router::new().fallback(proxy_handler).with_state(state)
}
