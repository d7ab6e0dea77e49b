//! The proxy handler: pass through, or inspect and maybe block.

use crate::notifier::AlertChannel;
use crate::upstream::{OutboundBody, OutboundRequest, Upstream};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use futures::{FutureExt, StreamExt, stream};
use inbox_guard_filter::{FederationMessage, SpamClassifier, Verdict};
use serde_json::{Value, json};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Prefix of every alert.
pub const ALERT_PREFIX: &str = "Zap! ";

/// State shared by every request.
#[derive(Clone)]
pub struct ProxyState {
    pub classifier: Arc<SpamClassifier>,
    pub upstream: Arc<dyn Upstream>,
    pub alerts: Arc<dyn AlertChannel>,
    /// Largest POST body buffered for inspection. Larger bodies are relayed
    /// to the origin uninspected.
    pub max_body_bytes: usize,
}

impl ProxyState {
    /// Create the proxy state.
    #[must_use]
    pub fn new(
        classifier: SpamClassifier,
        upstream: Arc<dyn Upstream>,
        alerts: Arc<dyn AlertChannel>,
        max_body_bytes: usize,
    ) -> Self {
        Self {
            classifier: Arc::new(classifier),
            upstream,
            alerts,
            max_body_bytes,
        }
    }
}

/// Handle any request to the proxy.
///
/// Only POST bodies are inspected. Everything else, and every POST that is
/// not positively identified as spam, goes to the origin untouched. Non-POST
/// bodies are never read or re-sent.
pub async fn proxy_handler(
    State(state): State<ProxyState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let path_and_query = uri
        .path_and_query()
        .map_or_else(|| uri.path().to_string(), ToString::to_string);

    if method != Method::POST {
        return forward(&state, method, path_and_query, headers, OutboundBody::Empty).await;
    }

    let body = match buffer_body(body, state.max_body_bytes).await {
        OutboundBody::Buffered(body) => body,
        relayed => {
            debug!(
                path = %path_and_query,
                limit = state.max_body_bytes,
                "Body not buffered for inspection; forwarding"
            );
            return forward(&state, method, path_and_query, headers, relayed).await;
        }
    };

    match inspect(&state, &body).await {
        Some(json) => {
            let text = alert_text(&json, &body);
            info!(path = %path_and_query, alert = %text, "Blocked spam");
            state.alerts.send(&text).await;
            rejection()
        }
        None => {
            forward(
                &state,
                method,
                path_and_query,
                headers,
                OutboundBody::Buffered(body),
            )
            .await
        }
    }
}

/// Read the body for inspection, up to `limit` bytes.
///
/// Past the limit, or on a read error, the chunks read so far are put back
/// in front of the unread rest and returned as a streaming body, so nothing
/// the client sent is lost.
async fn buffer_body(body: Body, limit: usize) -> OutboundBody {
    let mut data = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut len = 0;

    while let Some(chunk) = data.next().await {
        match chunk {
            Ok(chunk) => {
                len += chunk.len();
                chunks.push(chunk);
                if len > limit {
                    let head = stream::iter(chunks.into_iter().map(Ok));
                    return OutboundBody::Streaming(Body::from_stream(head.chain(data)));
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to read request body");
                let head = chunks.into_iter().map(Ok).chain(std::iter::once(Err(e)));
                return OutboundBody::Streaming(Body::from_stream(stream::iter(head)));
            }
        }
    }

    match chunks.len() {
        0 => OutboundBody::Buffered(Bytes::new()),
        1 => OutboundBody::Buffered(chunks.swap_remove(0)),
        _ => {
            let joined: Vec<u8> = chunks.concat();
            OutboundBody::Buffered(Bytes::from(joined))
        }
    }
}

/// Returns the parsed body when the message is spam.
async fn inspect(state: &ProxyState, body: &Bytes) -> Option<Value> {
    let json: Value = match serde_json::from_slice(body) {
        Ok(json) => json,
        Err(e) => {
            debug!(error = %e, "Body is not JSON; forwarding");
            return None;
        }
    };

    let verdict = AssertUnwindSafe(state.classifier.classify(&json))
        .catch_unwind()
        .await;

    match verdict {
        Ok(Verdict::Spam(_)) => Some(json),
        Ok(Verdict::Clean(reason)) => {
            debug!(reason = ?reason, "Message is clean");
            None
        }
        Err(_) => {
            error!("Classifier panicked; forwarding");
            None
        }
    }
}

async fn forward(
    state: &ProxyState,
    method: Method,
    path_and_query: String,
    headers: HeaderMap,
    body: OutboundBody,
) -> Response {
    let request = OutboundRequest {
        method,
        path_and_query,
        headers,
        body,
    };

    match state.upstream.forward(request).await {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "Failed to reach origin");
            e.into_response()
        }
    }
}

/// `"Zap! "` plus the post URL, its Atom URI, or failing both the raw body.
#[must_use]
pub fn alert_text(json: &Value, raw_body: &[u8]) -> String {
    let message = FederationMessage::from_json(json);
    let subject = match message.display_url() {
        Some(url) => url.to_string(),
        None => String::from_utf8_lossy(raw_body).into_owned(),
    };
    format!("{ALERT_PREFIX}{subject}")
}

/// The response sent in place of a blocked delivery.
#[must_use]
pub fn rejection() -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({}))).into_response()
}
