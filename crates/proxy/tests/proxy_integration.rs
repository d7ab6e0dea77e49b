//! Proxy integration tests.
//!
//! These drive the full router against in-process fakes of the origin,
//! the alert channel and remote actor lookups.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, Bytes},
    http::{HeaderMap, Method, Request, StatusCode},
    response::Response,
};
use inbox_guard_common::{AppError, AppResult};
use inbox_guard_filter::{
    AccountAgeResolver, FetchError, MemoryKvStore, PUBLIC_SCOPE, ProfileFetcher, SpamClassifier,
    SpamRules,
};
use inbox_guard_proxy::{AlertChannel, OutboundBody, OutboundRequest, ProxyState, Upstream, router};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

const MAX_BODY: usize = 64 * 1024;

/// What the origin received.
#[derive(Debug, Clone)]
struct Received {
    method: Method,
    path_and_query: String,
    headers: HeaderMap,
    /// `None` when no body was sent.
    body: Option<Bytes>,
    streamed: bool,
}

/// Origin stand-in that records what it was sent.
#[derive(Default)]
struct RecordingUpstream {
    requests: Mutex<Vec<Received>>,
    down: bool,
}

impl RecordingUpstream {
    fn requests(&self) -> Vec<Received> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Upstream for RecordingUpstream {
    async fn forward(&self, request: OutboundRequest) -> AppResult<Response> {
        let (body, streamed) = match request.body {
            OutboundBody::Empty => (None, false),
            OutboundBody::Buffered(bytes) => (Some(bytes), false),
            OutboundBody::Streaming(body) => (
                Some(axum::body::to_bytes(body, usize::MAX).await.unwrap()),
                true,
            ),
        };
        self.requests.lock().unwrap().push(Received {
            method: request.method,
            path_and_query: request.path_and_query,
            headers: request.headers,
            body,
            streamed,
        });
        if self.down {
            return Err(AppError::Upstream("connection refused".to_string()));
        }
        Ok(Response::builder()
            .status(StatusCode::ACCEPTED)
            .header("x-origin", "mastodon")
            .body(Body::from("accepted by origin"))
            .unwrap())
    }
}

#[derive(Default)]
struct RecordingAlerts {
    sent: Mutex<Vec<String>>,
}

impl RecordingAlerts {
    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertChannel for RecordingAlerts {
    async fn send(&self, text: &str) {
        self.sent.lock().unwrap().push(text.to_string());
    }
}

/// Every actor is an old account.
struct OldAccounts;

#[async_trait]
impl ProfileFetcher for OldAccounts {
    async fn fetch_profile(&self, _actor_url: &str) -> Result<Value, FetchError> {
        Ok(json!({ "type": "Person", "published": "2019-04-01T00:00:00Z" }))
    }
}

/// A lookup that blows up mid-classification.
struct PanickingFetcher;

#[async_trait]
impl ProfileFetcher for PanickingFetcher {
    async fn fetch_profile(&self, actor_url: &str) -> Result<Value, FetchError> {
        panic!("profile lookup for {actor_url} exploded");
    }
}

struct Harness {
    app: Router,
    upstream: Arc<RecordingUpstream>,
    alerts: Arc<RecordingAlerts>,
}

fn harness_with(upstream: RecordingUpstream, fetcher: Arc<dyn ProfileFetcher>) -> Harness {
    let upstream = Arc::new(upstream);
    let alerts = Arc::new(RecordingAlerts::default());
    let resolver = AccountAgeResolver::new(
        Arc::new(MemoryKvStore::new()),
        fetcher,
        Duration::from_secs(60),
    );
    let classifier = SpamClassifier::new(SpamRules::default(), resolver);
    let state = ProxyState::new(classifier, upstream.clone(), alerts.clone(), MAX_BODY);

    Harness {
        app: router(state),
        upstream,
        alerts,
    }
}

fn harness() -> Harness {
    harness_with(RecordingUpstream::default(), Arc::new(OldAccounts))
}

fn spam_activity() -> Value {
    json!({
        "@context": "https://www.w3.org/ns/activitystreams",
        "id": "https://spam.example/users/abcdefghij/statuses/1/activity",
        "type": "Create",
        "actor": "https://spam.example/users/abcdefghij",
        "cc": [
            "https://a.example/users/one",
            "https://b.example/users/two",
            "https://c.example/users/three",
            "https://d.example/users/four"
        ],
        "object": {
            "id": "https://spam.example/users/abcdefghij/statuses/1",
            "type": "Note",
            "to": [PUBLIC_SCOPE],
            "content": "<p>荒らし共栄圏 https://ctkpaarr.org</p>",
            "contentMap": { "ja": "<p>荒らし共栄圏 https://ctkpaarr.org</p>" },
            "attributedTo": "https://spam.example/users/abcdefghij",
            "url": "https://spam.example/@abcdefghij/1"
        }
    })
}

fn clean_activity() -> Value {
    json!({
        "type": "Create",
        "actor": "https://friendly.example/users/alice",
        "cc": ["https://friendly.example/users/alice/followers"],
        "object": {
            "type": "Note",
            "to": [PUBLIC_SCOPE],
            "content": "<p>おはよう</p>",
            "contentMap": { "ja": "<p>おはよう</p>" },
            "attributedTo": "https://friendly.example/users/alice"
        }
    })
}

fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("host", "mastodon.example")
        .header("content-type", "application/activity+json")
        .header("signature", "keyId=\"https://spam.example/users/abcdefghij#main-key\"")
        .body(body.into())
        .unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn test_get_passes_through() {
    let h = harness();

    let response = h
        .app
        .oneshot(
            Request::builder()
                .method(Method::GET)
                .uri("/users/alice/outbox?page=true")
                .header("host", "mastodon.example")
                .header("accept", "application/activity+json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(response.headers()["x-origin"], "mastodon");
    assert_eq!(body_bytes(response).await, b"accepted by origin");

    let requests = h.upstream.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::GET);
    assert_eq!(requests[0].path_and_query, "/users/alice/outbox?page=true");
    assert_eq!(requests[0].headers["host"], "mastodon.example");
    assert_eq!(requests[0].headers["accept"], "application/activity+json");
    assert!(requests[0].body.is_none());
    assert!(h.alerts.sent().is_empty());
}

#[tokio::test]
async fn test_delete_passes_through_without_inspection() {
    let h = harness();
    let spam = serde_json::to_vec(&spam_activity()).unwrap();

    let response = h
        .app
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri("/inbox")
                .body(Body::from(spam))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let requests = h.upstream.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].body.is_none());
    assert!(h.alerts.sent().is_empty());
}

#[tokio::test]
async fn test_spam_is_blocked_and_alerted() {
    let h = harness();
    let body = serde_json::to_vec(&spam_activity()).unwrap();

    let response = h.app.oneshot(post("/inbox", body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_bytes(response).await, b"{}");
    assert!(h.upstream.requests().is_empty());
    assert_eq!(
        h.alerts.sent(),
        vec!["Zap! https://spam.example/@abcdefghij/1".to_string()]
    );
}

#[tokio::test]
async fn test_bad_image_is_blocked() {
    let h = harness();
    let mut activity = spam_activity();
    activity["cc"] = json!(["https://a.example/users/one"]);
    activity["object"]["content"] = json!("<p>@one</p>");
    activity["object"]["contentMap"] = json!({});
    activity["object"]["attachment"] = json!([{
        "type": "Document",
        "mediaType": "image/webp",
        "url": "https://spam.example/media/1.webp",
        "width": 200,
        "height": 200,
        "blurhash": "UkK2FEk8Oas:t1f9V[ae|;agoJofs;bYowjZ"
    }]);

    let response = h
        .app
        .oneshot(post("/inbox", serde_json::to_vec(&activity).unwrap()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(h.upstream.requests().is_empty());
    assert_eq!(h.alerts.sent().len(), 1);
}

#[tokio::test]
async fn test_clean_post_forwards_raw_body() {
    let h = harness();
    // Odd formatting must survive: the origin verifies the Digest header.
    let raw = format!("{}\n\n", serde_json::to_string_pretty(&clean_activity()).unwrap());

    let response = h
        .app
        .oneshot(post("/users/bob/inbox", raw.clone()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_bytes(response).await, b"accepted by origin");

    let requests = h.upstream.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::POST);
    assert_eq!(requests[0].path_and_query, "/users/bob/inbox");
    assert_eq!(requests[0].body.as_deref(), Some(raw.as_bytes()));
    assert_eq!(
        requests[0].headers["signature"],
        "keyId=\"https://spam.example/users/abcdefghij#main-key\""
    );
    assert!(h.alerts.sent().is_empty());
}

#[tokio::test]
async fn test_invalid_json_is_forwarded_unchanged() {
    let h = harness();
    let raw = "{\"type\": \"Create\", oops";

    let response = h.app.oneshot(post("/inbox", raw)).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let requests = h.upstream.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body.as_deref(), Some(raw.as_bytes()));
    assert!(h.alerts.sent().is_empty());
}

#[tokio::test]
async fn test_non_utf8_body_is_forwarded_unchanged() {
    let h = harness();
    let raw: &[u8] = &[0xff, 0xfe, 0x00, 0x7b];

    let response = h.app.oneshot(post("/inbox", raw.to_vec())).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(h.upstream.requests()[0].body.as_deref(), Some(raw));
}

#[tokio::test]
async fn test_non_create_spam_lookalike_is_forwarded() {
    let h = harness();
    let mut activity = spam_activity();
    activity["type"] = json!("Update");

    let response = h
        .app
        .oneshot(post("/inbox", serde_json::to_vec(&activity).unwrap()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(h.upstream.requests().len(), 1);
    assert!(h.alerts.sent().is_empty());
}

#[tokio::test]
async fn test_username_length_mismatch_is_forwarded() {
    let h = harness();
    let mut activity = spam_activity();
    activity["object"]["attributedTo"] = json!("https://spam.example/users/abcdefghijk");

    let response = h
        .app
        .oneshot(post("/inbox", serde_json::to_vec(&activity).unwrap()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(h.upstream.requests().len(), 1);
}

#[tokio::test]
async fn test_unreachable_origin_is_bad_gateway() {
    let h = harness_with(
        RecordingUpstream {
            down: true,
            ..RecordingUpstream::default()
        },
        Arc::new(OldAccounts),
    );

    let response = h
        .app
        .oneshot(post("/inbox", serde_json::to_vec(&clean_activity()).unwrap()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(h.upstream.requests().len(), 1);
}

#[tokio::test]
async fn test_oversize_post_is_forwarded_uninspected() {
    let h = harness();
    // Spam, padded past the inspection limit.
    let mut raw = serde_json::to_vec(&spam_activity()).unwrap();
    raw.resize(MAX_BODY + 1, b' ');

    let response = h.app.oneshot(post("/inbox", raw.clone())).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let requests = h.upstream.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].streamed);
    assert_eq!(requests[0].body.as_deref(), Some(raw.as_slice()));
    assert!(h.alerts.sent().is_empty());
}

#[tokio::test]
async fn test_oversize_put_passes_through() {
    let h = harness();

    let response = h
        .app
        .oneshot(
            Request::builder()
                .method(Method::PUT)
                .uri("/media/1")
                .body(Body::from(vec![b'x'; MAX_BODY + 1]))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let requests = h.upstream.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::PUT);
    assert!(requests[0].body.is_none());
}

#[tokio::test]
async fn test_classifier_panic_forwards_request() {
    let h = harness_with(RecordingUpstream::default(), Arc::new(PanickingFetcher));
    // Passes every gate but no local heuristic, so the account age is looked up.
    let mut activity = spam_activity();
    activity["object"]["content"] = json!("<p>こんにちは</p>");
    activity["object"]["contentMap"] = json!({ "ja": "<p>こんにちは</p>" });
    let raw = serde_json::to_vec(&activity).unwrap();

    let response = h.app.oneshot(post("/inbox", raw.clone())).await.unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let requests = h.upstream.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body.as_deref(), Some(raw.as_slice()));
    assert!(h.alerts.sent().is_empty());
}
