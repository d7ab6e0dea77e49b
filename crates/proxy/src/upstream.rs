//! Forwarding requests to the origin server.

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    http::{HeaderMap, HeaderName, Method, header},
    response::Response,
};
use inbox_guard_common::{AppError, AppResult};
use reqwest::{Client, redirect};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Headers that describe a single connection and must not be relayed.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "te",
    "trailer",
    "upgrade",
];

/// Body of a request to replay against the origin.
#[derive(Debug)]
pub enum OutboundBody {
    /// Nothing is sent.
    Empty,
    /// The exact bytes that were buffered for inspection.
    Buffered(Bytes),
    /// A body too large to inspect, relayed as it arrives.
    Streaming(Body),
}

impl OutboundBody {
    /// The buffered bytes, if the body was read in full.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Buffered(bytes) => Some(bytes),
            Self::Empty | Self::Streaming(_) => None,
        }
    }
}

/// A request to replay against the origin.
#[derive(Debug)]
pub struct OutboundRequest {
    pub method: Method,
    /// Path and query of the original request, e.g. `/inbox?x=1`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: OutboundBody,
}

/// The origin the proxy sits in front of.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Send the request and return the origin's response unmodified.
    async fn forward(&self, request: OutboundRequest) -> AppResult<Response>;
}

/// Forwards over HTTP with `reqwest`, streaming the response back.
#[derive(Clone)]
pub struct HttpUpstream {
    client: Client,
    origin: String,
}

impl HttpUpstream {
    /// Create a forwarder for `origin` (scheme and authority, e.g. `https://mastodon.example`).
    pub fn new(origin: &str, timeout: Duration) -> AppResult<Self> {
        let parsed = Url::parse(origin)
            .map_err(|e| AppError::Config(format!("Invalid upstream origin {origin:?}: {e}")))?;
        if parsed.cannot_be_a_base() {
            return Err(AppError::Config(format!(
                "Upstream origin {origin:?} is not a base URL"
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .redirect(redirect::Policy::none())
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            origin: origin.trim_end_matches('/').to_string(),
        })
    }

    /// Full target URL for a path and query.
    #[must_use]
    pub fn target(&self, path_and_query: &str) -> String {
        format!("{}{path_and_query}", self.origin)
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn forward(&self, request: OutboundRequest) -> AppResult<Response> {
        let target = self.target(&request.path_and_query);
        debug!(method = %request.method, target = %target, "Forwarding request");

        let mut headers = request.headers;
        strip_hop_by_hop(&mut headers);
        headers.remove(header::CONTENT_LENGTH);

        let builder = self
            .client
            .request(request.method, &target)
            .headers(headers);
        let builder = match request.body {
            OutboundBody::Empty => builder,
            OutboundBody::Buffered(bytes) => builder.body(bytes),
            OutboundBody::Streaming(body) => {
                builder.body(reqwest::Body::wrap_stream(body.into_data_stream()))
            }
        };

        let upstream = builder
            .send()
            .await
            .map_err(|e| AppError::Upstream(format!("{target}: {e}")))?;

        let status = upstream.status();
        let mut response_headers = upstream.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = response_headers;
        Ok(response)
    }
}

/// Drop hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::try_from(name.trim()).ok())
        .collect();

    for name in &named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}
