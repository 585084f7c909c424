//! Transport abstraction.
//!
//! The `http` API never talks to the network directly.  It hands validated
//! requests to an [`HttpTransport`], which performs the exchange and applies
//! the [`AddressRules`] to every address it actually connects to.  The
//! production implementation is [`NetTransport`](crate::net::NetTransport);
//! tests substitute their own.

use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::HeaderMap;
use url::Url;

use crate::address::AddressRules;
use crate::error::Result;

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// A request that has passed validation.
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// Follow `3xx` responses instead of returning them.
    pub follow_redirects: bool,
}

/// A complete response, body included.
#[derive(Debug, Clone)]
pub struct IncomingResponse {
    pub status: u16,
    /// The status line's reason phrase (e.g. `"Not Found"`).
    pub reason: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl IncomingResponse {
    /// A response with the canonical reason phrase for `status`.
    pub fn new(status: u16, headers: HeaderMap, body: Vec<u8>) -> Self {
        let reason = reqwest::StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or_default()
            .to_owned();
        Self {
            status,
            reason,
            headers,
            body,
        }
    }
}

/// One websocket message, in either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebsocketFrame {
    Text(String),
    Binary(Vec<u8>),
    Close {
        code: Option<u16>,
        reason: Option<String>,
    },
}

impl WebsocketFrame {
    /// Payload size in bytes; zero for close frames.
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(data) => data.len(),
            Self::Close { .. } => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Performs network operations on behalf of the `http` API.
///
/// Implementations must check every address they connect to against
/// `rules` and return [`HttpError::DomainNotPermitted`] for denied ones.
/// Timeouts are applied by the caller.
///
/// [`HttpError::DomainNotPermitted`]: crate::HttpError::DomainNotPermitted
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Perform `request` and read the whole response.
    async fn send(&self, request: OutgoingRequest, rules: &AddressRules) -> Result<IncomingResponse>;

    /// Resolve the URL's host and check it against `rules` without
    /// connecting.
    async fn check(&self, url: &Url, rules: &AddressRules) -> Result<()> {
        let host = crate::uri::host_of(url);
        let port = url.port_or_known_default().unwrap_or(80);
        rules.resolve(&host, port).await.map(|_| ())
    }

    /// Open a websocket connection.
    async fn connect_websocket(
        &self,
        url: &Url,
        headers: &HeaderMap,
        rules: &AddressRules,
    ) -> Result<Box<dyn WebsocketConnection>>;
}

/// An open websocket.
#[async_trait]
pub trait WebsocketConnection: Send {
    async fn send(&mut self, frame: WebsocketFrame) -> Result<()>;

    /// The next data or close frame; `None` once the connection is gone.
    async fn receive(&mut self) -> Option<Result<WebsocketFrame>>;
}

// ---------------------------------------------------------------------------
// Test transport
// ---------------------------------------------------------------------------
