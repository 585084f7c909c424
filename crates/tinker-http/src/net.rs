//! The production transport: `reqwest` for requests, `tokio-tungstenite` for
//! websockets.
//!
//! Redirects are followed here rather than by `reqwest`, so that every hop
//! is resolved and checked against the address rules before connecting.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::header::{self, HeaderMap};
use reqwest::{Method, StatusCode};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Message, http};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use url::Url;

use crate::address::{AddressOptions, AddressRules};
use crate::error::{HttpError, Result};
use crate::transport::{
    HttpTransport, IncomingResponse, OutgoingRequest, WebsocketConnection, WebsocketFrame,
};
use crate::uri::host_of;

/// Redirects followed before a request fails.
const MAX_REDIRECTS: usize = 16;

/// Network-backed [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct NetTransport {
    client: reqwest::Client,
}

impl NetTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|err| HttpError::Transport(format!("Could not create HTTP client: {err}")))?;
        Ok(Self { client })
    }

    async fn check_target(url: &Url, rules: &AddressRules) -> Result<AddressOptions> {
        let host = host_of(url);
        let port = url.port_or_known_default().unwrap_or(80);
        let (addr, options) = rules.resolve(&host, port).await?;
        debug!(host = %host, %addr, "address permitted");
        Ok(options)
    }
}

#[async_trait]
impl HttpTransport for NetTransport {
    async fn send(&self, request: OutgoingRequest, rules: &AddressRules) -> Result<IncomingResponse> {
        let OutgoingRequest {
            mut method,
            mut url,
            headers,
            mut body,
            follow_redirects,
        } = request;

        for _ in 0..=MAX_REDIRECTS {
            let options = Self::check_target(&url, rules).await?;

            let mut builder = self
                .client
                .request(method.clone(), url.clone())
                .headers(headers.clone());
            if !body.is_empty() {
                builder = builder.body(body.clone());
            }
            let mut response = builder.send().await?;
            let status = response.status();

            if follow_redirects && status.is_redirection() {
                if let Some(next) = redirect_target(&url, response.headers())? {
                    debug!(from = %url, to = %next, status = status.as_u16(), "following redirect");
                    if status == StatusCode::SEE_OTHER
                        || (method == Method::POST
                            && matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND))
                    {
                        method = Method::GET;
                        body.clear();
                    }
                    url = next;
                    continue;
                }
            }

            let response_headers = response.headers().clone();
            let limit = usize::try_from(options.max_download).unwrap_or(usize::MAX);
            if response
                .content_length()
                .is_some_and(|len| len > options.max_download)
            {
                return Err(HttpError::ResponseTooLarge);
            }
            let mut data = Vec::new();
            while let Some(chunk) = response.chunk().await? {
                if data.len() + chunk.len() > limit {
                    return Err(HttpError::ResponseTooLarge);
                }
                data.extend_from_slice(&chunk);
            }

            return Ok(IncomingResponse {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_owned(),
                headers: response_headers,
                body: data,
            });
        }
        Err(HttpError::Transport("Too many redirects".into()))
    }

    async fn connect_websocket(
        &self,
        url: &Url,
        headers: &HeaderMap,
        rules: &AddressRules,
    ) -> Result<Box<dyn WebsocketConnection>> {
        Self::check_target(url, rules).await?;

        let mut request = url.as_str().into_client_request()?;
        for (name, value) in headers {
            let name = http::HeaderName::from_bytes(name.as_str().as_bytes());
            let value = http::HeaderValue::from_bytes(value.as_bytes());
            if let (Ok(name), Ok(value)) = (name, value) {
                request.headers_mut().append(name, value);
            }
        }

        let (stream, _response) = connect_async(request).await?;
        debug!(url = %url, "websocket connected");
        Ok(Box::new(TungsteniteConnection { stream }))
    }
}

/// Where a `3xx` response points, if anywhere.
fn redirect_target(current: &Url, headers: &HeaderMap) -> Result<Option<Url>> {
    let Some(location) = headers.get(header::LOCATION) else {
        return Ok(None);
    };
    let location = location
        .to_str()
        .map_err(|_| HttpError::Transport("Invalid redirect".into()))?;
    let next = current
        .join(location)
        .map_err(|_| HttpError::Transport("Invalid redirect".into()))?;
    match next.scheme() {
        "http" | "https" => Ok(Some(next)),
        scheme => Err(HttpError::UnsupportedProtocol {
            scheme: scheme.to_owned(),
        }),
    }
}

struct TungsteniteConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl WebsocketConnection for TungsteniteConnection {
    async fn send(&mut self, frame: WebsocketFrame) -> Result<()> {
        let message = match frame {
            WebsocketFrame::Text(text) => Message::Text(text.into()),
            WebsocketFrame::Binary(data) => Message::Binary(data.into()),
            WebsocketFrame::Close { code, reason } => Message::Close(code.map(|code| CloseFrame {
                code: CloseCode::from(code),
                reason: reason.unwrap_or_default().into(),
            })),
        };
        self.stream.send(message).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Option<Result<WebsocketFrame>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(err) => return Some(Err(err.into())),
            };
            let frame = match message {
                Message::Text(text) => WebsocketFrame::Text(text.as_str().to_owned()),
                Message::Binary(data) => WebsocketFrame::Binary(data.to_vec()),
                Message::Close(frame) => WebsocketFrame::Close {
                    code: frame.as_ref().map(|f| u16::from(f.code)),
                    reason: frame
                        .map(|f| f.reason.as_str().to_owned())
                        .filter(|r| !r.is_empty()),
                },
                // Pings are answered by tungstenite itself.
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };
            return Some(Ok(frame));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_resolves_relative_locations() {
        let current = Url::parse("http://example.test/a/b").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::LOCATION, "../c".parse().unwrap());
        let next = redirect_target(&current, &headers).unwrap().unwrap();
        assert_eq!(next.as_str(), "http://example.test/c");
    }

    #[test]
    fn redirect_to_other_scheme_is_rejected() {
        let current = Url::parse("http://example.test/").unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(header::LOCATION, "ftp://example.test/".parse().unwrap());
        assert!(matches!(
            redirect_target(&current, &headers),
            Err(HttpError::UnsupportedProtocol { .. })
        ));
        assert!(redirect_target(&current, &HeaderMap::new()).unwrap().is_none());
    }

    #[tokio::test]
    async fn private_targets_are_refused_before_connecting() {
        let transport = NetTransport::new().unwrap();
        let request = OutgoingRequest {
            method: Method::GET,
            url: Url::parse("http://127.0.0.1:9/").unwrap(),
            headers: HeaderMap::new(),
            body: Vec::new(),
            follow_redirects: true,
        };
        let err = transport
            .send(request, &AddressRules::default())
            .await
            .unwrap_err();
        assert_eq!(err, HttpError::DomainNotPermitted);
    }
}
