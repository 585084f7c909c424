//! URL validation for requests and websockets.

use url::Url;

use crate::error::{HttpError, Result};

/// Parse `address` as an `http`/`https` URL.
pub fn check_uri(address: &str) -> Result<Url> {
    let url = match Url::parse(address) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            return Err(HttpError::InvalidUrl("Must specify http or https"));
        }
        Err(_) => return Err(HttpError::InvalidUrl("URL malformed")),
    };
    require_host(&url)?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(HttpError::UnsupportedProtocol {
            scheme: scheme.to_owned(),
        }),
    }
}

/// Parse `address` as a `ws`/`wss` URL.
///
/// `http` and `https` URLs are upgraded to `ws` and `wss`; an address
/// without a scheme is treated as `ws://`.
pub fn check_websocket_uri(address: &str) -> Result<Url> {
    let mut url = match Url::parse(address) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("ws://{address}"))
            .map_err(|_| HttpError::InvalidUrl("URL malformed"))?,
        Err(_) => return Err(HttpError::InvalidUrl("URL malformed")),
    };
    require_host(&url)?;

    let upgraded = match url.scheme() {
        "ws" | "wss" => return Ok(url),
        "http" => "ws",
        "https" => "wss",
        scheme => {
            return Err(HttpError::UnsupportedProtocol {
                scheme: scheme.to_owned(),
            });
        }
    };
    url.set_scheme(upgraded)
        .map_err(|()| HttpError::InvalidUrl("URL malformed"))?;
    Ok(url)
}

fn require_host(url: &Url) -> Result<()> {
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(()),
        _ => Err(HttpError::InvalidUrl("URL malformed")),
    }
}

/// The host of a validated URL, without IPv6 brackets.
pub(crate) fn host_of(url: &Url) -> String {
    match url.host() {
        Some(url::Host::Ipv6(addr)) => addr.to_string(),
        Some(host) => host.to_string().to_ascii_lowercase(),
        None => String::new(),
    }
}
