//! HTTP error types.
//!
//! Every variant renders as the exact message a program sees, either as the
//! second return value of a rejected call or inside an `http_failure` /
//! `websocket_failure` / `http_check` event.

use tinker_kernel::CapabilityError;

/// Unified error type for the `http` capability.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpError {
    // -- Validation errors --------------------------------------------------
    /// The URL could not be parsed or lacks a host.
    #[error("{0}")]
    InvalidUrl(&'static str),

    /// The URL uses a scheme this operation does not support.
    #[error("Invalid protocol '{scheme}'")]
    UnsupportedProtocol { scheme: String },

    /// An address rule denies the host or one of its resolved addresses.
    #[error("Domain not permitted")]
    DomainNotPermitted,

    /// `CONNECT` or a method name that is not an HTTP method.
    #[error("Unsupported HTTP method")]
    UnsupportedMethod,

    /// A header name or value is not valid HTTP.
    #[error("{reason}")]
    InvalidHeader { reason: String },

    /// The request body exceeds the upload limit for its host.
    #[error("Request body is too large")]
    BodyTooLarge,

    // -- Transport errors ---------------------------------------------------
    /// The response body exceeded the download limit for its host.
    #[error("Response is too large")]
    ResponseTooLarge,

    /// The operation did not complete within its host's timeout.
    #[error("Timed out")]
    Timeout,

    /// Connecting, sending or receiving failed.
    #[error("{0}")]
    Transport(String),

    /// The websocket handshake or connection failed.
    #[error("{0}")]
    Websocket(String),

    /// An outgoing websocket message exceeds the size limit for its host.
    #[error("Message is too large")]
    MessageTooLarge,
}

/// Convenience alias used throughout the http crate.
pub type Result<T> = std::result::Result<T, HttpError>;

impl From<HttpError> for CapabilityError {
    fn from(err: HttpError) -> Self {
        CapabilityError::new(err.to_string())
    }
}

impl From<reqwest::Error> for HttpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Transport("Could not connect".into())
        } else if err.is_redirect() {
            Self::Transport("Too many redirects".into())
        } else {
            tracing::debug!(error = %err, "http transport error");
            Self::Transport("Could not connect".into())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for HttpError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::Capacity(_) => Self::MessageTooLarge,
            WsError::ConnectionClosed | WsError::AlreadyClosed => {
                Self::Websocket("Websocket is closed".into())
            }
            WsError::Http(response) => Self::Websocket(format!(
                "Handshake failed with status {}",
                response.status().as_u16()
            )),
            other => {
                tracing::debug!(error = %other, "websocket transport error");
                Self::Websocket("Could not connect".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_script_facing() {
        assert_eq!(
            HttpError::UnsupportedProtocol { scheme: "ftp".into() }.to_string(),
            "Invalid protocol 'ftp'"
        );
        assert_eq!(HttpError::DomainNotPermitted.to_string(), "Domain not permitted");
        assert_eq!(HttpError::InvalidUrl("URL malformed").to_string(), "URL malformed");
        assert_eq!(HttpError::Timeout.to_string(), "Timed out");
    }

    #[test]
    fn converts_to_capability_error() {
        let err: CapabilityError = HttpError::BodyTooLarge.into();
        assert_eq!(err.message(), "Request body is too large");
    }
}
