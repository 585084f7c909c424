//! The `http` capability for Tinker computers.
//!
//! - **[`api`]** -- [`HttpApi`], installed as the global `http`: `request`,
//!   `checkURL` and `websocket`, each bounded by its own limiter.
//! - **[`transport`]** -- The [`HttpTransport`] trait the API performs I/O
//!   through, and [`net`] -- its `reqwest` / `tokio-tungstenite`
//!   implementation.
//! - **[`address`]** -- Address rules: which hosts may be contacted, with
//!   what size and time limits.
//! - **[`request`]** / **[`websocket`]** -- Response and websocket handles
//!   handed to programs.
//! - **[`error`]** -- [`HttpError`], whose messages are what programs see.

pub mod address;
pub mod api;
mod check_url;
pub mod error;
pub mod headers;
pub mod net;
pub mod request;
pub mod transport;
pub mod uri;
pub mod websocket;

pub use address::{AddressOptions, AddressRules};
pub use api::HttpApi;
pub use check_url::CHECK_EVENT;
pub use error::{HttpError, Result};
pub use net::NetTransport;
pub use request::ResponseHandle;
pub use transport::{
    HttpTransport, IncomingResponse, OutgoingRequest, WebsocketConnection, WebsocketFrame,
};
pub use websocket::WebsocketHandle;
