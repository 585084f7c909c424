//! The `http` API.
//!
//! Calls return immediately: `(true)` once the work has been accepted, or
//! `(false, message)` when it was rejected by validation or by a limiter.
//! Results arrive later as events.  Three limiters bound the work one
//! computer may have in flight:
//!
//! | limiter     | kind           | limit                         | waiting                    |
//! |-------------|----------------|-------------------------------|----------------------------|
//! | check-url   | group          | [`ResourceGroup::DEFAULT_LIMIT`] | --                      |
//! | requests    | queue          | `http.max_requests`           | `http.max_queued_requests` |
//! | websockets  | group          | `http.max_websockets`         | --                         |

use std::sync::Arc;

use reqwest::Method;
use tinker_kernel::api::no_such_method;
use tinker_kernel::value::{opt_bool_field, opt_table_field};
use tinker_kernel::{
    ApiEnvironment, Arguments, CapabilityApi, CapabilityError, MethodResult, Resource,
    ResourceGroup, ResourceQueue, ScriptObject, Table, TaskContext, Value,
};
use tracing::{debug, info};

use crate::address::AddressRules;
use crate::check_url::CheckUrl;
use crate::error::HttpError;
use crate::headers;
use crate::request::HttpRequest;
use crate::transport::{HttpTransport, OutgoingRequest};
use crate::uri::{check_uri, check_websocket_uri, host_of};
use crate::websocket::Websocket;

pub const TOO_MANY_REQUESTS: &str = "Too many ongoing HTTP requests";
pub const TOO_MANY_CHECKS: &str = "Too many ongoing checkUrl calls";
pub const TOO_MANY_WEBSOCKETS: &str = "Too many websockets already open";
pub const WEBSOCKETS_DISABLED: &str = "Websocket connections are disabled";

/// Methods a program may use; `CONNECT` is not one of them.
const METHODS: &[&str] = &["GET", "POST", "HEAD", "OPTIONS", "PUT", "DELETE", "PATCH", "TRACE"];

/// A rejected call: reported to the program as `(false, message)`.
struct Rejected(String);

impl From<HttpError> for Rejected {
    fn from(err: HttpError) -> Self {
        Self(err.to_string())
    }
}

impl From<CapabilityError> for Rejected {
    fn from(err: CapabilityError) -> Self {
        Self(err.message().to_owned())
    }
}

type Outcome = Result<(), Rejected>;

/// The `http` API for one computer.
pub struct HttpApi {
    env: ApiEnvironment,
    transport: Arc<dyn HttpTransport>,
    check_urls: ResourceGroup,
    requests: ResourceQueue,
    websockets: ResourceGroup,
}

impl HttpApi {
    pub fn new(env: ApiEnvironment, transport: Arc<dyn HttpTransport>) -> Self {
        let config = env.config();
        let requests = ResourceQueue::new(
            "http_request",
            config.supplier(|c| c.http.max_requests),
            config.supplier(|c| c.http.max_queued_requests),
        );
        let websockets = ResourceGroup::new("websocket", config.supplier(|c| c.http.max_websockets));
        Self {
            check_urls: ResourceGroup::with_limit("check_url", ResourceGroup::DEFAULT_LIMIT),
            requests,
            websockets,
            env,
            transport,
        }
    }

    /// Requests currently running, and waiting for a slot.
    pub fn request_counts(&self) -> (usize, usize) {
        (self.requests.len(), self.requests.pending_len())
    }

    /// Websockets currently open.
    pub fn websocket_count(&self) -> usize {
        self.websockets.len()
    }

    fn rules(&self) -> AddressRules {
        self.env
            .config()
            .read(|c| AddressRules::from_config(&c.http.rules))
    }

    // -- request ------------------------------------------------------------

    fn request(&self, args: &Arguments) -> Outcome {
        let call = RequestCall::parse(args)?;
        let headers = headers::from_table(call.headers, &self.env.user_agent())?;

        let method = match call.method {
            None if call.body.is_some() => Method::POST,
            None => Method::GET,
            Some(name) => parse_method(name)?,
        };

        let url = check_uri(call.address)?;
        let rules = self.rules();
        let options = rules.check(&host_of(&url), None)?;
        let body = call.body.unwrap_or_default();
        if body.len() as u64 > options.max_upload {
            return Err(HttpError::BodyTooLarge.into());
        }

        let request = HttpRequest::new(
            self.requests.group(),
            self.env.clone(),
            Arc::clone(&self.transport),
            rules,
            options,
            call.address.to_owned(),
            call.binary,
            OutgoingRequest {
                method,
                url,
                headers,
                body: body.to_vec(),
                follow_redirects: call.redirect,
            },
        );
        if !request.queue(HttpRequest::run) {
            debug!(url = call.address, "http request rejected");
            return Err(Rejected(TOO_MANY_REQUESTS.into()));
        }
        Ok(())
    }

    // -- checkURL -----------------------------------------------------------

    fn check_url(&self, args: &Arguments) -> Outcome {
        let address = args.get_string(0)?;
        let url = check_uri(address)?;
        let rules = self.rules();
        let options = rules.check(&host_of(&url), None)?;

        let check = CheckUrl::new(
            &self.check_urls,
            self.env.clone(),
            Arc::clone(&self.transport),
            rules,
            options,
            address.to_owned(),
            url,
        );
        if !check.queue(CheckUrl::run) {
            return Err(Rejected(TOO_MANY_CHECKS.into()));
        }
        Ok(())
    }

    // -- websocket ----------------------------------------------------------

    fn websocket(&self, args: &Arguments) -> Outcome {
        if !self.env.config().read(|c| c.http.websocket_enabled) {
            return Err(Rejected(WEBSOCKETS_DISABLED.into()));
        }
        let address = args.get_string(0)?;
        let headers = headers::from_table(args.opt_table(1)?, &self.env.user_agent())?;
        let url = check_websocket_uri(address)?;
        let rules = self.rules();
        let options = rules.check(&host_of(&url), None)?;

        let socket = Websocket::new(
            &self.websockets,
            self.env.clone(),
            Arc::clone(&self.transport),
            rules,
            options,
            address.to_owned(),
            url,
            headers,
        );
        if !socket.queue(Websocket::connect) {
            return Err(Rejected(TOO_MANY_WEBSOCKETS.into()));
        }
        Ok(())
    }
}

impl ScriptObject for HttpApi {
    fn method_names(&self) -> Vec<&str> {
        vec!["request", "checkURL", "websocket"]
    }

    fn call_method(
        &self,
        _context: &TaskContext,
        method: &str,
        args: &Arguments,
    ) -> Result<MethodResult, CapabilityError> {
        let outcome = match method {
            "request" => self.request(args),
            "checkURL" => self.check_url(args),
            "websocket" => self.websocket(args),
            other => return Err(no_such_method(other)),
        };
        Ok(match outcome {
            Ok(()) => vec![Value::Boolean(true)],
            Err(Rejected(message)) => vec![Value::Boolean(false), Value::from(message)],
        })
    }
}

impl CapabilityApi for HttpApi {
    fn names(&self) -> &[&'static str] {
        &["http"]
    }

    fn startup(&self) {
        self.check_urls.startup();
        self.requests.startup();
        self.websockets.startup();
        info!(computer_id = self.env.computer_id(), "http api started");
    }

    fn update(&self) {
        tinker_kernel::resource::cleanup();
    }

    fn shutdown(&self) {
        self.check_urls.shutdown();
        self.requests.shutdown();
        self.websockets.shutdown();
        info!(computer_id = self.env.computer_id(), "http api stopped");
    }
}

// ---------------------------------------------------------------------------
// Argument parsing
// ---------------------------------------------------------------------------

/// The arguments of `http.request`, in either calling form.
struct RequestCall<'a> {
    address: &'a str,
    body: Option<&'a [u8]>,
    headers: Option<&'a Table>,
    binary: bool,
    method: Option<&'a str>,
    redirect: bool,
}

impl<'a> RequestCall<'a> {
    fn parse(args: &'a Arguments) -> Result<Self, CapabilityError> {
        if let Value::Table(options) = args.get(0) {
            return Ok(Self {
                address: url_field(options)?,
                body: body_field(options)?,
                headers: opt_table_field(options, "headers")?,
                binary: opt_bool_field(options, "binary", false)?,
                method: method_field(options)?,
                redirect: opt_bool_field(options, "redirect", true)?,
            });
        }

        let body = match args.get(1) {
            Value::Nil => None,
            _ => Some(args.get_bytes(1)?),
        };
        Ok(Self {
            address: args.get_string(0)?,
            body,
            headers: args.opt_table(2)?,
            binary: args.opt_bool(3, false)?,
            method: None,
            redirect: true,
        })
    }
}

fn url_field(options: &Table) -> Result<&str, CapabilityError> {
    tinker_kernel::value::get_string_field(options, "url")
}

fn method_field(options: &Table) -> Result<Option<&str>, CapabilityError> {
    tinker_kernel::value::opt_string_field(options, "method")
}

fn body_field(options: &Table) -> Result<Option<&[u8]>, CapabilityError> {
    match options.get_str("body") {
        None | Some(Value::Nil) => Ok(None),
        Some(value) => value.as_bytes().map(Some).ok_or_else(|| {
            CapabilityError::new(format!(
                "bad field 'body' (string expected, got {})",
                value.type_name()
            ))
        }),
    }
}

fn parse_method(name: &str) -> Result<Method, HttpError> {
    let upper = name.to_ascii_uppercase();
    if !METHODS.contains(&upper.as_str()) {
        return Err(HttpError::UnsupportedMethod);
    }
    Method::from_bytes(upper.as_bytes()).map_err(|_| HttpError::UnsupportedMethod)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn methods_are_case_insensitive() {
        assert_eq!(parse_method("get").unwrap(), Method::GET);
        assert_eq!(parse_method("Patch").unwrap(), Method::PATCH);
    }

    #[test]
    fn connect_and_unknown_methods_are_unsupported() {
        assert_eq!(parse_method("CONNECT"), Err(HttpError::UnsupportedMethod));
        assert_eq!(parse_method("connect"), Err(HttpError::UnsupportedMethod));
        assert_eq!(parse_method("BREW"), Err(HttpError::UnsupportedMethod));
    }

    #[test]
    fn positional_and_table_forms_agree() {
        let positional = Arguments::new(vec![
            Value::from("http://example.test/"),
            Value::from("payload"),
        ]);
        let call = RequestCall::parse(&positional).unwrap();
        assert_eq!(call.address, "http://example.test/");
        assert_eq!(call.body, Some(&b"payload"[..]));
        assert!(call.redirect);

        let mut options = Table::new();
        options.insert("url", "http://example.test/");
        options.insert("body", "payload");
        options.insert("redirect", false);
        options.insert("method", "put");
        let table = Arguments::new(vec![Value::Table(options)]);
        let call = RequestCall::parse(&table).unwrap();
        assert_eq!(call.body, Some(&b"payload"[..]));
        assert_eq!(call.method, Some("put"));
        assert!(!call.redirect);
    }

    #[test]
    fn missing_url_is_a_bad_field() {
        let args = Arguments::new(vec![Value::Table(Table::new())]);
        let err = RequestCall::parse(&args).err().unwrap();
        assert_eq!(err.message(), "bad field 'url' (string expected, got nil)");
    }
}
