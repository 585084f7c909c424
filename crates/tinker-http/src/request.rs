//! HTTP request resources and response handles.

use std::sync::{Arc, Mutex};

use tinker_kernel::api::no_such_method;
use tinker_kernel::{
    ApiEnvironment, Arguments, CapabilityError, Metric, MethodResult, Resource, ResourceCore,
    ResourceGroup, ScriptObject, Table, TaskContext, Value,
};
use tracing::{debug, warn};

use crate::address::{AddressOptions, AddressRules};
use crate::error::HttpError;
use crate::headers;
use crate::transport::{HttpTransport, IncomingResponse, OutgoingRequest};

pub const SUCCESS_EVENT: &str = "http_success";
pub const FAILURE_EVENT: &str = "http_failure";

/// One in-flight request.
///
/// Admitted through the request queue; once admitted it performs the
/// exchange on the runtime, closes itself and reports the outcome as an
/// `http_success` or `http_failure` event.
pub(crate) struct HttpRequest {
    core: ResourceCore,
    env: ApiEnvironment,
    transport: Arc<dyn HttpTransport>,
    rules: AddressRules,
    options: AddressOptions,
    /// The address exactly as the program gave it, echoed in events.
    address: String,
    binary: bool,
    request: Mutex<Option<OutgoingRequest>>,
}

impl Resource for HttpRequest {
    fn core(&self) -> &ResourceCore {
        &self.core
    }

    fn dispose(&self) {
        if let Ok(mut request) = self.request.lock() {
            request.take();
        }
    }
}

impl HttpRequest {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        group: &ResourceGroup,
        env: ApiEnvironment,
        transport: Arc<dyn HttpTransport>,
        rules: AddressRules,
        options: AddressOptions,
        address: String,
        binary: bool,
        request: OutgoingRequest,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: ResourceCore::new(group),
            env,
            transport,
            rules,
            options,
            address,
            binary,
            request: Mutex::new(Some(request)),
        })
    }

    /// Start the exchange.  Runs once the request has been admitted.
    pub(crate) fn run(self: Arc<Self>) {
        let request = match self.request.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(request) = request else {
            return;
        };

        self.env.observe(Metric::HTTP_REQUESTS);
        self.env
            .observe_value(Metric::HTTP_UPLOAD, request.body.len() as u64);
        debug!(
            method = %request.method,
            url = %request.url,
            body_len = request.body.len(),
            "http request started"
        );

        let this = Arc::clone(&self);
        self.core.spawn(self.env.runtime(), async move {
            let timeout = this.options.timeout;
            let result = tokio::time::timeout(timeout, this.transport.send(request, &this.rules))
                .await
                .unwrap_or(Err(HttpError::Timeout));
            this.complete(result);
        });
    }

    fn complete(&self, result: Result<IncomingResponse, HttpError>) {
        let response = result.and_then(|response| {
            if response.body.len() as u64 > self.options.max_download {
                Err(HttpError::ResponseTooLarge)
            } else {
                Ok(response)
            }
        });

        // Free the slot before the program hears about it.
        if !self.close() {
            return;
        }

        let address = Value::from(self.address.as_str());
        match response {
            Ok(response) => {
                self.env
                    .observe_value(Metric::HTTP_DOWNLOAD, response.body.len() as u64);
                let status = response.status;
                let failure_message = (status >= 400).then(|| match response.reason.as_str() {
                    "" => format!("HTTP {status}"),
                    reason => reason.to_owned(),
                });
                let handle = Value::Object(Arc::new(ResponseHandle::new(response, self.binary)));

                match failure_message {
                    None => {
                        debug!(url = %self.address, status, "http request succeeded");
                        self.env.queue_event(SUCCESS_EVENT, vec![address, handle]);
                    }
                    Some(message) => {
                        debug!(url = %self.address, status, "http request returned an error status");
                        self.env
                            .queue_event(FAILURE_EVENT, vec![address, Value::from(message), handle]);
                    }
                }
            }
            Err(err) => {
                warn!(url = %self.address, error = %err, "http request failed");
                self.env
                    .queue_event(FAILURE_EVENT, vec![address, Value::from(err.to_string())]);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Response handle
// ---------------------------------------------------------------------------

const CLOSED_MESSAGE: &str = "attempt to use a closed file";

struct ReadState {
    body: Vec<u8>,
    position: usize,
    closed: bool,
}

/// The object handed to programs with `http_success` / `http_failure`.
///
/// Holds the whole body in memory; reads consume it from the front.
pub struct ResponseHandle {
    status: u16,
    reason: String,
    headers: Table,
    binary: bool,
    state: Mutex<ReadState>,
}

impl ResponseHandle {
    pub fn new(response: IncomingResponse, binary: bool) -> Self {
        Self {
            status: response.status,
            reason: response.reason,
            headers: headers::to_table(&response.headers),
            binary,
            state: Mutex::new(ReadState {
                body: response.body,
                position: 0,
                closed: false,
            }),
        }
    }

    fn bytes(&self, data: &[u8]) -> Value {
        if self.binary {
            Value::Bytes(data.to_vec())
        } else {
            Value::String(String::from_utf8_lossy(data).into_owned())
        }
    }

    fn with_open<T>(
        &self,
        f: impl FnOnce(&mut ReadState) -> Result<T, CapabilityError>,
    ) -> Result<T, CapabilityError> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.closed {
            return Err(CapabilityError::new(CLOSED_MESSAGE));
        }
        f(&mut state)
    }

    fn read_all(&self) -> Result<MethodResult, CapabilityError> {
        self.with_open(|state| {
            let rest = &state.body[state.position..];
            let value = self.bytes(rest);
            state.position = state.body.len();
            Ok(vec![value])
        })
    }

    fn read_line(&self, with_trailing: bool) -> Result<MethodResult, CapabilityError> {
        self.with_open(|state| {
            let rest = &state.body[state.position..];
            if rest.is_empty() {
                return Ok(vec![Value::Nil]);
            }
            let (line, consumed) = match rest.iter().position(|&b| b == b'\n') {
                Some(end) if with_trailing => (&rest[..=end], end + 1),
                Some(end) => (&rest[..end], end + 1),
                None => (rest, rest.len()),
            };
            let value = self.bytes(line);
            state.position += consumed;
            Ok(vec![value])
        })
    }

    fn read(&self, count: Option<i64>) -> Result<MethodResult, CapabilityError> {
        let count = count.unwrap_or(1);
        if count < 0 {
            return Err(CapabilityError::new("Cannot read a negative number of bytes"));
        }
        self.with_open(|state| {
            let rest = &state.body[state.position..];
            if rest.is_empty() {
                return Ok(vec![Value::Nil]);
            }
            let take = rest.len().min(usize::try_from(count).unwrap_or(usize::MAX));
            let value = self.bytes(&rest[..take]);
            state.position += take;
            Ok(vec![value])
        })
    }
}

impl ScriptObject for ResponseHandle {
    fn method_names(&self) -> Vec<&str> {
        vec![
            "readAll",
            "readLine",
            "read",
            "getResponseCode",
            "getResponseHeaders",
            "close",
        ]
    }

    fn call_method(
        &self,
        _context: &TaskContext,
        method: &str,
        args: &Arguments,
    ) -> Result<MethodResult, CapabilityError> {
        match method {
            "readAll" => self.read_all(),
            "readLine" => self.read_line(args.opt_bool(0, false)?),
            "read" => self.read(args.opt_integer(0)?),
            "getResponseCode" => self.with_open(|_| {
                Ok(vec![
                    Value::from(self.status),
                    Value::from(self.reason.as_str()),
                ])
            }),
            "getResponseHeaders" => {
                self.with_open(|_| Ok(vec![Value::Table(self.headers.clone())]))
            }
            "close" => {
                let mut state = match self.state.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                state.closed = true;
                state.body = Vec::new();
                Ok(vec![])
            }
            other => Err(no_such_method(other)),
        }
    }
}
