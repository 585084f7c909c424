//! Websocket resources and handles.
//!
//! A websocket occupies a slot from the moment it is admitted until the
//! connection ends.  Its task owns the connection; the program talks to it
//! through a [`WebsocketHandle`], which feeds outgoing frames over a channel.
//! When the last handle is dropped the channel closes and the task shuts the
//! connection down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use reqwest::header::HeaderMap;
use tinker_kernel::api::no_such_method;
use tinker_kernel::{
    ApiEnvironment, Arguments, CapabilityError, Metric, MethodResult, Resource, ResourceCore,
    ResourceGroup, ScriptObject, TaskContext, Value,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::address::{AddressOptions, AddressRules};
use crate::error::HttpError;
use crate::transport::{HttpTransport, WebsocketConnection, WebsocketFrame};

pub const SUCCESS_EVENT: &str = "websocket_success";
pub const FAILURE_EVENT: &str = "websocket_failure";
pub const MESSAGE_EVENT: &str = "websocket_message";
pub const CLOSE_EVENT: &str = "websocket_closed";

/// Close code sent when a peer's message exceeds the size limit.
const MESSAGE_TOO_BIG: u16 = 1009;

pub(crate) struct Websocket {
    core: ResourceCore,
    env: ApiEnvironment,
    transport: Arc<dyn HttpTransport>,
    rules: AddressRules,
    options: AddressOptions,
    address: String,
    url: Url,
    headers: Mutex<HeaderMap>,
}

impl Resource for Websocket {
    fn core(&self) -> &ResourceCore {
        &self.core
    }
}

impl Websocket {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        group: &ResourceGroup,
        env: ApiEnvironment,
        transport: Arc<dyn HttpTransport>,
        rules: AddressRules,
        options: AddressOptions,
        address: String,
        url: Url,
        headers: HeaderMap,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: ResourceCore::new(group),
            env,
            transport,
            rules,
            options,
            address,
            url,
            headers: Mutex::new(headers),
        })
    }

    /// Open the connection.  Runs once the websocket has been admitted.
    pub(crate) fn connect(self: Arc<Self>) {
        let this = Arc::clone(&self);
        self.core.spawn(self.env.runtime(), async move {
            let headers = match this.headers.lock() {
                Ok(mut guard) => std::mem::take(&mut *guard),
                Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
            };
            let connected = tokio::time::timeout(
                this.options.timeout,
                this.transport.connect_websocket(&this.url, &headers, &this.rules),
            )
            .await
            .unwrap_or(Err(HttpError::Timeout));

            match connected {
                Ok(connection) => this.serve(connection).await,
                Err(err) => {
                    warn!(url = %this.address, error = %err, "websocket connection failed");
                    if this.close() {
                        this.env.queue_event(
                            FAILURE_EVENT,
                            vec![Value::from(this.address.as_str()), Value::from(err.to_string())],
                        );
                    }
                }
            }
        });
    }

    async fn serve(self: &Arc<Self>, mut connection: Box<dyn WebsocketConnection>) {
        let (sender, mut outgoing) = mpsc::unbounded_channel();
        let handle = WebsocketHandle {
            socket: Arc::clone(self),
            sender,
            closed: AtomicBool::new(false),
        };
        debug!(url = %self.address, "websocket open");
        self.env.queue_event(
            SUCCESS_EVENT,
            vec![
                Value::from(self.address.as_str()),
                Value::Object(Arc::new(handle)),
            ],
        );

        loop {
            tokio::select! {
                frame = outgoing.recv() => match frame {
                    Some(frame) => {
                        let closing = matches!(frame, WebsocketFrame::Close { .. });
                        if let Err(err) = connection.send(frame).await {
                            self.closed_by_peer(Some(err.to_string()), None);
                            return;
                        }
                        if closing {
                            self.close();
                            return;
                        }
                    }
                    // Every handle is gone: nobody can read from this socket.
                    None => {
                        let _ = connection
                            .send(WebsocketFrame::Close { code: None, reason: None })
                            .await;
                        debug!(url = %self.address, "websocket handle dropped, closing");
                        self.close();
                        return;
                    }
                },
                frame = connection.receive() => match frame {
                    Some(Ok(WebsocketFrame::Close { code, reason })) => {
                        self.closed_by_peer(reason, code);
                        return;
                    }
                    Some(Ok(frame)) => {
                        if frame.len() as u64 > self.options.websocket_message {
                            let _ = connection
                                .send(WebsocketFrame::Close {
                                    code: Some(MESSAGE_TOO_BIG),
                                    reason: Some(HttpError::MessageTooLarge.to_string()),
                                })
                                .await;
                            self.closed_by_peer(
                                Some(HttpError::MessageTooLarge.to_string()),
                                Some(MESSAGE_TOO_BIG),
                            );
                            return;
                        }
                        self.deliver(frame);
                    }
                    Some(Err(err)) => {
                        self.closed_by_peer(Some(err.to_string()), None);
                        return;
                    }
                    None => {
                        self.closed_by_peer(None, None);
                        return;
                    }
                },
            }
        }
    }

    fn deliver(&self, frame: WebsocketFrame) {
        self.env
            .observe_value(Metric::WEBSOCKET_INCOMING, frame.len() as u64);
        let (contents, binary) = match frame {
            WebsocketFrame::Text(text) => (Value::from(text), false),
            WebsocketFrame::Binary(data) => (Value::Bytes(data), true),
            WebsocketFrame::Close { .. } => return,
        };
        self.env.queue_event(
            MESSAGE_EVENT,
            vec![
                Value::from(self.address.as_str()),
                contents,
                Value::Boolean(binary),
            ],
        );
    }

    /// The connection ended from the far side (or failed).
    fn closed_by_peer(&self, reason: Option<String>, code: Option<u16>) {
        if !self.close() {
            return;
        }
        debug!(url = %self.address, ?code, "websocket closed");
        let mut args = vec![Value::from(self.address.as_str())];
        if reason.is_some() || code.is_some() {
            args.push(Value::from(reason));
        }
        if let Some(code) = code {
            args.push(Value::from(code));
        }
        self.env.queue_event(CLOSE_EVENT, args);
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

const CLOSED_MESSAGE: &str = "attempt to use a closed file";

/// The object handed to programs with `websocket_success`.
pub struct WebsocketHandle {
    socket: Arc<Websocket>,
    sender: mpsc::UnboundedSender<WebsocketFrame>,
    closed: AtomicBool,
}

impl WebsocketHandle {
    fn check_open(&self) -> Result<(), CapabilityError> {
        if self.closed.load(Ordering::SeqCst) || self.socket.is_closed() {
            Err(CapabilityError::new(CLOSED_MESSAGE))
        } else {
            Ok(())
        }
    }

    fn send(&self, args: &Arguments) -> Result<MethodResult, CapabilityError> {
        self.check_open()?;
        let payload = args.get_bytes(0)?;
        let binary = args.opt_bool(1, false)?;
        if payload.len() as u64 > self.socket.options.websocket_message {
            return Err(HttpError::MessageTooLarge.into());
        }

        // Text frames must be UTF-8; anything else goes out unchanged as binary.
        let frame = match std::str::from_utf8(payload) {
            Ok(text) if !binary => WebsocketFrame::Text(text.to_owned()),
            _ => WebsocketFrame::Binary(payload.to_vec()),
        };
        self.socket
            .env
            .observe_value(Metric::WEBSOCKET_OUTGOING, payload.len() as u64);
        self.sender
            .send(frame)
            .map_err(|_| CapabilityError::new(CLOSED_MESSAGE))?;
        Ok(vec![])
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // The task sends the close frame and then releases the slot.
        if self
            .sender
            .send(WebsocketFrame::Close {
                code: None,
                reason: None,
            })
            .is_err()
        {
            self.socket.close();
        }
    }
}

impl ScriptObject for WebsocketHandle {
    fn method_names(&self) -> Vec<&str> {
        vec!["send", "close"]
    }

    fn call_method(
        &self,
        _context: &TaskContext,
        method: &str,
        args: &Arguments,
    ) -> Result<MethodResult, CapabilityError> {
        match method {
            "send" => self.send(args),
            "close" => {
                self.close();
                Ok(vec![])
            }
            other => Err(no_such_method(other)),
        }
    }
}
