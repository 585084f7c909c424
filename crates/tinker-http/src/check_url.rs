//! Deferred URL checks (`http.checkURL`).

use std::sync::Arc;

use tinker_kernel::{ApiEnvironment, Resource, ResourceCore, ResourceGroup, Value};
use url::Url;

use crate::address::{AddressOptions, AddressRules};
use crate::error::HttpError;
use crate::transport::HttpTransport;

pub const CHECK_EVENT: &str = "http_check";

/// Resolves a URL's host and reports whether the address rules allow it.
pub(crate) struct CheckUrl {
    core: ResourceCore,
    env: ApiEnvironment,
    transport: Arc<dyn HttpTransport>,
    rules: AddressRules,
    options: AddressOptions,
    address: String,
    url: Url,
}

impl Resource for CheckUrl {
    fn core(&self) -> &ResourceCore {
        &self.core
    }
}

impl CheckUrl {
    pub(crate) fn new(
        group: &ResourceGroup,
        env: ApiEnvironment,
        transport: Arc<dyn HttpTransport>,
        rules: AddressRules,
        options: AddressOptions,
        address: String,
        url: Url,
    ) -> Arc<Self> {
        Arc::new(Self {
            core: ResourceCore::new(group),
            env,
            transport,
            rules,
            options,
            address,
            url,
        })
    }

    pub(crate) fn run(self: Arc<Self>) {
        let this = Arc::clone(&self);
        self.core.spawn(self.env.runtime(), async move {
            let result = tokio::time::timeout(
                this.options.timeout,
                this.transport.check(&this.url, &this.rules),
            )
            .await
            .unwrap_or(Err(HttpError::Timeout));

            if !this.close() {
                return;
            }
            let mut args = vec![Value::from(this.address.as_str())];
            match result {
                Ok(()) => args.push(Value::Boolean(true)),
                Err(err) => {
                    tracing::debug!(url = %this.address, error = %err, "url check failed");
                    args.push(Value::Boolean(false));
                    args.push(Value::from(err.to_string()));
                }
            }
            this.env.queue_event(CHECK_EVENT, args);
        });
    }
}
