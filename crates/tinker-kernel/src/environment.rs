//! Execution environment contract.
//!
//! [`ApiEnvironment`] is what a capability module is constructed with: the
//! calling computer's task context, metrics sink, timeout state and live
//! configuration, plus the tokio runtime its I/O runs on.  [`MachineEnvironment`] is the immutable record handed to
//! the script engine when a session starts.
//!
//! Every capability module built on these must:
//!
//! 1. never block the engine's thread -- waiting happens on the tokio
//!    runtime and results come back through [`ApiEnvironment::queue_event`];
//! 2. poll [`TimeoutState::check`] in any loop that could run long;
//! 3. report only additive metrics;
//! 4. be built fresh per session and never outlive it.

use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::api::CapabilityApi;
use crate::config::ConfigHandle;
use crate::context::TaskContext;
use crate::metrics::{Metric, MetricsObserver};
use crate::timeout::TimeoutState;
use crate::value::Value;

/// Dependencies shared by every capability module of one computer.
#[derive(Clone)]
pub struct ApiEnvironment {
    computer_id: u32,
    context: TaskContext,
    metrics: Arc<dyn MetricsObserver>,
    timeout: TimeoutState,
    config: ConfigHandle,
    runtime: Handle,
}

impl ApiEnvironment {
    pub fn new(
        computer_id: u32,
        context: TaskContext,
        metrics: Arc<dyn MetricsObserver>,
        timeout: TimeoutState,
        config: ConfigHandle,
        runtime: Handle,
    ) -> Self {
        Self {
            computer_id,
            context,
            metrics,
            timeout,
            config,
            runtime,
        }
    }

    pub fn computer_id(&self) -> u32 {
        self.computer_id
    }

    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsObserver> {
        &self.metrics
    }

    pub fn timeout(&self) -> &TimeoutState {
        &self.timeout
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    /// The runtime asynchronous work for this computer is spawned on.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Queue an event on this computer.
    pub fn queue_event(&self, name: &str, args: Vec<Value>) -> bool {
        self.context.queue_event(name, args)
    }

    pub fn observe(&self, counter: Metric) {
        self.metrics.observe(counter);
    }

    pub fn observe_value(&self, metric: Metric, value: u64) {
        self.metrics.observe_value(metric, value);
    }

    /// The user agent sent with outgoing HTTP requests.
    pub fn user_agent(&self) -> String {
        self.config.read(|c| c.http.user_agent.clone())
    }

    /// A string identifying this host to programs.
    pub fn host_string(&self) -> String {
        self.config.read(|c| c.computer.host_string.clone())
    }
}

impl fmt::Debug for ApiEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiEnvironment")
            .field("computer_id", &self.computer_id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// The record a script engine is built from.
///
/// Each API is installed under every name in [`CapabilityApi::names`].
#[derive(Clone)]
pub struct MachineEnvironment {
    /// Used by the engine to run main-thread tasks.
    pub context: TaskContext,
    /// Sink for engine-level metrics (e.g. coroutines created).
    pub metrics: Arc<dyn MetricsObserver>,
    /// Polled by the engine to interrupt programs that do not yield.
    pub timeout: TimeoutState,
    /// APIs to install into the global environment, in installation order.
    pub apis: Vec<Arc<dyn CapabilityApi>>,
    /// Identifies the host to programs.
    pub host_string: String,
}

impl MachineEnvironment {
    /// The API installed under `name`, if any.
    pub fn api(&self, name: &str) -> Option<&Arc<dyn CapabilityApi>> {
        self.apis.iter().find(|api| api.names().contains(&name))
    }

    /// Every global name paired with the API installed under it.
    pub fn globals(&self) -> Vec<(&'static str, &Arc<dyn CapabilityApi>)> {
        self.apis
            .iter()
            .flat_map(|api| api.names().iter().map(move |name| (*name, api)))
            .collect()
    }
}

impl fmt::Debug for MachineEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.globals().into_iter().map(|(n, _)| n).collect();
        f.debug_struct("MachineEnvironment")
            .field("apis", &names)
            .field("host_string", &self.host_string)
            .finish_non_exhaustive()
    }
}
