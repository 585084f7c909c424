//! A single computer session.
//!
//! [`Computer`] ties together the pieces one script instance needs: its event
//! queue, timeout state and the capability APIs installed into it.  It drives
//! the API lifecycle (`startup` on boot, `update` every host tick, `shutdown`
//! on power-off) and hands the engine a [`MachineEnvironment`].

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::api::{CapabilityApi, no_such_method};
use crate::config::ConfigHandle;
use crate::context::{Event, MachineQueue, machine_queue};
use crate::environment::{ApiEnvironment, MachineEnvironment};
use crate::error::CapabilityError;
use crate::metrics::MetricsObserver;
use crate::timeout::TimeoutState;
use crate::value::{Arguments, MethodResult, Value};

/// Power state of a computer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputerState {
    Off,
    On,
}

/// One running (or stopped) script instance.
pub struct Computer {
    environment: ApiEnvironment,
    queue: MachineQueue,
    apis: Vec<Arc<dyn CapabilityApi>>,
    state: ComputerState,
}

impl Computer {
    pub fn new(
        id: u32,
        config: ConfigHandle,
        metrics: Arc<dyn MetricsObserver>,
        runtime: Handle,
    ) -> Self {
        let (context, queue) = machine_queue();
        let timeout = config.read(|c| TimeoutState::from_config(&c.computer));
        Self {
            environment: ApiEnvironment::new(id, context, metrics, timeout, config, runtime),
            queue,
            apis: Vec::new(),
            state: ComputerState::Off,
        }
    }

    /// The environment capability modules for this computer are built from.
    pub fn environment(&self) -> &ApiEnvironment {
        &self.environment
    }

    pub fn state(&self) -> ComputerState {
        self.state
    }

    /// Install an API.  APIs start and stop in installation order.
    pub fn add_api(&mut self, api: Arc<dyn CapabilityApi>) {
        tracing::debug!(
            computer_id = self.environment.computer_id(),
            names = ?api.names(),
            "api installed"
        );
        self.apis.push(api);
    }

    /// The record handed to the script engine.
    pub fn machine_environment(&self) -> MachineEnvironment {
        MachineEnvironment {
            context: self.environment.context().clone(),
            metrics: Arc::clone(self.environment.metrics()),
            timeout: self.environment.timeout().clone(),
            apis: self.apis.clone(),
            host_string: self.environment.host_string(),
        }
    }

    /// Boot the computer: start every API.
    pub fn turn_on(&mut self) {
        if self.state == ComputerState::On {
            return;
        }
        for api in &self.apis {
            api.startup();
        }
        self.state = ComputerState::On;
        tracing::info!(computer_id = self.environment.computer_id(), "computer started");
    }

    /// Run one host tick.
    pub fn tick(&self) {
        if self.state != ComputerState::On {
            return;
        }
        for api in &self.apis {
            api.update();
        }
    }

    /// Abort the program and shut every API down.
    pub fn shutdown(&mut self) {
        if self.state == ComputerState::Off {
            return;
        }
        self.environment.timeout().hard_abort();
        for api in &self.apis {
            api.shutdown();
        }
        self.state = ComputerState::Off;
        tracing::info!(computer_id = self.environment.computer_id(), "computer stopped");
    }

    /// Call `method` on the API installed under the global `name`.
    pub fn call(
        &self,
        name: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<MethodResult, CapabilityError> {
        let api = self
            .apis
            .iter()
            .find(|api| api.names().contains(&name))
            .ok_or_else(|| CapabilityError::new(format!("No such API {name}")))?;
        if !api.method_names().contains(&method) {
            return Err(no_such_method(method));
        }
        api.call_method(self.environment.context(), method, &Arguments::new(args))
    }

    /// Wait for the next event delivered to this computer.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.queue.next_event().await
    }

    /// Take every event that is ready, in delivery order.
    pub fn drain_events(&mut self) -> Vec<Event> {
        self.queue.drain()
    }
}

impl Drop for Computer {
    fn drop(&mut self) {
        self.shutdown();
    }
}
