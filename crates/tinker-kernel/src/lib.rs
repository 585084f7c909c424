//! Tinker kernel.
//!
//! This crate provides the host-side runtime every Tinker computer is built
//! on:
//!
//! - **[`value`]** -- The dynamically-typed values passed between programs
//!   and the host, and positional [`Arguments`] with script-style errors.
//! - **[`api`]** -- [`ScriptObject`] and [`CapabilityApi`], the traits every
//!   host-provided API implements.
//! - **[`context`]** -- The per-computer FIFO carrying events and main-thread
//!   tasks back to the script engine.
//! - **[`environment`]** -- [`ApiEnvironment`] and [`MachineEnvironment`],
//!   the dependencies capability modules and engines are built from.
//! - **[`resource`]** -- [`ResourceGroup`] and [`ResourceQueue`], which bound
//!   the asynchronous work one computer may have in flight.
//! - **[`timeout`]** -- Cooperative soft/hard abort state.
//! - **[`config`]** -- TOML configuration behind a live [`ConfigHandle`].
//! - **[`metrics`]** -- Additive metrics and an in-memory recorder.
//! - **[`computer`]** -- [`Computer`], which wires the above together and
//!   drives the API lifecycle.
//! - **[`error`]** -- Host-facing [`KernelError`] and script-facing
//!   [`CapabilityError`] via [`thiserror`].
//!
//! All shared types are `Send + Sync` and designed for use within a
//! multi-threaded tokio runtime.

pub mod api;
pub mod computer;
pub mod config;
pub mod context;
pub mod environment;
pub mod error;
pub mod metrics;
pub mod resource;
pub mod timeout;
pub mod value;

// Re-export the most commonly used types at the crate root for convenience.
pub use api::{CapabilityApi, ComputerAccess, ScriptObject, no_such_method};
pub use computer::{Computer, ComputerState};
pub use config::{
    AddressRuleConfig, ComputerConfig, ConfigHandle, CoreConfig, HttpConfig, RuleAction, Supplier,
};
pub use context::{Event, MachineQueue, TaskContext, TaskId, machine_queue};
pub use environment::{ApiEnvironment, MachineEnvironment};
pub use error::{CapabilityError, KernelError, Result};
pub use metrics::{Metric, MetricsObserver, MetricsRecorder, NoopMetrics};
pub use resource::{Resource, ResourceCore, ResourceGroup, ResourceId, ResourceQueue, ResourceState};
pub use timeout::TimeoutState;
pub use value::{Arguments, MethodResult, Table, Value};
