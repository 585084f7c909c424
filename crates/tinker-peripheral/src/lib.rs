//! Tinker generic peripherals.
//!
//! Devices expose methods to programs without hand-written glue: register
//! plain functions against the device type once, then wrap any instance.
//!
//! - **[`registry`]** -- [`MethodRegistry`], typed methods erased into shared
//!   descriptors per backing type.
//! - **[`method`]** -- [`NamedMethod`] and [`BoundMethod`], a descriptor
//!   bound to one target and compared by identity.
//! - **[`generic`]** -- [`GenericPeripheral`] and
//!   [`GenericPeripheralProvider`].

pub mod generic;
pub mod method;
pub mod registry;

pub use generic::{GenericPeripheral, GenericPeripheralProvider, Peripheral};
pub use method::{BoundMethod, NamedMethod};
pub use registry::{MethodDescriptor, MethodRegistry, PeripheralFn};
