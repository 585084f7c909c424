//! Capability traits.
//!
//! Everything a program can call implements [`ScriptObject`]: a named set of
//! methods invoked with positional [`Arguments`].  Global APIs such as `http`
//! additionally implement [`CapabilityApi`], which adds the names they are
//! installed under and the lifecycle hooks the host drives.

use crate::context::TaskContext;
use crate::error::CapabilityError;
use crate::value::{Arguments, MethodResult, Value};

/// A host object exposed to scripts.
pub trait ScriptObject: Send + Sync {
    /// Names of the methods this object exposes, in a stable order.
    fn method_names(&self) -> Vec<&str>;

    /// Invoke `method` with `args`.
    ///
    /// `context` is the calling computer's task context, for methods that
    /// need to schedule work or queue events.
    fn call_method(
        &self,
        context: &TaskContext,
        method: &str,
        args: &Arguments,
    ) -> Result<MethodResult, CapabilityError>;
}

/// A global API installed into every computer's environment.
///
/// A fresh instance is built per computer session and dropped with it.
pub trait CapabilityApi: ScriptObject {
    /// The global names this API is installed under.
    fn names(&self) -> &[&'static str];

    /// Called once when the computer boots.
    fn startup(&self) {}

    /// Called once per host tick while the computer is on.
    fn update(&self) {}

    /// Called once when the computer shuts down.  Must be safe even if
    /// [`startup`](Self::startup) did not complete.
    fn shutdown(&self) {}
}

/// The computer a peripheral method is being called from.
pub trait ComputerAccess: Send + Sync {
    /// The computer's numeric id.
    fn id(&self) -> u32;

    /// The name the peripheral is attached under (e.g. `"left"`).
    fn attachment_name(&self) -> &str;

    /// Queue an event on the calling computer.
    fn queue_event(&self, name: &str, args: Vec<Value>);
}

/// The error returned for a method name an object does not expose.
pub fn no_such_method(method: &str) -> CapabilityError {
    CapabilityError::new(format!("No such method {method}"))
}
