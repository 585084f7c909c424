//! Generic peripherals.
//!
//! A [`GenericPeripheral`] exposes whatever methods the [`MethodRegistry`]
//! knows for its backing object.  Because its methods compare by identity of
//! target and descriptor, scanning the same object twice yields equal
//! peripherals, so a host can tell a reattached device from a new one.

use std::any::Any;
use std::sync::Arc;

use tinker_kernel::{
    Arguments, CapabilityError, ComputerAccess, MethodResult, TaskContext, no_such_method,
};
use tracing::debug;

use crate::method::BoundMethod;
use crate::registry::MethodRegistry;

/// A device a computer can call methods on.
pub trait Peripheral: Send + Sync {
    /// The peripheral type, e.g. `"inventory"`.
    fn kind(&self) -> &str;

    /// Names of the methods this peripheral exposes, in a stable order.
    fn method_names(&self) -> Vec<&str>;

    fn call_method(
        &self,
        context: &TaskContext,
        computer: &dyn ComputerAccess,
        method: &str,
        args: &Arguments,
    ) -> Result<MethodResult, CapabilityError>;
}

/// A peripheral built from registered methods of its backing object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericPeripheral {
    kind: String,
    methods: Vec<BoundMethod>,
}

impl GenericPeripheral {
    pub fn new(kind: impl Into<String>, methods: Vec<BoundMethod>) -> Self {
        Self {
            kind: kind.into(),
            methods,
        }
    }

    pub fn methods(&self) -> &[BoundMethod] {
        &self.methods
    }
}

impl Peripheral for GenericPeripheral {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn method_names(&self) -> Vec<&str> {
        self.methods.iter().map(BoundMethod::name).collect()
    }

    fn call_method(
        &self,
        context: &TaskContext,
        computer: &dyn ComputerAccess,
        method: &str,
        args: &Arguments,
    ) -> Result<MethodResult, CapabilityError> {
        self.methods
            .iter()
            .find(|m| m.name() == method)
            .ok_or_else(|| no_such_method(method))?
            .invoke(context, computer, args)
    }
}

/// Builds [`GenericPeripheral`]s from a [`MethodRegistry`].
#[derive(Clone, Default)]
pub struct GenericPeripheralProvider {
    registry: MethodRegistry,
}

impl GenericPeripheralProvider {
    pub fn new(registry: MethodRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.registry
    }

    /// Wrap `target` as a peripheral of type `kind`, or `None` when no
    /// methods are registered for its type.
    pub fn get_peripheral(
        &self,
        target: Arc<dyn Any + Send + Sync>,
        kind: &str,
    ) -> Option<GenericPeripheral> {
        let methods = self.registry.methods_for(target.as_ref());
        if methods.is_empty() {
            return None;
        }
        debug!(kind, methods = methods.len(), "generic peripheral found");
        let bound = methods
            .iter()
            .map(|method| BoundMethod::new(Arc::clone(&target), method))
            .collect();
        Some(GenericPeripheral::new(kind, bound))
    }
}

#[cfg(test)]
mod tests {
    use tinker_kernel::{Value, machine_queue};

    use super::*;

    struct Furnace {
        fuel: u64,
    }

    struct Rock;

    struct Side;

    impl ComputerAccess for Side {
        fn id(&self) -> u32 {
            0
        }

        fn attachment_name(&self) -> &str {
            "left"
        }

        fn queue_event(&self, _name: &str, _args: Vec<Value>) {}
    }

    fn get_fuel(
        furnace: &Furnace,
        _: &TaskContext,
        _: &dyn ComputerAccess,
        _: &Arguments,
    ) -> Result<MethodResult, CapabilityError> {
        Ok(vec![Value::from(furnace.fuel)])
    }

    fn provider() -> GenericPeripheralProvider {
        let registry = MethodRegistry::new();
        registry.register::<Furnace>("getFuel", get_fuel);
        GenericPeripheralProvider::new(registry)
    }

    #[test]
    fn unknown_types_have_no_peripheral() {
        assert!(provider().get_peripheral(Arc::new(Rock), "rock").is_none());
    }

    #[test]
    fn calls_dispatch_by_name() {
        let (context, _queue) = machine_queue();
        let peripheral = provider()
            .get_peripheral(Arc::new(Furnace { fuel: 12 }), "furnace")
            .unwrap();
        assert_eq!(peripheral.kind(), "furnace");
        assert_eq!(peripheral.method_names(), ["getFuel"]);

        let result = peripheral
            .call_method(&context, &Side, "getFuel", &Arguments::default())
            .unwrap();
        assert_eq!(result, vec![Value::from(12_u64)]);

        let err = peripheral
            .call_method(&context, &Side, "explode", &Arguments::default())
            .unwrap_err();
        assert_eq!(err.message(), "No such method explode");
    }

    #[test]
    fn rescanning_the_same_object_is_equal() {
        let provider = provider();
        let furnace: Arc<dyn Any + Send + Sync> = Arc::new(Furnace { fuel: 0 });
        let first = provider.get_peripheral(Arc::clone(&furnace), "furnace");
        let second = provider.get_peripheral(furnace, "furnace");
        assert_eq!(first, second);

        let other = provider.get_peripheral(Arc::new(Furnace { fuel: 0 }), "furnace");
        assert_ne!(first, other);
    }

    #[test]
    fn kind_is_part_of_equality() {
        let provider = provider();
        let furnace: Arc<dyn Any + Send + Sync> = Arc::new(Furnace { fuel: 0 });
        assert_ne!(
            provider.get_peripheral(Arc::clone(&furnace), "furnace"),
            provider.get_peripheral(furnace, "smoker")
        );
    }
}
