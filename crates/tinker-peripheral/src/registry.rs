//! Per-type method registry.
//!
//! Peripheral methods are plain functions over a concrete backing type.  The
//! registry erases each one into a shared [`MethodDescriptor`] when it is
//! registered, so every instance of the type is later bound to the very same
//! descriptors.
//!
//! Internally the registry is backed by [`DashMap`], keyed by [`TypeId`], and
//! is cheaply cloneable.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tinker_kernel::{Arguments, CapabilityError, ComputerAccess, MethodResult, TaskContext};

use crate::method::NamedMethod;

/// A typed peripheral method.
pub type PeripheralFn<T> = fn(
    &T,
    &TaskContext,
    &dyn ComputerAccess,
    &Arguments,
) -> Result<MethodResult, CapabilityError>;

type ErasedFn = dyn Fn(
        &(dyn Any + Send + Sync),
        &TaskContext,
        &dyn ComputerAccess,
        &Arguments,
    ) -> Result<MethodResult, CapabilityError>
    + Send
    + Sync;

// ---------------------------------------------------------------------------
// MethodDescriptor
// ---------------------------------------------------------------------------

/// A type-erased peripheral method.
///
/// Descriptors are compared by identity: two handles refer to the same
/// method exactly when they share the same `Arc<MethodDescriptor>`.
pub struct MethodDescriptor {
    target_type: &'static str,
    call: Box<ErasedFn>,
}

impl MethodDescriptor {
    fn erase<T: Any + Send + Sync>(method: PeripheralFn<T>) -> Self {
        Self {
            target_type: std::any::type_name::<T>(),
            call: Box::new(move |target, context, computer, args| {
                let target = target.downcast_ref::<T>().ok_or_else(|| {
                    CapabilityError::new(format!(
                        "method expects a {} target",
                        std::any::type_name::<T>()
                    ))
                })?;
                method(target, context, computer, args)
            }),
        }
    }

    /// Call the method on `target`.
    pub fn apply(
        &self,
        target: &(dyn Any + Send + Sync),
        context: &TaskContext,
        computer: &dyn ComputerAccess,
        args: &Arguments,
    ) -> Result<MethodResult, CapabilityError> {
        (self.call)(target, context, computer, args)
    }

    /// The Rust type this method was registered for.
    pub fn target_type(&self) -> &'static str {
        self.target_type
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("target_type", &self.target_type)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// MethodRegistry
// ---------------------------------------------------------------------------

/// Methods registered per backing type, in registration order.
#[derive(Clone, Default)]
pub struct MethodRegistry {
    methods: Arc<DashMap<TypeId, Vec<NamedMethod>>>,
}

impl MethodRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `method` under `name` for every instance of `T`.
    ///
    /// Registering a name that `T` already has replaces the earlier method in
    /// place.
    pub fn register<T: Any + Send + Sync>(
        &self,
        name: impl Into<String>,
        method: PeripheralFn<T>,
    ) -> &Self {
        let named = NamedMethod::new(name, Arc::new(MethodDescriptor::erase(method)));
        let mut methods = self.methods.entry(TypeId::of::<T>()).or_default();
        match methods.iter_mut().find(|m| m.name() == named.name()) {
            Some(existing) => {
                tracing::warn!(
                    target_type = std::any::type_name::<T>(),
                    method = named.name(),
                    "peripheral method registered twice, replacing"
                );
                *existing = named;
            }
            None => {
                tracing::debug!(
                    target_type = std::any::type_name::<T>(),
                    method = named.name(),
                    "peripheral method registered"
                );
                methods.push(named);
            }
        }
        self
    }

    /// The methods registered for the concrete type of `target`.
    pub fn methods_for(&self, target: &(dyn Any + Send + Sync)) -> Vec<NamedMethod> {
        self.methods_of(target.type_id())
    }

    /// The methods registered for type `id`, in registration order.
    pub fn methods_of(&self, id: TypeId) -> Vec<NamedMethod> {
        self.methods
            .get(&id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// Number of types with at least one method.
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinker_kernel::Value;

    struct Lamp {
        lit: bool,
    }

    struct Dial;

    fn is_lit(
        lamp: &Lamp,
        _: &TaskContext,
        _: &dyn ComputerAccess,
        _: &Arguments,
    ) -> Result<MethodResult, CapabilityError> {
        Ok(vec![Value::Boolean(lamp.lit)])
    }

    fn colour(
        _: &Lamp,
        _: &TaskContext,
        _: &dyn ComputerAccess,
        _: &Arguments,
    ) -> Result<MethodResult, CapabilityError> {
        Ok(vec![Value::from("white")])
    }

    fn names(methods: &[NamedMethod]) -> Vec<&str> {
        methods.iter().map(NamedMethod::name).collect()
    }

    #[test]
    fn methods_keep_registration_order() {
        let registry = MethodRegistry::new();
        registry
            .register::<Lamp>("isLit", is_lit)
            .register::<Lamp>("getColour", colour);

        let lamp = Lamp { lit: true };
        assert_eq!(names(&registry.methods_for(&lamp)), ["isLit", "getColour"]);
        assert!(registry.methods_for(&Dial).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn descriptors_are_shared_between_lookups() {
        let registry = MethodRegistry::new();
        registry.register::<Lamp>("isLit", is_lit);

        let first = registry.methods_of(TypeId::of::<Lamp>());
        let second = registry.methods_for(&Lamp { lit: false });
        assert!(Arc::ptr_eq(first[0].method(), second[0].method()));
        assert!(first[0].method().target_type().ends_with("Lamp"));
    }

    #[test]
    fn registering_a_name_twice_replaces_it() {
        let registry = MethodRegistry::new();
        registry
            .register::<Lamp>("isLit", is_lit)
            .register::<Lamp>("getColour", colour);
        let before = registry.methods_of(TypeId::of::<Lamp>());

        registry.register::<Lamp>("isLit", colour);
        let after = registry.methods_of(TypeId::of::<Lamp>());
        assert_eq!(names(&after), ["isLit", "getColour"]);
        assert!(!Arc::ptr_eq(before[0].method(), after[0].method()));
        assert!(Arc::ptr_eq(before[1].method(), after[1].method()));
    }

    #[test]
    fn clones_share_registrations() {
        let registry = MethodRegistry::new();
        let clone = registry.clone();
        clone.register::<Lamp>("isLit", is_lit);
        assert_eq!(registry.methods_for(&Lamp { lit: true }).len(), 1);
    }
}
