//! Named and bound method handles.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tinker_kernel::{Arguments, CapabilityError, ComputerAccess, MethodResult, TaskContext};

use crate::registry::MethodDescriptor;

/// A method descriptor together with the name it is exposed under.
#[derive(Clone)]
pub struct NamedMethod {
    name: String,
    method: Arc<MethodDescriptor>,
}

impl NamedMethod {
    pub fn new(name: impl Into<String>, method: Arc<MethodDescriptor>) -> Self {
        Self {
            name: name.into(),
            method,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method(&self) -> &Arc<MethodDescriptor> {
        &self.method
    }
}

impl fmt::Debug for NamedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamedMethod")
            .field("name", &self.name)
            .field("target_type", &self.method.target_type())
            .finish()
    }
}

/// A method bound to the object it is called on.
///
/// Two bound methods are equal when they share both the descriptor and the
/// target instance; the hash is derived from the same two identities.
#[derive(Clone)]
pub struct BoundMethod {
    target: Arc<dyn Any + Send + Sync>,
    name: String,
    method: Arc<MethodDescriptor>,
}

impl BoundMethod {
    pub fn new(target: Arc<dyn Any + Send + Sync>, method: &NamedMethod) -> Self {
        Self {
            target,
            name: method.name.clone(),
            method: Arc::clone(&method.method),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call the method on its target.  Errors from the method are returned
    /// as-is.
    pub fn invoke(
        &self,
        context: &TaskContext,
        computer: &dyn ComputerAccess,
        args: &Arguments,
    ) -> Result<MethodResult, CapabilityError> {
        self.method
            .apply(self.target.as_ref(), context, computer, args)
    }

    fn target_addr(&self) -> *const () {
        Arc::as_ptr(&self.target).cast()
    }
}

impl PartialEq for BoundMethod {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.method, &other.method) && self.target_addr() == other.target_addr()
    }
}

impl Eq for BoundMethod {}

impl Hash for BoundMethod {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.target_addr().hash(state);
        Arc::as_ptr(&self.method).hash(state);
    }
}

impl fmt::Debug for BoundMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundMethod")
            .field("name", &self.name)
            .field("target", &self.target_addr())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tinker_kernel::{Value, machine_queue};

    use super::*;
    use crate::registry::MethodRegistry;

    struct Counter;

    struct Console;

    impl ComputerAccess for Console {
        fn id(&self) -> u32 {
            1
        }

        fn attachment_name(&self) -> &str {
            "top"
        }

        fn queue_event(&self, _name: &str, _args: Vec<Value>) {}
    }

    fn describe(
        _: &Counter,
        _: &TaskContext,
        computer: &dyn ComputerAccess,
        args: &Arguments,
    ) -> Result<MethodResult, CapabilityError> {
        let label = args.get_string(0)?;
        Ok(vec![Value::from(format!(
            "{label}@{}",
            computer.attachment_name()
        ))])
    }

    fn refuse(
        _: &Counter,
        _: &TaskContext,
        _: &dyn ComputerAccess,
        _: &Arguments,
    ) -> Result<MethodResult, CapabilityError> {
        Err(CapabilityError::new("Not now"))
    }

    fn setup() -> (NamedMethod, NamedMethod) {
        let registry = MethodRegistry::new();
        registry
            .register::<Counter>("describe", describe)
            .register::<Counter>("refuse", refuse);
        let methods = registry.methods_for(&Counter);
        (methods[0].clone(), methods[1].clone())
    }

    fn hash_of(method: &BoundMethod) -> u64 {
        use std::collections::hash_map::DefaultHasher;
        let mut hasher = DefaultHasher::new();
        method.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn same_target_and_descriptor_are_equal() {
        let (describe, _) = setup();
        let target: Arc<dyn Any + Send + Sync> = Arc::new(Counter);
        let a = BoundMethod::new(Arc::clone(&target), &describe);
        let b = BoundMethod::new(Arc::clone(&target), &describe);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn different_targets_or_descriptors_differ() {
        let (describe, refuse) = setup();
        let first: Arc<dyn Any + Send + Sync> = Arc::new(Counter);
        let second: Arc<dyn Any + Send + Sync> = Arc::new(Counter);

        let bound = BoundMethod::new(Arc::clone(&first), &describe);
        assert_ne!(bound, BoundMethod::new(second, &describe));
        assert_ne!(bound, BoundMethod::new(first, &refuse));
    }

    #[test]
    fn invoke_passes_arguments_and_errors_through() {
        let (describe, refuse) = setup();
        let (context, _queue) = machine_queue();
        let target: Arc<dyn Any + Send + Sync> = Arc::new(Counter);

        let bound = BoundMethod::new(Arc::clone(&target), &describe);
        assert_eq!(bound.name(), "describe");
        let result = bound
            .invoke(&context, &Console, &Arguments::new(vec![Value::from("ticks")]))
            .unwrap();
        assert_eq!(result, vec![Value::from("ticks@top")]);

        let err = bound
            .invoke(&context, &Console, &Arguments::default())
            .unwrap_err();
        assert_eq!(err.message(), "bad argument #1 (string expected, got nil)");

        let err = BoundMethod::new(target, &refuse)
            .invoke(&context, &Console, &Arguments::default())
            .unwrap_err();
        assert_eq!(err.message(), "Not now");
    }
}
