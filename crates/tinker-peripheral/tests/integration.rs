//! Integration tests for the tinker-peripheral crate.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tinker_kernel::{
    Arguments, CapabilityError, ComputerAccess, MethodResult, TaskContext, Value, machine_queue,
};
use tinker_peripheral::{GenericPeripheralProvider, MethodRegistry, Peripheral};

// ═══════════════════════════════════════════════════════════════════════
//  Test device
// ═══════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct Tank {
    level: Arc<AtomicU64>,
}

#[derive(Default)]
struct RecordingComputer {
    events: Mutex<Vec<(String, Vec<Value>)>>,
}

impl ComputerAccess for RecordingComputer {
    fn id(&self) -> u32 {
        7
    }

    fn attachment_name(&self) -> &str {
        "back"
    }

    fn queue_event(&self, name: &str, args: Vec<Value>) {
        self.events.lock().unwrap().push((name.to_owned(), args));
    }
}

fn get_level(
    tank: &Tank,
    _: &TaskContext,
    _: &dyn ComputerAccess,
    _: &Arguments,
) -> Result<MethodResult, CapabilityError> {
    Ok(vec![Value::from(tank.level.load(Ordering::SeqCst))])
}

/// Fills on the computer's thread and reports back through `task_complete`.
fn fill(
    tank: &Tank,
    context: &TaskContext,
    computer: &dyn ComputerAccess,
    args: &Arguments,
) -> Result<MethodResult, CapabilityError> {
    let amount = args
        .opt_integer(0)?
        .ok_or_else(|| CapabilityError::new("bad argument #1 (number expected, got nil)"))?;
    if amount < 0 {
        return Err(CapabilityError::new("Amount must be positive"));
    }
    let level = Arc::clone(&tank.level);
    let id = context.issue_main_thread_task(move || {
        let now = level.fetch_add(amount as u64, Ordering::SeqCst) + amount as u64;
        Ok(vec![Value::from(now)])
    })?;
    computer.queue_event("tank_fill", vec![Value::from(computer.attachment_name())]);
    Ok(vec![Value::from(id)])
}

fn provider() -> GenericPeripheralProvider {
    let registry = MethodRegistry::new();
    registry
        .register::<Tank>("getLevel", get_level)
        .register::<Tank>("fill", fill);
    GenericPeripheralProvider::new(registry)
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn methods_run_against_the_bound_instance() {
    let (context, mut queue) = machine_queue();
    let computer = RecordingComputer::default();
    let tank = provider()
        .get_peripheral(Arc::new(Tank::default()), "tank")
        .unwrap();
    assert_eq!(tank.method_names(), ["getLevel", "fill"]);

    let result = tank
        .call_method(&context, &computer, "fill", &vec![Value::from(5_i64)].into())
        .unwrap();
    let task = result[0].clone();
    assert_eq!(
        computer.events.lock().unwrap()[0],
        ("tank_fill".to_owned(), vec![Value::from("back")])
    );

    let complete = queue.try_next_event().unwrap();
    assert_eq!(complete.name, "task_complete");
    assert_eq!(complete.args, vec![task, Value::Boolean(true), Value::from(5_u64)]);

    let level = tank
        .call_method(&context, &computer, "getLevel", &Arguments::default())
        .unwrap();
    assert_eq!(level, vec![Value::from(5_u64)]);
}

#[test]
fn method_errors_reach_the_caller_unchanged() {
    let (context, _queue) = machine_queue();
    let tank = provider()
        .get_peripheral(Arc::new(Tank::default()), "tank")
        .unwrap();

    let err = tank
        .call_method(
            &context,
            &RecordingComputer::default(),
            "fill",
            &vec![Value::from(-1_i64)].into(),
        )
        .unwrap_err();
    assert_eq!(err.message(), "Amount must be positive");
}

#[test]
fn reattached_devices_compare_equal() {
    let provider = provider();
    let device: Arc<dyn Any + Send + Sync> = Arc::new(Tank::default());

    let before = provider.get_peripheral(Arc::clone(&device), "tank").unwrap();
    let after = provider.get_peripheral(Arc::clone(&device), "tank").unwrap();
    assert_eq!(before, after);
    assert_eq!(before.methods()[0], after.methods()[0]);

    let replacement = provider
        .get_peripheral(Arc::new(Tank::default()), "tank")
        .unwrap();
    assert_ne!(before, replacement);
}

#[test]
fn methods_registered_later_appear_on_the_next_scan() {
    let provider = provider();
    let device: Arc<dyn Any + Send + Sync> = Arc::new(Tank::default());
    let before = provider.get_peripheral(Arc::clone(&device), "tank").unwrap();

    provider.registry().register::<Tank>("drain", get_level);
    let after = provider.get_peripheral(device, "tank").unwrap();
    assert_eq!(after.method_names(), ["getLevel", "fill", "drain"]);
    assert_ne!(before, after);
    assert_eq!(before.methods(), &after.methods()[..2]);
}
