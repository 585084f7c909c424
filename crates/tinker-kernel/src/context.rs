//! Task and event delivery into a computer.
//!
//! Each computer owns one FIFO channel, created with [`machine_queue`].  The
//! sending half, [`TaskContext`], is cloned into every capability module and
//! resource; it is the only way work finished on the tokio runtime gets back
//! to the script engine.  The receiving half, [`MachineQueue`], is drained by
//! the engine between time slices.
//!
//! Two kinds of message share the channel so that their relative order is
//! preserved:
//!
//! - **events** (`http_success`, `websocket_message`, ...) are handed to the
//!   program as-is;
//! - **main-thread tasks** run on the engine's thread when they reach the head
//!   of the queue, and their outcome is reported as a `task_complete` event.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::error::CapabilityError;
use crate::value::{MethodResult, Value};

/// Event raised once a main-thread task has run.
pub const TASK_COMPLETE_EVENT: &str = "task_complete";

/// Identifier returned by [`TaskContext::issue_main_thread_task`].
pub type TaskId = u64;

/// Work scheduled onto a computer's own thread.
pub type MainThreadTask = Box<dyn FnOnce() -> Result<MethodResult, CapabilityError> + Send>;

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// An event delivered to a running program.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub args: Vec<Value>,
}

impl Event {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

enum MachineMessage {
    Event(Event),
    Task { id: TaskId, task: MainThreadTask },
}

impl fmt::Debug for MachineMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event(event) => f.debug_tuple("Event").field(event).finish(),
            Self::Task { id, .. } => f.debug_struct("Task").field("id", id).finish(),
        }
    }
}

/// Create the channel for one computer.
pub fn machine_queue() -> (TaskContext, MachineQueue) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (
        TaskContext {
            sender,
            next_task: Arc::new(AtomicU64::new(1)),
        },
        MachineQueue { receiver },
    )
}

// ---------------------------------------------------------------------------
// Sending half
// ---------------------------------------------------------------------------

/// Handle used by capabilities to hand work back to a computer.
///
/// Cloning is cheap; every clone feeds the same FIFO.
#[derive(Debug, Clone)]
pub struct TaskContext {
    sender: mpsc::UnboundedSender<MachineMessage>,
    next_task: Arc<AtomicU64>,
}

impl TaskContext {
    /// Queue an event for the program.
    ///
    /// Returns `false` if the computer has already gone away, in which case
    /// the event is discarded.
    pub fn queue_event(&self, name: impl Into<String>, args: Vec<Value>) -> bool {
        let event = Event::new(name, args);
        match self.sender.send(MachineMessage::Event(event)) {
            Ok(()) => true,
            Err(err) => {
                if let MachineMessage::Event(event) = err.0 {
                    tracing::trace!(event = %event.name, "event dropped, computer is gone");
                }
                false
            }
        }
    }

    /// Schedule `task` to run on the computer's thread.
    ///
    /// The id is returned immediately; the result arrives later as a
    /// `task_complete` event carrying the same id.
    pub fn issue_main_thread_task<F>(&self, task: F) -> Result<TaskId, CapabilityError>
    where
        F: FnOnce() -> Result<MethodResult, CapabilityError> + Send + 'static,
    {
        let id = self.next_task.fetch_add(1, Ordering::Relaxed);
        self.sender
            .send(MachineMessage::Task {
                id,
                task: Box::new(task),
            })
            .map_err(|_| CapabilityError::new("Computer is shutting down"))?;
        tracing::trace!(task_id = id, "main thread task issued");
        Ok(id)
    }

    /// Whether the receiving computer has been dropped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

// ---------------------------------------------------------------------------
// Receiving half
// ---------------------------------------------------------------------------

/// The engine's end of the channel.
#[derive(Debug)]
pub struct MachineQueue {
    receiver: mpsc::UnboundedReceiver<MachineMessage>,
}

impl MachineQueue {
    /// Wait for the next event, running any main-thread tasks on the way.
    ///
    /// Returns `None` once every [`TaskContext`] has been dropped and the
    /// queue is empty.
    pub async fn next_event(&mut self) -> Option<Event> {
        self.receiver.recv().await.map(Self::process)
    }

    /// Take the next event without waiting.
    pub fn try_next_event(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok().map(Self::process)
    }

    /// Take every event that is ready, in order.
    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_next_event()).collect()
    }

    fn process(message: MachineMessage) -> Event {
        match message {
            MachineMessage::Event(event) => event,
            MachineMessage::Task { id, task } => {
                let mut args = vec![Value::from(id)];
                match task() {
                    Ok(results) => {
                        args.push(Value::Boolean(true));
                        args.extend(results);
                    }
                    Err(err) => {
                        tracing::debug!(task_id = id, error = %err, "main thread task failed");
                        args.push(Value::Boolean(false));
                        args.push(Value::from(err.message()));
                    }
                }
                Event::new(TASK_COMPLETE_EVENT, args)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_arrive_in_order() {
        let (context, mut queue) = machine_queue();
        assert!(context.queue_event("a", vec![]));
        assert!(context.queue_event("b", vec![Value::from(1.0)]));
        assert!(context.queue_event("c", vec![]));

        let names: Vec<_> = queue.drain().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn tasks_run_in_queue_order() {
        let (context, mut queue) = machine_queue();
        context.queue_event("before", vec![]);
        let id = context
            .issue_main_thread_task(|| Ok(vec![Value::from("done")]))
            .expect("issue");
        context.queue_event("after", vec![]);

        let events = queue.drain();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].name, "before");
        assert_eq!(events[1].name, TASK_COMPLETE_EVENT);
        assert_eq!(
            events[1].args,
            vec![Value::from(id), Value::Boolean(true), Value::from("done")]
        );
        assert_eq!(events[2].name, "after");
    }

    #[test]
    fn failed_task_reports_message() {
        let (context, mut queue) = machine_queue();
        let id = context
            .issue_main_thread_task(|| Err(CapabilityError::new("nope")))
            .expect("issue");

        let event = queue.try_next_event().expect("event");
        assert_eq!(
            event.args,
            vec![Value::from(id), Value::Boolean(false), Value::from("nope")]
        );
    }

    #[test]
    fn task_ids_are_unique() {
        let (context, _queue) = machine_queue();
        let a = context.issue_main_thread_task(|| Ok(vec![])).unwrap();
        let b = context.clone().issue_main_thread_task(|| Ok(vec![])).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn sending_after_drop_fails() {
        let (context, queue) = machine_queue();
        drop(queue);
        assert!(context.is_closed());
        assert!(!context.queue_event("late", vec![]));
        assert!(context.issue_main_thread_task(|| Ok(vec![])).is_err());
    }

    #[tokio::test]
    async fn next_event_waits_for_sender() {
        let (context, mut queue) = machine_queue();
        let sender = context.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            sender.queue_event("late", vec![]);
        });

        let event = queue.next_event().await.expect("event");
        assert_eq!(event.name, "late");

        drop(context);
        assert!(queue.next_event().await.is_none());
    }
}
