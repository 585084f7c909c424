//! Resource governance.
//!
//! Asynchronous work started on behalf of a program -- an HTTP request, an
//! open websocket, a URL check -- is a [`Resource`].  Every resource belongs
//! to exactly one [`ResourceGroup`], which bounds how many of them one
//! computer may have alive at once.  A [`ResourceQueue`] is a group that
//! makes excess work wait in a bounded FIFO instead of rejecting it.
//!
//! # Lifecycle
//!
//! ```text
//! created ──queue──► pending ──admitted──► active ──close──► closed
//!                       │                                     ▲
//!                       └──────────────close──────────────────┘
//! ```
//!
//! Closing is idempotent.  Whatever path closes a resource first (its own
//! completion, an explicit close from the program, or the group shutting
//! down) aborts its task and releases its slot; later closes do nothing.
//!
//! # Cleanup
//!
//! [`cleanup`] sweeps every live group in the process and reclaims slots held
//! by resources that were dropped or finished without closing.  It is a
//! safety net; correct resources release their slot when they close.

mod group;
mod queue;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::task::{AbortHandle, JoinHandle};

pub use group::ResourceGroup;
pub use queue::ResourceQueue;

/// Identifier of a resource within its group.  Never zero.
pub type ResourceId = u64;

/// Work run once a resource has been admitted.
pub type Work = Box<dyn FnOnce() + Send>;

/// Where a resource is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceState {
    /// Created or waiting for a slot.
    Pending,
    /// Holding a slot in its group.
    Active,
    /// Finished, failed or cancelled; holds nothing.
    Closed,
}

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

/// A unit of asynchronous work that occupies a slot in a [`ResourceGroup`].
pub trait Resource: Send + Sync + 'static {
    /// Shared bookkeeping for this resource.
    fn core(&self) -> &ResourceCore;

    /// Release anything the resource holds besides its task (open
    /// connections, buffers).  Runs at most once, as part of [`close`].
    ///
    /// [`close`]: Resource::close
    fn dispose(&self) {}

    fn is_closed(&self) -> bool {
        self.core().is_closed()
    }

    /// Close the resource: abort its task, dispose it and free its slot.
    ///
    /// Returns `true` only for the call that actually closed it.
    fn close(&self) -> bool {
        if !self.core().mark_closed() {
            return false;
        }
        self.dispose();
        self.core().release();
        true
    }

    /// Ask the owning group for a slot and run `action` once admitted.
    ///
    /// Returns `false` if the group rejected the resource (it is full, or
    /// shut down).  `action` may run before this returns, or later from
    /// whichever thread frees a slot.
    fn queue<F>(self: &Arc<Self>, action: F) -> bool
    where
        Self: Sized,
        F: FnOnce(Arc<Self>) + Send + 'static,
    {
        let group = self.core().group().clone();
        let this = Arc::clone(self);
        let erased: Arc<dyn Resource> = this.clone();
        group.queue(erased, Box::new(move || action(this)))
    }
}

/// Bookkeeping shared by every resource: owning group, id, closed flag and
/// the abort handle of the in-flight task.
pub struct ResourceCore {
    group: ResourceGroup,
    id: AtomicU64,
    closed: AtomicBool,
    task: Mutex<Option<AbortHandle>>,
}

impl ResourceCore {
    pub fn new(group: &ResourceGroup) -> Self {
        Self {
            group: group.clone(),
            id: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn group(&self) -> &ResourceGroup {
        &self.group
    }

    /// The id assigned on admission, if admitted.
    pub fn id(&self) -> Option<ResourceId> {
        match self.id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ResourceState {
        if self.is_closed() {
            ResourceState::Closed
        } else if self.id().is_some() {
            ResourceState::Active
        } else {
            ResourceState::Pending
        }
    }

    /// Spawn the resource's asynchronous work on `runtime`.
    ///
    /// The task is aborted when the resource closes.
    pub fn spawn<F>(&self, runtime: &Handle, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = runtime.spawn(future);
        self.attach_task(handle.abort_handle());
        handle
    }

    /// Track `task` so that closing the resource aborts it.  A task attached
    /// to an already-closed resource is aborted straight away.
    pub fn attach_task(&self, task: AbortHandle) {
        let mut slot = match self.task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.is_closed() {
            task.abort();
            return;
        }
        *slot = Some(task);
    }

    /// Whether the attached task has run to completion (or was aborted).
    pub fn is_task_finished(&self) -> bool {
        match self.task.lock() {
            Ok(guard) => guard.as_ref().is_some_and(AbortHandle::is_finished),
            Err(poisoned) => poisoned.into_inner().as_ref().is_some_and(AbortHandle::is_finished),
        }
    }

    /// Record `id` as this resource's slot.  Returns `false` if the resource
    /// was closed before it could be admitted.
    pub(crate) fn bind(&self, id: ResourceId) -> bool {
        self.id.store(id, Ordering::SeqCst);
        !self.closed.load(Ordering::SeqCst)
    }

    /// Flip the closed flag; `true` for the first caller only.
    fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    /// Abort the task and give the slot back.
    fn release(&self) {
        let task = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }
        if let Some(id) = self.id() {
            self.group.unregister(id);
        }
    }
}

impl std::fmt::Debug for ResourceCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCore")
            .field("group", &self.group.kind())
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Process-wide cleanup
// ---------------------------------------------------------------------------

/// Sweep every live resource group, reclaiming leaked slots.
///
/// Returns the number of resources reclaimed.  Cheap enough to call every
/// host tick.
pub fn cleanup() -> usize {
    group::sweep_all()
}
