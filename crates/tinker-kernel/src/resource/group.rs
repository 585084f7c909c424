//! Bounded resource groups.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, Weak};

use super::{Resource, ResourceId, Work};
use crate::config::Supplier;
use crate::error::{KernelError, Result};

/// Every group ever created, for the process-wide sweep.
static GROUPS: LazyLock<Mutex<Vec<Weak<GroupInner>>>> = LazyLock::new(|| Mutex::new(Vec::new()));

struct Pending {
    resource: Arc<dyn Resource>,
    work: Work,
}

#[derive(Default)]
struct GroupState {
    active: bool,
    resources: HashMap<ResourceId, Weak<dyn Resource>>,
    pending: VecDeque<Pending>,
}

pub(super) struct GroupInner {
    kind: &'static str,
    state: Mutex<GroupState>,
    limit: Supplier<usize>,
    /// Only set for groups built through [`ResourceQueue`](super::ResourceQueue).
    queue_depth: Option<Supplier<usize>>,
    next_id: AtomicU64,
}

/// A bounded set of live resources of one kind, owned by one computer.
///
/// The limit is read through a supplier on every admission decision; `0`
/// means unlimited.  Groups start closed: [`startup`](Self::startup) must be
/// called before anything is admitted.
///
/// The group is cheaply cloneable (`Arc`-backed) and safe to use from the
/// computer's thread and from I/O tasks at the same time.  The internal lock
/// is only held to check and update bookkeeping, never while admitted work or
/// close paths run.
#[derive(Clone)]
pub struct ResourceGroup {
    inner: Arc<GroupInner>,
}

impl ResourceGroup {
    /// Limit used when no configuration applies.
    pub const DEFAULT_LIMIT: usize = 512;

    /// A group that rejects work once `limit` resources are alive.
    pub fn new(kind: &'static str, limit: Supplier<usize>) -> Self {
        Self::build(kind, limit, None)
    }

    /// A group with a fixed limit.
    pub fn with_limit(kind: &'static str, limit: usize) -> Self {
        Self::new(kind, Arc::new(move || limit))
    }

    pub(super) fn build(
        kind: &'static str,
        limit: Supplier<usize>,
        queue_depth: Option<Supplier<usize>>,
    ) -> Self {
        let inner = Arc::new(GroupInner {
            kind,
            state: Mutex::new(GroupState::default()),
            limit,
            queue_depth,
            next_id: AtomicU64::new(1),
        });
        lock(&GROUPS).push(Arc::downgrade(&inner));
        Self { inner }
    }

    /// Short name used in logs (e.g. `"http_request"`).
    pub fn kind(&self) -> &'static str {
        self.inner.kind
    }

    /// The limit currently in force.
    pub fn limit(&self) -> usize {
        (self.inner.limit)()
    }

    /// Number of resources holding a slot.
    pub fn len(&self) -> usize {
        self.state().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of resources waiting for a slot.
    pub fn pending_len(&self) -> usize {
        self.state().pending.len()
    }

    pub fn is_active(&self) -> bool {
        self.state().active
    }

    /// Open the group for admissions.
    pub fn startup(&self) {
        self.state().active = true;
        tracing::debug!(kind = self.kind(), "resource group started");
    }

    /// Close the group and every resource in it.
    ///
    /// Waiting resources are closed without ever running.  Safe to call more
    /// than once, and before [`startup`](Self::startup).
    pub fn shutdown(&self) {
        let (live, pending) = {
            let mut state = self.state();
            state.active = false;
            let live: Vec<_> = state
                .resources
                .drain()
                .filter_map(|(_, weak)| weak.upgrade())
                .collect();
            let pending: Vec<_> = state.pending.drain(..).map(|p| p.resource).collect();
            (live, pending)
        };

        if !live.is_empty() || !pending.is_empty() {
            tracing::debug!(
                kind = self.kind(),
                live = live.len(),
                pending = pending.len(),
                "closing resources on shutdown"
            );
        }
        for resource in live.into_iter().chain(pending) {
            resource.close();
        }
    }

    /// Reserve a slot for `resource` directly, without queueing.
    pub fn register(&self, resource: &Arc<dyn Resource>) -> Result<ResourceId> {
        let mut state = self.state();
        if !state.active {
            return Err(KernelError::GroupClosed);
        }
        let limit = self.limit();
        if !has_capacity(&state, limit) {
            tracing::debug!(kind = self.kind(), limit, "resource rejected, group full");
            return Err(KernelError::CapacityExceeded { limit });
        }
        self.bind(&mut state, resource)
            .ok_or(KernelError::ResourceClosed)
    }

    /// Give back the slot held by `id`.  Unknown ids are ignored.
    pub fn unregister(&self, id: ResourceId) {
        let admitted = {
            let mut state = self.state();
            if state.resources.remove(&id).is_none() || !state.active {
                return;
            }
            self.admit_pending(&mut state)
        };
        run(admitted);
    }

    /// Admit `resource` and run `work`, now or once a slot frees up.
    ///
    /// Items already waiting are served first, so admission stays in arrival
    /// order even when the limit is raised at runtime.
    pub fn queue(&self, resource: Arc<dyn Resource>, work: Work) -> bool {
        let mut admitted = Vec::new();
        let accepted = {
            let mut state = self.state();
            if !state.active {
                return false;
            }
            admitted.extend(self.admit_pending(&mut state));

            let limit = self.limit();
            if state.pending.is_empty() && has_capacity(&state, limit) {
                match self.bind(&mut state, &resource) {
                    Some(id) => {
                        tracing::trace!(kind = self.kind(), id, "resource admitted");
                        admitted.push(work);
                        true
                    }
                    None => false,
                }
            } else if self.has_queue_room(&state) {
                state.pending.push_back(Pending { resource, work });
                tracing::trace!(
                    kind = self.kind(),
                    waiting = state.pending.len(),
                    "resource queued"
                );
                true
            } else {
                tracing::debug!(kind = self.kind(), limit, "resource rejected, group full");
                false
            }
        };
        run(admitted);
        accepted
    }

    // -- Private helpers ----------------------------------------------------

    fn state(&self) -> MutexGuard<'_, GroupState> {
        lock(&self.inner.state)
    }

    fn has_queue_room(&self, state: &GroupState) -> bool {
        self.inner
            .queue_depth
            .as_ref()
            .is_some_and(|depth| state.pending.len() < depth())
    }

    fn bind(&self, state: &mut GroupState, resource: &Arc<dyn Resource>) -> Option<ResourceId> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        if !resource.core().bind(id) {
            return None;
        }
        state.resources.insert(id, Arc::downgrade(resource));
        Some(id)
    }

    /// Move waiting items into free slots, oldest first.
    fn admit_pending(&self, state: &mut GroupState) -> Vec<Work> {
        let mut admitted = Vec::new();
        if state.pending.is_empty() {
            return admitted;
        }
        let limit = self.limit();
        while has_capacity(state, limit) {
            let Some(next) = state.pending.pop_front() else {
                break;
            };
            // Closed while waiting: drop it and try the next one.
            if self.bind(state, &next.resource).is_some() {
                admitted.push(next.work);
            }
        }
        admitted
    }

    /// Reclaim slots held by dead or finished resources.
    fn sweep(&self) -> usize {
        let (finished, admitted, dead) = {
            let mut state = self.state();
            let mut dead = Vec::new();
            let mut finished = Vec::new();
            for (id, weak) in &state.resources {
                match weak.upgrade() {
                    None => dead.push(*id),
                    Some(resource) => {
                        if resource.is_closed() || resource.core().is_task_finished() {
                            finished.push((*id, resource));
                        }
                    }
                }
            }
            for id in &dead {
                state.resources.remove(id);
            }
            let admitted = if state.active && !dead.is_empty() {
                self.admit_pending(&mut state)
            } else {
                Vec::new()
            };
            (finished, admitted, dead.len())
        };

        if dead > 0 {
            tracing::warn!(kind = self.kind(), count = dead, "reclaimed dropped resources");
        }
        run(admitted);

        for (id, resource) in &finished {
            tracing::warn!(kind = self.kind(), id, "closing resource that never closed itself");
            resource.close();
            self.unregister(*id);
        }
        dead + finished.len()
    }
}

impl std::fmt::Debug for ResourceGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("ResourceGroup")
            .field("kind", &self.inner.kind)
            .field("active", &state.active)
            .field("live", &state.resources.len())
            .field("pending", &state.pending.len())
            .finish()
    }
}

fn has_capacity(state: &GroupState, limit: usize) -> bool {
    limit == 0 || state.resources.len() < limit
}

fn run(work: Vec<Work>) {
    for w in work {
        w();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Sweep every group still alive, dropping registry entries for dead ones.
pub(super) fn sweep_all() -> usize {
    let groups: Vec<_> = {
        let mut registry = lock(&GROUPS);
        registry.retain(|weak| weak.strong_count() > 0);
        registry.iter().filter_map(Weak::upgrade).collect()
    };
    groups
        .into_iter()
        .map(|inner| ResourceGroup { inner }.sweep())
        .sum()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::resource::{ResourceCore, ResourceState};

    struct Dummy {
        core: ResourceCore,
        disposed: AtomicUsize,
    }

    impl Dummy {
        fn new(group: &ResourceGroup) -> Arc<Self> {
            Arc::new(Self {
                core: ResourceCore::new(group),
                disposed: AtomicUsize::new(0),
            })
        }
    }

    impl Resource for Dummy {
        fn core(&self) -> &ResourceCore {
            &self.core
        }

        fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn erased(r: &Arc<Dummy>) -> Arc<dyn Resource> {
        r.clone()
    }

    fn started(limit: usize) -> ResourceGroup {
        let group = ResourceGroup::with_limit("test", limit);
        group.startup();
        group
    }

    #[test]
    fn register_respects_limit() {
        let group = started(2);
        let a = Dummy::new(&group);
        let b = Dummy::new(&group);
        let c = Dummy::new(&group);

        let id_a = group.register(&erased(&a)).expect("a");
        let id_b = group.register(&erased(&b)).expect("b");
        assert_ne!(id_a, id_b);
        assert!(matches!(
            group.register(&erased(&c)),
            Err(KernelError::CapacityExceeded { limit: 2 })
        ));
        assert_eq!(group.len(), 2);

        group.unregister(id_a);
        assert!(group.register(&erased(&c)).is_ok());
        assert_eq!(group.len(), 2);
    }

    #[test]
    fn zero_limit_is_unlimited() {
        let group = started(0);
        let resources: Vec<_> = (0..1000).map(|_| Dummy::new(&group)).collect();
        for r in &resources {
            group.register(&erased(r)).expect("register");
        }
        assert_eq!(group.len(), 1000);
    }

    #[test]
    fn unregister_is_idempotent() {
        let group = started(4);
        let a = Dummy::new(&group);
        let b = Dummy::new(&group);
        let id = group.register(&erased(&a)).unwrap();
        group.register(&erased(&b)).unwrap();

        group.unregister(id);
        group.unregister(id);
        group.unregister(9_999);
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn closed_group_rejects() {
        let group = ResourceGroup::with_limit("test", 4);
        let a = Dummy::new(&group);
        assert!(matches!(
            group.register(&erased(&a)),
            Err(KernelError::GroupClosed)
        ));
        assert!(!group.queue(erased(&a), Box::new(|| {})));
    }

    #[test]
    fn queue_runs_work_immediately_when_free() {
        let group = started(1);
        let a = Dummy::new(&group);
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        assert!(a.queue(move |_| {
            r.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(a.core().state(), ResourceState::Active);

        let b = Dummy::new(&group);
        assert!(!b.queue(|_| panic!("must not run")));
        assert_eq!(b.core().state(), ResourceState::Pending);
    }

    #[test]
    fn close_is_idempotent_and_frees_slot() {
        let group = started(1);
        let a = Dummy::new(&group);
        assert!(a.queue(|_| {}));
        assert_eq!(group.len(), 1);

        assert!(a.close());
        assert!(!a.close());
        assert_eq!(a.disposed.load(Ordering::SeqCst), 1);
        assert_eq!(a.core().state(), ResourceState::Closed);
        assert_eq!(group.len(), 0);
    }

    #[test]
    fn closed_resource_is_not_admitted() {
        let group = started(1);
        let a = Dummy::new(&group);
        a.close();
        assert!(!a.queue(|_| panic!("closed resources never run")));
        assert_eq!(group.len(), 0);
    }

    #[test]
    fn shutdown_closes_everything() {
        let group = started(4);
        let resources: Vec<_> = (0..3).map(|_| Dummy::new(&group)).collect();
        for r in &resources {
            assert!(r.queue(|_| {}));
        }

        group.shutdown();
        assert_eq!(group.len(), 0);
        assert!(!group.is_active());
        for r in &resources {
            assert!(r.is_closed());
            assert_eq!(r.disposed.load(Ordering::SeqCst), 1);
        }

        let late = Dummy::new(&group);
        assert!(matches!(
            group.register(&erased(&late)),
            Err(KernelError::GroupClosed)
        ));
    }

    #[test]
    fn shutdown_before_startup_is_safe() {
        let group = ResourceGroup::with_limit("test", 1);
        group.shutdown();
        group.shutdown();
        assert!(group.is_empty());
    }

    #[test]
    fn limit_is_read_on_every_admission() {
        let limit = Arc::new(AtomicUsize::new(1));
        let l = limit.clone();
        let group = ResourceGroup::new("test", Arc::new(move || l.load(Ordering::SeqCst)));
        group.startup();

        let a = Dummy::new(&group);
        let b = Dummy::new(&group);
        assert!(a.queue(|_| {}));
        assert!(!b.queue(|_| {}));

        limit.store(2, Ordering::SeqCst);
        assert!(b.queue(|_| {}));

        // Lowering the limit never evicts admitted resources.
        limit.store(1, Ordering::SeqCst);
        assert_eq!(group.len(), 2);
        assert!(!a.is_closed() && !b.is_closed());
    }

    #[test]
    fn sweep_reclaims_dropped_resources() {
        let group = started(1);
        {
            let leaked = Dummy::new(&group);
            group.register(&erased(&leaked)).unwrap();
        }
        assert_eq!(group.len(), 1);

        assert_eq!(group.sweep(), 1);
        assert_eq!(group.len(), 0);
    }

    #[tokio::test]
    async fn sweep_closes_finished_tasks() {
        let group = started(1);
        let a = Dummy::new(&group);
        assert!(a.queue(|r| {
            let handle = tokio::runtime::Handle::current();
            // Finishes without closing its resource.
            r.core().spawn(&handle, async {});
        }));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert!(!a.is_closed());
        assert_eq!(group.sweep(), 1);
        assert!(a.is_closed());
        assert_eq!(group.len(), 0);
    }

    #[test]
    fn concurrent_register_unregister_never_exceeds_limit() {
        let group = started(3);
        let max_seen = Arc::new(AtomicUsize::new(0));
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let group = group.clone();
                let max_seen = max_seen.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let r = Dummy::new(&group);
                        if let Ok(id) = group.register(&erased(&r)) {
                            max_seen.fetch_max(group.len(), Ordering::SeqCst);
                            group.unregister(id);
                        }
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) <= 3);
        assert_eq!(group.len(), 0);
    }
}
