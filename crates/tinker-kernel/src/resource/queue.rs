//! Resource groups with a bounded waiting line.

use std::sync::Arc;

use super::ResourceGroup;
use crate::config::Supplier;

/// A [`ResourceGroup`] that makes excess work wait instead of failing.
///
/// Up to `limit` resources run at once; up to `depth` more wait in FIFO
/// order and are started one by one as running resources close.  Beyond
/// that, [`Resource::queue`](super::Resource::queue) returns `false`.
#[derive(Clone, Debug)]
pub struct ResourceQueue {
    group: ResourceGroup,
}

impl ResourceQueue {
    pub fn new(kind: &'static str, limit: Supplier<usize>, depth: Supplier<usize>) -> Self {
        Self {
            group: ResourceGroup::build(kind, limit, Some(depth)),
        }
    }

    pub fn with_limits(kind: &'static str, limit: usize, depth: usize) -> Self {
        Self::new(kind, Arc::new(move || limit), Arc::new(move || depth))
    }

    /// The underlying group, which resources are created against.
    pub fn group(&self) -> &ResourceGroup {
        &self.group
    }

    pub fn startup(&self) {
        self.group.startup();
    }

    pub fn shutdown(&self) {
        self.group.shutdown();
    }

    /// Resources currently running.
    pub fn len(&self) -> usize {
        self.group.len()
    }

    pub fn is_empty(&self) -> bool {
        self.group.is_empty()
    }

    /// Resources waiting for a slot.
    pub fn pending_len(&self) -> usize {
        self.group.pending_len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::resource::{Resource, ResourceCore, ResourceState};

    struct Job {
        core: ResourceCore,
        label: usize,
    }

    impl Resource for Job {
        fn core(&self) -> &ResourceCore {
            &self.core
        }
    }

    fn job(queue: &ResourceQueue, label: usize) -> Arc<Job> {
        Arc::new(Job {
            core: ResourceCore::new(queue.group()),
            label,
        })
    }

    fn started(limit: usize, depth: usize) -> ResourceQueue {
        let queue = ResourceQueue::with_limits("test", limit, depth);
        queue.startup();
        queue
    }

    #[test]
    fn accepts_limit_plus_depth_then_rejects() {
        let queue = started(2, 3);
        let jobs: Vec<_> = (0..6).map(|i| job(&queue, i)).collect();
        let accepted: Vec<bool> = jobs.iter().map(|j| j.queue(|_| {})).collect();

        assert_eq!(accepted, vec![true, true, true, true, true, false]);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pending_len(), 3);
        assert_eq!(jobs[2].core().state(), ResourceState::Pending);
    }

    #[test]
    fn waiting_work_starts_in_fifo_order() {
        let queue = started(1, 8);
        let order = Arc::new(Mutex::new(Vec::new()));
        let jobs: Vec<_> = (0..4).map(|i| job(&queue, i)).collect();
        for j in &jobs {
            let order = order.clone();
            assert!(j.queue(move |j| order.lock().unwrap().push(j.label)));
        }
        assert_eq!(*order.lock().unwrap(), vec![0]);

        for j in &jobs {
            j.close();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
        assert!(queue.is_empty());
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn closed_while_waiting_is_skipped() {
        let queue = started(1, 8);
        let ran = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<_> = (0..3).map(|i| job(&queue, i)).collect();
        for j in &jobs {
            let ran = ran.clone();
            assert!(j.queue(move |_| {
                ran.fetch_add(1, Ordering::SeqCst);
            }));
        }

        jobs[1].close();
        jobs[0].close();

        assert_eq!(ran.load(Ordering::SeqCst), 2);
        assert_eq!(jobs[2].core().state(), ResourceState::Active);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn shutdown_closes_waiting_work_without_running_it() {
        let queue = started(1, 4);
        let running = job(&queue, 0);
        let waiting = job(&queue, 1);
        assert!(running.queue(|_| {}));
        assert!(waiting.queue(|_| panic!("waiting work must not start")));

        queue.shutdown();
        assert!(running.is_closed());
        assert!(waiting.is_closed());
        assert_eq!(queue.pending_len(), 0);
        assert!(!job(&queue, 2).queue(|_| {}));
    }

    #[test]
    fn zero_depth_rejects_when_full() {
        let queue = started(1, 0);
        assert!(job(&queue, 0).queue(|_| {}));
        assert!(!job(&queue, 1).queue(|_| {}));
    }
}
