use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Ordered callback list that can change while it is being dispatched.
pub(crate) struct Subscribers<T: ?Sized> {
    next_id: AtomicU64,
    entries: RwLock<Vec<(u64, Arc<T>)>>,
}

impl<T: ?Sized> Subscribers<T> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, callback: Arc<T>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.write().push((id, callback));
        id
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries.read().iter().map(|(_, cb)| cb.clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Callback = dyn Fn() -> u32 + Send + Sync;

    #[test]
    fn keeps_subscription_order() {
        let subscribers: Subscribers<Callback> = Subscribers::new();
        subscribers.add(Arc::new(|| 1));
        let second = subscribers.add(Arc::new(|| 2));
        subscribers.add(Arc::new(|| 3));

        let called: Vec<u32> = subscribers.snapshot().iter().map(|cb| cb()).collect();
        assert_eq!(called, vec![1, 2, 3]);

        assert!(subscribers.remove(second));
        assert!(!subscribers.remove(second));
        let called: Vec<u32> = subscribers.snapshot().iter().map(|cb| cb()).collect();
        assert_eq!(called, vec![1, 3]);
    }

    #[test]
    fn snapshot_is_unaffected_by_later_changes() {
        let subscribers: Subscribers<Callback> = Subscribers::new();
        let first = subscribers.add(Arc::new(|| 1));

        let snapshot = subscribers.snapshot();
        subscribers.remove(first);
        subscribers.add(Arc::new(|| 2));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0](), 1);
        assert_eq!(subscribers.len(), 1);
    }
}
