//! Listener bookkeeping for watcher signals.

use std::sync::Arc;

/// Identifies a registered listener so it can be removed later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// An ordered set of callbacks.
pub(crate) struct ListenerSet<T: ?Sized> {
    entries: Vec<(ListenerId, Arc<T>)>,
    next_id: u64,
}

impl<T: ?Sized> ListenerSet<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    pub(crate) fn add(&mut self, callback: Arc<T>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, callback));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Clone out the callbacks, in registration order, so they can be
    /// invoked without holding a borrow of the set.
    pub(crate) fn callbacks(&self) -> Vec<Arc<T>> {
        self.entries.iter().map(|(_, cb)| Arc::clone(cb)).collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<Arc<T>> {
        self.entries.drain(..).map(|(_, cb)| cb).collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
