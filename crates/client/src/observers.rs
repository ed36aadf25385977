//! Change-notification registry for view state.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// Callbacks invoked with a reference to the latest view after each change.
pub struct Observers<V> {
    next_id: u64,
    callbacks: BTreeMap<ObserverId, Box<dyn FnMut(&V)>>,
}

impl<V> Default for Observers<V> {
    fn default() -> Self {
        Self {
            next_id: 0,
            callbacks: BTreeMap::new(),
        }
    }
}

impl<V> Observers<V> {
    pub fn register(&mut self, callback: impl FnMut(&V) + 'static) -> ObserverId {
        self.next_id += 1;
        let id = ObserverId(self.next_id);
        self.callbacks.insert(id, Box::new(callback));
        id
    }

    pub fn deregister(&mut self, id: ObserverId) -> bool {
        self.callbacks.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn notify(&mut self, view: &V) {
        for callback in self.callbacks.values_mut() {
            callback(view);
        }
    }
}
