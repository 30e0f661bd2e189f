//! Weak-reference observer lists with no-op pruning.

use std::sync::{Mutex, Weak};

pub struct ObserverList<T: ?Sized> {
    observers: Mutex<Vec<Weak<T>>>,
}

impl<T: ?Sized> Default for ObserverList<T> {
    fn default() -> Self {
        Self { observers: Mutex::new(Vec::new()) }
    }
}

impl<T: ?Sized> ObserverList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, observer: Weak<T>) {
        if let Ok(mut guard) = self.observers.lock() {
            guard.push(observer);
        }
    }

    pub fn notify(&self, mut call: impl FnMut(&T)) {
        let observers: Vec<Weak<T>> = match self.observers.lock() {
            Ok(mut guard) => {
                guard.retain(|observer| observer.strong_count() > 0);
                guard.clone()
            }
            Err(_) => return,
        };
        for observer in observers {
            if let Some(observer) = observer.upgrade() {
                call(&observer);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    trait Counter: Send + Sync {
        fn bump(&self);
    }

    struct Hits(AtomicUsize);

    impl Counter for Hits {
        fn bump(&self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn dead_observers_are_skipped() {
        let list: ObserverList<dyn Counter> = ObserverList::new();
        let alive = Arc::new(Hits(AtomicUsize::new(0)));
        let doomed: Arc<dyn Counter> = Arc::new(Hits(AtomicUsize::new(0)));
        let alive_dyn: Arc<dyn Counter> = alive.clone();
        let alive_weak: Weak<dyn Counter> = Arc::downgrade(&alive_dyn);
        let doomed_weak: Weak<dyn Counter> = Arc::downgrade(&doomed);
        list.add(alive_weak);
        list.add(doomed_weak);
        drop(doomed);

        list.notify(|observer| observer.bump());
        assert_eq!(alive.0.load(Ordering::Relaxed), 1);
    }
}
