//! Subscription registry for attestation status changes
//!
//! The registry keeps only weak references: an observer stays registered for
//! as long as its owner keeps it alive, and owners deregister explicitly with
//! the [`ObserverId`] they got back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::types::AttestationStatus;

/// Sink for attestation status transitions
pub trait AttestationObserver: Send + Sync {
    fn on_attestation_status_changed(&self, status: &AttestationStatus);
}

impl<F> AttestationObserver for F
where
    F: Fn(&AttestationStatus) + Send + Sync,
{
    fn on_attestation_status_changed(&self, status: &AttestationStatus) {
        self(status)
    }
}

/// Handle returned on registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: AtomicU64,
    observers: Mutex<Vec<(ObserverId, Weak<dyn AttestationObserver>)>>,
}

impl ObserverRegistry {
    pub(crate) fn add(&self, observer: Arc<dyn AttestationObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.lock().push((id, Arc::downgrade(&observer)));
        id
    }

    pub(crate) fn remove(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(registered, _)| *registered != id);
        observers.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.observers.lock().len()
    }

    /// Deliver `status` to every live observer in registration order.
    ///
    /// Runs on a snapshot, so observers may (de)register from the callback.
    pub(crate) fn notify(&self, status: &AttestationStatus) {
        let snapshot: Vec<_> = {
            let mut observers = self.observers.lock();
            observers.retain(|(_, weak)| weak.strong_count() > 0);
            observers.iter().map(|(_, weak)| weak.clone()).collect()
        };

        for observer in snapshot.iter().filter_map(Weak::upgrade) {
            observer.on_attestation_status_changed(status);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl AttestationObserver for Recorder {
        fn on_attestation_status_changed(&self, status: &AttestationStatus) {
            self.log.lock().push(format!("{}:{}", self.name, status));
        }
    }

    #[test]
    fn test_notifies_in_registration_order() {
        let registry = ObserverRegistry::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first: Arc<dyn AttestationObserver> = Arc::new(Recorder { name: "a", log: log.clone() });
        let second: Arc<dyn AttestationObserver> = Arc::new(Recorder { name: "b", log: log.clone() });

        registry.add(first.clone());
        registry.add(second.clone());
        registry.notify(&AttestationStatus::InProgress);

        assert_eq!(*log.lock(), vec!["a:in progress", "b:in progress"]);
    }

    #[test]
    fn test_removed_observer_is_silent() {
        let registry = ObserverRegistry::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let observer: Arc<dyn AttestationObserver> = Arc::new(Recorder { name: "a", log: log.clone() });

        let id = registry.add(observer.clone());
        assert!(registry.remove(id));
        assert!(!registry.remove(id));

        registry.notify(&AttestationStatus::Success);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_dropped_observer_is_pruned() {
        let registry = ObserverRegistry::default();
        let observer: Arc<dyn AttestationObserver> = Arc::new(|_: &AttestationStatus| {});

        registry.add(observer.clone());
        assert_eq!(registry.len(), 1);

        drop(observer);
        registry.notify(&AttestationStatus::Success);
        assert_eq!(registry.len(), 0);
    }
}
