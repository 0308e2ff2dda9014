use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use uuid::Uuid;

/// Cooperative cancellation flag, checked between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn same_run(&self, other: &CancelFlag) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Flags of in-flight runs, keyed by entity id.
#[derive(Debug, Default)]
pub struct CancelRegistry {
    flags: Mutex<HashMap<Uuid, CancelFlag>>,
}

impl CancelRegistry {
    pub fn register(&self, entity_id: Uuid) -> CancelFlag {
        let flag = CancelFlag::default();
        self.lock().insert(entity_id, flag.clone());
        flag
    }

    /// Removes the entry only while it still holds `flag`, so a late call
    /// from a finished run never clears its successor's flag.
    pub fn finish(&self, entity_id: Uuid, flag: &CancelFlag) {
        let mut flags = self.lock();
        if flags.get(&entity_id).is_some_and(|f| f.same_run(flag)) {
            flags.remove(&entity_id);
        }
    }

    /// Returns false when no run is in flight for the entity.
    pub fn cancel(&self, entity_id: Uuid) -> bool {
        match self.lock().get(&entity_id) {
            Some(flag) => {
                flag.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let flags = self.lock();
        for flag in flags.values() {
            flag.cancel();
        }
        flags.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, CancelFlag>> {
        self.flags.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
