//! Per-instance mutual exclusion.
//!
//! Movements and retirements on one instance run read → validate → write under
//! that instance's mutex; different instances never contend. The store's
//! version check still guards against writers outside this process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use equiptrack_core::InstanceId;

use crate::error::InventoryError;

#[derive(Debug, Default)]
pub struct InstanceLocks {
    table: Mutex<HashMap<InstanceId, Arc<Mutex<()>>>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `instance_id`.
    pub fn with_lock<T>(&self, instance_id: InstanceId, f: impl FnOnce() -> T) -> Result<T, InventoryError> {
        let slot = {
            let mut table = self.table.lock().map_err(|_| {
                InventoryError::storage("instance lock table poisoned").with_instance(instance_id)
            })?;
            Arc::clone(table.entry(instance_id).or_default())
        };

        let result = {
            // Poisoning is ignored: the mutex guards no data.
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            f()
        };

        self.release(instance_id, slot);
        Ok(result)
    }

    /// Drop the table entry once no other caller holds or waits on it.
    fn release(&self, instance_id: InstanceId, slot: Arc<Mutex<()>>) {
        if let Ok(mut table) = self.table.lock() {
            // One reference in the table plus ours.
            if Arc::strong_count(&slot) == 2 {
                table.remove(&instance_id);
            }
        }
    }

    /// Number of instances with a live lock entry.
    pub fn len(&self) -> usize {
        self.table.lock().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;

    #[test]
    fn same_instance_is_serialized() {
        let locks = Arc::new(InstanceLocks::new());
        let id = InstanceId::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let (locks, inside, max_seen) = (locks.clone(), inside.clone(), max_seen.clone());
                thread::spawn(move || {
                    locks
                        .with_lock(id, || {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(2));
                            inside.fetch_sub(1, Ordering::SeqCst);
                        })
                        .unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[test]
    fn entries_are_released_after_use() {
        let locks = InstanceLocks::new();
        let value = locks.with_lock(InstanceId::new(), || 7).unwrap();
        assert_eq!(value, 7);
        assert!(locks.is_empty());
    }
}
