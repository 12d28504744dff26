use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::watch;
use tokio::time::Instant;

use super::messages::{BatchResults, WorkDescriptor, WorkResult};

/// Slot for one descriptor. `Filled` is terminal.
#[derive(Debug, Clone, PartialEq)]
enum Slot {
    Empty,
    /// The worker gave up; only the fallback can fill this slot now.
    Abandoned,
    Filled(WorkResult),
}

/// In-flight result slots of one batch call.
///
/// Every mutation goes through a single lock and is a compare-and-fill: the
/// first writer of a slot wins and every later writer is a no-op. The number
/// of slots still waiting for a worker is published on a watch channel so the
/// collector can wait for the batch to settle without polling.
#[derive(Debug)]
pub struct BatchSession {
    descriptors: Vec<WorkDescriptor>,
    slots: Mutex<HashMap<String, Slot>>,
    outstanding: watch::Sender<usize>,
    started: Instant,
}

impl BatchSession {
    /// `descriptors` must be distinct.
    pub fn new(descriptors: Vec<WorkDescriptor>) -> Self {
        let slots = descriptors
            .iter()
            .map(|descriptor| (descriptor.key.clone(), Slot::Empty))
            .collect::<HashMap<_, _>>();
        let (outstanding, _) = watch::channel(slots.len());
        BatchSession {
            descriptors,
            slots: Mutex::new(slots),
            outstanding,
            started: Instant::now(),
        }
    }

    pub fn descriptors(&self) -> &[WorkDescriptor] {
        &self.descriptors
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Slots still waiting on a live worker.
    pub fn outstanding(&self) -> usize {
        *self.outstanding.borrow()
    }

    /// Fill the slot for `result.key` if nothing filled it before.
    /// Returns whether this call won the slot.
    pub fn fill(&self, result: WorkResult) -> bool {
        let mut slots = self.lock_slots();
        let Some(slot) = slots.get_mut(&result.key) else {
            warn!(key = result.key.as_str(); "Result for a key outside the batch, ignoring");
            return false;
        };
        match slot {
            Slot::Filled(existing) => {
                debug!(key = result.key.as_str(); "Slot already filled (default: {}), discarding late result", existing.is_default);
                false
            }
            Slot::Empty => {
                *slot = Slot::Filled(result);
                self.publish(&slots);
                true
            }
            Slot::Abandoned => {
                *slot = Slot::Filled(result);
                true
            }
        }
    }

    /// Mark the slot for `key` as never going to be filled by its worker.
    pub fn abandon(&self, key: &str) -> bool {
        let mut slots = self.lock_slots();
        match slots.get_mut(key) {
            Some(slot @ Slot::Empty) => {
                *slot = Slot::Abandoned;
                self.publish(&slots);
                true
            }
            _ => false,
        }
    }

    pub fn is_filled(&self, key: &str) -> bool {
        matches!(self.lock_slots().get(key), Some(Slot::Filled(_)))
    }

    /// Fill every slot that has no result yet with a default.
    /// Returns how many slots were defaulted.
    pub fn fill_defaults(&self, default_value: i64, elapsed: Duration) -> usize {
        let mut slots = self.lock_slots();
        let mut defaulted = 0;
        for (key, slot) in slots.iter_mut() {
            if !matches!(slot, Slot::Filled(_)) {
                debug!(key = key.as_str(); "Filling slot with default value");
                *slot = Slot::Filled(WorkResult::fallback(key.clone(), default_value, elapsed));
                defaulted += 1;
            }
        }
        if defaulted > 0 {
            self.publish(&slots);
        }
        defaulted
    }

    /// Resolves once no slot is waiting on a live worker.
    pub async fn settled(&self) {
        let mut outstanding = self.outstanding.subscribe();
        let _ = outstanding.wait_for(|count| *count == 0).await;
    }

    /// Snapshot of the filled slots.
    pub fn results(&self) -> BatchResults {
        let slots = self.lock_slots();
        self.descriptors
            .iter()
            .filter_map(|descriptor| match slots.get(&descriptor.key) {
                Some(Slot::Filled(result)) => Some((descriptor.clone(), result.clone())),
                _ => None,
            })
            .collect()
    }

    fn publish(&self, slots: &HashMap<String, Slot>) {
        let empty = slots
            .values()
            .filter(|slot| matches!(slot, Slot::Empty))
            .count();
        self.outstanding.send_replace(empty);
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        // a panic while holding the lock cannot leave a slot half-written
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
