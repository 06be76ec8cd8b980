mod chat;
mod identify;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use geolens_contracts::error::{ContractError, ContractResult};

pub use chat::{ChatSession, ChatSnapshot, ChatTurn};
pub use identify::{IdentifySession, IdentifySnapshot, ScanOutcome};

/// At most one request at a time; a second attempt is refused, never queued.
pub(crate) struct SingleFlight {
    label: &'static str,
    held: AtomicBool,
}

pub(crate) struct FlightGuard<'a> {
    gate: &'a SingleFlight,
}

impl SingleFlight {
    pub(crate) fn new(label: &'static str) -> Self {
        Self {
            label,
            held: AtomicBool::new(false),
        }
    }

    pub(crate) fn try_acquire(&self) -> ContractResult<FlightGuard<'_>> {
        if self
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(ContractError::Busy(self.label));
        }
        Ok(FlightGuard { gate: self })
    }

    pub(crate) fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.gate.held.store(false, Ordering::Release);
    }
}

/// Fans immutable snapshots out to channel subscribers.
pub(crate) struct SnapshotHub<T> {
    subscribers: Mutex<Vec<mpsc::Sender<Arc<T>>>>,
}

impl<T> SnapshotHub<T> {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self, current: T) -> mpsc::Receiver<Arc<T>> {
        let (tx, rx) = mpsc::channel();
        // The receiver exists, so this send cannot fail.
        let _ = tx.send(Arc::new(current));
        lock(&self.subscribers).push(tx);
        rx
    }

    pub(crate) fn publish(&self, snapshot: T) {
        let snapshot = Arc::new(snapshot);
        lock(&self.subscribers).retain(|tx| tx.send(Arc::clone(&snapshot)).is_ok());
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
