//! Outstanding-call tables.
//!
//! Every entry is owned by a guard held by the awaiting future. The guard
//! removes the entry when the future settles or is dropped, so no entry
//! outlives the call that created it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use portcall_core::{CorrelationKey, FuncName};
use serde_json::Value;
use tokio::sync::oneshot;

/// Result delivered to a pending call: `Ok` on success, `Err` with the
/// remote error payload on failure.
pub(crate) type Settlement = Result<Value, Value>;

#[derive(Debug)]
struct PendingEntry {
    ticket: u64,
    tx: oneshot::Sender<Settlement>,
}

/// Calls awaiting a response, keyed by correlation key.
#[derive(Debug, Default)]
pub(crate) struct PendingResponses {
    entries: Mutex<HashMap<CorrelationKey, PendingEntry>>,
    next_ticket: AtomicU64,
}

impl PendingResponses {
    /// Registers `key`. Returns `None` if it is already pending.
    pub(crate) fn register(&self, key: &CorrelationKey) -> Option<(PendingGuard<'_>, oneshot::Receiver<Settlement>)> {
        let mut entries = self.entries.lock();
        if entries.contains_key(key) {
            return None;
        }
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        entries.insert(key.clone(), PendingEntry { ticket, tx });
        Some((
            PendingGuard {
                table: self,
                key: key.clone(),
                ticket,
            },
            rx,
        ))
    }

    /// Settles and removes the entry for `key`. Returns `false` if none exists.
    pub(crate) fn settle(&self, key: &CorrelationKey, settlement: Settlement) -> bool {
        let Some(entry) = self.entries.lock().remove(key) else {
            return false;
        };
        // The caller may have given up in the meantime; that is not an error.
        let _ = entry.tx.send(settlement);
        true
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Removes its pending entry on drop, unless the key was re-registered.
#[derive(Debug)]
pub(crate) struct PendingGuard<'a> {
    table: &'a PendingResponses,
    key: CorrelationKey,
    ticket: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        let mut entries = self.table.entries.lock();
        if entries.get(&self.key).is_some_and(|entry| entry.ticket == self.ticket) {
            entries.remove(&self.key);
        }
    }
}

/// Passive waiters keyed by function.
///
/// All waiters for a function share one slot and are resolved together by
/// the next call to it.
#[derive(Debug, Default)]
pub(crate) struct Waiters {
    slots: Mutex<HashMap<FuncName, Vec<(u64, oneshot::Sender<Vec<Value>>)>>>,
    next_ticket: AtomicU64,
}

impl Waiters {
    pub(crate) fn register(&self, func: &FuncName) -> (WaiterGuard<'_>, oneshot::Receiver<Vec<Value>>) {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.slots
            .lock()
            .entry(func.clone())
            .or_default()
            .push((ticket, tx));
        (
            WaiterGuard {
                waiters: self,
                func: func.clone(),
                ticket,
            },
            rx,
        )
    }

    /// Resolves every waiter for `func` with `args`. Returns how many woke.
    pub(crate) fn resolve(&self, func: &FuncName, args: &[Value]) -> usize {
        let Some(slot) = self.slots.lock().remove(func) else {
            return 0;
        };
        slot.into_iter()
            .filter_map(|(_, tx)| tx.send(args.to_vec()).ok())
            .count()
    }

    /// Removes waiter `ticket` and any abandoned ones for `func`, dropping
    /// the slot once empty.
    fn release(&self, func: &FuncName, ticket: u64) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(func) {
            slot.retain(|(id, tx)| *id != ticket && !tx.is_closed());
            if slot.is_empty() {
                slots.remove(func);
            }
        }
    }

    /// Number of functions with at least one live waiter.
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

/// Releases its waiter on drop.
#[derive(Debug)]
pub(crate) struct WaiterGuard<'a> {
    waiters: &'a Waiters,
    func: FuncName,
    ticket: u64,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.waiters.release(&self.func, self.ticket);
    }
}

/// Counts requests currently being handled.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    count: Arc<AtomicU64>,
}

impl InFlight {
    /// Increments the counter until the returned guard is dropped.
    pub(crate) fn guard(&self) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            count: Arc::clone(&self.count),
        }
    }

    pub(crate) fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Waits until no request is in flight, up to `timeout`.
    pub(crate) async fn wait_for_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count() == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Decrements the in-flight counter when dropped, including on unwind.
#[derive(Debug)]
pub(crate) struct InFlightGuard {
    count: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Relaxed);
    }
}
