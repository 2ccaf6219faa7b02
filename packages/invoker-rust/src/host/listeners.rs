//! Fan-out of channel events to any number of listeners.

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// A set of listeners, each receiving its own copy of every emitted item.
///
/// Listeners unsubscribe by dropping their receiver; closed senders are
/// pruned on the next emit.
#[derive(Debug)]
pub struct ListenerSet<T> {
    senders: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T: Clone> ListenerSet<T> {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    /// Adds a listener and returns its receiving end.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().push(tx);
        rx
    }

    /// Delivers `item` to every live listener, returning how many received it.
    pub fn emit(&self, item: &T) -> usize {
        let mut senders = self.senders.lock();
        senders.retain(|tx| tx.send(item.clone()).is_ok());
        senders.len()
    }

    /// Returns the number of listeners whose receiver is still alive.
    #[must_use]
    pub fn len(&self) -> usize {
        self.senders.lock().iter().filter(|tx| !tx.is_closed()).count()
    }

    /// Returns `true` if no live listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Default for ListenerSet<T> {
    fn default() -> Self {
        Self::new()
    }
}
