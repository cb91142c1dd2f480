//! Pending-call table.
//!
//! Each in-flight call is resolved exactly once by whichever of {response,
//! timeout, cancellation, shutdown} flips its `resolved` flag first. The
//! table entry is removed exactly once; later removals return `None`.

use jrpc_protocol::Response;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

/// A call awaiting its response.
#[derive(Debug)]
pub struct PendingCall {
    id: u64,
    resolved: AtomicBool,
    tx: Mutex<Option<oneshot::Sender<Response>>>,
}

impl PendingCall {
    fn new(id: u64, tx: oneshot::Sender<Response>) -> Self {
        Self {
            id,
            resolved: AtomicBool::new(false),
            tx: Mutex::new(Some(tx)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Claims the call. Returns `true` for exactly one caller.
    pub fn try_resolve(&self) -> bool {
        self.resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    /// Hands the response to the waiter. A waiter that already went away is
    /// not an error.
    pub fn deliver(&self, response: Response) {
        let Some(tx) = self.tx.lock().take() else {
            return;
        };
        if tx.send(response).is_err() {
            tracing::debug!("Discarding response {} for abandoned call", self.id);
        }
    }

    /// Drops the delivery channel; the waiter observes a closed channel.
    pub fn abandon(&self) {
        self.tx.lock().take();
    }
}

#[derive(Debug)]
struct TableState {
    next_id: u64,
    closed: bool,
    calls: HashMap<u64, Arc<PendingCall>>,
}

/// Per-client table of in-flight calls keyed by sequence id.
#[derive(Debug)]
pub struct PendingTable {
    state: Mutex<TableState>,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TableState {
                next_id: 1,
                closed: false,
                calls: HashMap::new(),
            }),
        }
    }

    /// Allocates the next sequence id and registers a call under it.
    /// Returns `None` once the table is closed.
    pub fn register(&self) -> Option<(Arc<PendingCall>, oneshot::Receiver<Response>)> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock();
        if state.closed {
            return None;
        }
        let id = state.next_id;
        state.next_id += 1;
        let call = Arc::new(PendingCall::new(id, tx));
        state.calls.insert(id, Arc::clone(&call));
        Some((call, rx))
    }

    pub fn remove(&self, id: u64) -> Option<Arc<PendingCall>> {
        self.state.lock().calls.remove(&id)
    }

    /// Closes the table and returns every call still registered.
    pub fn close(&self) -> Vec<Arc<PendingCall>> {
        let mut state = self.state.lock();
        state.closed = true;
        state.calls.drain().map(|(_, call)| call).collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jrpc_protocol::Id;
    use serde_json::json;

    #[test]
    fn test_sequence_starts_at_one() {
        let table = PendingTable::new();
        let (a, _rx_a) = table.register().unwrap();
        let (b, _rx_b) = table.register().unwrap();
        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_remove_exactly_once() {
        let table = PendingTable::new();
        let (call, _rx) = table.register().unwrap();
        assert!(table.remove(call.id()).is_some());
        assert!(table.remove(call.id()).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_resolve_has_one_winner() {
        let table = PendingTable::new();
        let (call, _rx) = table.register().unwrap();

        let winners: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| call.try_resolve() as usize))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });
        assert_eq!(winners, 1);
        assert!(call.is_resolved());
    }

    #[tokio::test]
    async fn test_deliver_reaches_waiter() {
        let table = PendingTable::new();
        let (call, rx) = table.register().unwrap();

        let call = table.remove(call.id()).unwrap();
        assert!(call.try_resolve());
        call.deliver(Response::ok(Id::from(call.id()), json!("pong")));

        let response = rx.await.unwrap();
        assert_eq!(response.result(), Some(&json!("pong")));
    }

    #[test]
    fn test_deliver_to_abandoned_waiter_is_silent() {
        let table = PendingTable::new();
        let (call, rx) = table.register().unwrap();
        drop(rx);
        call.deliver(Response::ok(Id::from(1), json!(null)));
        call.deliver(Response::ok(Id::from(1), json!(null)));
    }

    #[tokio::test]
    async fn test_close_drains_and_rejects() {
        let table = PendingTable::new();
        let (_a, rx_a) = table.register().unwrap();
        let (_b, _rx_b) = table.register().unwrap();

        let drained = table.close();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
        assert!(table.is_closed());
        assert!(table.register().is_none());

        for call in drained {
            call.abandon();
        }
        assert!(rx_a.await.is_err());
    }
}
