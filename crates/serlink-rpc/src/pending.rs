use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;

use crate::error::{Result, RpcError};
use crate::message::MessageKind;

/// Number of distinct request ids on the wire.
pub const ID_SPACE: usize = 256;

/// The reply that completed a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// `Response` or `Error`.
    pub kind: MessageKind,
    pub payload: Bytes,
}

/// One outstanding call, shared by the caller and the dispatch thread.
#[derive(Debug)]
pub struct PendingRequest {
    id: u8,
    slot: Mutex<Option<Reply>>,
    done: Condvar,
}

impl PendingRequest {
    fn new(id: u8) -> Self {
        Self {
            id,
            slot: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// Store the reply and wake the caller. Only the first reply counts.
    pub fn complete(&self, reply: Reply) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }
        *slot = Some(reply);
        self.done.notify_all();
        true
    }

    pub fn is_complete(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Wait for the reply. `None` on timeout.
    pub fn wait(&self, timeout: Duration) -> Option<Reply> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut slot, _) = self
            .done
            .wait_timeout_while(slot, timeout, |slot| slot.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        slot.take()
    }
}

#[derive(Debug)]
struct Inner {
    entries: HashMap<u8, Arc<PendingRequest>>,
    next_id: u8,
}

/// Outstanding calls keyed by request id.
///
/// Ids come from a wrapping 8-bit counter starting at 1. An id that is still
/// in flight is skipped, so two live calls never share an id.
#[derive(Debug)]
pub struct PendingTable {
    inner: Mutex<Inner>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    /// Reserve a fresh id and register its pending entry.
    pub fn allocate(&self) -> Result<Arc<PendingRequest>> {
        let mut inner = self.lock();
        if inner.entries.len() >= ID_SPACE {
            return Err(RpcError::TooManyInFlight);
        }
        loop {
            let id = inner.next_id;
            inner.next_id = id.wrapping_add(1);
            if !inner.entries.contains_key(&id) {
                let pending = Arc::new(PendingRequest::new(id));
                inner.entries.insert(id, Arc::clone(&pending));
                return Ok(pending);
            }
        }
    }

    /// Hand a reply to the caller waiting on `id`.
    ///
    /// Returns `false` when nobody is waiting, e.g. for a reply that arrives
    /// after its call timed out.
    pub fn complete(&self, id: u8, reply: Reply) -> bool {
        let pending = self.lock().entries.get(&id).cloned();
        match pending {
            Some(pending) => pending.complete(reply),
            None => false,
        }
    }

    pub fn remove(&self, id: u8) -> Option<Arc<PendingRequest>> {
        self.lock().entries.remove(&id)
    }

    pub fn contains(&self, id: u8) -> bool {
        self.lock().entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;

    fn response(payload: &'static [u8]) -> Reply {
        Reply {
            kind: MessageKind::Response,
            payload: Bytes::from_static(payload),
        }
    }

    #[test]
    fn ids_start_at_one_and_increment() {
        let table = PendingTable::new();
        assert_eq!(table.allocate().unwrap().id(), 1);
        assert_eq!(table.allocate().unwrap().id(), 2);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn ids_wrap_and_skip_in_flight() {
        let table = PendingTable::new();
        let first = table.allocate().unwrap();
        assert_eq!(first.id(), 1);
        for _ in 0..254 {
            let pending = table.allocate().unwrap();
            table.remove(pending.id());
        }
        // Counter is now at 0; 0 is free, 1 is still pending.
        assert_eq!(table.allocate().unwrap().id(), 0);
        assert_eq!(table.allocate().unwrap().id(), 2);
    }

    #[test]
    fn exhausted_id_space_is_reported() {
        let table = PendingTable::new();
        let held: Vec<_> = (0..ID_SPACE).map(|_| table.allocate().unwrap()).collect();
        assert_eq!(table.len(), ID_SPACE);
        assert!(matches!(table.allocate(), Err(RpcError::TooManyInFlight)));

        table.remove(held[10].id());
        assert_eq!(table.allocate().unwrap().id(), held[10].id());
    }

    #[test]
    fn complete_wakes_waiter() {
        let table = Arc::new(PendingTable::new());
        let pending = table.allocate().unwrap();
        let id = pending.id();

        let completer = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                assert!(table.complete(id, response(b"done")));
            })
        };

        let reply = pending.wait(Duration::from_secs(2)).expect("reply should arrive");
        assert_eq!(reply, response(b"done"));
        completer.join().expect("completer should finish");
    }

    #[test]
    fn reply_before_wait_is_kept() {
        let table = PendingTable::new();
        let pending = table.allocate().unwrap();
        assert!(table.complete(pending.id(), response(b"early")));
        assert!(pending.is_complete());
        assert_eq!(pending.wait(Duration::ZERO), Some(response(b"early")));
    }

    #[test]
    fn second_reply_is_ignored() {
        let table = PendingTable::new();
        let pending = table.allocate().unwrap();
        assert!(table.complete(pending.id(), response(b"first")));
        assert!(!table.complete(pending.id(), response(b"second")));
        assert_eq!(pending.wait(Duration::ZERO), Some(response(b"first")));
    }

    #[test]
    fn wait_times_out() {
        let table = PendingTable::new();
        let pending = table.allocate().unwrap();
        let started = Instant::now();
        assert_eq!(pending.wait(Duration::from_millis(30)), None);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn unknown_id_is_dropped() {
        let table = PendingTable::new();
        assert!(!table.complete(42, response(b"late")));
        assert!(table.is_empty());
    }
}
