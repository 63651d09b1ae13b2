//! The live set of peers a listener relays to.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;

use crate::worker::ConnectionWorker;

pub type PeerId = u64;

/// Connection workers currently attached to one listener session.
///
/// Every mutation and every iteration goes through one lock; fan-out works
/// on a snapshot taken under that lock and sends after releasing it, so a
/// peer that closes mid-broadcast can unregister itself without deadlock
/// and without disturbing delivery to the rest.
pub(crate) struct PeerRegistry {
    inner: Mutex<Peers>,
    next_id: AtomicU64,
}

struct Peers {
    workers: HashMap<PeerId, Arc<ConnectionWorker>>,
    sealed: bool,
}

impl PeerRegistry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Peers {
                workers: HashMap::new(),
                sealed: false,
            }),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn next_id(&self) -> PeerId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Adds a worker. Refused once the registry has been sealed.
    pub(crate) fn insert(&self, worker: Arc<ConnectionWorker>) -> bool {
        let mut peers = self.inner.lock();
        if peers.sealed {
            return false;
        }
        peers.workers.insert(worker.id(), worker);
        true
    }

    pub(crate) fn remove(&self, id: PeerId) -> Option<Arc<ConnectionWorker>> {
        self.inner.lock().workers.remove(&id)
    }

    /// Refuses further inserts and hands back everything still registered.
    pub(crate) fn seal(&self) -> Vec<Arc<ConnectionWorker>> {
        let mut peers = self.inner.lock();
        peers.sealed = true;
        peers.workers.drain().map(|(_, worker)| worker).collect()
    }

    /// Point-in-time copy of the registered workers.
    pub(crate) fn snapshot(&self) -> Vec<Arc<ConnectionWorker>> {
        self.inner.lock().workers.values().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().workers.len()
    }

    /// Sends `line` to every registered worker except `skip`.
    pub(crate) fn fan_out(&self, line: &str, skip: Option<PeerId>) {
        for worker in self.snapshot() {
            if Some(worker.id()) != skip {
                worker.send(line);
            }
        }
    }
}
