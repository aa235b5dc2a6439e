//! Registry of live connections.
//!
//! Entries hold a close signal and a weak reference to the connection state.
//! The connection task owns the socket and the strong reference, so the
//! registry never keeps a connection alive.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::watch;

use crate::connection::{ConnectionId, ConnectionState, SharedState};

struct Entry {
    peer: SocketAddr,
    close_tx: watch::Sender<bool>,
    state: Weak<Mutex<ConnectionState>>,
}

/// Handle held by the connection task.
pub struct ConnectionHandle {
    id: ConnectionId,
    state: SharedState,
    close_rx: watch::Receiver<bool>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// True once the registry has asked this connection to close.
    pub fn is_closed(&self) -> bool {
        *self.close_rx.borrow()
    }

    /// Wait for a close request.
    ///
    /// Also resolves if the registry entry is gone.
    pub async fn closed(&mut self) {
        while !*self.close_rx.borrow_and_update() {
            if self.close_rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Tracks every live connection so shutdown can reach them.
#[derive(Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<ConnectionId, Entry>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection and return the handle its task keeps.
    pub fn register(&self, peer: SocketAddr, state: ConnectionState) -> ConnectionHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let state = Arc::new(Mutex::new(state));
        let (close_tx, close_rx) = watch::channel(false);

        self.lock().insert(
            id,
            Entry {
                peer,
                close_tx,
                state: Arc::downgrade(&state),
            },
        );
        tracing::debug!(connection = id, %peer, "Connection registered");

        ConnectionHandle {
            id,
            state,
            close_rx,
        }
    }

    /// Remove a connection. Returns whether it was present.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.lock().remove(&id);
        if let Some(entry) = &removed {
            tracing::debug!(connection = id, peer = %entry.peer, "Connection unregistered");
        }
        removed.is_some()
    }

    /// Signal one connection to close. Returns whether it was present.
    pub fn close(&self, id: ConnectionId) -> bool {
        match self.lock().get(&id) {
            Some(entry) => {
                signal(entry);
                true
            }
            None => false,
        }
    }

    /// Signal every connection to close.
    ///
    /// Entries stay until their tasks unregister; a connection already asked
    /// to close is not signalled again.
    pub fn close_all(&self) -> usize {
        let entries = self.lock();
        let mut signalled = 0;
        for entry in entries.values() {
            if signal(entry) {
                signalled += 1;
            }
        }
        if signalled > 0 {
            tracing::info!(count = signalled, "Closing connections");
        }
        signalled
    }

    /// Signal every connection authenticated as `controller`.
    pub fn close_controller(&self, controller: &hap_pairing::ControllerId) -> usize {
        let entries = self.lock();
        let mut signalled = 0;
        for entry in entries.values() {
            let matches = entry
                .state
                .upgrade()
                .and_then(|state| {
                    state
                        .lock()
                        .ok()
                        .map(|s| s.controller() == Some(controller))
                })
                .unwrap_or(false);
            if matches && signal(entry) {
                signalled += 1;
            }
        }
        signalled
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of every registered connection, ascending.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// State of a live connection.
    pub fn state(&self, id: ConnectionId) -> Option<SharedState> {
        self.lock().get(&id).and_then(|e| e.state.upgrade())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionId, Entry>> {
        // Entries are only inserted and removed, so a poisoned map is still consistent.
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Send the close signal once. Returns whether this call sent it.
fn signal(entry: &Entry) -> bool {
    entry.close_tx.send_if_modified(|closed| {
        if *closed {
            false
        } else {
            *closed = true;
            true
        }
    })
}
