//! Session registry: the single source of truth for "is this running"

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use kf_core::{ConfigId, ForwardError};

use crate::session::ForwardSession;

/// Registered sessions plus one lock per config id
///
/// Start and stop for the same id are serialized through `lock`; the map
/// itself is sharded so reads never wait on unrelated configs.
pub struct SessionRegistry {
    sessions: DashMap<ConfigId, Arc<ForwardSession>>,
    locks: DashMap<ConfigId, Arc<Mutex<()>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Acquire the per-config operation lock
    pub async fn lock(&self, id: ConfigId) -> ConfigLock<'_> {
        let mutex = self
            .locks
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        ConfigLock {
            registry: self,
            id,
            guard: Some(mutex.lock_owned().await),
        }
    }

    /// Whether a start or stop for this id is in flight
    pub fn is_busy(&self, id: ConfigId) -> bool {
        self.locks
            .get(&id)
            .map(|mutex| mutex.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Register a session; fails if one already exists for its config
    pub fn insert(&self, session: Arc<ForwardSession>) -> Result<(), ForwardError> {
        match self.sessions.entry(session.config_id()) {
            Entry::Occupied(entry) => Err(ForwardError::AlreadyRunning(*entry.key())),
            Entry::Vacant(entry) => {
                entry.insert(session);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: ConfigId) -> Option<Arc<ForwardSession>> {
        self.sessions.get(&id).map(|r| Arc::clone(&r))
    }

    pub fn contains(&self, id: ConfigId) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Registered and in a live state
    pub fn is_running(&self, id: ConfigId) -> bool {
        self.sessions
            .get(&id)
            .map(|session| session.state().is_live())
            .unwrap_or(false)
    }

    /// Remove the entry only if it still belongs to the given session instance
    pub fn remove_if_instance(&self, id: ConfigId, instance: u64) -> Option<Arc<ForwardSession>> {
        self.sessions
            .remove_if(&id, |_, session| session.instance() == instance)
            .map(|(_, session)| session)
    }

    /// All sessions, ordered by config id
    pub fn list(&self) -> Vec<Arc<ForwardSession>> {
        let mut sessions: Vec<_> = self.sessions.iter().map(|r| Arc::clone(&r)).collect();
        sessions.sort_by_key(|s| s.config_id());
        sessions
    }

    pub fn ids(&self) -> Vec<ConfigId> {
        let mut ids: Vec<_> = self.sessions.iter().map(|r| *r.key()).collect();
        ids.sort();
        ids
    }

    /// Config that already holds a local address
    ///
    /// Wildcard binds overlap every address on the same port.
    pub fn find_binding(&self, addr: SocketAddr) -> Option<ConfigId> {
        if addr.port() == 0 {
            return None;
        }
        self.sessions.iter().find_map(|r| {
            let bound = r.local_addr();
            let overlaps = bound.port() == addr.port()
                && (bound.ip() == addr.ip() || bound.ip().is_unspecified() || addr.ip().is_unspecified());
            overlaps.then(|| *r.key())
        })
    }

    /// Local IPs held by registered sessions
    pub fn used_ips(&self) -> HashSet<IpAddr> {
        self.sessions.iter().map(|r| r.local_addr().ip()).collect()
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of per-config locks currently allocated
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }
}

/// Held for the duration of one start or stop
///
/// On release the lock entry is dropped once nobody else holds or waits on it.
pub struct ConfigLock<'a> {
    registry: &'a SessionRegistry,
    id: ConfigId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ConfigLock<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.registry
            .locks
            .remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
