use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Where a user is in the course-feedback flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    #[default]
    None,
    /// Waiting for "<course key>\n<feedback>".
    WritePending,
    /// Waiting for a course key to look up.
    ReadPending,
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionMode::None => write!(f, "NONE"),
            SessionMode::WritePending => write!(f, "WRITE_PENDING"),
            SessionMode::ReadPending => write!(f, "READ_PENDING"),
        }
    }
}

/// Process-wide per-user mode map. Nothing is persisted and nothing
/// expires; a restart returns every user to `None`.
#[derive(Default)]
pub struct SessionStateStore {
    modes: DashMap<String, SessionMode>,
}

impl SessionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: &str) -> SessionMode {
        self.modes
            .get(user_id)
            .map(|m| *m.value())
            .unwrap_or_default()
    }

    /// Setting `None` removes the entry.
    pub fn set(&self, user_id: &str, mode: SessionMode) {
        if mode == SessionMode::None {
            self.modes.remove(user_id);
        } else {
            self.modes.insert(user_id.to_string(), mode);
        }
    }

    pub fn clear(&self, user_id: &str) {
        self.modes.remove(user_id);
    }

    /// Number of users with a pending flow.
    pub fn pending_count(&self) -> usize {
        self.modes.len()
    }
}

/// Registry of async mutexes, one per key.
///
/// An entry lives only while some caller holds or waits for its lock.
#[derive(Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. Released when the guard drops.
    pub async fn lock(&self, key: &str) -> KeyedGuard<'_> {
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        KeyedGuard {
            locks: &self.locks,
            key: key.to_string(),
            _guard: guard,
        }
    }

    /// Number of keys currently locked or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive hold on one key of a [`KeyedLocks`].
pub struct KeyedGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        // Two references left means the map's and this guard's: nobody waits.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 2);
    }
}
