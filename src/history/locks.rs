use std::collections::HashMap;
use std::sync::{ Arc, Mutex, PoisonError };
use tokio::sync::{ Mutex as AsyncMutex, OwnedMutexGuard };

type LockMap = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Serializes the load/generate/save cycle per session id.
///
/// Each session gets its own async mutex; the entry is removed again once the
/// last holder or waiter is gone, so the map only tracks sessions in flight.
#[derive(Clone, Default)]
pub struct SessionLocks {
    inner: LockMap,
}

pub struct SessionGuard {
    session_id: String,
    locks: LockMap,
    _guard: OwnedMutexGuard<()>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, session_id: &str) -> SessionGuard {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(map.entry(session_id.to_string()).or_default())
        };
        let guard = lock.lock_owned().await;
        SessionGuard {
            session_id: session_id.to_string(),
            locks: Arc::clone(&self.inner),
            _guard: guard,
        }
    }

    #[cfg(test)]
    fn in_flight(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut map = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // map entry + our own guard
        let idle = map
            .get(&self.session_id)
            .map(|lock| Arc::strong_count(lock) <= 2)
            .unwrap_or(false);
        if idle {
            map.remove(&self.session_id);
        }
    }
}
