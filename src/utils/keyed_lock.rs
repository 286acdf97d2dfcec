use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap<K> = Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>;

/// One async lock per key. An entry lives only while someone holds or waits
/// for it, so the map does not grow with every key ever seen.
pub struct KeyedLocks<K> {
    locks: LockMap<K>,
}

impl<K> Clone for KeyedLocks<K> {
    fn clone(&self) -> Self {
        KeyedLocks {
            locks: self.locks.clone(),
        }
    }
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        KeyedLocks {
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        KeyedLocks::default()
    }

    pub async fn lock(&self, key: K) -> KeyedLockGuard<K> {
        let lock = self.locks.lock().entry(key.clone()).or_default().clone();
        let guard = lock.clone().lock_owned().await;
        KeyedLockGuard {
            guard: Some(guard),
            lock,
            key,
            locks: self.locks.clone(),
        }
    }

    /// Keys currently held or waited on.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

pub struct KeyedLockGuard<K: Eq + Hash> {
    guard: Option<OwnedMutexGuard<()>>,
    lock: Arc<AsyncMutex<()>>,
    key: K,
    locks: LockMap<K>,
}

impl<K: Eq + Hash> Drop for KeyedLockGuard<K> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock();
        // The map's copy plus ours: nobody else is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}
