//! In-memory, time-bounded exclusion of `(connection, model)` pairs.
//! Deliberately non-persistent: a restart clears every lock.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct ModelLockMap {
    inner: RwLock<HashMap<(String, String), Instant>>,
}

impl ModelLockMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, connection_id: &str, model: &str, ttl: Duration) {
        if let Ok(mut guard) = self.inner.write() {
            guard.insert(
                (connection_id.to_string(), model.to_string()),
                Instant::now() + ttl,
            );
        }
    }

    /// Expired entries are cleaned lazily here rather than by a sweeper.
    pub fn is_locked(&self, connection_id: &str, model: &str) -> bool {
        let key = (connection_id.to_string(), model.to_string());
        let expired = {
            let Ok(guard) = self.inner.read() else {
                return false;
            };
            match guard.get(&key) {
                None => return false,
                Some(until) if *until > Instant::now() => return true,
                Some(_) => true,
            }
        };
        if expired {
            if let Ok(mut guard) = self.inner.write() {
                if matches!(guard.get(&key), Some(until) if *until <= Instant::now()) {
                    guard.remove(&key);
                }
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_scopes_to_model() {
        let locks = ModelLockMap::new();
        locks.lock("c1", "claude-sonnet-4-5", Duration::from_secs(300));
        assert!(locks.is_locked("c1", "claude-sonnet-4-5"));
        assert!(!locks.is_locked("c1", "gemini-3-pro"));
        assert!(!locks.is_locked("c2", "claude-sonnet-4-5"));
    }

    #[test]
    fn expired_lock_is_cleaned_on_read() {
        let locks = ModelLockMap::new();
        locks.lock("c1", "m", Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(!locks.is_locked("c1", "m"));
        assert!(locks.inner.read().unwrap().is_empty());
    }
}
