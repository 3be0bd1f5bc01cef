//! Per-key async mutexes. Holders of different keys never contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let slot = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            // Drop entries nobody holds or waits on.
            if locks.len() > 1024 {
                locks.retain(|_, m| Arc::strong_count(m) > 1);
            }
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        slot.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_serialises() {
        let locks = Arc::new(KeyedLocks::new());
        let counter = Arc::new(AsyncMutex::new(Vec::new()));

        let g = locks.lock("d1").await;
        let (l2, c2) = (locks.clone(), counter.clone());
        let waiter = tokio::spawn(async move {
            let _g = l2.lock("d1").await;
            c2.lock().await.push("second");
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        counter.lock().await.push("first");
        drop(g);
        waiter.await.unwrap();
        assert_eq!(*counter.lock().await, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("d1").await;
        let b = tokio::time::timeout(Duration::from_millis(50), locks.lock("d2")).await;
        assert!(b.is_ok());
    }
}
