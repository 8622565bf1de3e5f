//! Per-key async locks with first-come first-served ordering.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map of named locks. Tokio's mutex queues waiters fairly, so callers
/// acquiring the same key proceed in arrival order while different keys
/// never contend.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting behind earlier holders.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn same_key_serializes_in_arrival_order() {
        let locks = Arc::new(KeyedLocks::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let entered = Arc::new(AtomicUsize::new(0));

        let first = locks.acquire("t1").await;
        let mut handles = Vec::new();
        for i in 0..3 {
            let locks = locks.clone();
            let order = order.clone();
            let task_entered = entered.clone();
            handles.push(tokio::spawn(async move {
                task_entered.fetch_add(1, Ordering::SeqCst);
                let _guard = locks.acquire("t1").await;
                order.lock().await.push(i);
            }));
            // Let this waiter queue before spawning the next.
            while entered.load(Ordering::SeqCst) <= i {
                tokio::task::yield_now().await;
            }
            tokio::task::yield_now().await;
        }

        drop(first);
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*order.lock().await, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let locks = KeyedLocks::new();
        let _a = locks.acquire("t1").await;
        // Would deadlock if keys shared a lock.
        let _b = locks.acquire("t2").await;
    }
}
