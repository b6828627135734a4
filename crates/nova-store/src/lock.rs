//! Per-key serialization of async critical sections

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slots = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// FIFO lock per key. A key's slot lives only while someone holds or waits
/// for it.
#[derive(Debug, Clone, Default)]
pub struct KeyedLock {
    slots: Slots,
}

/// Registration for one key; releases the slot if it was the last user.
struct Ticket {
    key: String,
    slot: Arc<AsyncMutex<()>>,
    slots: Slots,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let idle = slots
            .get(&self.key)
            .map(|s| Arc::ptr_eq(s, &self.slot) && Arc::strong_count(s) == 2)
            .unwrap_or(false);
        if idle {
            slots.remove(&self.key);
        }
    }
}

/// Held while the critical section runs. Dropping it (including on panic or
/// when the owning future is cancelled) releases the key.
pub struct KeyedGuard {
    // Field order matters: the mutex guard must drop before the ticket.
    _guard: OwnedMutexGuard<()>,
    _ticket: Ticket,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`. Waiters are served in arrival order.
    pub async fn acquire(&self, key: &str) -> KeyedGuard {
        let ticket = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            let slot = slots
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone();
            Ticket {
                key: key.to_string(),
                slot,
                slots: self.slots.clone(),
            }
        };
        // If this future is dropped while waiting, `ticket` drops with it.
        let guard = ticket.slot.clone().lock_owned().await;
        KeyedGuard {
            _guard: guard,
            _ticket: ticket,
        }
    }

    /// Number of keys currently held or awaited
    pub fn active_keys(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn serializes_same_key() {
        let lock = KeyedLock::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let lock = lock.clone();
            let inside = inside.clone();
            let max_inside = max_inside.clone();
            handles.push(tokio::spawn(async move {
                let _g = lock.acquire("user-1").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(lock.active_keys(), 0);
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let lock = KeyedLock::new();
        let _a = lock.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), lock.acquire("b")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn cancelled_waiter_releases_slot() {
        let lock = KeyedLock::new();
        let held = lock.acquire("k").await;

        let waiting = tokio::time::timeout(Duration::from_millis(20), lock.acquire("k")).await;
        assert!(waiting.is_err());
        assert_eq!(lock.active_keys(), 1);

        drop(held);
        assert_eq!(lock.active_keys(), 0);
    }

    #[tokio::test]
    async fn released_on_panic() {
        let lock = KeyedLock::new();
        let task_lock = lock.clone();
        let result = tokio::spawn(async move {
            let _g = task_lock.acquire("k").await;
            panic!("boom");
        })
        .await;
        assert!(result.is_err());

        let again = tokio::time::timeout(Duration::from_millis(100), lock.acquire("k")).await;
        assert!(again.is_ok());
    }
}
