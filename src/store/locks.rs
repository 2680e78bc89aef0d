//! Per-position serialization. Every hotpath apply and every coldpath
//! reconciliation for a key runs under that key's async mutex, so no two
//! trades, nor a trade and a replay, ever interleave on one position while
//! different keys proceed in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::keys::PositionKey;

/// Guard over one position key. Dropping it releases the key.
pub type KeyGuard = OwnedMutexGuard<()>;

/// Registry of per-key async mutexes, created lazily on first touch.
#[derive(Debug, Default)]
pub struct KeyLocks {
    inner: Mutex<HashMap<PositionKey, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, key: &PositionKey) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().expect("key lock registry poisoned");
        map.entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Acquires the serialization lock for one key.
    pub async fn acquire(&self, key: &PositionKey) -> KeyGuard {
        self.handle(key).lock_owned().await
    }

    /// Acquires two keys in a canonical (sorted) order so that concurrent
    /// direction changes on opposite keys cannot deadlock.
    pub async fn acquire_pair(&self, a: &PositionKey, b: &PositionKey) -> (KeyGuard, KeyGuard) {
        debug_assert_ne!(a, b, "acquire_pair needs two distinct keys");
        if a <= b {
            let first = self.handle(a).lock_owned().await;
            let second = self.handle(b).lock_owned().await;
            (first, second)
        } else {
            let second = self.handle(b).lock_owned().await;
            let first = self.handle(a).lock_owned().await;
            (first, second)
        }
    }
}
