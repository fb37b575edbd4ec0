//! Per-credential client cache.
//!
//! # Responsibilities
//! - Map credential → established `RpcClient`
//! - Keep access bookkeeping (created, last access, hits) per entry
//! - Offer explicit idle eviction and discarding of clients found dead
//!
//! # Design Decisions
//! - A plain mutex-guarded map: the lock only covers map access, dials happen
//!   outside it and are deduplicated by the proxy's `SharedCalls`
//! - Eviction lives here so a policy (LRU/TTL) can change without touching
//!   the proxy's dedup logic

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::auth::Credential;
use crate::observability::metrics;
use crate::rpc::client::{Connection, RpcClient};

struct CacheEntry<C> {
    client: Arc<RpcClient<C>>,
    created: Instant,
    last_access: Instant,
    hits: u64,
}

/// Snapshot of one cache entry's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryStats {
    pub age: Duration,
    pub idle: Duration,
    pub hits: u64,
}

/// Thread-safe map of credential → client.
pub struct ClientCache<C> {
    entries: Mutex<HashMap<Credential, CacheEntry<C>>>,
}

impl<C: Connection> ClientCache<C> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a client, recording the access.
    pub fn get(&self, credential: &Credential) -> Option<Arc<RpcClient<C>>> {
        let mut entries = self.lock_entries();
        let entry = entries.get_mut(credential)?;
        entry.last_access = Instant::now();
        entry.hits += 1;
        Some(entry.client.clone())
    }

    /// Store a freshly dialed client and return the shared handle.
    ///
    /// If an entry already exists it is kept and the new client is closed, so
    /// every caller ends up on the same client for a credential.
    pub fn insert(&self, credential: Credential, client: RpcClient<C>) -> Arc<RpcClient<C>> {
        let mut entries = self.lock_entries();
        if let Some(existing) = entries.get(&credential) {
            client.close();
            return existing.client.clone();
        }

        let now = Instant::now();
        let client = Arc::new(client);
        entries.insert(
            credential,
            CacheEntry {
                client: client.clone(),
                created: now,
                last_access: now,
                hits: 0,
            },
        );
        metrics::set_cached_clients(entries.len());
        client
    }

    /// Drop and close the entry for `credential` if it still holds `client`.
    ///
    /// A caller holding a stale handle never removes a client dialed after it.
    pub fn discard(&self, credential: &Credential, client: &Arc<RpcClient<C>>) -> bool {
        let mut entries = self.lock_entries();
        let current = entries
            .get(credential)
            .is_some_and(|entry| Arc::ptr_eq(&entry.client, client));
        if current {
            entries.remove(credential);
            metrics::set_cached_clients(entries.len());
        }
        drop(entries);

        if current {
            client.close();
        }
        current
    }

    /// Close and drop every client not accessed within `max_idle`.
    /// Returns the number of evicted entries.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let now = Instant::now();
        let mut evicted = Vec::new();
        {
            let mut entries = self.lock_entries();
            entries.retain(|credential, entry| {
                let keep = now.duration_since(entry.last_access) < max_idle;
                if !keep {
                    evicted.push((credential.app().to_string(), entry.client.clone()));
                }
                keep
            });
            metrics::set_cached_clients(entries.len());
        }

        for (app, client) in &evicted {
            tracing::info!(app = %app, backend = %client.target(), "Evicting idle RPC client");
            client.close();
        }
        evicted.len()
    }

    /// Close and drop everything.
    pub fn clear(&self) {
        let drained: Vec<_> = {
            let mut entries = self.lock_entries();
            let drained = entries.drain().map(|(_, e)| e.client).collect();
            metrics::set_cached_clients(0);
            drained
        };
        for client in drained {
            client.close();
        }
    }

    pub fn stats(&self, credential: &Credential) -> Option<EntryStats> {
        let now = Instant::now();
        self.lock_entries().get(credential).map(|e| EntryStats {
            age: now.duration_since(e.created),
            idle: now.duration_since(e.last_access),
            hits: e.hits,
        })
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<Credential, CacheEntry<C>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Connection> Default for ClientCache<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Clone)]
    struct FakeConn(Arc<AtomicBool>);

    impl Connection for FakeConn {
        fn is_available(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }

        fn close(&self) {
            self.0.store(false, Ordering::SeqCst);
        }
    }

    fn client() -> RpcClient<FakeConn> {
        RpcClient::new("backend:1", vec![FakeConn(Arc::new(AtomicBool::new(true)))])
    }

    #[test]
    fn get_records_hits() {
        let cache = ClientCache::new();
        let cred = Credential::new("app", "token");
        assert!(cache.get(&cred).is_none());

        cache.insert(cred.clone(), client());
        cache.get(&cred).unwrap();
        cache.get(&cred).unwrap();
        assert_eq!(cache.stats(&cred).unwrap().hits, 2);
    }

    #[test]
    fn second_insert_keeps_first_client() {
        let cache = ClientCache::new();
        let cred = Credential::new("app", "token");
        let first = cache.insert(cred.clone(), client());
        let loser = client();
        let loser_conn = loser.next().unwrap();
        let second = cache.insert(cred, loser);

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!loser_conn.is_available());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn evicts_only_idle_entries() {
        let cache = ClientCache::new();
        let idle = Credential::new("idle", "t");
        let busy = Credential::new("busy", "t");
        let idle_client = cache.insert(idle.clone(), client());
        cache.insert(busy.clone(), client());

        std::thread::sleep(Duration::from_millis(30));
        cache.get(&busy).unwrap();

        assert_eq!(cache.evict_idle(Duration::from_millis(20)), 1);
        assert!(cache.get(&idle).is_none());
        assert!(cache.get(&busy).is_some());
        assert!(idle_client.next().is_none());
    }

    #[test]
    fn discard_ignores_a_replaced_client() {
        let cache = ClientCache::new();
        let cred = Credential::new("app", "token");
        let stale = cache.insert(cred.clone(), client());

        assert!(cache.discard(&cred, &stale));
        assert!(stale.next().is_none());
        assert!(cache.is_empty());

        let fresh = cache.insert(cred.clone(), client());
        assert!(!cache.discard(&cred, &stale));
        assert!(Arc::ptr_eq(&cache.get(&cred).unwrap(), &fresh));
        assert!(fresh.next().is_some());
    }

    #[test]
    fn clear_closes_everything() {
        let cache = ClientCache::new();
        let held = cache.insert(Credential::new("a", "t"), client());
        cache.clear();
        assert!(cache.is_empty());
        assert!(held.next().is_none());
    }
}
