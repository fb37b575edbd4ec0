//! Deduplicated execution of concurrent calls sharing a key.
//!
//! # Responsibilities
//! - Run an expensive async operation at most once per key at any instant
//! - Hand the single result (or error) to every caller that asked meanwhile
//! - Forget the key as soon as the operation resolves
//!
//! # Design Decisions
//! - The map lock is held only for lookup/insert/remove, never across the operation
//! - Results are not cached: a call after completion runs the operation again
//! - A leader that is cancelled or panics releases the key; waiters contend again

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

type Slot<V, E> = watch::Receiver<Option<Result<V, E>>>;

/// Collapses concurrent calls with the same key into a single execution.
pub struct SharedCalls<K, V, E> {
    calls: Mutex<HashMap<K, Slot<V, E>>>,
}

impl<K, V, E> SharedCalls<K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Run `op` for `key`, or wait for the call already in flight for it.
    pub async fn call<F, Fut>(&self, key: K, op: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.call_fresh(key, op).await.0
    }

    /// Like [`SharedCalls::call`], also reporting whether this caller ran `op`.
    pub async fn call_fresh<F, Fut>(&self, key: K, op: F) -> (Result<V, E>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let tx = loop {
            let mut rx = {
                let mut calls = self.lock_calls();
                match calls.get(&key) {
                    Some(rx) => rx.clone(),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        calls.insert(key.clone(), rx);
                        break tx;
                    }
                }
            };

            let resolved = rx
                .wait_for(Option::is_some)
                .await
                .ok()
                .and_then(|value| value.as_ref().cloned());
            // `None`: the leader went away without a result.
            if let Some(result) = resolved {
                return (result, false);
            }
        };

        let in_flight = InFlight {
            owner: self,
            key: &key,
        };
        let result = op().await;
        drop(in_flight);

        tx.send_replace(Some(result.clone()));
        (result, true)
    }

    /// Number of keys with an operation currently in flight.
    pub fn in_flight(&self) -> usize {
        self.lock_calls().len()
    }

    fn lock_calls(&self) -> MutexGuard<'_, HashMap<K, Slot<V, E>>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, V, E> Default for SharedCalls<K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> std::fmt::Debug for SharedCalls<K, V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let in_flight = self
            .calls
            .lock()
            .map(|calls| calls.len())
            .unwrap_or_default();
        f.debug_struct("SharedCalls")
            .field("in_flight", &in_flight)
            .finish()
    }
}

/// Removes the leader's entry on every exit path, including cancellation.
struct InFlight<'a, K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    owner: &'a SharedCalls<K, V, E>,
    key: &'a K,
}

impl<K, V, E> Drop for InFlight<'_, K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    fn drop(&mut self) {
        self.owner.lock_calls().remove(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn concurrent_calls_run_once() {
        let calls: Arc<SharedCalls<&'static str, u64, String>> = Arc::new(SharedCalls::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let calls = calls.clone();
            let runs = runs.clone();
            handles.push(tokio::spawn(async move {
                calls
                    .call("key", || async {
                        runs.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(42)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(42));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(calls.in_flight(), 0);
    }

    #[tokio::test]
    async fn errors_are_shared_verbatim() {
        let calls: Arc<SharedCalls<u8, u64, String>> = Arc::new(SharedCalls::new());
        let runs = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let calls = calls.clone();
                let runs = runs.clone();
                tokio::spawn(async move {
                    calls
                        .call(7, || async {
                            runs.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(30)).await;
                            Err("dial refused".to_string())
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            assert_eq!(task.await.unwrap(), Err("dial refused".to_string()));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn completed_calls_are_not_cached() {
        let calls: SharedCalls<u8, usize, ()> = SharedCalls::new();
        let runs = AtomicUsize::new(0);

        for expected in 1..=3 {
            let (value, fresh) = calls
                .call_fresh(1, || async { Ok(runs.fetch_add(1, Ordering::SeqCst) + 1) })
                .await;
            assert_eq!(value, Ok(expected));
            assert!(fresh);
        }
    }

    #[tokio::test]
    async fn distinct_keys_do_not_wait_for_each_other() {
        let calls: Arc<SharedCalls<u8, u8, ()>> = Arc::new(SharedCalls::new());
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let slow = {
            let calls = calls.clone();
            tokio::spawn(async move {
                calls
                    .call(1, || async {
                        let _ = release_rx.await;
                        Ok(1)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let fast = tokio::time::timeout(
            Duration::from_millis(200),
            calls.call(2, || async { Ok(2) }),
        )
        .await;
        assert_eq!(fast, Ok(Ok(2)));

        let _ = release_tx.send(());
        assert_eq!(slow.await.unwrap(), Ok(1));
    }

    #[tokio::test]
    async fn cancelled_leader_hands_over_to_a_waiter() {
        let calls: Arc<SharedCalls<u8, &'static str, ()>> = Arc::new(SharedCalls::new());

        let leader = {
            let calls = calls.clone();
            tokio::spawn(async move {
                calls
                    .call(9, || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok("leader")
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let waiter = {
            let calls = calls.clone();
            tokio::spawn(async move { calls.call_fresh(9, || async { Ok("waiter") }).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        leader.abort();
        let (value, fresh) = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter must not hang")
            .unwrap();
        assert_eq!(value, Ok("waiter"));
        assert!(fresh);
        assert_eq!(calls.in_flight(), 0);
    }
}
