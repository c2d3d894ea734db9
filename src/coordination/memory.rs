use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{CoordinationError, DistributedLock, LeaderLock, Reservation, SharedState, WorkQueue};

// ============================================================================
// In-Process Coordination Store
// ============================================================================
//
// Lists are VecDeques with the tail at the front and the head at the back,
// matching the LPUSH / RPOP layout of the Redis backend. Lock and value
// expiry is checked lazily on access.
//
// ============================================================================

#[derive(Default)]
struct Inner {
    lists: HashMap<String, VecDeque<String>>,
    locks: HashMap<String, HeldLock>,
    values: HashMap<String, StoredValue>,
}

struct HeldLock {
    owner: String,
    expires_at: Instant,
}

struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl Inner {
    fn list(&mut self, name: &str) -> &mut VecDeque<String> {
        self.lists.entry(name.to_string()).or_default()
    }

    fn live_lock(&mut self, key: &str) -> Option<&HeldLock> {
        let now = Instant::now();
        if self.locks.get(key).is_some_and(|held| held.expires_at <= now) {
            self.locks.remove(key);
        }
        self.locks.get(key)
    }

    fn remove_first(&mut self, list: &str, payload: &str) -> bool {
        let items = self.list(list);
        match items.iter().position(|item| item == payload) {
            Some(index) => {
                items.remove(index);
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    pushed: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `take` yields an item or `timeout` elapses.
    async fn wait_for<T>(
        &self,
        timeout: Duration,
        mut take: impl FnMut(&mut Inner) -> Option<T> + Send,
    ) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register interest before checking so a push between the check
            // and the await is not missed.
            let notified = self.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = take(&mut *self.inner.lock().await) {
                return Some(item);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }
}

#[async_trait]
impl WorkQueue for MemoryStore {
    async fn enqueue(&self, queue: &str, item: &str) -> Result<(), CoordinationError> {
        self.inner.lock().await.list(queue).push_front(item.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn enqueue_bounded(
        &self,
        queue: &str,
        item: &str,
        capacity: usize,
    ) -> Result<bool, CoordinationError> {
        {
            let mut inner = self.inner.lock().await;
            let list = inner.list(queue);
            if list.len() >= capacity {
                return Ok(false);
            }
            list.push_front(item.to_string());
        }
        self.pushed.notify_waiters();
        Ok(true)
    }

    async fn pop_blocking(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, CoordinationError> {
        Ok(self.wait_for(timeout, |inner| inner.list(queue).pop_back()).await)
    }

    async fn reserve(
        &self,
        queue: &str,
        holding: &str,
        timeout: Duration,
    ) -> Result<Option<Reservation>, CoordinationError> {
        let reservation = self
            .wait_for(timeout, |inner| {
                let payload = inner.list(queue).pop_back()?;
                inner.list(holding).push_front(payload.clone());
                Some(Reservation {
                    queue: queue.to_string(),
                    holding: holding.to_string(),
                    payload,
                })
            })
            .await;
        Ok(reservation)
    }

    async fn ack(&self, reservation: &Reservation) -> Result<(), CoordinationError> {
        self.inner
            .lock()
            .await
            .remove_first(&reservation.holding, &reservation.payload);
        Ok(())
    }

    async fn release(
        &self,
        reservation: &Reservation,
        payload: &str,
    ) -> Result<(), CoordinationError> {
        {
            let mut inner = self.inner.lock().await;
            inner.remove_first(&reservation.holding, &reservation.payload);
            inner.list(&reservation.queue).push_front(payload.to_string());
        }
        self.pushed.notify_waiters();
        Ok(())
    }

    async fn recover(&self, queue: &str, holding: &str) -> Result<usize, CoordinationError> {
        let recovered = {
            let mut inner = self.inner.lock().await;
            let stranded: Vec<String> = inner.list(holding).drain(..).collect();
            let count = stranded.len();
            // Oldest reservation sits at the back of the holding list and
            // must end up at the head of the queue.
            inner.list(queue).extend(stranded);
            count
        };
        if recovered > 0 {
            self.pushed.notify_waiters();
        }
        Ok(recovered)
    }

    async fn depth(&self, queue: &str) -> Result<usize, CoordinationError> {
        Ok(self.inner.lock().await.lists.get(queue).map_or(0, VecDeque::len))
    }

    async fn peek(&self, queue: &str, limit: usize) -> Result<Vec<String>, CoordinationError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .lists
            .get(queue)
            .map(|items| items.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn clear(&self, queue: &str) -> Result<(), CoordinationError> {
        self.inner.lock().await.lists.remove(queue);
        Ok(())
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<usize, CoordinationError> {
        let mut inner = self.inner.lock().await;
        let before = inner.lists.len();
        inner.lists.retain(|name, _| !name.starts_with(prefix));
        Ok(before - inner.lists.len())
    }
}

#[async_trait]
impl DistributedLock for MemoryStore {
    async fn try_acquire_lock(&self, lock: &LeaderLock) -> Result<bool, CoordinationError> {
        let mut inner = self.inner.lock().await;
        if inner.live_lock(&lock.key).is_some() {
            return Ok(false);
        }
        inner.locks.insert(
            lock.key.clone(),
            HeldLock {
                owner: lock.owner.clone(),
                expires_at: Instant::now() + lock.ttl,
            },
        );
        Ok(true)
    }

    async fn renew_lock(&self, lock: &LeaderLock) -> Result<bool, CoordinationError> {
        let mut inner = self.inner.lock().await;
        if inner.live_lock(&lock.key).map_or(true, |held| held.owner != lock.owner) {
            return Ok(false);
        }
        if let Some(held) = inner.locks.get_mut(&lock.key) {
            held.expires_at = Instant::now() + lock.ttl;
        }
        Ok(true)
    }

    async fn release_lock(&self, lock: &LeaderLock) -> Result<bool, CoordinationError> {
        let mut inner = self.inner.lock().await;
        if inner.live_lock(&lock.key).map_or(true, |held| held.owner != lock.owner) {
            return Ok(false);
        }
        inner.locks.remove(&lock.key);
        Ok(true)
    }
}

#[async_trait]
impl SharedState for MemoryStore {
    async fn publish(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CoordinationError> {
        self.inner.lock().await.values.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        if inner
            .values
            .get(key)
            .is_some_and(|stored| stored.expires_at.is_some_and(|at| at <= now))
        {
            inner.values.remove(key);
        }
        Ok(inner.values.get(key).map(|stored| stored.value.clone()))
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
