// ============================================================================
// Coordination Store
// ============================================================================
//
// The one place where mutable state is shared between settlement workers and
// between replicas. Three capabilities, each its own trait so callers can be
// written against exactly what they need:
//
// - WorkQueue        FIFO lists with a reserve/ack/release holding pattern
// - DistributedLock  TTL-bound mutual exclusion with owner fencing
// - SharedState      small key/value entries for publishing state
//
// Backends:
// - MemoryStore  single process (tests, single-replica deployments)
// - RedisStore   shared across replicas
//
// ============================================================================

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use std::time::Duration;

/// Key names of everything the gateway keeps in the store.
pub mod keys {
    /// Admitted payments awaiting settlement.
    pub const PAYMENTS_QUEUE: &str = "payments:queue";
    /// Payments that left the settlement loop without a ledger record.
    pub const DEAD_LETTER_QUEUE: &str = "payments:dead-letter";
    /// Leader lock for health probing.
    pub const HEALTH_LOCK: &str = "health-lock";
    /// Last published processor decision.
    pub const HEALTH_DECISION: &str = "health:decision";

    /// Common prefix of every replica's holding lists.
    pub const HOLDING_PREFIX: &str = "payments:processing:";

    /// Per-worker in-flight holding list.
    pub fn holding_list(replica_id: &str, worker_id: usize) -> String {
        format!("{HOLDING_PREFIX}{replica_id}:{worker_id}")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An item moved from a queue into a holding list by [`WorkQueue::reserve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub queue: String,
    pub holding: String,
    pub payload: String,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Append to the tail of `queue`.
    async fn enqueue(&self, queue: &str, item: &str) -> Result<(), CoordinationError>;

    /// Append only while `queue` holds fewer than `capacity` items. Returns
    /// `false` (and leaves the queue untouched) when full.
    async fn enqueue_bounded(
        &self,
        queue: &str,
        item: &str,
        capacity: usize,
    ) -> Result<bool, CoordinationError>;

    /// Remove the head of `queue`, waiting up to `timeout` for one to arrive.
    async fn pop_blocking(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, CoordinationError>;

    /// Move the head of `queue` into `holding`, waiting up to `timeout`.
    async fn reserve(
        &self,
        queue: &str,
        holding: &str,
        timeout: Duration,
    ) -> Result<Option<Reservation>, CoordinationError>;

    /// Discard a reserved item from its holding list.
    async fn ack(&self, reservation: &Reservation) -> Result<(), CoordinationError>;

    /// Return a reserved item to the tail of its queue as `payload`.
    async fn release(
        &self,
        reservation: &Reservation,
        payload: &str,
    ) -> Result<(), CoordinationError>;

    /// Move everything left in `holding` back to the head of `queue`.
    async fn recover(&self, queue: &str, holding: &str) -> Result<usize, CoordinationError>;

    async fn depth(&self, queue: &str) -> Result<usize, CoordinationError>;

    /// Up to `limit` items from the head of `queue`, without removing them.
    async fn peek(&self, queue: &str, limit: usize) -> Result<Vec<String>, CoordinationError>;

    async fn clear(&self, queue: &str) -> Result<(), CoordinationError>;

    /// Delete every list whose name starts with `prefix`; returns how many.
    async fn clear_prefix(&self, prefix: &str) -> Result<usize, CoordinationError>;
}

/// A mutual-exclusion token. Only `owner` may renew or release it; if it is
/// not renewed within `ttl` any other owner may acquire it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderLock {
    pub key: String,
    pub owner: String,
    pub ttl: Duration,
}

impl LeaderLock {
    pub fn new(key: impl Into<String>, owner: impl Into<String>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            owner: owner.into(),
            ttl,
        }
    }
}

#[async_trait]
pub trait DistributedLock: Send + Sync {
    async fn try_acquire_lock(&self, lock: &LeaderLock) -> Result<bool, CoordinationError>;

    /// Extend the TTL. `false` if the lock expired or belongs to someone else.
    async fn renew_lock(&self, lock: &LeaderLock) -> Result<bool, CoordinationError>;

    /// `false` if the lock was not held by `lock.owner`.
    async fn release_lock(&self, lock: &LeaderLock) -> Result<bool, CoordinationError>;
}

#[async_trait]
pub trait SharedState: Send + Sync {
    async fn publish(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CoordinationError>;

    async fn read(&self, key: &str) -> Result<Option<String>, CoordinationError>;
}

/// Everything a gateway replica needs from its store.
pub trait CoordinationStore: WorkQueue + DistributedLock + SharedState {}

impl<T: WorkQueue + DistributedLock + SharedState> CoordinationStore for T {}
