use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, Script};
use std::time::Duration;
use tokio::time::{sleep, Instant};

use super::{CoordinationError, DistributedLock, LeaderLock, Reservation, SharedState, WorkQueue};

// ============================================================================
// Redis Coordination Store
// ============================================================================
//
// Layout:
//   LIST   payments:queue                       LPUSH tail / RPOP head
//   LIST   payments:processing:<replica>:<n>    per-worker holding list
//   LIST   payments:dead-letter
//   STRING health-lock                          SET NX PX, owner as value
//   STRING health:decision                      JSON snapshot
//
// Blocking list commands would stall every caller sharing the multiplexed
// connection, so the waiting operations poll with non-blocking LMOVE/RPOP.
//
// ============================================================================

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const SCAN_BATCH: usize = 100;

const BOUNDED_PUSH: &str = r#"
if redis.call('LLEN', KEYS[1]) >= tonumber(ARGV[2]) then
    return 0
end
redis.call('LPUSH', KEYS[1], ARGV[1])
return 1
"#;

const RENEW_IF_OWNER: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

const RELEASE_IF_OWNER: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

pub struct RedisStore {
    conn: MultiplexedConnection,
    bounded_push: Script,
    renew_if_owner: Script,
    release_if_owner: Script,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self, CoordinationError> {
        tracing::info!(url = %url, "Connecting to Redis coordination store");
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            bounded_push: Script::new(BOUNDED_PUSH),
            renew_if_owner: Script::new(RENEW_IF_OWNER),
            release_if_owner: Script::new(RELEASE_IF_OWNER),
        }
    }

    /// A handle on the same connection, for other Redis-backed components.
    pub fn connection(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    async fn poll<T, F, Fut>(
        &self,
        timeout: Duration,
        mut attempt: F,
    ) -> Result<Option<T>, CoordinationError>
    where
        F: FnMut(MultiplexedConnection) -> Fut + Send,
        Fut: std::future::Future<Output = Result<Option<T>, CoordinationError>> + Send,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = attempt(self.conn.clone()).await? {
                return Ok(Some(item));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            sleep(POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// SCAN pattern matching every key that starts with `prefix` literally.
fn prefix_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

#[async_trait]
impl WorkQueue for RedisStore {
    async fn enqueue(&self, queue: &str, item: &str) -> Result<(), CoordinationError> {
        let mut conn = self.conn.clone();
        redis::cmd("LPUSH")
            .arg(queue)
            .arg(item)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn enqueue_bounded(
        &self,
        queue: &str,
        item: &str,
        capacity: usize,
    ) -> Result<bool, CoordinationError> {
        let mut conn = self.conn.clone();
        let pushed: i64 = self
            .bounded_push
            .key(queue)
            .arg(item)
            .arg(capacity)
            .invoke_async(&mut conn)
            .await?;
        Ok(pushed == 1)
    }

    async fn pop_blocking(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, CoordinationError> {
        self.poll(timeout, |mut conn| async move {
            let item: Option<String> = redis::cmd("RPOP").arg(queue).query_async(&mut conn).await?;
            Ok::<_, CoordinationError>(item)
        })
        .await
    }

    async fn reserve(
        &self,
        queue: &str,
        holding: &str,
        timeout: Duration,
    ) -> Result<Option<Reservation>, CoordinationError> {
        self.poll(timeout, |mut conn| async move {
            let payload: Option<String> = redis::cmd("LMOVE")
                .arg(queue)
                .arg(holding)
                .arg("RIGHT")
                .arg("LEFT")
                .query_async(&mut conn)
                .await?;
            Ok::<_, CoordinationError>(payload.map(|payload| Reservation {
                queue: queue.to_string(),
                holding: holding.to_string(),
                payload,
            }))
        })
        .await
    }

    async fn ack(&self, reservation: &Reservation) -> Result<(), CoordinationError> {
        let mut conn = self.conn.clone();
        redis::cmd("LREM")
            .arg(&reservation.holding)
            .arg(1)
            .arg(&reservation.payload)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn release(
        &self,
        reservation: &Reservation,
        payload: &str,
    ) -> Result<(), CoordinationError> {
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .cmd("LPUSH")
            .arg(&reservation.queue)
            .arg(payload)
            .ignore()
            .cmd("LREM")
            .arg(&reservation.holding)
            .arg(1)
            .arg(&reservation.payload)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn recover(&self, queue: &str, holding: &str) -> Result<usize, CoordinationError> {
        let mut conn = self.conn.clone();
        let mut recovered = 0;
        // Newest reservation first, so the oldest ends up at the head.
        loop {
            let moved: Option<String> = redis::cmd("LMOVE")
                .arg(holding)
                .arg(queue)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;
            if moved.is_none() {
                return Ok(recovered);
            }
            recovered += 1;
        }
    }

    async fn depth(&self, queue: &str) -> Result<usize, CoordinationError> {
        let mut conn = self.conn.clone();
        let len: usize = redis::cmd("LLEN").arg(queue).query_async(&mut conn).await?;
        Ok(len)
    }

    async fn peek(&self, queue: &str, limit: usize) -> Result<Vec<String>, CoordinationError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        // The head lives at the right end of the list.
        let mut items: Vec<String> = redis::cmd("LRANGE")
            .arg(queue)
            .arg(-limit)
            .arg(-1)
            .query_async(&mut conn)
            .await?;
        items.reverse();
        Ok(items)
    }

    async fn clear(&self, queue: &str) -> Result<(), CoordinationError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(queue).query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn clear_prefix(&self, prefix: &str) -> Result<usize, CoordinationError> {
        let mut conn = self.conn.clone();
        let pattern = prefix_pattern(prefix);
        let mut cursor: u64 = 0;
        let mut removed = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;
            if !keys.is_empty() {
                let deleted: usize = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
                removed += deleted;
            }
            if next == 0 {
                return Ok(removed);
            }
            cursor = next;
        }
    }
}

#[async_trait]
impl DistributedLock for RedisStore {
    async fn try_acquire_lock(&self, lock: &LeaderLock) -> Result<bool, CoordinationError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(&lock.key)
            .arg(&lock.owner)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(lock.ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn renew_lock(&self, lock: &LeaderLock) -> Result<bool, CoordinationError> {
        let mut conn = self.conn.clone();
        let renewed: i64 = self
            .renew_if_owner
            .key(&lock.key)
            .arg(&lock.owner)
            .arg(ttl_millis(lock.ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(renewed == 1)
    }

    async fn release_lock(&self, lock: &LeaderLock) -> Result<bool, CoordinationError> {
        let mut conn = self.conn.clone();
        let released: i64 = self
            .release_if_owner
            .key(&lock.key)
            .arg(&lock.owner)
            .invoke_async(&mut conn)
            .await?;
        Ok(released == 1)
    }
}

#[async_trait]
impl SharedState for RedisStore {
    async fn publish(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), CoordinationError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        cmd.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<String>, CoordinationError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }
}
