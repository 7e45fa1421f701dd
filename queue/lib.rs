//! The queue protocol: enqueue / dequeue / release / requeue over five Redis
//! keys, tying together the invariants described in the data model.
//!
//! See [`Queue`] for the entry point.

mod dequeued_task;
mod error;
mod keys;
mod requeue_script;
mod take_script;

pub use dequeued_task::DequeuedTask;
pub use error::Error;

use std::{sync::Arc, time::Duration};

use chrono::{TimeZone, Utc};
use keys::QueueKeys;
use redis::AsyncCommands;
use taskq_store::StorePool;
use taskq_task::{JsonSerializer, Serializer, Task};
use tracing::{event, Level};

pub struct Queue(Arc<QueueInner>);

struct QueueInner {
    pool: StorePool,
    name: String,
    keys: QueueKeys,
    default_timeout: Duration,
    serializer: Arc<dyn Serializer>,
    take_script: take_script::TakeScript,
    requeue_script: requeue_script::RequeueScript,
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.0.name)
            .field("default_timeout", &self.0.default_timeout)
            .finish()
    }
}

impl Clone for Queue {
    fn clone(&self) -> Self {
        Queue(self.0.clone())
    }
}

#[derive(Debug, Clone)]
pub struct QueueStatus {
    pub queued: usize,
    pub notifications: usize,
    pub in_flight: usize,
    pub total_enqueued: u64,
    pub total_dequeued: u64,
    pub total_released: u64,
    pub total_requeued: u64,
}

impl Queue {
    /// Build a queue over `name`, using the default JSON serializer and a
    /// default in-flight timeout applied to tasks that don't specify one of
    /// their own.
    pub fn new(pool: StorePool, name: impl Into<String>, default_timeout: Duration) -> Queue {
        Queue::with_serializer(pool, name, default_timeout, Arc::new(JsonSerializer))
    }

    pub fn with_serializer(
        pool: StorePool,
        name: impl Into<String>,
        default_timeout: Duration,
        serializer: Arc<dyn Serializer>,
    ) -> Queue {
        let name = name.into();
        Queue(Arc::new(QueueInner {
            keys: QueueKeys::new(&name),
            pool,
            name,
            default_timeout,
            serializer,
            take_script: take_script::TakeScript::new(),
            requeue_script: requeue_script::RequeueScript::new(),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn default_timeout(&self) -> Duration {
        self.0.default_timeout
    }

    /// Serialize a task the same way `enqueue` would, without enqueuing it.
    /// Used by child runners that need to compute the exact bytes a
    /// released task must match.
    pub fn serialize(&self, task: &Task) -> Result<Vec<u8>, Error> {
        let blob = self.0.serializer.serialize(task)?;
        Ok(blob)
    }

    /// Inverse of [`Queue::serialize`]. Used by child runners to recover a
    /// `Task` from the raw bytes they were handed over a pipe or stdin.
    pub fn deserialize(&self, bytes: &[u8]) -> Result<Task, Error> {
        let task = self.0.serializer.deserialize(bytes)?;
        Ok(task)
    }

    /// Append `task` to the queue. If it has no id yet, one is assigned here
    /// by atomically incrementing `<name>_id`. The three bookkeeping writes
    /// (append to `<name>`, append a notification sentinel, record the
    /// enqueue timestamp, bump the stats counter) are pipelined as a single
    /// round trip; they are not required to be transactional, since the
    /// sweeper repairs any partial state left by a crash between the id
    /// increment and the pipeline.
    pub async fn enqueue(&self, mut task: Task) -> Result<Task, Error> {
        let mut conn = self.0.pool.get().await?;

        if task.id.is_none() {
            let id: u64 = conn.incr(&self.0.keys.id, 1).await?;
            task.id = Some(id);
        }

        let blob = self.0.serializer.serialize(&task)?;
        let now = Utc::now().timestamp_millis();

        let mut pipe = redis::Pipeline::with_capacity(4);
        pipe.rpush(&self.0.keys.queue, &blob)
            .rpush(&self.0.keys.noti, 1u8)
            .zadd(&self.0.keys.enqueued, &blob, now)
            .cmd("HINCRBY")
            .arg(&[self.0.keys.stats.as_str(), "enqueued", "1"]);

        pipe.query_async(&mut conn).await?;

        event!(Level::DEBUG, queue = %self.0.name, task_id = ?task.id, "enqueued task");
        Ok(task)
    }

    /// Wait up to `wait` for a notification sentinel, then atomically take
    /// the head of the queue. Returns `None` if the wait timed out (no work
    /// available) or if the queue was momentarily empty even though a
    /// sentinel was available (the sweeper's R1 keeps this transient rare
    /// and self-correcting, never invariant-violating).
    pub async fn dequeue(&self, wait: Duration) -> Result<Option<DequeuedTask>, Error> {
        let mut conn = self.0.pool.get().await?;

        let wait_secs = wait.as_secs().max(1) as usize;
        let popped: Option<(String, Vec<u8>)> =
            conn.blpop(&self.0.keys.noti, wait_secs).await?;

        if popped.is_none() {
            return Ok(None);
        }

        let now = Utc::now();
        let blob = self
            .0
            .take_script
            .run(&self.0.keys, &mut conn, now.timestamp_millis())
            .await?;

        let blob = match blob {
            Some(b) => b,
            None => return Ok(None),
        };

        let task = self.0.serializer.deserialize(&blob)?;
        event!(Level::DEBUG, queue = %self.0.name, task_id = ?task.id, "dequeued task");
        Ok(Some(DequeuedTask::new(task, now, blob)))
    }

    /// Remove a task's id from `<name>_dequeued`. Idempotent: releasing a
    /// task that's already gone (released earlier, or swept away) is a
    /// silent no-op, never an error.
    pub async fn release(&self, item: &DequeuedTask) -> Result<(), Error> {
        let mut conn = self.0.pool.get().await?;

        let mut pipe = redis::Pipeline::with_capacity(2);
        pipe.zrem(&self.0.keys.dequeued, &item.raw)
            .cmd("HINCRBY")
            .arg(&[self.0.keys.stats.as_str(), "released", "1"]);
        pipe.query_async(&mut conn).await?;

        event!(Level::DEBUG, queue = %self.0.name, task_id = ?item.task.id, "released task");
        Ok(())
    }

    /// Move an in-flight task back to the ready queue. Sweeper-only: callers
    /// outside the sweeper have no legitimate reason to call this, since
    /// normal task completion goes through `release`, not `requeue`.
    ///
    /// Returns `false` if the task was no longer in `<name>_dequeued` by the
    /// time this ran (already released, or requeued by a racing sweeper
    /// cycle) — a no-op, not an error.
    pub async fn requeue(&self, item: &DequeuedTask) -> Result<bool, Error> {
        let mut conn = self.0.pool.get().await?;
        let now = Utc::now().timestamp_millis();
        let moved = self
            .0
            .requeue_script
            .run(&self.0.keys, &mut conn, now, &item.raw)
            .await?;

        if moved {
            event!(Level::INFO, queue = %self.0.name, task_id = ?item.task.id, "requeued timed-out task");
        }

        Ok(moved)
    }

    /// Cardinality of the ready list `<name>`.
    pub async fn len(&self) -> Result<usize, Error> {
        let mut conn = self.0.pool.get().await?;
        let len: usize = conn.llen(&self.0.keys.queue).await?;
        Ok(len)
    }

    /// All entries currently in `<name>_dequeued`, as `(task, dequeue-time)`
    /// pairs. Used by the sweeper's R2 reconciliation; also handy for
    /// operational introspection.
    pub async fn in_flight(&self) -> Result<Vec<DequeuedTask>, Error> {
        let mut conn = self.0.pool.get().await?;
        let entries: Vec<(Vec<u8>, i64)> = conn
            .zrangebyscore_withscores(&self.0.keys.dequeued, "-inf", "+inf")
            .await?;

        entries
            .into_iter()
            .map(|(blob, score_millis)| {
                let task = self.0.serializer.deserialize(&blob)?;
                let dequeued_at = Utc.timestamp_millis(score_millis);
                Ok(DequeuedTask::new(task, dequeued_at, blob))
            })
            .collect()
    }

    /// R1 of the sweeper's reconciliation cycle: make `<name>_noti`'s length
    /// match `<name>`'s. Appends sentinels if the queue outgrew its
    /// notifications (a monitor popped a notification and died before the
    /// paired take-step), or pops spurious ones if it shrank the other way.
    /// Returns the delta that was applied (positive: appended, negative:
    /// popped, zero: already consistent).
    ///
    /// Sweeper-only, same as [`Queue::requeue`].
    pub async fn reconcile_notifications(&self) -> Result<i64, Error> {
        let mut conn = self.0.pool.get().await?;

        let (queue_len, noti_len): (i64, i64) = redis::Pipeline::with_capacity(2)
            .cmd("LLEN")
            .arg(&self.0.keys.queue)
            .cmd("LLEN")
            .arg(&self.0.keys.noti)
            .query_async(&mut conn)
            .await?;

        let delta = queue_len - noti_len;

        if delta > 0 {
            let mut pipe = redis::Pipeline::with_capacity(delta as usize);
            for _ in 0..delta {
                pipe.rpush(&self.0.keys.noti, 1u8);
            }
            pipe.query_async(&mut conn).await?;
        } else if delta < 0 {
            let mut pipe = redis::Pipeline::with_capacity((-delta) as usize);
            for _ in 0..(-delta) {
                pipe.cmd("LPOP").arg(&self.0.keys.noti);
            }
            pipe.query_async(&mut conn).await?;
        }

        if delta != 0 {
            event!(Level::INFO, queue = %self.0.name, delta, "reconciled notification list length");
        }

        Ok(delta)
    }

    /// Queue and notification-list lengths plus lifetime counters. Pure
    /// observability: it reads from the non-authoritative stats hash and
    /// list/set cardinalities, never mutates anything, and is not part of
    /// any invariant.
    pub async fn status(&self) -> Result<QueueStatus, Error> {
        let mut conn = self.0.pool.get().await?;
        let (queued, notifications, in_flight, counters): (
            usize,
            usize,
            usize,
            (Option<u64>, Option<u64>, Option<u64>, Option<u64>),
        ) = redis::Pipeline::with_capacity(4)
            .cmd("LLEN")
            .arg(&self.0.keys.queue)
            .cmd("LLEN")
            .arg(&self.0.keys.noti)
            .cmd("ZCARD")
            .arg(&self.0.keys.dequeued)
            .cmd("HMGET")
            .arg(&[
                self.0.keys.stats.as_str(),
                "enqueued",
                "dequeued",
                "released",
                "requeued",
            ])
            .query_async(&mut conn)
            .await?;

        Ok(QueueStatus {
            queued,
            notifications,
            in_flight,
            total_enqueued: counters.0.unwrap_or(0),
            total_dequeued: counters.1.unwrap_or(0),
            total_released: counters.2.unwrap_or(0),
            total_requeued: counters.3.unwrap_or(0),
        })
    }
}

#[cfg(all(test, feature = "test_redis"))]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn test_queue() -> Queue {
        dotenv::dotenv().ok();
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let pool = StorePool::new(&redis_url, None).expect("creating redis pool");
        let name = format!("test-{}", uuid::Uuid::new_v4());
        Queue::new(pool, name, Duration::from_secs(30))
    }

    async fn cleanup(queue: &Queue) {
        let mut conn = queue.0.pool.get().await.expect("cleanup connection");
        let keys = &queue.0.keys;
        let mut pipe = redis::Pipeline::with_capacity(6);
        pipe.del(&keys.queue)
            .del(&keys.noti)
            .del(&keys.id)
            .del(&keys.enqueued)
            .del(&keys.dequeued)
            .del(&keys.stats);
        pipe.query_async(&mut conn).await.expect("cleanup");
    }

    #[tokio::test]
    async fn enqueue_assigns_id_and_dequeue_returns_it() {
        let queue = test_queue().await;

        let task = Task::new(b"add|1|2".to_vec(), None);
        let enqueued = queue.enqueue(task).await.expect("enqueue");
        assert_eq!(enqueued.id, Some(1));

        let item = queue
            .dequeue(Duration::from_secs(1))
            .await
            .expect("dequeue")
            .expect("a task should be available");
        assert_eq!(item.task.id, Some(1));
        assert_eq!(item.task.payload, b"add|1|2");

        assert_eq!(queue.len().await.unwrap(), 0);

        cleanup(&queue).await;
    }

    #[tokio::test]
    async fn dequeue_times_out_when_empty() {
        let queue = test_queue().await;
        let item = queue
            .dequeue(Duration::from_secs(1))
            .await
            .expect("dequeue");
        assert!(item.is_none());
        cleanup(&queue).await;
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let queue = test_queue().await;
        let task = Task::new(b"payload".to_vec(), None);
        queue.enqueue(task).await.unwrap();
        let item = queue
            .dequeue(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();

        queue.release(&item).await.unwrap();
        // Releasing again must not error and must not resurrect the task.
        queue.release(&item).await.unwrap();

        let status = queue.status().await.unwrap();
        assert_eq!(status.in_flight, 0);
        assert_eq!(status.queued, 0);

        cleanup(&queue).await;
    }

    #[tokio::test]
    async fn requeue_moves_task_back_to_ready_list() {
        let queue = test_queue().await;
        let task = Task::new(b"payload".to_vec(), None);
        queue.enqueue(task).await.unwrap();
        let item = queue
            .dequeue(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();

        let moved = queue.requeue(&item).await.unwrap();
        assert!(moved);
        assert_eq!(queue.len().await.unwrap(), 1);

        // Requeuing a task that's no longer in-flight is a no-op, not an error.
        let moved_again = queue.requeue(&item).await.unwrap();
        assert!(!moved_again);

        cleanup(&queue).await;
    }
}
