use chrono::{DateTime, Utc};
use taskq_task::Task;

/// A task that has been taken off the queue and is now in flight. Holds the
/// exact bytes that were stored in `<name>_dequeued`, so `release` and the
/// sweeper's requeue can remove/move that precise zset member without
/// re-serializing (and risking producing non-identical bytes for an
/// equivalent task).
#[derive(Debug, Clone)]
pub struct DequeuedTask {
    pub task: Task,
    pub dequeued_at: DateTime<Utc>,
    pub(crate) raw: Vec<u8>,
}

impl DequeuedTask {
    pub(crate) fn new(task: Task, dequeued_at: DateTime<Utc>, raw: Vec<u8>) -> Self {
        DequeuedTask {
            task,
            dequeued_at,
            raw,
        }
    }

    /// Reconstruct a `DequeuedTask` from its parts. For child runners that
    /// receive the raw bytes of an already-dequeued task (over stdin or a
    /// pipe) and need to call `release`/`requeue` with the exact same
    /// zset member the queue originally stored.
    pub fn from_parts(task: Task, dequeued_at: DateTime<Utc>, raw: Vec<u8>) -> Self {
        DequeuedTask::new(task, dequeued_at, raw)
    }

    pub fn id(&self) -> Option<u64> {
        self.task.id
    }

    /// The exact serialized bytes this task was stored as. Monitors feeding
    /// a child process over a pipe send this, not a re-serialization of
    /// `task`, so release/requeue always operate on the original zset
    /// member.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}
