use lazy_static::lazy_static;

use crate::error::Error;
use crate::keys::QueueKeys;

// Move a task from the in-flight set back to the ready list. Used only by
// the sweeper. Guards against the task having already been released (or
// requeued by a concurrent sweeper) between the caller's scan and this call.
//
// KEYS:
//  1. dequeued zset
//  2. queue list
//  3. noti list
//  4. enqueued zset
//  5. stats hash
// ARGS:
//  1. current time in epoch millis
//  2. the serialized task (the exact zset member to move)
const REQUEUE_SCRIPT: &str = r##"
    local removed = redis.call("ZREM", KEYS[1], ARGV[2])
    if removed == 0 then
        return false
    end

    redis.call("RPUSH", KEYS[2], ARGV[2])
    redis.call("RPUSH", KEYS[3], "1")
    redis.call("ZADD", KEYS[4], ARGV[1], ARGV[2])
    redis.call("HINCRBY", KEYS[5], "requeued", 1)
    return true
"##;

lazy_static! {
    static ref SCRIPT: redis::Script = redis::Script::new(REQUEUE_SCRIPT);
}

pub(crate) struct RequeueScript(&'static redis::Script);

impl RequeueScript {
    pub(crate) fn new() -> Self {
        RequeueScript(&SCRIPT)
    }

    /// Returns `true` if the task was actually moved, `false` if it was no
    /// longer in `<name>_dequeued` (already released, or requeued by another
    /// sweeper cycle racing this one).
    pub(crate) async fn run(
        &self,
        keys: &QueueKeys,
        conn: &mut taskq_store::Connection,
        now_millis: i64,
        serialized_task: &[u8],
    ) -> Result<bool, Error> {
        let moved: bool = self
            .0
            .key(&keys.dequeued)
            .key(&keys.queue)
            .key(&keys.noti)
            .key(&keys.enqueued)
            .key(&keys.stats)
            .arg(now_millis)
            .arg(serialized_task)
            .invoke_async(&mut **conn)
            .await?;

        Ok(moved)
    }
}
