use lazy_static::lazy_static;

use crate::error::Error;
use crate::keys::QueueKeys;

// Pop the head of the ready list and move it into the in-flight set.
//
// KEYS:
//  1. queue list
//  2. enqueued zset
//  3. dequeued zset
//  4. stats hash
// ARGS:
//  1. current time in epoch millis
const TAKE_SCRIPT: &str = r##"
    local blob = redis.call("LPOP", KEYS[1])
    if blob == false then
        return false
    end

    redis.call("ZREM", KEYS[2], blob)
    redis.call("ZADD", KEYS[3], ARGV[1], blob)
    redis.call("HINCRBY", KEYS[4], "dequeued", 1)
    return blob
"##;

lazy_static! {
    static ref SCRIPT: redis::Script = redis::Script::new(TAKE_SCRIPT);
}

/// The "take work" half of dequeue: atomically pops `<name>`, removes the
/// task from `<name>_enqueued`, and records it in `<name>_dequeued`. Returns
/// `None` if the queue was empty — the valid transient where a notification
/// sentinel outran the queue itself (see the sweeper's R1 reconciliation).
pub(crate) struct TakeScript(&'static redis::Script);

impl TakeScript {
    pub(crate) fn new() -> Self {
        TakeScript(&SCRIPT)
    }

    pub(crate) async fn run(
        &self,
        keys: &QueueKeys,
        conn: &mut taskq_store::Connection,
        now_millis: i64,
    ) -> Result<Option<Vec<u8>>, Error> {
        let blob: Option<Vec<u8>> = self
            .0
            .key(&keys.queue)
            .key(&keys.enqueued)
            .key(&keys.dequeued)
            .key(&keys.stats)
            .arg(now_millis)
            .invoke_async(&mut **conn)
            .await?;

        Ok(blob)
    }
}
