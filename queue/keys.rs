//! Key layout: `tq:<name>:<suffix>`, mirroring `erq:<name>:<suffix>` from the
//! teacher's Redis-backed job queue.

#[derive(Debug, Clone)]
pub(crate) struct QueueKeys {
    pub queue: String,
    pub noti: String,
    pub id: String,
    pub enqueued: String,
    pub dequeued: String,
    pub stats: String,
}

impl QueueKeys {
    pub(crate) fn new(name: &str) -> QueueKeys {
        QueueKeys {
            queue: format!("tq:{}:queue", name),
            noti: format!("tq:{}:noti", name),
            id: format!("tq:{}:id", name),
            enqueued: format!("tq:{}:enqueued", name),
            dequeued: format!("tq:{}:dequeued", name),
            stats: format!("tq:{}:stats", name),
        }
    }
}
