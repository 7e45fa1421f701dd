//! Task identity, payload, and the (external) serializer contract.
//!
//! A [`Task`] is value-immutable once enqueued: its id, timeout, and payload
//! never change after a producer hands it to the queue. All of a task's
//! mutable state (whether it's waiting, in flight, or gone) lives in the
//! queue's index structures, not in the task itself.

mod error;

pub use error::Error;

use std::time::Duration;

/// A unit of work: an id assigned at enqueue time, a timeout, and an opaque
/// payload that some external serializer understands how to turn back into a
/// callable plus its arguments.
#[derive(Clone, PartialEq, Eq)]
pub struct Task {
    /// Assigned by `Queue::enqueue` via an atomic increment of `<name>_id`.
    /// `None` only before the task has ever been enqueued.
    pub id: Option<u64>,
    /// `None` means "use the queue's configured default timeout."
    pub timeout: Option<Duration>,
    /// Opaque bytes: a serialized reference to a callable plus its arguments.
    /// The queue never inspects this; only the child runner's serializer does.
    pub payload: Vec<u8>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl Task {
    pub fn new(payload: Vec<u8>, timeout: Option<Duration>) -> Task {
        Task {
            id: None,
            timeout,
            payload,
        }
    }

    pub fn with_id(mut self, id: u64) -> Task {
        self.id = Some(id);
        self
    }

    pub fn effective_timeout(&self, default_timeout: Duration) -> Duration {
        self.timeout.unwrap_or(default_timeout)
    }
}

/// The external serializer contract (spec'd, not owned, by the queue): turn a
/// whole task — id, timeout, and payload — into a single self-contained blob
/// and back. This is what actually goes into the `<name>` list and the
/// `<name>_dequeued` set's stored member.
pub trait Serializer: Send + Sync {
    fn serialize(&self, task: &Task) -> Result<Vec<u8>, Error>;
    fn deserialize(&self, bytes: &[u8]) -> Result<Task, Error>;
}

#[derive(serde::Serialize, serde::Deserialize)]
struct WireTask {
    id: Option<u64>,
    #[serde(with = "serde_millis", skip_serializing_if = "Option::is_none", default)]
    timeout: Option<Duration>,
    payload: Vec<u8>,
}

/// Default [`Serializer`] used by this workspace and by its tests. Real
/// deployments that need to resolve Python-style `module:function` callables
/// (or any other reference scheme) implement `Serializer` themselves; the
/// queue and monitor only ever see the trait.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, task: &Task) -> Result<Vec<u8>, Error> {
        let wire = WireTask {
            id: task.id,
            timeout: task.timeout,
            payload: task.payload.clone(),
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Task, Error> {
        let wire: WireTask = serde_json::from_slice(bytes)?;
        Ok(Task {
            id: wire.id,
            timeout: wire.timeout,
            payload: wire.payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_id_timeout_and_payload() {
        let ser = JsonSerializer;
        let task = Task::new(b"callable:add|1|2".to_vec(), Some(Duration::from_secs(10)))
            .with_id(7);

        let bytes = ser.serialize(&task).unwrap();
        let back = ser.deserialize(&bytes).unwrap();

        assert_eq!(back.id, Some(7));
        assert_eq!(back.timeout, Some(Duration::from_secs(10)));
        assert_eq!(back.payload, task.payload);
    }

    #[test]
    fn round_trips_missing_timeout() {
        let ser = JsonSerializer;
        let task = Task::new(b"payload".to_vec(), None).with_id(1);
        let bytes = ser.serialize(&task).unwrap();
        let back = ser.deserialize(&bytes).unwrap();
        assert_eq!(back.timeout, None);
        assert_eq!(back.effective_timeout(Duration::from_secs(5)), Duration::from_secs(5));
    }
}
