use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Queue error {0}")]
    Queue(#[from] taskq_queue::Error),
}
