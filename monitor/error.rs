use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Queue error {0}")]
    Queue(#[from] taskq_queue::Error),

    #[error("Task error {0}")]
    Task(#[from] taskq_task::Error),

    #[error("I/O error {0}")]
    Io(#[from] std::io::Error),

    #[error("Child process exited before reporting a result")]
    ChildClosedPipe,
}
