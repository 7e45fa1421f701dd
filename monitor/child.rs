//! The generic child-process harness shared by both monitor variants.
//!
//! What a task's payload actually means — the callable it names, how its
//! arguments are decoded — is outside this system's scope; applications
//! supply that by implementing [`Executor`] and wiring it into a small
//! binary via [`crate::fork::run_fork_child`] or
//! [`crate::prefork::run_prefork_child`].

use async_trait::async_trait;
use taskq_task::Task;

use crate::framing::ResultFrame;

/// Invokes whatever a task's payload names. Implemented by the
/// application, not by this crate — the core only needs to run it and
/// observe success/failure.
#[async_trait]
pub trait Executor: Send + Sync + 'static {
    async fn execute(&self, task: &Task) -> Result<Option<serde_json::Value>, String>;
}

#[async_trait]
impl<F, Fut> Executor for F
where
    F: Fn(&Task) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Option<serde_json::Value>, String>> + Send,
{
    async fn execute(&self, task: &Task) -> Result<Option<serde_json::Value>, String> {
        (self)(task).await
    }
}

pub(crate) async fn run_task(executor: &impl Executor, task: &Task) -> ResultFrame {
    match executor.execute(task).await {
        Ok(value) => ResultFrame::Ok(value),
        Err(message) => ResultFrame::Err(message),
    }
}
