//! The worker side of the queue: a long-running process that dequeues
//! tasks and supervises their execution in a child process, per the
//! common monitor contract — see [`Monitor`].
//!
//! Two variants share that contract: [`fork::ForkMonitor`] spawns a fresh
//! child per task; [`prefork::PreforkMonitor`] keeps one child alive across
//! tasks, talking to it over a framed pipe (see [`framing`]). Both are
//! driven by the same outer loop in [`Monitor::run`].

mod child;
mod config;
mod error;
mod fork;
mod framing;
mod handlers;
mod kill;
mod outcome;
mod prefork;

pub use child::Executor;
pub use config::MonitorConfig;
pub use error::Error;
pub use fork::{run_fork_child, ForkMonitor};
pub use handlers::{ClosureHandlers, Handlers};
pub use outcome::Outcome;
pub use prefork::{run_prefork_child, PreforkMonitor};

use backoff::{backoff::Backoff, ExponentialBackoff};
use taskq_graceful_shutdown::GracefulShutdownConsumer;
use taskq_queue::{DequeuedTask, Queue};
use tracing::{event, Level};

enum MonitorKind {
    Fork(ForkMonitor),
    Prefork(PreforkMonitor),
}

impl MonitorKind {
    fn config(&self) -> &MonitorConfig {
        match self {
            MonitorKind::Fork(m) => m.config(),
            MonitorKind::Prefork(m) => m.config(),
        }
    }

    /// Runs the task, returning its outcome and whether the monitor (as
    /// opposed to the child itself) must still call `release`.
    async fn execute(
        &mut self,
        item: &DequeuedTask,
        timeout: std::time::Duration,
    ) -> Result<(Outcome, bool), Error> {
        match self {
            // The per-task-fork child always releases itself too, but the
            // monitor releases unconditionally after reaping regardless of
            // outcome — release is idempotent, and this is the only way to
            // guarantee release happens even if the child never got to run
            // its own release call (killed, crashed before executing it).
            MonitorKind::Fork(m) => {
                let outcome = m.execute(item, timeout).await?;
                Ok((outcome, true))
            }
            MonitorKind::Prefork(m) => m.execute(item, timeout).await,
        }
    }
}

/// The long-running worker loop: dequeue, supervise, release, report.
pub struct Monitor<H> {
    queue: Queue,
    kind: MonitorKind,
    handlers: H,
}

impl<H: Handlers> Monitor<H> {
    pub fn fork(queue: Queue, config: MonitorConfig, handlers: H) -> Monitor<H> {
        Monitor {
            queue,
            kind: MonitorKind::Fork(ForkMonitor::new(config)),
            handlers,
        }
    }

    pub fn prefork(queue: Queue, config: MonitorConfig, handlers: H) -> Monitor<H> {
        Monitor {
            queue,
            kind: MonitorKind::Prefork(PreforkMonitor::new(config)),
            handlers,
        }
    }

    /// Runs until `shutdown` fires. On a shutdown signal the loop finishes
    /// its current supervision cycle (if any) before returning — it never
    /// exits while a child it started is unaccounted for.
    pub async fn run(mut self, mut shutdown: GracefulShutdownConsumer) {
        let shutdown_fut = shutdown.wait_for_shutdown();
        tokio::pin!(shutdown_fut);

        let mut backoff = ExponentialBackoff::default();

        loop {
            let dequeue_wait = self.kind.config().dequeue_wait;

            tokio::select! {
                biased;

                _ = &mut shutdown_fut => break,

                dequeued = self.queue.dequeue(dequeue_wait) => {
                    match dequeued {
                        Ok(Some(item)) => {
                            backoff.reset();
                            self.supervise_one(item).await;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            event!(Level::ERROR, queue = %self.queue.name(), error = %e, "dequeue failed, backing off");
                            match backoff.next_backoff() {
                                Some(delay) => tokio::time::sleep(delay).await,
                                None => break,
                            }
                        }
                    }
                }
            }
        }
    }

    async fn supervise_one(&mut self, item: DequeuedTask) {
        let timeout = item.task.effective_timeout(self.kind.config().default_timeout);

        let outcome = match self.kind.execute(&item, timeout).await {
            Ok(outcome) => outcome,
            Err(e) => {
                event!(Level::ERROR, queue = %self.queue.name(), task_id = ?item.id(), error = %e, "failed to supervise task");
                return;
            }
        };

        let (outcome, monitor_should_release) = outcome;

        if monitor_should_release {
            if let Err(e) = self.queue.release(&item).await {
                event!(Level::ERROR, queue = %self.queue.name(), task_id = ?item.id(), error = %e, "failed to release task");
            }
        }

        let task = &item.task;
        match &outcome {
            Outcome::Success => {
                handlers::run_handler(|| self.handlers.on_success(task));
            }
            Outcome::TaskError { message } => {
                handlers::run_handler(|| self.handlers.on_error(task, None, Some(message.as_str())));
            }
            Outcome::TimedOut { signal } => {
                handlers::run_handler(|| self.handlers.on_error(task, Some(*signal), None));
            }
            Outcome::Died { signal } => {
                handlers::run_handler(|| self.handlers.on_error(task, *signal, None));
            }
        }
    }
}

#[cfg(all(test, feature = "test_redis"))]
mod tests {
    use super::*;
    use std::time::Duration;
    use taskq_store::StorePool;
    use taskq_task::Task;

    const TEST_CHILD: &str = env!("CARGO_BIN_EXE_taskq-monitor-test-child");

    async fn test_queue(name: &str) -> Queue {
        dotenv::dotenv().ok();
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let pool = StorePool::new(&redis_url, None).expect("creating redis pool");
        Queue::new(pool, name, Duration::from_secs(30))
    }

    async fn cleanup(name: &str) {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let pool = StorePool::new(&redis_url, None).expect("creating redis pool");
        let mut conn = pool.get().await.expect("cleanup connection");
        let mut pipe = redis::Pipeline::with_capacity(6);
        for suffix in ["queue", "noti", "id", "enqueued", "dequeued", "stats"] {
            pipe.cmd("DEL").arg(format!("tq:{}:{}", name, suffix));
        }
        pipe.query_async(&mut conn).await.expect("cleanup");
    }

    fn config(mode: &str, queue_name: &str) -> MonitorConfig {
        MonitorConfig::new(TEST_CHILD)
            .with_args(vec![mode.to_string(), queue_name.to_string()])
            .with_dequeue_wait(Duration::from_secs(1))
            .with_kill_grace(Duration::from_millis(200))
            .with_default_timeout(Duration::from_secs(30))
    }

    #[tokio::test]
    async fn fork_monitor_runs_task_and_monitor_release_is_idempotent() {
        let name = format!("test-monitor-fork-{}", uuid::Uuid::new_v4());
        let queue = test_queue(&name).await;

        queue
            .enqueue(Task::new(b"ok".to_vec(), None))
            .await
            .unwrap();
        let item = queue
            .dequeue(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();

        let fork = fork::ForkMonitor::new(config("fork", &name));
        let outcome = fork.execute(&item, Duration::from_secs(5)).await.unwrap();
        assert!(outcome.is_success());

        // The child already released on the happy path; the monitor's
        // unconditional release afterward must be a no-op, not an error.
        queue.release(&item).await.unwrap();

        let status = queue.status().await.unwrap();
        assert_eq!(status.in_flight, 0);

        cleanup(&name).await;
    }

    #[tokio::test]
    async fn fork_monitor_kills_task_that_exceeds_timeout() {
        let name = format!("test-monitor-fork-timeout-{}", uuid::Uuid::new_v4());
        let queue = test_queue(&name).await;

        queue
            .enqueue(Task::new(b"sleep 2000".to_vec(), None))
            .await
            .unwrap();
        let item = queue
            .dequeue(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();

        let fork = fork::ForkMonitor::new(config("fork", &name));
        let outcome = fork
            .execute(&item, Duration::from_millis(200))
            .await
            .unwrap();
        assert!(outcome.kill_signal().is_some());

        // Fork variant: the monitor always releases after reaping,
        // regardless of outcome.
        queue.release(&item).await.unwrap();
        let status = queue.status().await.unwrap();
        assert_eq!(status.in_flight, 0);

        cleanup(&name).await;
    }

    #[tokio::test]
    async fn prefork_monitor_reuses_child_across_tasks_and_self_releases() {
        let name = format!("test-monitor-prefork-{}", uuid::Uuid::new_v4());
        let queue = test_queue(&name).await;

        let mut prefork = prefork::PreforkMonitor::new(config("prefork", &name));

        for _ in 0..2 {
            queue
                .enqueue(Task::new(b"ok".to_vec(), None))
                .await
                .unwrap();
            let item = queue
                .dequeue(Duration::from_secs(1))
                .await
                .unwrap()
                .unwrap();

            let (outcome, monitor_should_release) =
                prefork.execute(&item, Duration::from_secs(5)).await.unwrap();
            assert!(outcome.is_success());
            // Happy path: the child released itself; the monitor must not.
            assert!(!monitor_should_release);
        }

        let status = queue.status().await.unwrap();
        assert_eq!(status.in_flight, 0);

        cleanup(&name).await;
    }

    #[tokio::test]
    async fn prefork_monitor_kills_unresponsive_child_and_monitor_releases() {
        let name = format!("test-monitor-prefork-timeout-{}", uuid::Uuid::new_v4());
        let queue = test_queue(&name).await;

        queue
            .enqueue(Task::new(b"sleep 2000".to_vec(), None))
            .await
            .unwrap();
        let item = queue
            .dequeue(Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();

        let mut prefork = prefork::PreforkMonitor::new(config("prefork", &name));
        let (outcome, monitor_should_release) = prefork
            .execute(&item, Duration::from_millis(200))
            .await
            .unwrap();
        assert!(outcome.kill_signal().is_some());
        assert!(monitor_should_release);

        queue.release(&item).await.unwrap();
        let status = queue.status().await.unwrap();
        assert_eq!(status.in_flight, 0);

        cleanup(&name).await;
    }
}
