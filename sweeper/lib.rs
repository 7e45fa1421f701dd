//! The reconciliation loop that restores queue invariants after a crash.
//!
//! Runs R1 (notification refill) before R2 (timeout requeue) every cycle, so
//! a task's notification sentinel is always present before any worker could
//! re-dequeue it — see [`Sweeper::run_once`].

use std::time::Duration;

use chrono::Utc;
use taskq_graceful_shutdown::GracefulShutdownConsumer;
use taskq_queue::Queue;
use tokio::{sync::oneshot, task::JoinHandle};
use tracing::{event, Level};

mod error;
pub use error::Error;

/// One sweep cycle's summary, useful for tests and for logging.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Notification sentinels appended (positive) or removed (negative).
    pub notifications_delta: i64,
    /// In-flight tasks moved back to the ready list for having overrun
    /// their timeout plus slack.
    pub requeued: usize,
}

pub struct Sweeper {
    queue: Queue,
    interval: Duration,
    slack: Duration,
}

impl Sweeper {
    /// `interval` is how often a cycle runs; `slack` accounts for clock skew
    /// and scheduling jitter on top of each task's own timeout before R2
    /// will requeue it. A task whose dequeue age is less than its own
    /// timeout is never requeued, regardless of `slack`.
    pub fn new(queue: Queue, interval: Duration, slack: Duration) -> Sweeper {
        Sweeper {
            queue,
            interval,
            slack,
        }
    }

    /// Run a single reconciliation cycle: R1 then R2, in that order.
    pub async fn run_once(&self) -> Result<SweepReport, Error> {
        let notifications_delta = self.queue.reconcile_notifications().await?;

        let in_flight = self.queue.in_flight().await?;
        let now = Utc::now();
        let mut requeued = 0;

        for item in in_flight {
            let timeout = item.task.effective_timeout(self.queue.default_timeout());
            let age = now.signed_duration_since(item.dequeued_at);
            let age = age.to_std().unwrap_or(Duration::ZERO);

            if age > timeout + self.slack {
                if self.queue.requeue(&item).await? {
                    requeued += 1;
                }
            }
        }

        if notifications_delta != 0 || requeued != 0 {
            event!(
                Level::INFO,
                queue = %self.queue.name(),
                notifications_delta,
                requeued,
                "sweep cycle made repairs"
            );
        }

        Ok(SweepReport {
            notifications_delta,
            requeued,
        })
    }

    /// Spawn the periodic loop. Stops when `shutdown` fires or the returned
    /// [`SweeperHandle`] is dropped/stopped.
    pub fn spawn(self, mut shutdown: GracefulShutdownConsumer) -> SweeperHandle {
        let (closer_tx, closer_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let shutdown_fut = shutdown.wait_for_shutdown();
            tokio::pin!(shutdown_fut);
            tokio::pin!(closer_rx);

            let mut ticker = tokio::time::interval(self.interval);

            loop {
                tokio::select! {
                    biased;

                    _ = &mut shutdown_fut => break,
                    _ = &mut closer_rx => break,
                    _ = ticker.tick() => {},
                };

                match self.run_once().await {
                    Ok(_) => {}
                    Err(e) => {
                        event!(Level::ERROR, queue = %self.queue.name(), error = %e, "sweep cycle failed");
                    }
                }
            }
        });

        SweeperHandle {
            closer: Some(closer_tx),
            task,
        }
    }
}

pub struct SweeperHandle {
    closer: Option<oneshot::Sender<()>>,
    pub task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Ask the sweeper loop to stop after its current cycle, if any, and
    /// wait for it to finish.
    pub async fn stop(mut self) {
        if let Some(closer) = self.closer.take() {
            let _ = closer.send(());
        }
        let _ = self.task.await;
    }
}

#[cfg(all(test, feature = "test_redis"))]
mod tests {
    use super::*;
    use std::time::Duration;
    use taskq_store::StorePool;
    use taskq_task::Task;

    async fn test_queue() -> Queue {
        dotenv::dotenv().ok();
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        let pool = StorePool::new(&redis_url, None).expect("creating redis pool");
        let name = format!("test-sweep-{}", uuid::Uuid::new_v4());
        Queue::new(pool, name, Duration::from_secs(30))
    }

    #[tokio::test]
    async fn clean_queue_is_a_no_op() {
        let queue = test_queue().await;
        let sweeper = Sweeper::new(queue, Duration::from_secs(1), Duration::from_secs(1));
        let report = sweeper.run_once().await.unwrap();
        assert_eq!(report, SweepReport::default());
    }

    #[tokio::test]
    async fn lost_notification_is_refilled() {
        let queue = test_queue().await;
        let task = Task::new(b"payload".to_vec(), None);
        queue.enqueue(task).await.unwrap();

        // Simulate a worker that popped the notification and died before
        // taking the matching item off the queue itself.
        let mut conn = queue_conn(&queue).await;
        let _: Option<String> =
            redis::cmd("LPOP").arg(noti_key(&queue)).query_async(&mut conn).await.unwrap();

        let sweeper = Sweeper::new(queue.clone(), Duration::from_secs(1), Duration::from_secs(1));
        let report = sweeper.run_once().await.unwrap();
        assert_eq!(report.notifications_delta, 1);

        let status = queue.status().await.unwrap();
        assert_eq!(status.queued, status.notifications);
    }

    #[tokio::test]
    async fn does_not_requeue_before_timeout_elapses() {
        let queue = test_queue().await;
        let task = Task::new(b"payload".to_vec(), Some(Duration::from_secs(60)));
        queue.enqueue(task).await.unwrap();
        queue.dequeue(Duration::from_secs(1)).await.unwrap();

        let sweeper = Sweeper::new(queue.clone(), Duration::from_secs(1), Duration::from_secs(1));
        let report = sweeper.run_once().await.unwrap();
        assert_eq!(report.requeued, 0);
    }

    #[tokio::test]
    async fn requeues_task_past_timeout_plus_slack() {
        let queue = test_queue().await;
        let task = Task::new(b"payload".to_vec(), Some(Duration::from_millis(50)));
        queue.enqueue(task).await.unwrap();
        queue.dequeue(Duration::from_secs(1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;

        let sweeper = Sweeper::new(queue.clone(), Duration::from_secs(1), Duration::from_millis(50));
        let report = sweeper.run_once().await.unwrap();
        assert_eq!(report.requeued, 1);
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    // Tests only: reach past the public API to poke at the raw key,
    // simulating the crash window between the two dequeue steps.
    async fn queue_conn(_queue: &Queue) -> taskq_store::Connection {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
        StorePool::new(&redis_url, None).unwrap().get().await.unwrap()
    }

    fn noti_key(queue: &Queue) -> String {
        format!("tq:{}:noti", queue.name())
    }
}
