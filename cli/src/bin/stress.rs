//! `taskq-stress` — load generator mirroring the teacher's `erq-stress`:
//! N producer tasks enqueue, M consumer tasks dequeue-then-release directly
//! (bypassing the monitor/child split, to measure the queue protocol's own
//! throughput rather than subprocess spawn cost).

use std::time::Duration;

use futures::future::try_join_all;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use structopt::StructOpt;
use taskq_graceful_shutdown::{GracefulShutdown, GracefulShutdownConsumer};
use taskq_queue::Queue;
use taskq_store::StorePool;
use taskq_task::Task;
use tokio::{sync::watch, task::JoinHandle};

#[derive(Debug, StructOpt)]
struct Args {
    #[structopt(
        long,
        required_unless = "num-jobs",
        help = "How many seconds to spend producing tasks"
    )]
    time: Option<u64>,

    #[structopt(
        short,
        long,
        required_unless = "time",
        conflicts_with = "time",
        help = "The number of tasks to produce"
    )]
    num_jobs: Option<usize>,

    #[structopt(short, long, help = "Number of task-producing workers")]
    producers: usize,

    #[structopt(short, long, help = "Number of task-consuming workers")]
    consumers: usize,

    #[structopt(long, help = "Queue to run against; default is a fresh random name")]
    queue: Option<String>,
}

enum JobLimit {
    Num(usize),
    Time(Duration),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    taskq_cli::init_tracing();
    let args = Args::from_args();

    let pool = StorePool::new(
        &taskq_cli::redis_url(),
        Some(args.consumers + args.producers + 1),
    )?;

    let queue_name = args
        .queue
        .unwrap_or_else(|| format!("stress-{}", uuid::Uuid::new_v4()));
    let queue = Queue::new(pool, &queue_name, Duration::from_secs(60));

    let job_limit = match (args.num_jobs, args.time) {
        (Some(n), _) => JobLimit::Num(n),
        (_, Some(d)) => JobLimit::Time(Duration::from_secs(d)),
        _ => anyhow::bail!("neither --num-jobs nor --time was given"),
    };

    let mut shutdown = GracefulShutdown::new();

    let status_task = {
        let queue = queue.clone();
        let consumer = shutdown.consumer();
        tokio::spawn(async move { queue_status(queue, consumer).await })
    };

    let (stop_consumers_tx, stop_consumers_rx) = watch::channel(false);

    let producers = spawn_producers(
        queue.clone(),
        args.producers,
        shutdown.consumer(),
        stop_consumers_tx,
        job_limit,
    );
    let consumers = spawn_consumers(
        queue.clone(),
        args.consumers,
        shutdown.consumer(),
        stop_consumers_rx,
    );

    let (produced, consumed) = tokio::try_join!(producers, consumers)?;
    produced?;
    consumed?;

    shutdown.shutdown();
    status_task.await?;

    Ok(())
}

fn spawn_producers(
    queue: Queue,
    num_workers: usize,
    mut shutdown: GracefulShutdownConsumer,
    stop_consumers: watch::Sender<bool>,
    limit: JobLimit,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        let total = match limit {
            JobLimit::Num(n) => n,
            JobLimit::Time(_) => usize::MAX,
        };
        let per_worker = total / num_workers.max(1);
        let remainder = total % num_workers.max(1);

        let (close_workers_tx, close_workers_rx) = watch::channel(false);

        let workers: Vec<_> = (0..num_workers)
            .map(|i| {
                let n = per_worker + if i < remainder { 1 } else { 0 };
                producer(queue.clone(), i, n, shutdown.clone(), close_workers_rx.clone())
            })
            .collect();

        match limit {
            JobLimit::Time(d) => {
                tokio::select! {
                    _ = tokio::time::sleep(d) => {},
                    _ = shutdown.wait_for_shutdown() => {},
                }
                close_workers_tx.send(true).ok();
                try_join_all(workers)
                    .await?
                    .into_iter()
                    .collect::<anyhow::Result<Vec<()>>>()?;
            }
            JobLimit::Num(_) => {
                try_join_all(workers)
                    .await?
                    .into_iter()
                    .collect::<anyhow::Result<Vec<()>>>()?;
            }
        }

        stop_consumers.send(true).ok();
        Ok(())
    })
}

fn producer(
    queue: Queue,
    index: usize,
    num_jobs: usize,
    mut shutdown: GracefulShutdownConsumer,
    close: watch::Receiver<bool>,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        for i in 0..num_jobs {
            if shutdown.shutting_down() || *close.borrow() {
                break;
            }
            let task = Task::new(format!("echo producer-{}-{}", index, i).into_bytes(), None);
            queue.enqueue(task).await?;
        }
        Ok(())
    })
}

fn spawn_consumers(
    queue: Queue,
    num_workers: usize,
    shutdown: GracefulShutdownConsumer,
    stop: watch::Receiver<bool>,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        let workers: Vec<_> = (0..num_workers)
            .map(|_| consumer(queue.clone(), shutdown.clone(), stop.clone()))
            .collect();
        try_join_all(workers)
            .await?
            .into_iter()
            .collect::<anyhow::Result<Vec<()>>>()?;
        Ok(())
    })
}

fn consumer(
    queue: Queue,
    mut shutdown: GracefulShutdownConsumer,
    stop: watch::Receiver<bool>,
) -> JoinHandle<anyhow::Result<()>> {
    tokio::spawn(async move {
        loop {
            match queue.dequeue(Duration::from_millis(500)).await? {
                Some(item) => queue.release(&item).await?,
                None if *stop.borrow() => break,
                None => {}
            }

            if shutdown.shutting_down() {
                break;
            }
        }
        Ok(())
    })
}

async fn queue_status(queue: Queue, mut shutdown: GracefulShutdownConsumer) {
    let bars = MultiProgress::new();

    let queued_bar = ProgressBar::new(u64::MAX)
        .with_style(ProgressStyle::default_spinner().template("{spinner} {pos} queued"));
    let enqueued_bar = ProgressBar::new(u64::MAX).with_style(
        ProgressStyle::default_spinner().template("{spinner} {pos} enqueued total ({per_sec})"),
    );
    let released_bar = ProgressBar::new(u64::MAX).with_style(
        ProgressStyle::default_spinner().template("{spinner} {pos} released total ({per_sec})"),
    );

    bars.add(queued_bar.clone());
    bars.add(enqueued_bar.clone());
    bars.add(released_bar.clone());

    let update_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(500));
        loop {
            tokio::select! {
                _ = interval.tick() => {},
                _ = shutdown.wait_for_shutdown() => break,
            }

            match queue.status().await {
                Ok(status) => {
                    queued_bar.set_position(status.queued as u64);
                    enqueued_bar.set_position(status.total_enqueued);
                    released_bar.set_position(status.total_released);
                }
                Err(_) => break,
            }
        }

        queued_bar.finish_at_current_pos();
        enqueued_bar.finish_at_current_pos();
        released_bar.finish_at_current_pos();
    });

    tokio::task::spawn_blocking(move || {
        bars.join().ok();
    })
    .await
    .ok();

    update_task.await.ok();
}
