//! `taskq-sweep` — runs the reconciliation loop against one queue.

use std::time::Duration;

use structopt::StructOpt;
use taskq_graceful_shutdown::GracefulShutdown;
use taskq_queue::Queue;
use taskq_store::StorePool;
use taskq_sweeper::Sweeper;
use tracing::{event, Level};

#[derive(Debug, StructOpt)]
struct Args {
    queue: String,

    #[structopt(long, default_value = "5")]
    interval_secs: u64,

    #[structopt(long, default_value = "10")]
    slack_secs: u64,

    #[structopt(long, default_value = "60")]
    default_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    taskq_cli::init_tracing();
    let args = Args::from_args();

    let pool = StorePool::new(&taskq_cli::redis_url(), None)?;
    let queue = Queue::new(
        pool,
        &args.queue,
        Duration::from_secs(args.default_timeout_secs),
    );

    let sweeper = Sweeper::new(
        queue,
        Duration::from_secs(args.interval_secs),
        Duration::from_secs(args.slack_secs),
    );

    let shutdown = GracefulShutdown::new();
    event!(Level::INFO, queue = %args.queue, "sweeper starting");
    let handle = sweeper.spawn(shutdown.consumer());
    handle.task.await?;
    event!(Level::INFO, "sweeper exiting");

    Ok(())
}
