//! `taskq-worker` — runs one monitor against a queue. The same binary also
//! serves as its own child program: the monitor re-execs `current_exe()`
//! with `--run-child <mode>` to get an isolated fork/prefork child, so
//! there's no separate binary to install for task execution.

use std::time::Duration;

use structopt::StructOpt;
use taskq_cli::DemoExecutor;
use taskq_graceful_shutdown::GracefulShutdown;
use taskq_monitor::{
    run_fork_child, run_prefork_child, ClosureHandlers, Monitor, MonitorConfig,
};
use taskq_queue::Queue;
use taskq_store::StorePool;
use tracing::{event, Level};

#[derive(Debug, StructOpt)]
struct Args {
    /// Name of the queue to work.
    queue: String,

    /// Execution model: "fork" spawns a fresh child per task, "prefork"
    /// keeps one child alive across tasks.
    #[structopt(long, default_value = "prefork")]
    mode: String,

    #[structopt(long, default_value = "5")]
    dequeue_wait_secs: u64,

    #[structopt(long, default_value = "5")]
    kill_grace_secs: u64,

    #[structopt(long, default_value = "60")]
    default_timeout_secs: u64,

    /// Internal: set by the monitor when re-exec'ing itself as the child
    /// process. Not for direct use.
    #[structopt(long, hidden = true)]
    run_child: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::from_args();

    if let Some(mode) = args.run_child.clone() {
        taskq_cli::init_tracing();
        return run_child(&args.queue, &mode).await;
    }

    taskq_cli::init_tracing();

    let pool = StorePool::new(&taskq_cli::redis_url(), None)?;
    let queue = Queue::new(
        pool,
        &args.queue,
        Duration::from_secs(args.default_timeout_secs),
    );

    let child_program = std::env::current_exe()?;
    let config = MonitorConfig::new(child_program)
        .with_args(vec![
            args.queue.clone(),
            "--run-child".to_string(),
            args.mode.clone(),
        ])
        .with_dequeue_wait(Duration::from_secs(args.dequeue_wait_secs))
        .with_kill_grace(Duration::from_secs(args.kill_grace_secs))
        .with_default_timeout(Duration::from_secs(args.default_timeout_secs));

    let handlers = ClosureHandlers::new(
        |task| event!(Level::INFO, task_id = ?task.id, "task succeeded"),
        |task, signal, message| {
            event!(
                Level::WARN,
                task_id = ?task.id,
                signal,
                message,
                "task failed"
            )
        },
    );

    let shutdown = GracefulShutdown::new();
    let monitor = match args.mode.as_str() {
        "fork" => Monitor::fork(queue, config, handlers),
        "prefork" => Monitor::prefork(queue, config, handlers),
        other => anyhow::bail!("unknown mode {:?}, expected \"fork\" or \"prefork\"", other),
    };

    event!(Level::INFO, queue = %args.queue, mode = %args.mode, "monitor starting");
    monitor.run(shutdown.consumer()).await;
    event!(Level::INFO, "monitor exiting");

    Ok(())
}

async fn run_child(queue_name: &str, mode: &str) -> anyhow::Result<()> {
    let pool = StorePool::new(&taskq_cli::redis_url(), None)?;
    let queue = Queue::new(pool, queue_name, Duration::from_secs(60));

    match mode {
        "fork" => run_fork_child(queue, DemoExecutor).await?,
        "prefork" => run_prefork_child(queue, DemoExecutor).await?,
        other => anyhow::bail!("unknown child mode {:?}", other),
    }

    Ok(())
}
