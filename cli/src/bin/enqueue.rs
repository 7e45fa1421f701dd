//! `taskq-enqueue` — ad hoc producer and introspection tool, mirroring the
//! teacher's `erq` binary.

use std::time::Duration;

use structopt::StructOpt;
use taskq_queue::Queue;
use taskq_store::StorePool;
use taskq_task::Task;

#[derive(Debug, StructOpt)]
struct Args {
    queue: String,
    #[structopt(subcommand)]
    cmd: QueueCmd,
}

#[derive(Debug, StructOpt)]
enum QueueCmd {
    /// Enqueue a task whose payload is one of the demo verbs understood by
    /// `taskq-worker`'s `DemoExecutor`: "echo <msg>", "sleep <millis>",
    /// "fail <msg>".
    Add {
        payload: String,
        #[structopt(long)]
        timeout_secs: Option<u64>,
    },
    /// Print queue/notification/in-flight lengths and lifetime counters.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    taskq_cli::init_tracing();
    let args = Args::from_args();

    let pool = StorePool::new(&taskq_cli::redis_url(), None)?;
    let queue = Queue::new(pool, &args.queue, Duration::from_secs(60));

    match args.cmd {
        QueueCmd::Add {
            payload,
            timeout_secs,
        } => {
            let task = Task::new(payload.into_bytes(), timeout_secs.map(Duration::from_secs));
            let enqueued = queue.enqueue(task).await?;
            println!("enqueued task {:?}", enqueued.id);
        }
        QueueCmd::Status => {
            let status = queue.status().await?;
            println!("{:#?}", status);
        }
    }

    Ok(())
}
