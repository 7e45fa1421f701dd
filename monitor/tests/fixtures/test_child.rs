//! Tiny child executor used only by `taskq-monitor`'s own live-Redis
//! integration tests (see `lib.rs`'s `#[cfg(all(test, feature = "test_redis"))]`
//! module). Understands three payload verbs: `ok`, `sleep <millis>`,
//! `fail <message>`. Not meant to be installed or run directly.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use taskq_monitor::Executor;
use taskq_queue::Queue;
use taskq_store::StorePool;
use taskq_task::Task;

struct TestExecutor;

#[async_trait]
impl Executor for TestExecutor {
    async fn execute(&self, task: &Task) -> Result<Option<Value>, String> {
        let text =
            std::str::from_utf8(&task.payload).map_err(|e| format!("payload not utf8: {}", e))?;
        let (verb, rest) = text.split_once(' ').unwrap_or((text, ""));

        match verb {
            "ok" => Ok(None),
            "sleep" => {
                let millis: u64 = rest
                    .trim()
                    .parse()
                    .map_err(|e| format!("bad sleep duration {:?}: {}", rest, e))?;
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(None)
            }
            "fail" => Err(rest.to_string()),
            other => Err(format!("unknown verb {:?}", other)),
        }
    }
}

#[tokio::main]
async fn main() {
    let mut args = std::env::args().skip(1);
    let mode = args.next().expect("mode (fork|prefork) argument required");
    let queue_name = args.next().expect("queue name argument required");

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string());
    let pool = StorePool::new(&redis_url, None).expect("creating redis pool");
    let queue = Queue::new(pool, queue_name, Duration::from_secs(60));

    let result = match mode.as_str() {
        "fork" => taskq_monitor::run_fork_child(queue, TestExecutor).await,
        "prefork" => taskq_monitor::run_prefork_child(queue, TestExecutor).await,
        other => panic!("unknown mode {:?}, expected \"fork\" or \"prefork\"", other),
    };

    if let Err(e) = result {
        eprintln!("test child failed: {}", e);
        std::process::exit(1);
    }
}
