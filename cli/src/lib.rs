//! Shared plumbing for the `taskq-*` binaries: tracing setup and the demo
//! [`Executor`] used by `taskq-worker`'s spawned children and by
//! `taskq-enqueue`/`taskq-stress` to produce matching payloads.
//!
//! Resolving a task's payload into an actual callable is explicitly outside
//! this system's scope (spec.md §4.2/§6) — a real deployment supplies its
//! own `Executor`. [`DemoExecutor`] exists only so the workspace is runnable
//! end to end without an external serializer/resolver.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use taskq_monitor::Executor;
use taskq_task::Task;

pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1/".to_string())
}

/// A tiny payload DSL so the demo binaries have something to enqueue and
/// execute without pulling in a real task-resolution library:
/// `echo <message>`, `sleep <millis>`, `fail <message>`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DemoExecutor;

#[async_trait]
impl Executor for DemoExecutor {
    async fn execute(&self, task: &Task) -> Result<Option<Value>, String> {
        let text = std::str::from_utf8(&task.payload)
            .map_err(|e| format!("payload is not utf8: {}", e))?;
        let (verb, rest) = text.split_once(' ').unwrap_or((text, ""));

        match verb {
            "echo" => Ok(Some(Value::String(rest.to_string()))),
            "sleep" => {
                let millis: u64 = rest
                    .trim()
                    .parse()
                    .map_err(|e| format!("bad sleep duration {:?}: {}", rest, e))?;
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(Some(Value::String(format!("slept {}ms", millis))))
            }
            "fail" => Err(rest.to_string()),
            other => Err(format!("unknown demo task verb {:?}", other)),
        }
    }
}
