use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::Duration;

use taskq_queue::{DequeuedTask, Queue};
use taskq_task::Task;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{event, instrument, Level};

use crate::config::MonitorConfig;
use crate::error::Error;
use crate::framing::{read_frame, ResultFrame};
use crate::kill::soft_then_hard_kill;
use crate::outcome::Outcome;

/// Runs one subprocess per task. The child exits after a single task, which
/// gives full isolation between tasks at the cost of a fork (here, process
/// spawn) per task. Grounds the per-task-fork monitor variant.
pub struct ForkMonitor {
    pub(crate) config: MonitorConfig,
}

impl ForkMonitor {
    pub fn new(config: MonitorConfig) -> ForkMonitor {
        ForkMonitor { config }
    }

    pub(crate) fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Execute `item` in a fresh child process, enforcing the timeout, and
    /// return the classified outcome. Does not touch the queue — the
    /// caller (the outer loop) owns the release-after-reap rule, since it
    /// applies regardless of which variant is in use.
    #[instrument(level = "debug", skip(self, item), fields(task_id = ?item.id()))]
    pub(crate) async fn execute(
        &self,
        item: &DequeuedTask,
        timeout: Duration,
    ) -> Result<Outcome, Error> {
        // Unlike a user-supplied command executor sandboxing an arbitrary
        // shell command, this child is the same application's own task
        // executor: it needs the process environment (REDIS_URL and
        // friends) to reach the same store this monitor does, so it
        // inherits the environment rather than having it cleared.
        let mut child = Command::new(&self.config.child_program)
            .args(&self.config.child_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        {
            let mut stdin = child.stdin.take().expect("child stdin was piped");
            stdin.write_all(item.raw()).await?;
            stdin.shutdown().await?;
        }

        let outcome = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => classify_exit(&mut child, status).await?,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                let signal = soft_then_hard_kill(&mut child, self.config.kill_grace).await;
                event!(Level::WARN, task_id = ?item.id(), signal, "task exceeded its timeout");
                Outcome::TimedOut { signal }
            }
        };

        Ok(outcome)
    }
}

async fn classify_exit(
    child: &mut tokio::process::Child,
    status: std::process::ExitStatus,
) -> Result<Outcome, Error> {
    if let Some(signal) = status.signal() {
        return Ok(Outcome::Died {
            signal: Some(signal),
        });
    }

    if !status.success() {
        return Ok(Outcome::Died { signal: None });
    }

    let mut stdout = child.stdout.take().expect("child stdout was piped");
    let frame = read_frame(&mut stdout).await?;

    match frame {
        None => Ok(Outcome::Died { signal: None }),
        Some(bytes) => match ResultFrame::decode(&bytes) {
            Ok(ResultFrame::Ok(_)) => Ok(Outcome::Success),
            Ok(ResultFrame::Err(message)) => Ok(Outcome::TaskError { message }),
            Err(e) => Ok(Outcome::TaskError {
                message: format!("malformed result frame: {}", e),
            }),
        },
    }
}

/// The per-task-fork child's own entry point: read the task from stdin,
/// hand it to `run`, write a result frame, release, and exit. Intended to
/// be called from the `main` of a small binary the application provides —
/// see `taskq-cli`'s worker bin for an example.
pub async fn run_fork_child<E>(
    queue: Queue,
    executor: E,
) -> Result<(), Error>
where
    E: crate::child::Executor,
{
    let mut stdin = tokio::io::stdin();
    let mut raw = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut stdin, &mut raw).await?;

    // A task that fails to deserialize is still a task error, not a crash:
    // it's reported via the error path and released like any other outcome
    // (spec.md §4.2). `release` only ever needs the raw bytes (the exact
    // zset member `<name>_dequeued` stores), so a placeholder `Task` stands
    // in for the one that couldn't be reconstructed.
    let (task, frame) = match queue.deserialize(&raw) {
        Ok(task) => {
            let frame = crate::child::run_task(&executor, &task).await;
            (task, frame)
        }
        Err(e) => (
            Task::new(Vec::new(), None),
            ResultFrame::Err(format!("failed to deserialize task: {}", e)),
        ),
    };

    let mut stdout = tokio::io::stdout();
    crate::framing::write_frame(&mut stdout, &frame.encode()).await?;

    let item = DequeuedTask::from_parts(task, chrono::Utc::now(), raw);
    queue.release(&item).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_signal_reported_for_died_process() {
        let outcome = Outcome::Died { signal: Some(11) };
        assert_eq!(outcome.kill_signal(), Some(11));
        assert!(!outcome.is_success());
    }
}
