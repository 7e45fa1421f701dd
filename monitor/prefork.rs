use std::process::Stdio;
use std::time::Duration;

use taskq_queue::{DequeuedTask, Queue};
use taskq_task::Task;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{event, instrument, Level};

use crate::config::MonitorConfig;
use crate::error::Error;
use crate::framing::{read_frame, write_frame, ResultFrame};
use crate::kill::soft_then_hard_kill;
use crate::outcome::Outcome;

/// Keeps at most one child process alive across tasks, feeding it one task
/// per line of a length-prefixed pipe protocol. Amortizes the cost of a
/// process spawn across many tasks, at the price of accumulated state
/// inside the child between tasks.
pub struct PreforkMonitor {
    config: MonitorConfig,
    child: Option<RunningChild>,
}

struct RunningChild {
    process: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl PreforkMonitor {
    pub fn new(config: MonitorConfig) -> PreforkMonitor {
        PreforkMonitor {
            config,
            child: None,
        }
    }

    pub(crate) fn config(&self) -> &MonitorConfig {
        &self.config
    }

    async fn ensure_child(&mut self) -> Result<&mut RunningChild, Error> {
        if self.child.is_none() {
            // This child is the application's own task executor, not an
            // arbitrary user command, so it inherits the process
            // environment (REDIS_URL and friends) instead of having it
            // cleared.
            let mut process = Command::new(&self.config.child_program)
                .args(&self.config.child_args)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::inherit())
                .spawn()?;

            let stdin = process.stdin.take().expect("child stdin was piped");
            let stdout = process.stdout.take().expect("child stdout was piped");
            self.child = Some(RunningChild {
                process,
                stdin,
                stdout,
            });
        }

        Ok(self.child.as_mut().expect("just ensured"))
    }

    /// Feed one task to the (possibly freshly spawned) persistent child and
    /// wait for either its reply frame or its death, whichever comes first,
    /// racing the task's own timeout. Returns whether the caller (the outer
    /// loop) must also call `release` — true only on the killed/unresponsive
    /// path, since the child releases itself immediately after writing its
    /// reply on the happy path.
    #[instrument(level = "debug", skip(self, item), fields(task_id = ?item.id()))]
    pub(crate) async fn execute(
        &mut self,
        item: &DequeuedTask,
        timeout: Duration,
    ) -> Result<(Outcome, bool), Error> {
        let kill_grace = self.config.kill_grace;
        let running = self.ensure_child().await?;

        write_frame(&mut running.stdin, item.raw()).await?;

        let raced = tokio::time::timeout(timeout, race_reply_or_death(running)).await;

        match raced {
            Ok(Ok(RaceResult::Reply(bytes))) => match ResultFrame::decode(&bytes) {
                Ok(ResultFrame::Ok(_)) => Ok((Outcome::Success, false)),
                Ok(ResultFrame::Err(message)) => Ok((Outcome::TaskError { message }, false)),
                Err(e) => Ok((
                    Outcome::TaskError {
                        message: format!("malformed result frame: {}", e),
                    },
                    false,
                )),
            },
            Ok(Ok(RaceResult::Died(signal))) => {
                self.child = None;
                Ok((Outcome::Died { signal }, true))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                let running = self.child.as_mut().expect("child present during timeout");
                let signal = soft_then_hard_kill(&mut running.process, kill_grace).await;
                self.child = None;
                event!(Level::WARN, task_id = ?item.id(), signal, "task exceeded its timeout");
                Ok((Outcome::TimedOut { signal }, true))
            }
        }
    }
}

enum RaceResult {
    Reply(Vec<u8>),
    Died(Option<i32>),
}

async fn race_reply_or_death(running: &mut RunningChild) -> Result<RaceResult, std::io::Error> {
    tokio::select! {
        frame = read_frame(&mut running.stdout) => {
            match frame? {
                Some(bytes) => Ok(RaceResult::Reply(bytes)),
                None => {
                    let status = running.process.wait().await?;
                    #[cfg(unix)]
                    let signal = std::os::unix::process::ExitStatusExt::signal(&status);
                    #[cfg(not(unix))]
                    let signal = None;
                    Ok(RaceResult::Died(signal))
                }
            }
        }
        status = running.process.wait() => {
            let status = status?;
            #[cfg(unix)]
            let signal = std::os::unix::process::ExitStatusExt::signal(&status);
            #[cfg(not(unix))]
            let signal = None;
            Ok(RaceResult::Died(signal))
        }
    }
}

/// The prefork child's own entry point: loop reading tasks from stdin,
/// executing each with `executor`, writing a reply frame, and releasing —
/// in that order, so the monitor can act on the reply before release
/// necessarily completes. Exits cleanly on EOF (the monitor closed the
/// pipe, or was itself killed).
pub async fn run_prefork_child<E>(queue: Queue, executor: E) -> Result<(), Error>
where
    E: crate::child::Executor,
{
    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();

    loop {
        let raw = match read_frame(&mut stdin).await? {
            Some(raw) => raw,
            None => return Ok(()),
        };

        // A malformed payload is a task error, not a reason to bring down
        // the whole persistent child (spec.md §4.2, §4.3.2): report it via
        // the result frame and keep looping instead of propagating with `?`.
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
        write_frame(&mut stdout, &frame.encode()).await?;

        let item = DequeuedTask::from_parts(task, chrono::Utc::now(), raw);
        queue.release(&item).await?;
    }
}
