use std::ffi::OsString;
use std::time::Duration;

/// Parameters shared by both monitor variants. `child_program`/`child_args`
/// describe the subprocess to spawn for each task (fork variant) or to keep
/// alive across tasks (prefork variant) — see [`crate::fork::ForkMonitor`]
/// and [`crate::prefork::PreforkMonitor`].
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// How long a single `dequeue` call blocks waiting for a notification.
    pub dequeue_wait: Duration,
    /// How long to wait after SIGTERM before escalating to SIGKILL.
    pub kill_grace: Duration,
    /// Applied to tasks enqueued without their own timeout.
    pub default_timeout: Duration,
    pub child_program: OsString,
    pub child_args: Vec<OsString>,
}

impl MonitorConfig {
    pub fn new(child_program: impl Into<OsString>) -> MonitorConfig {
        MonitorConfig {
            dequeue_wait: Duration::from_secs(5),
            kill_grace: Duration::from_secs(5),
            default_timeout: Duration::from_secs(60),
            child_program: child_program.into(),
            child_args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        self.child_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dequeue_wait(mut self, wait: Duration) -> Self {
        self.dequeue_wait = wait;
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = MonitorConfig::new("/usr/bin/taskq-child")
            .with_args(vec!["--mode", "fork"])
            .with_dequeue_wait(Duration::from_secs(2))
            .with_kill_grace(Duration::from_millis(500))
            .with_default_timeout(Duration::from_secs(30));

        assert_eq!(config.dequeue_wait, Duration::from_secs(2));
        assert_eq!(config.kill_grace, Duration::from_millis(500));
        assert_eq!(config.default_timeout, Duration::from_secs(30));
        assert_eq!(config.child_args, vec!["--mode", "fork"]);
    }
}
