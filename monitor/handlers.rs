use std::sync::Arc;

use taskq_task::Task;

/// Runs in the monitor process after a child has been reaped and its
/// outcome classified. Both callbacks may panic or return without error;
/// the monitor catches panics via `catch_unwind` so a bad handler cannot
/// take the supervision loop down with it.
pub trait Handlers: Send + Sync + 'static {
    fn on_success(&self, task: &Task);
    fn on_error(&self, task: &Task, kill_signal: Option<i32>, message: Option<&str>);
}

/// A `Handlers` built from two closures, for callers who don't want to
/// define a type just to implement the trait.
#[derive(Clone)]
pub struct ClosureHandlers {
    success: Arc<dyn Fn(&Task) + Send + Sync>,
    error: Arc<dyn Fn(&Task, Option<i32>, Option<&str>) + Send + Sync>,
}

impl ClosureHandlers {
    pub fn new(
        success: impl Fn(&Task) + Send + Sync + 'static,
        error: impl Fn(&Task, Option<i32>, Option<&str>) + Send + Sync + 'static,
    ) -> Self {
        ClosureHandlers {
            success: Arc::new(success),
            error: Arc::new(error),
        }
    }
}

impl Handlers for ClosureHandlers {
    fn on_success(&self, task: &Task) {
        (self.success)(task)
    }

    fn on_error(&self, task: &Task, kill_signal: Option<i32>, message: Option<&str>) {
        (self.error)(task, kill_signal, message)
    }
}

/// Invoke a handler call, logging (rather than propagating) any panic —
/// user-supplied handler code must never bring down the supervision loop.
pub(crate) fn run_handler(f: impl FnOnce()) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        let msg = e
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| e.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::event!(tracing::Level::ERROR, panic = %msg, "task handler panicked");
    }
}
