//! Soft-kill-then-hard-kill enforcement shared by both monitor variants.

use std::time::Duration;
use tokio::process::Child;

/// Send SIGTERM, wait `grace`, then SIGKILL if the child is still alive.
/// Returns the signal actually needed to bring the child down, for the
/// caller to report via the error handler.
pub(crate) async fn soft_then_hard_kill(child: &mut Child, grace: Duration) -> i32 {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    } else {
        return libc::SIGKILL;
    }

    let soft_wait = tokio::time::timeout(grace, child.wait()).await;
    if soft_wait.is_ok() {
        return libc::SIGTERM;
    }

    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
        let _ = child.wait().await;
    }

    libc::SIGKILL
}
