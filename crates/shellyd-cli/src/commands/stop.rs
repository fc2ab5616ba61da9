use std::time::Duration;

use nix::sys::signal::Signal;
use shellyd_core::Paths;
use tracing::info;

use crate::error::CliError;
use crate::pidfile;

const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(100);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Sends SIGTERM to the running daemon and waits for it to exit, matching
/// the daemon's own SIGTERM-then-grace-then-SIGKILL teardown shape (spec.md
/// 5) but applied here to the top-level process rather than a shell child.
pub async fn run() -> Result<(), CliError> {
    let paths = Paths::resolve()?;
    let pid = pidfile::read_running(&paths.pid_file())?;

    info!(pid, "sending SIGTERM");
    pidfile::send(pid, Signal::SIGTERM)?;

    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    while pidfile::is_alive(pid) {
        if tokio::time::Instant::now() >= deadline {
            info!(pid, "grace period elapsed, sending SIGKILL");
            pidfile::send(pid, Signal::SIGKILL)?;
            break;
        }
        tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
    }

    Ok(())
}
