// =============================================================================
// Order Socket Supervisor — parent process with exit-code restart policy
// =============================================================================
//
// The socket itself lives in a child process (the hidden
// `order-socket-worker` subcommand of this same binary). Exit code 0 means
// the child wants fresh credentials (a token update or a 403) and is
// restarted immediately; anything else is a failure and gets a 5 s backoff.
// Restarting the process, rather than patching a live socket's token, keeps
// the reload path trivial and correct.
// =============================================================================

use anyhow::{Context, Result};
use tracing::{error, info, warn};

const FAILURE_BACKOFF_SECS: u64 = 5;

/// Supervise the order-socket child forever.
pub async fn run_supervisor() -> Result<()> {
    let exe = std::env::current_exe().context("failed to resolve own executable path")?;
    info!(child = %exe.display(), "order socket supervisor starting");

    loop {
        info!("spawning order socket worker");
        let status = tokio::process::Command::new(&exe)
            .arg("order-socket-worker")
            .status()
            .await
            .context("failed to spawn order socket worker")?;

        match status.code() {
            Some(0) => {
                info!("worker exited for credential reload — restarting immediately");
            }
            code => {
                error!(?code, "worker failed — restarting in {FAILURE_BACKOFF_SECS}s");
                tokio::time::sleep(tokio::time::Duration::from_secs(FAILURE_BACKOFF_SECS)).await;
            }
        }

        if status.code().is_none() {
            warn!("worker was killed by a signal");
        }
    }
}
