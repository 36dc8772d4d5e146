//! Process respawn on failover.
//!
//! The original standby detected a dead primary by `pkill`ing its process
//! group and `fork`/`execvp`-ing a replacement in place. We keep the same
//! shape -- best-effort kill of anything stale, then launch a fresh process
//! -- but via `tokio::process::Command` and `std::env::current_exe()`
//! instead of `exec`, since Rust has no portable in-place exec outside
//! platform-specific `nix`/libc calls the rest of this workspace does not
//! otherwise depend on. The respawned process is a sibling, not a
//! replacement: the caller is expected to exit after a successful respawn.

use std::ffi::OsStr;
use std::path::PathBuf;

use tokio::process::{Child, Command};

#[derive(Debug)]
pub enum SupervisorError {
    CurrentExe(std::io::Error),
    Spawn(std::io::Error),
}

impl std::fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SupervisorError::CurrentExe(e) => write!(f, "could not locate current executable: {e}"),
            SupervisorError::Spawn(e) => write!(f, "could not spawn replacement process: {e}"),
        }
    }
}

impl std::error::Error for SupervisorError {}

/// Best-effort kill of any stray process by name. Mirrors the original's
/// `pkill`; failures (no matching process, `pkill` missing) are logged and
/// swallowed since the subsequent spawn is what actually matters.
pub async fn kill_stale(process_name: &str) {
    match Command::new("pkill").arg("-f").arg(process_name).status().await {
        Ok(status) if !status.success() => {
            tracing::debug!(process_name, ?status, "pkill found nothing to kill");
        }
        Ok(_) => tracing::info!(process_name, "killed stale process"),
        Err(e) => tracing::warn!(process_name, error = %e, "pkill unavailable, continuing"),
    }
}

/// Locate the currently running executable, for respawning ourselves under a
/// different role.
pub fn current_exe() -> Result<PathBuf, SupervisorError> {
    std::env::current_exe().map_err(SupervisorError::CurrentExe)
}

/// Spawn a fresh copy of `exe` with `args`, detached from this process's
/// stdio lifetime (the child outlives us once we exit).
pub fn spawn_detached<I, S>(exe: &std::path::Path, args: I) -> Result<Child, SupervisorError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(exe)
        .args(args)
        .spawn()
        .map_err(SupervisorError::Spawn)
}

/// Promote this process: kill any stale instance of `process_name`, wait
/// `settle` for the kill to take effect, then spawn `exe args...` as the new
/// primary. Returns the spawned `Child`; the caller should exit shortly
/// after so the new process can bind the now-freed port.
pub async fn promote(
    process_name: &str,
    exe: &std::path::Path,
    args: &[String],
    settle: std::time::Duration,
) -> Result<Child, SupervisorError> {
    kill_stale(process_name).await;
    tokio::time::sleep(settle).await;
    spawn_detached(exe, args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_exe_resolves() {
        assert!(current_exe().is_ok());
    }
}
