//! Platform-specific process management.
//!
//! Only the graceful half of termination lives here. The forced kill goes
//! through `tokio::process::Child::kill`, which the runner owns.

#[cfg(unix)]
use std::io::PipeReader;
#[cfg(unix)]
use std::process::Stdio;

use crate::error::Result;
use tracing::debug;

/// Ask a process to shut down gracefully.
///
/// # Platform Behavior
/// - **Linux/macOS**: Sends SIGTERM
/// - **Windows**: No graceful signal exists for console children; returns
///   `Ok(false)` so the caller falls through to a forced kill
///
/// # Returns
/// `true` if the request was delivered, `false` if the process was already
/// gone or no graceful mechanism exists.
pub fn request_termination(pid: u32) -> Result<bool> {
    #[cfg(unix)]
    {
        use crate::error::MlxqError;
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        use tracing::warn;

        let raw = i32::try_from(pid)
            .map_err(|_| MlxqError::Other(format!("PID {pid} out of range")))?;

        debug!("Sending SIGTERM to process {}", pid);
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => {
                debug!("Process {} already exited", pid);
                Ok(false)
            }
            Err(e) => {
                warn!("Failed to send SIGTERM to {}: {}", pid, e);
                Err(MlxqError::Other(format!(
                    "Failed to signal process {pid}: {e}"
                )))
            }
        }
    }

    #[cfg(not(unix))]
    {
        debug!("No graceful termination for process {} on this platform", pid);
        Ok(false)
    }
}

/// One pipe shared by a child's stdout and stderr.
///
/// Returns the read end plus the two write ends to hand to the child. Both
/// streams land in the same kernel buffer, so lines are read back in the
/// order the child wrote them. The caller must drop every write end it still
/// holds once the child is spawned, or the read end never sees EOF.
#[cfg(unix)]
pub fn merged_output_pipe() -> std::io::Result<(PipeReader, Stdio, Stdio)> {
    let (reader, writer) = std::io::pipe()?;
    let err_writer = writer.try_clone()?;
    Ok((reader, Stdio::from(writer), Stdio::from(err_writer)))
}
