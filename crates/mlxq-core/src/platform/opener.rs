//! Reveal a directory in the system file manager.

use crate::error::{MlxqError, Result};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

/// Program used to open a directory on this platform.
pub fn opener_program() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "open"
    }
    #[cfg(target_os = "windows")]
    {
        "explorer"
    }
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    {
        "xdg-open"
    }
}

/// Open `path` in the platform file manager without waiting for it.
pub fn open_in_file_manager(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(MlxqError::FileNotFound(path.to_path_buf()));
    }

    let program = opener_program();
    debug!("Opening {} with {}", path.display(), program);

    Command::new(program)
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| MlxqError::ProcessSpawn {
            program: program.to_string(),
            message: e.to_string(),
            source: Some(e),
        })?;
    Ok(())
}
