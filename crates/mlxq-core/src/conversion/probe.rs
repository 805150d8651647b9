//! Detection of the installed mlx-lm calling convention.

use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

use super::command::ToolInvocation;
use crate::config::ToolConfig;
use crate::error::{MlxqError, Result};

/// Find which `ToolInvocation` the interpreter supports.
///
/// Tries the current module-subcommand form first, then the dotted form.
/// `Ok(None)` means the interpreter runs but mlx-lm answers to neither;
/// an error means the interpreter itself could not be launched.
pub async fn probe_tool(python: &str) -> Result<Option<ToolInvocation>> {
    for invocation in [
        ToolInvocation::ModuleSubcommand,
        ToolInvocation::DottedSubmodule,
    ] {
        let child = Command::new(python)
            .args(invocation.help_args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| MlxqError::ProcessSpawn {
                program: python.to_string(),
                message: e.to_string(),
                source: Some(e),
            })?;

        match tokio::time::timeout(ToolConfig::PROBE_TIMEOUT, wait_success(child)).await {
            Ok(true) => {
                debug!("{} supports {:?}", python, invocation);
                return Ok(Some(invocation));
            }
            Ok(false) => debug!("{} rejected {:?}", python, invocation),
            Err(_) => debug!("{} timed out probing {:?}", python, invocation),
        }
    }
    Ok(None)
}

async fn wait_success(mut child: tokio::process::Child) -> bool {
    matches!(child.wait().await, Ok(status) if status.success())
}
