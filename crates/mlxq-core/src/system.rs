//! Pre-flight checks of the machine a conversion will run on.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{AppConfig, SystemConfig, ToolConfig};
use crate::conversion::{probe_tool, ToolInvocation};
use crate::error::{MlxqError, Result};
use crate::platform;

/// One line of the environment report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckEntry {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

/// Result of [`check_environment`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentReport {
    pub entries: Vec<CheckEntry>,
    /// Calling convention found by the probe, if any.
    pub tool: Option<ToolInvocation>,
}

impl EnvironmentReport {
    pub fn all_passed(&self) -> bool {
        self.entries.iter().all(|e| e.passed)
    }

    pub fn entry(&self, name: &str) -> Option<&CheckEntry> {
        self.entries.iter().find(|e| e.name == name)
    }
}

/// Check platform, tool availability and free space under `output_base`.
///
/// Never fails: problems become entries with `passed == false`.
pub async fn check_environment(python: &str, output_base: &Path) -> EnvironmentReport {
    let mut entries = Vec::with_capacity(3);

    entries.push(if platform::is_apple_silicon() {
        CheckEntry {
            name: "platform".to_string(),
            passed: true,
            detail: "Apple Silicon (optimal for MLX)".to_string(),
        }
    } else {
        CheckEntry {
            name: "platform".to_string(),
            passed: false,
            detail: format!(
                "{} detected; MLX runs natively only on Apple Silicon",
                platform::current_platform()
            ),
        }
    });

    let tool = match probe_tool(python).await {
        Ok(Some(invocation)) => {
            entries.push(CheckEntry {
                name: "mlx_lm".to_string(),
                passed: true,
                detail: invocation.entry_args().join(" "),
            });
            Some(invocation)
        }
        Ok(None) => {
            entries.push(CheckEntry {
                name: "mlx_lm".to_string(),
                passed: false,
                detail: format!(
                    "{} module not found for {python}; install with: {}",
                    ToolConfig::MODULE,
                    AppConfig::INSTALL_HINT
                ),
            });
            None
        }
        Err(e) => {
            entries.push(CheckEntry {
                name: "mlx_lm".to_string(),
                passed: false,
                detail: e.to_string(),
            });
            None
        }
    };

    entries.push(match free_disk_space(output_base) {
        Ok(free) => CheckEntry {
            name: "disk_space".to_string(),
            passed: free >= SystemConfig::MIN_FREE_DISK_BYTES,
            detail: format!("{} free", format_gib(free)),
        },
        Err(e) => CheckEntry {
            name: "disk_space".to_string(),
            passed: false,
            detail: e.to_string(),
        },
    });

    debug!("Environment check: {:?}", entries);
    EnvironmentReport { entries, tool }
}

/// Bytes available on the filesystem holding `path`.
///
/// `path` need not exist yet; the nearest existing ancestor is measured.
pub fn free_disk_space(path: &Path) -> Result<u64> {
    let existing = path
        .ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .ok_or_else(|| MlxqError::FileNotFound(path.to_path_buf()))?;
    fs2::available_space(existing).map_err(|e| MlxqError::io("checking free space", existing, e))
}

fn format_gib(bytes: u64) -> String {
    format!("{:.1} GiB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
}
