//! Centralized configuration for the mlxq core.
//!
//! Constants for the external tool's calling convention, the conversion
//! runner, and on-disk locations.

use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const INSTALL_HINT: &'static str = "pip install -U mlx-lm";
}

/// The external conversion tool.
pub struct ToolConfig;

impl ToolConfig {
    #[cfg(windows)]
    pub const DEFAULT_PYTHON: &'static str = "python";
    #[cfg(not(windows))]
    pub const DEFAULT_PYTHON: &'static str = "python3";

    pub const MODULE: &'static str = "mlx_lm";
    pub const SUBCOMMAND: &'static str = "convert";
    /// Dotted submodule form used by older mlx-lm releases.
    pub const LEGACY_MODULE: &'static str = "mlx_lm.convert";

    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
    pub const OFFLINE_ENV: &'static str = "HF_HUB_OFFLINE";
    /// Keeps the interpreter from block-buffering piped output.
    pub const UNBUFFERED_ENV: &'static str = "PYTHONUNBUFFERED";
}

/// Conversion runner tuning.
pub struct RunnerConfig;

impl RunnerConfig {
    /// Time between the graceful termination signal and a forced kill.
    pub const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(5);
    /// Output lines kept for the failure diagnostic.
    pub const TAIL_LINES: usize = 20;
    /// Capacity of the live output channel.
    pub const CHANNEL_CAPACITY: usize = 1024;
}

/// Shared directory and path configurations.
pub struct PathsConfig;

impl PathsConfig {
    pub const DEFAULT_OUTPUT_DIR_NAME: &'static str = "MLX_Models";
    pub const SETTINGS_FILENAME: &'static str = ".mlx_quant_gui.json";
    /// `strftime` pattern for timestamped output folders.
    pub const TIMESTAMP_FORMAT: &'static str = "%Y%m%d_%H%M%S";
}

/// System checks before a conversion.
pub struct SystemConfig;

impl SystemConfig {
    pub const MIN_FREE_DISK_BYTES: u64 = 10 * 1024 * 1024 * 1024; // 10 GiB
    pub const DEFAULT_WIRED_LIMIT_MB: u64 = 96_000;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_reasonable() {
        assert!(RunnerConfig::CANCEL_GRACE_PERIOD > Duration::ZERO);
        assert!(ToolConfig::PROBE_TIMEOUT >= Duration::from_secs(1));
    }

    #[test]
    fn test_tail_fits_in_channel() {
        assert!(RunnerConfig::TAIL_LINES > 0);
        assert!(RunnerConfig::CHANNEL_CAPACITY >= RunnerConfig::TAIL_LINES);
    }
}
