//! Platform abstraction layer for cross-platform compatibility.
//!
//! All `#[cfg]` blocks for OS-specific behavior live in this module rather
//! than being scattered through the conversion code.
//!
//! - `paths` - Default output and settings locations
//! - `process` - Graceful termination and output piping of the conversion process
//! - `opener` - Revealing a directory in the system file manager

pub mod opener;
pub mod paths;
pub mod process;

pub use opener::open_in_file_manager;
pub use paths::{default_output_base, settings_path};
#[cfg(unix)]
pub use process::merged_output_pipe;
pub use process::request_termination;

/// Returns the current platform name.
pub fn current_platform() -> &'static str {
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(target_os = "windows")]
    {
        "windows"
    }
    #[cfg(target_os = "macos")]
    {
        "macos"
    }
    #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
    {
        "unknown"
    }
}

/// Returns true on macOS running on Apple Silicon, where MLX runs natively.
pub fn is_apple_silicon() -> bool {
    cfg!(all(target_os = "macos", target_arch = "aarch64"))
}

/// Command that raises the GPU wired memory limit on Apple Silicon.
pub fn wired_limit_command(megabytes: u64) -> String {
    format!("sudo sysctl iogpu.wired_limit_mb={megabytes}")
}
