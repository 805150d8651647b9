//! Platform-specific path utilities.

use crate::config::PathsConfig;
use crate::error::{MlxqError, Result};
use std::path::PathBuf;

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| MlxqError::Config {
        message: "Could not determine home directory".to_string(),
    })
}

/// Default base directory for converted models: `~/MLX_Models`.
pub fn default_output_base() -> Result<PathBuf> {
    Ok(home_dir()?.join(PathsConfig::DEFAULT_OUTPUT_DIR_NAME))
}

/// Location of the front-end settings file: `~/.mlx_quant_gui.json`.
pub fn settings_path() -> Result<PathBuf> {
    Ok(home_dir()?.join(PathsConfig::SETTINGS_FILENAME))
}
