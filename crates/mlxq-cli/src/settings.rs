//! Persisted front-end choices (`~/.mlx_quant_gui.json`).
//!
//! Writes go to a PID-suffixed temp file next to the target and are renamed
//! into place, so a crash never leaves a half-written settings file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mlxq_core::{DType, Preset, QuantizationConfig};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub output_base: Option<PathBuf>,
    pub use_timestamp: bool,
    pub preset: Preset,
    pub quantize: bool,
    pub bits: u32,
    pub group_size: u32,
    pub dtype: DType,
    pub trust_remote_code: bool,
    pub offline: bool,
    pub python: Option<String>,
    pub wired_limit_mb: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        let config = QuantizationConfig::default();
        Self {
            output_base: None,
            use_timestamp: true,
            preset: Preset::default(),
            quantize: config.quantize,
            bits: config.bits,
            group_size: config.group_size,
            dtype: config.dtype,
            trust_remote_code: config.trust_remote_code,
            offline: config.offline,
            python: None,
            wired_limit_mb: None,
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults if the file is missing or unreadable.
    pub fn load(path: &Path) -> Settings {
        match Self::try_load(path) {
            Ok(Some(settings)) => settings,
            Ok(None) => Settings::default(),
            Err(e) => {
                warn!("Ignoring settings file: {:#}", e);
                Settings::default()
            }
        }
    }

    fn try_load(path: &Path) -> Result<Option<Settings>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let settings = serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        debug!("Loaded settings from {}", path.display());
        Ok(Some(settings))
    }

    /// Write atomically: temp file, fsync, rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }

        let serialized = serde_json::to_string_pretty(self).context("serializing settings")?;
        let temp_path = path.with_extension(format!("json.{}.tmp", std::process::id()));

        let write = || -> Result<()> {
            let mut file = fs::File::create(&temp_path)
                .with_context(|| format!("creating {}", temp_path.display()))?;
            std::io::Write::write_all(&mut file, serialized.as_bytes())?;
            file.sync_all()?;
            fs::rename(&temp_path, path)
                .with_context(|| format!("replacing {}", path.display()))?;
            Ok(())
        };

        if let Err(e) = write() {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        debug!("Saved settings to {}", path.display());
        Ok(())
    }

    /// Quantization config seeded from the saved choices.
    pub fn quantization(&self) -> QuantizationConfig {
        QuantizationConfig {
            quantize: self.quantize,
            bits: self.bits,
            group_size: self.group_size,
            dtype: self.dtype,
            trust_remote_code: self.trust_remote_code,
            offline: self.offline,
            dry_run: false,
        }
    }

    /// Remember the choices of a run. Dry runs are never persisted.
    pub fn remember(&mut self, preset: Preset, config: &QuantizationConfig) {
        self.preset = preset;
        self.quantize = config.quantize;
        self.bits = config.bits;
        self.group_size = config.group_size;
        self.dtype = config.dtype;
        self.trust_remote_code = config.trust_remote_code;
        self.offline = config.offline;
    }
}
