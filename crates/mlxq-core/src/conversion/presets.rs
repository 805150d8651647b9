//! Named quantization presets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::types::{DType, QuantizationConfig};
use crate::error::{MlxqError, Result};

/// A named quantization preset, or `Custom` for user-chosen values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    #[default]
    Fast,
    Quality,
    Tiny,
    Balanced,
    Custom,
}

impl Preset {
    pub const ALL: [Preset; 5] = [
        Preset::Fast,
        Preset::Quality,
        Preset::Tiny,
        Preset::Balanced,
        Preset::Custom,
    ];

    /// Short key accepted on the command line and in settings.
    pub fn key(&self) -> &'static str {
        match self {
            Preset::Fast => "fast",
            Preset::Quality => "quality",
            Preset::Tiny => "tiny",
            Preset::Balanced => "balanced",
            Preset::Custom => "custom",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Preset::Fast => "Fast & Good (4-bit)",
            Preset::Quality => "High Quality (8-bit)",
            Preset::Tiny => "Tiny Size (2-bit)",
            Preset::Balanced => "Balanced (6-bit)",
            Preset::Custom => "Custom",
        }
    }

    /// `(bits, group_size, dtype)`, or `None` for `Custom`.
    pub fn values(&self) -> Option<(u32, u32, DType)> {
        match self {
            Preset::Fast => Some((4, 64, DType::Float16)),
            Preset::Quality => Some((8, 64, DType::Float16)),
            Preset::Tiny => Some((2, 128, DType::Bfloat16)),
            Preset::Balanced => Some((6, 64, DType::Float16)),
            Preset::Custom => None,
        }
    }

    /// Overwrite the quantization fields of `config`. Flags are left alone.
    pub fn apply(&self, config: &mut QuantizationConfig) {
        if let Some((bits, group_size, dtype)) = self.values() {
            config.bits = bits;
            config.group_size = group_size;
            config.dtype = dtype;
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Preset {
    type Err = MlxqError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim();
        Preset::ALL
            .into_iter()
            .find(|p| p.key().eq_ignore_ascii_case(wanted) || p.display_name() == wanted)
            .ok_or_else(|| {
                MlxqError::config_validation(
                    "preset",
                    format!(
                        "unknown preset '{wanted}' (expected one of: {})",
                        Preset::ALL.map(|p| p.key()).join(", ")
                    ),
                )
            })
    }
}
