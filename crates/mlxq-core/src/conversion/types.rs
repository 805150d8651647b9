//! Types for model conversion and quantization jobs.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MlxqError, Result};

/// Bit widths accepted by the external quantizer.
pub const SUPPORTED_BITS: [u32; 5] = [2, 3, 4, 6, 8];

/// What kind of model reference the user supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// An existing directory containing a model checkout.
    LocalDirectory,
    /// An existing single model file.
    LocalFile,
    /// Anything else, interpreted as a Hugging Face repository id.
    RemoteRepoId,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::LocalDirectory => "local",
            SourceKind::LocalFile => "file",
            SourceKind::RemoteRepoId => "hf",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified model source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// The trimmed user input, passed verbatim to the tool.
    pub raw_input: String,
    pub kind: SourceKind,
    /// Filesystem-safe short name; never empty, never contains a separator.
    pub derived_name: String,
}

impl SourceSpec {
    /// NeMo checkpoints need a separate conversion to HF format first.
    pub fn is_nemo(&self) -> bool {
        self.kind == SourceKind::LocalFile
            && std::path::Path::new(&self.raw_input)
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("nemo"))
    }
}

/// Weight dtype for the converted model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    #[default]
    Float16,
    Bfloat16,
    Float32,
}

impl DType {
    pub const ALL: [DType; 3] = [DType::Float16, DType::Bfloat16, DType::Float32];

    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Float16 => "float16",
            DType::Bfloat16 => "bfloat16",
            DType::Float32 => "float32",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DType {
    type Err = MlxqError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "float16" | "fp16" | "f16" => Ok(DType::Float16),
            "bfloat16" | "bf16" => Ok(DType::Bfloat16),
            "float32" | "fp32" | "f32" => Ok(DType::Float32),
            other => Err(MlxqError::config_validation(
                "dtype",
                format!("unsupported dtype '{other}' (expected float16, bfloat16 or float32)"),
            )),
        }
    }
}

/// Quantization settings for one conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizationConfig {
    /// When false the model is converted without quantization.
    pub quantize: bool,
    pub bits: u32,
    pub group_size: u32,
    pub dtype: DType,
    pub trust_remote_code: bool,
    pub offline: bool,
    pub dry_run: bool,
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self {
            quantize: true,
            bits: 4,
            group_size: 64,
            dtype: DType::Float16,
            trust_remote_code: false,
            offline: false,
            dry_run: false,
        }
    }
}

impl QuantizationConfig {
    /// Reject settings the tool cannot honour.
    ///
    /// Bits and group size only matter when quantizing.
    pub fn validate(&self) -> Result<()> {
        if !self.quantize {
            return Ok(());
        }
        if !SUPPORTED_BITS.contains(&self.bits) {
            return Err(MlxqError::config_validation(
                "bits",
                format!("{} is not one of {:?}", self.bits, SUPPORTED_BITS),
            ));
        }
        if self.group_size == 0 {
            return Err(MlxqError::config_validation(
                "group_size",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// A collision-free output location that has not been created yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputAllocation {
    /// Exists after allocation.
    pub base_dir: PathBuf,
    /// Does not exist after allocation; the tool creates it.
    pub candidate_path: PathBuf,
    /// `YYYYMMDD_HHMMSS` when timestamping was requested.
    pub timestamp: Option<String>,
}

/// Lifecycle state of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Terminal result of a supervised process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub state: JobState,
    /// Exit code if the process exited normally.
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Short failure description; set only for `Failed`.
    #[serde(default)]
    pub diagnostic: Option<String>,
    /// Last lines of combined output.
    #[serde(default)]
    pub tail: Vec<String>,
}

impl JobOutcome {
    /// Map a terminal outcome onto the crate's error type.
    pub fn into_result(self) -> Result<()> {
        match self.state {
            JobState::Succeeded => Ok(()),
            JobState::Cancelled => Err(MlxqError::ConversionCancelled),
            _ => Err(MlxqError::ConversionFailed {
                message: self
                    .diagnostic
                    .unwrap_or_else(|| format!("job ended in state {}", self.state)),
                exit_code: self.exit_code,
            }),
        }
    }
}

/// What a front-end submits to start or preview a conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ConversionRequest {
    /// Local path or Hugging Face repository id.
    pub source: String,
    /// Directory under which the output folder is allocated.
    pub output_base: PathBuf,
    #[serde(default = "default_true")]
    pub use_timestamp: bool,
    #[serde(default)]
    pub config: QuantizationConfig,
}

fn default_true() -> bool {
    true
}

/// Snapshot of a conversion job for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionJob {
    pub conversion_id: String,
    pub source: SourceSpec,
    pub config: QuantizationConfig,
    pub output: OutputAllocation,
    pub argv: Vec<String>,
    pub state: JobState,
}

/// The exact invocation a conversion would run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPreview {
    pub source: SourceSpec,
    pub output_path: PathBuf,
    pub argv: Vec<String>,
    /// `argv` shell-quoted and joined, for copy-paste.
    pub command_line: String,
}
