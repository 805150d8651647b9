//! mlxq core - headless library for converting and quantizing models with mlx-lm.
//!
//! The crate wraps the external `mlx_lm` converter: it classifies a model
//! reference, allocates a collision-free output directory, builds the exact
//! command line, and supervises one conversion process at a time.
//!
//! # Example
//!
//! ```rust,ignore
//! use mlxq_core::{ConversionRequest, ConverterApi, QuantizationConfig};
//!
//! #[tokio::main]
//! async fn main() -> mlxq_core::Result<()> {
//!     let api = ConverterApi::new();
//!     let mut handle = api.start_conversion(ConversionRequest {
//!         source: "meta-llama/Llama-3.2-3B".into(),
//!         output_base: mlxq_core::platform::default_output_base()?,
//!         use_timestamp: true,
//!         config: QuantizationConfig::default(),
//!     })?;
//!
//!     let mut lines = handle.take_lines().unwrap();
//!     while let Some(line) = lines.recv().await {
//!         println!("{line}");
//!     }
//!     handle.wait().await.into_result()
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod conversion;
pub mod error;
pub mod platform;
pub mod system;

mod api;

pub use api::ConverterApiBuilder;
pub use cancel::CancellationToken;
pub use conversion::{
    classify, CommandBuilder, CommandPreview, ConversionHandle, ConversionJob, ConversionRequest,
    DType, JobControl, JobOutcome, JobState, OutputAllocation, Preset, QuantizationConfig,
    RunnerOptions, SourceKind, SourceSpec, ToolInvocation,
};
pub use error::{MlxqError, Result};
pub use system::{CheckEntry, EnvironmentReport};

use conversion::ConversionManager;

/// Main entry point for front-ends.
///
/// Owns the output allocator and the single-flight runner, so one instance
/// should back one application.
pub struct ConverterApi {
    manager: ConversionManager,
}

impl ConverterApi {
    /// API with the default interpreter and calling convention.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> ConverterApiBuilder {
        ConverterApiBuilder::new()
    }
}

impl Default for ConverterApi {
    fn default() -> Self {
        Self::new()
    }
}
