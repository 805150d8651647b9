//! Model conversion and quantization through mlx-lm.
//!
//! The flow for one job is: classify the source, allocate an output path,
//! build the argv, and hand it to the single-flight runner. Every step before
//! the spawn is synchronous and side-effect free apart from creating the
//! output base directory.

mod command;
mod manager;
mod output;
pub mod presets;
mod probe;
pub mod runner;
mod source;
mod types;

pub use command::{command_line, shell_quote, CommandBuilder, ToolInvocation};
pub use manager::ConversionManager;
pub use output::OutputAllocator;
pub use presets::Preset;
pub use probe::probe_tool;
pub use runner::{ConversionHandle, ConversionRunner, JobControl, RunnerOptions};
pub use source::classify;
pub use types::{
    CommandPreview, ConversionJob, ConversionRequest, DType, JobOutcome, JobState,
    OutputAllocation, QuantizationConfig, SourceKind, SourceSpec, SUPPORTED_BITS,
};
