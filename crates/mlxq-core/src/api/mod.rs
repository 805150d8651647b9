//! The `ConverterApi` facade and its builder.

mod builder;
mod conversion;
mod system;

pub use builder::ConverterApiBuilder;
