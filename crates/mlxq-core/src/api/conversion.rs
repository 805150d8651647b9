//! Conversion methods on ConverterApi.

use crate::conversion::{
    CommandPreview, ConversionHandle, ConversionJob, ConversionRequest,
};
use crate::error::Result;
use crate::ConverterApi;

impl ConverterApi {
    /// Classify, allocate and build without starting anything.
    ///
    /// The returned argv is exactly what `start_conversion` would run for
    /// the same request at the same moment.
    pub fn preview(&self, request: &ConversionRequest) -> Result<CommandPreview> {
        self.manager.preview(request)
    }

    /// Start a conversion.
    ///
    /// Returns as soon as the process is spawned. Fails without side effects
    /// beyond creating the output base directory if the request is invalid,
    /// a job is already running, or the interpreter cannot be launched.
    pub fn start_conversion(&self, request: ConversionRequest) -> Result<ConversionHandle> {
        self.manager.start_conversion(request)
    }

    /// Cancel the running conversion, if any.
    pub fn cancel_conversion(&self) -> bool {
        self.manager.cancel_conversion()
    }

    pub fn current_job(&self) -> Option<ConversionJob> {
        self.manager.current_job()
    }

    pub fn is_running(&self) -> bool {
        self.manager.is_running()
    }
}
