//! Environment methods on ConverterApi.

use std::path::Path;

use crate::conversion::{self, ToolInvocation};
use crate::error::Result;
use crate::system::{self, EnvironmentReport};
use crate::ConverterApi;

impl ConverterApi {
    /// Interpreter this API launches.
    pub fn python(&self) -> &str {
        self.manager.builder().python()
    }

    pub fn invocation(&self) -> ToolInvocation {
        self.manager.builder().invocation()
    }

    /// Which calling convention the configured interpreter supports.
    pub async fn probe_tool(&self) -> Result<Option<ToolInvocation>> {
        conversion::probe_tool(self.python()).await
    }

    /// Platform, tool and disk checks for converting into `output_base`.
    pub async fn check_environment(&self, output_base: &Path) -> EnvironmentReport {
        system::check_environment(self.python(), output_base).await
    }
}
