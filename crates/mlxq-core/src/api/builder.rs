//! Builder for configuring ConverterApi initialization.

use std::time::Duration;

use crate::config::ToolConfig;
use crate::conversion::{CommandBuilder, ConversionManager, RunnerOptions, ToolInvocation};
use crate::ConverterApi;

/// Builder for configuring ConverterApi initialization.
///
/// # Example
///
/// ```rust,ignore
/// use mlxq_core::{ConverterApi, ToolInvocation};
///
/// let api = ConverterApi::builder()
///     .python("/opt/homebrew/bin/python3")
///     .invocation(ToolInvocation::DottedSubmodule)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConverterApiBuilder {
    python: String,
    invocation: ToolInvocation,
    options: RunnerOptions,
}

impl Default for ConverterApiBuilder {
    fn default() -> Self {
        Self {
            python: ToolConfig::DEFAULT_PYTHON.to_string(),
            invocation: ToolInvocation::default(),
            options: RunnerOptions::default(),
        }
    }
}

impl ConverterApiBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interpreter used to run mlx-lm.
    pub fn python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    /// How mlx-lm's converter is invoked.
    ///
    /// Default: [`ToolInvocation::ModuleSubcommand`]
    pub fn invocation(mut self, invocation: ToolInvocation) -> Self {
        self.invocation = invocation;
        self
    }

    /// Time between SIGTERM and a forced kill when cancelling.
    pub fn grace_period(mut self, grace_period: Duration) -> Self {
        self.options.grace_period = grace_period;
        self
    }

    pub fn runner_options(mut self, options: RunnerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> ConverterApi {
        ConverterApi {
            manager: ConversionManager::new(
                CommandBuilder::new(self.python, self.invocation),
                self.options,
            ),
        }
    }
}
