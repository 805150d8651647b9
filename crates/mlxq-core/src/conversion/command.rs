//! Argument vectors for the mlx_lm conversion entry point.
//!
//! `ToolInvocation` is the one place that knows how mlx_lm is called. The
//! same argv feeds both the command preview and the runner, so what the user
//! previews is byte-for-byte what runs.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::types::{QuantizationConfig, SourceSpec};
use crate::config::ToolConfig;
use crate::error::Result;

/// How the installed mlx-lm exposes its converter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolInvocation {
    /// `python -m mlx_lm convert` (current releases).
    #[default]
    ModuleSubcommand,
    /// `python -m mlx_lm.convert` (deprecated dotted submodule).
    DottedSubmodule,
}

impl ToolInvocation {
    /// Arguments after the interpreter that select the converter.
    pub fn entry_args(&self) -> Vec<String> {
        match self {
            ToolInvocation::ModuleSubcommand => vec![
                "-m".to_string(),
                ToolConfig::MODULE.to_string(),
                ToolConfig::SUBCOMMAND.to_string(),
            ],
            ToolInvocation::DottedSubmodule => {
                vec!["-m".to_string(), ToolConfig::LEGACY_MODULE.to_string()]
            }
        }
    }

    /// Arguments that print the converter's help, used to probe the install.
    pub fn help_args(&self) -> Vec<String> {
        match self {
            ToolInvocation::ModuleSubcommand => vec![
                "-m".to_string(),
                ToolConfig::MODULE.to_string(),
                "--help".to_string(),
            ],
            ToolInvocation::DottedSubmodule => vec![
                "-m".to_string(),
                ToolConfig::LEGACY_MODULE.to_string(),
                "--help".to_string(),
            ],
        }
    }
}

/// Builds the conversion argv for a given interpreter and calling convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandBuilder {
    python: String,
    invocation: ToolInvocation,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new(ToolConfig::DEFAULT_PYTHON, ToolInvocation::default())
    }
}

impl CommandBuilder {
    pub fn new(python: impl Into<String>, invocation: ToolInvocation) -> Self {
        Self {
            python: python.into(),
            invocation,
        }
    }

    pub fn python(&self) -> &str {
        &self.python
    }

    pub fn invocation(&self) -> ToolInvocation {
        self.invocation
    }

    /// Build the full argv, interpreter first.
    ///
    /// Argument order is fixed:
    /// `<python> <entry...> --hf-path <src> --mlx-path <out> --dtype <dt>
    /// [-q --q-bits <b> --q-group-size <g>] [--trust-remote-code] [--offline]
    /// [--dry-run]`
    pub fn build(
        &self,
        source: &SourceSpec,
        config: &QuantizationConfig,
        output_path: &Path,
    ) -> Result<Vec<String>> {
        config.validate()?;

        let mut argv = Vec::with_capacity(20);
        argv.push(self.python.clone());
        argv.extend(self.invocation.entry_args());

        argv.push("--hf-path".to_string());
        argv.push(source.raw_input.clone());
        argv.push("--mlx-path".to_string());
        argv.push(output_path.to_string_lossy().into_owned());
        argv.push("--dtype".to_string());
        argv.push(config.dtype.as_str().to_string());

        if config.quantize {
            argv.push("-q".to_string());
            argv.push("--q-bits".to_string());
            argv.push(config.bits.to_string());
            argv.push("--q-group-size".to_string());
            argv.push(config.group_size.to_string());
        }

        if config.trust_remote_code {
            argv.push("--trust-remote-code".to_string());
        }
        if config.offline {
            argv.push("--offline".to_string());
        }
        if config.dry_run {
            argv.push("--dry-run".to_string());
        }

        Ok(argv)
    }
}

/// Render an argv as a single POSIX shell command line.
pub fn command_line(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| shell_quote(arg))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Quote one argument for a POSIX shell, leaving plain words untouched.
pub fn shell_quote(arg: &str) -> String {
    let is_plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "@%+=:,./-_".contains(c));
    if is_plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r#"'"'"'"#))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::types::{DType, SourceKind};
    use crate::error::MlxqError;
    use std::path::PathBuf;

    fn remote_source() -> SourceSpec {
        SourceSpec {
            raw_input: "meta-llama/Llama-3.2-3B".to_string(),
            kind: SourceKind::RemoteRepoId,
            derived_name: "meta-llama_Llama-3.2-3B".to_string(),
        }
    }

    fn out() -> PathBuf {
        PathBuf::from("/tmp/out/meta-llama_Llama-3.2-3B_20250101_120000")
    }

    #[test]
    fn test_full_argv_layout() {
        let builder = CommandBuilder::new("python3", ToolInvocation::ModuleSubcommand);
        let config = QuantizationConfig {
            bits: 8,
            group_size: 128,
            dtype: DType::Bfloat16,
            trust_remote_code: true,
            offline: true,
            dry_run: true,
            ..Default::default()
        };

        let argv = builder.build(&remote_source(), &config, &out()).unwrap();
        assert_eq!(
            argv,
            vec![
                "python3",
                "-m",
                "mlx_lm",
                "convert",
                "--hf-path",
                "meta-llama/Llama-3.2-3B",
                "--mlx-path",
                "/tmp/out/meta-llama_Llama-3.2-3B_20250101_120000",
                "--dtype",
                "bfloat16",
                "-q",
                "--q-bits",
                "8",
                "--q-group-size",
                "128",
                "--trust-remote-code",
                "--offline",
                "--dry-run",
            ]
        );
    }

    #[test]
    fn test_false_booleans_emit_no_flags() {
        let builder = CommandBuilder::default();
        let argv = builder
            .build(&remote_source(), &QuantizationConfig::default(), &out())
            .unwrap();

        for flag in ["--trust-remote-code", "--offline", "--dry-run"] {
            assert!(!argv.iter().any(|a| a == flag), "{flag} should be absent");
        }
    }

    #[test]
    fn test_build_is_deterministic() {
        let builder = CommandBuilder::default();
        let config = QuantizationConfig {
            trust_remote_code: true,
            ..Default::default()
        };
        let first = builder.build(&remote_source(), &config, &out()).unwrap();
        let second = builder.build(&remote_source(), &config, &out()).unwrap();
        assert_eq!(first, second);
        assert_eq!(command_line(&first), command_line(&second));
    }

    #[test]
    fn test_source_passed_verbatim_not_derived_name() {
        let builder = CommandBuilder::default();
        let argv = builder
            .build(&remote_source(), &QuantizationConfig::default(), &out())
            .unwrap();
        let idx = argv.iter().position(|a| a == "--hf-path").unwrap();
        assert_eq!(argv[idx + 1], "meta-llama/Llama-3.2-3B");
    }

    #[test]
    fn test_invalid_config_rejected_before_build() {
        let builder = CommandBuilder::default();
        let config = QuantizationConfig {
            bits: 5,
            ..Default::default()
        };
        let err = builder.build(&remote_source(), &config, &out()).unwrap_err();
        assert!(matches!(err, MlxqError::ConfigValidation { .. }));
    }

    #[test]
    fn test_no_quantize_omits_quant_flags() {
        let builder = CommandBuilder::default();
        let config = QuantizationConfig {
            quantize: false,
            ..Default::default()
        };
        let argv = builder.build(&remote_source(), &config, &out()).unwrap();
        for flag in ["-q", "--q-bits", "--q-group-size"] {
            assert!(!argv.iter().any(|a| a == flag));
        }
        assert!(argv.iter().any(|a| a == "--dtype"));
    }

    #[test]
    fn test_legacy_invocation() {
        let builder = CommandBuilder::new("python3", ToolInvocation::DottedSubmodule);
        let argv = builder
            .build(&remote_source(), &QuantizationConfig::default(), &out())
            .unwrap();
        assert_eq!(&argv[..3], &["python3", "-m", "mlx_lm.convert"]);
        assert_eq!(argv[3], "--hf-path");
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("--q-bits"), "--q-bits");
        assert_eq!(shell_quote("/tmp/My Models"), "'/tmp/My Models'");
        assert_eq!(shell_quote("it's"), r#"'it'"'"'s'"#);
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_command_line_joins_quoted_args() {
        let argv = vec!["python3".to_string(), "a b".to_string()];
        assert_eq!(command_line(&argv), "python3 'a b'");
    }
}
