//! Conversion manager tying classification, allocation, argv building and
//! the runner together.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{info, warn};

use super::command::{command_line, CommandBuilder};
use super::output::OutputAllocator;
use super::runner::{ConversionHandle, ConversionRunner, JobControl, RunnerOptions};
use super::source::classify;
use super::types::{
    CommandPreview, ConversionJob, ConversionRequest, JobState, OutputAllocation,
    QuantizationConfig, SourceSpec,
};
use crate::config::ToolConfig;
use crate::error::{MlxqError, Result};

/// A request that passed every pre-spawn check.
struct PreparedJob {
    source: SourceSpec,
    output: OutputAllocation,
    argv: Vec<String>,
}

struct ActiveJob {
    job: ConversionJob,
    control: JobControl,
}

/// Orchestrates single-flight mlx_lm conversions.
pub struct ConversionManager {
    builder: CommandBuilder,
    allocator: Arc<OutputAllocator>,
    runner: ConversionRunner,
    active: Mutex<Option<ActiveJob>>,
}

impl ConversionManager {
    pub fn new(builder: CommandBuilder, options: RunnerOptions) -> Self {
        Self {
            builder,
            allocator: Arc::new(OutputAllocator::new()),
            runner: ConversionRunner::new(options),
            active: Mutex::new(None),
        }
    }

    pub fn builder(&self) -> &CommandBuilder {
        &self.builder
    }

    /// The exact command a conversion of `request` would run.
    ///
    /// Creates the output base directory; reserves nothing and spawns nothing.
    pub fn preview(&self, request: &ConversionRequest) -> Result<CommandPreview> {
        let prepared = self.prepare(request, false)?;
        Ok(CommandPreview {
            command_line: command_line(&prepared.argv),
            source: prepared.source,
            output_path: prepared.output.candidate_path,
            argv: prepared.argv,
        })
    }

    /// Start a conversion. Rejected with `ConcurrentJob` while one is running.
    pub fn start_conversion(&self, request: ConversionRequest) -> Result<ConversionHandle> {
        if let Some(running_id) = self.runner.active_id() {
            return Err(MlxqError::ConcurrentJob { running_id });
        }

        let prepared = self.prepare(&request, true)?;
        let env = child_env(&request.config);

        // The name is free again once the job is over; if the tool created
        // the directory, the disk check keeps it taken.
        let allocator = Arc::clone(&self.allocator);
        let reserved = prepared.output.candidate_path.clone();
        let release = move || allocator.release(&reserved);

        let handle = match self
            .runner
            .start_with_cleanup(&prepared.argv, &env, release)
        {
            Ok(handle) => handle,
            Err(e) => {
                self.allocator.release(&prepared.output.candidate_path);
                if e.is_dependency_missing() {
                    warn!("{} could not be launched: {}", self.builder.python(), e);
                }
                return Err(e);
            }
        };

        info!(
            "Conversion {} started: {} -> {}",
            handle.id(),
            prepared.source.raw_input,
            prepared.output.candidate_path.display()
        );

        let output_path = prepared.output.candidate_path.clone();
        let job = ConversionJob {
            conversion_id: handle.id().to_string(),
            source: prepared.source,
            config: request.config,
            output: prepared.output,
            argv: prepared.argv,
            state: JobState::Running,
        };
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(ActiveJob {
            job,
            control: handle.control(),
        });

        Ok(handle.with_output_path(output_path))
    }

    /// Request cancellation of the running job. `false` if nothing is running.
    pub fn cancel_conversion(&self) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.as_ref().is_some_and(|a| a.control.cancel())
    }

    /// Snapshot of the job that is still in progress, if any.
    pub fn current_job(&self) -> Option<ConversionJob> {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        let active = active.as_ref()?;
        let state = active.control.state();
        if state.is_terminal() {
            return None;
        }
        Some(ConversionJob {
            state,
            ..active.job.clone()
        })
    }

    pub fn is_running(&self) -> bool {
        self.runner.is_running()
    }

    fn prepare(&self, request: &ConversionRequest, reserve: bool) -> Result<PreparedJob> {
        let source = classify(&request.source)?;
        if source.is_nemo() {
            return Err(MlxqError::InvalidSource {
                message: format!(
                    "{} is a NeMo checkpoint; convert it to Hugging Face format first \
                     (for example with nemo2hf) and point at the resulting directory",
                    source.raw_input
                ),
            });
        }
        request.config.validate()?;

        let output = if reserve {
            self.allocator.allocate(
                &request.output_base,
                &source.derived_name,
                request.use_timestamp,
            )?
        } else {
            self.allocator.preview(
                &request.output_base,
                &source.derived_name,
                request.use_timestamp,
            )?
        };

        let argv = match self
            .builder
            .build(&source, &request.config, &output.candidate_path)
        {
            Ok(argv) => argv,
            Err(e) => {
                if reserve {
                    self.allocator.release(&output.candidate_path);
                }
                return Err(e);
            }
        };

        Ok(PreparedJob {
            source,
            output,
            argv,
        })
    }
}

impl Default for ConversionManager {
    fn default() -> Self {
        Self::new(CommandBuilder::default(), RunnerOptions::default())
    }
}

/// Extra environment for the conversion process.
fn child_env(config: &QuantizationConfig) -> Vec<(String, String)> {
    let mut env = vec![(ToolConfig::UNBUFFERED_ENV.to_string(), "1".to_string())];
    if config.offline {
        env.push((ToolConfig::OFFLINE_ENV.to_string(), "1".to_string()));
    }
    env
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::conversion::command::ToolInvocation;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Interpreter stand-in that prints its argv and the offline variable.
    fn fake_python(dir: &TempDir, body: &str) -> String {
        let path = dir.path().join("fake-python");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn manager(python: String) -> ConversionManager {
        ConversionManager::new(
            CommandBuilder::new(python, ToolInvocation::ModuleSubcommand),
            RunnerOptions {
                grace_period: Duration::from_millis(300),
                ..Default::default()
            },
        )
    }

    fn request(base: &std::path::Path, source: &str) -> ConversionRequest {
        ConversionRequest {
            source: source.to_string(),
            output_base: base.to_path_buf(),
            use_timestamp: false,
            config: QuantizationConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_start_runs_built_argv() {
        let tools = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let manager = manager(fake_python(&tools, r#"echo "$@"; echo "offline=$HF_HUB_OFFLINE""#));

        let mut req = request(out.path(), "org/model");
        req.config.offline = true;
        let mut handle = manager.start_conversion(req).unwrap();
        let expected_out = out.path().join("org_model");
        assert_eq!(handle.output_path(), Some(expected_out.as_path()));

        let mut rx = handle.take_lines().unwrap();
        let mut lines = Vec::new();
        while let Some(line) = rx.recv().await {
            lines.push(line);
        }
        let outcome = handle.wait().await;

        assert_eq!(outcome.state, JobState::Succeeded);
        assert!(lines[0].starts_with("-m mlx_lm convert --hf-path org/model --mlx-path "));
        assert!(lines[0].ends_with("--offline"));
        assert_eq!(lines[1], "offline=1");
        assert!(!expected_out.exists());
    }

    #[tokio::test]
    async fn test_preview_matches_started_argv() {
        let tools = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let manager = manager(fake_python(&tools, "sleep 2"));

        let preview = manager.preview(&request(out.path(), "org/model")).unwrap();
        let handle = manager.start_conversion(request(out.path(), "org/model")).unwrap();
        let job = manager.current_job().unwrap();

        assert_eq!(job.argv, preview.argv);
        assert_eq!(job.output.candidate_path, preview.output_path);
        assert_eq!(preview.output_path, out.path().join("org_model"));
        assert!(preview.command_line.contains("--hf-path org/model"));

        handle.cancel();
        handle.wait().await;
    }

    #[tokio::test]
    async fn test_second_start_rejected_and_first_untouched() {
        let tools = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let manager = manager(fake_python(&tools, "sleep 5"));

        let first = manager.start_conversion(request(out.path(), "a/b")).unwrap();
        let err = manager
            .start_conversion(request(out.path(), "c/d"))
            .unwrap_err();
        assert!(matches!(err, MlxqError::ConcurrentJob { .. }));

        let current = manager.current_job().unwrap();
        assert_eq!(current.conversion_id, first.id());
        assert_eq!(current.state, JobState::Running);

        assert!(manager.cancel_conversion());
        assert_eq!(first.wait().await.state, JobState::Cancelled);
        assert!(manager.current_job().is_none());
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_invalid_config_spawns_nothing() {
        let out = TempDir::new().unwrap();
        let manager = manager("/nonexistent/mlxq/python".to_string());

        let mut req = request(out.path(), "org/model");
        req.config.group_size = 0;
        let err = manager.start_conversion(req).unwrap_err();
        assert!(matches!(err, MlxqError::ConfigValidation { .. }));
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_nemo_file_refused() {
        let out = TempDir::new().unwrap();
        let file = out.path().join("model.nemo");
        std::fs::write(&file, b"").unwrap();
        let manager = manager("/nonexistent/mlxq/python".to_string());

        let err = manager
            .start_conversion(request(out.path(), &file.to_string_lossy()))
            .unwrap_err();
        match err {
            MlxqError::InvalidSource { message } => assert!(message.contains("nemo2hf")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_interpreter_releases_reservation() {
        let out = TempDir::new().unwrap();
        let manager = manager("/nonexistent/mlxq/python".to_string());

        let err = manager
            .start_conversion(request(out.path(), "org/model"))
            .unwrap_err();
        assert!(err.is_dependency_missing());

        let preview = manager.preview(&request(out.path(), "org/model")).unwrap();
        assert_eq!(preview.output_path, out.path().join("org_model"));
    }

    #[tokio::test]
    async fn test_finished_job_frees_its_output_name() {
        let tools = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let manager = manager(fake_python(&tools, "exit 0"));

        let mut req = request(out.path(), "org/model");
        req.config.dry_run = true;
        let first = manager.start_conversion(req.clone()).unwrap();
        assert_eq!(first.wait().await.state, JobState::Succeeded);

        let preview = manager.preview(&req).unwrap();
        assert_eq!(preview.output_path, out.path().join("org_model"));
        let second = manager.start_conversion(req).unwrap();
        assert_eq!(second.output_path(), Some(out.path().join("org_model").as_path()));
        second.wait().await;
    }

    #[tokio::test]
    async fn test_running_job_keeps_its_output_name() {
        let tools = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let manager = manager(fake_python(&tools, "sleep 5"));

        let first = manager.start_conversion(request(out.path(), "org/model")).unwrap();
        let preview = manager.preview(&request(out.path(), "org/model")).unwrap();
        assert_eq!(preview.output_path, out.path().join("org_model_1"));

        first.cancel();
        first.wait().await;
    }

    #[test]
    fn test_child_env() {
        let env = child_env(&QuantizationConfig::default());
        assert!(env.iter().any(|(k, v)| k == "PYTHONUNBUFFERED" && v == "1"));
        assert!(!env.iter().any(|(k, _)| k == "HF_HUB_OFFLINE"));
    }
}
