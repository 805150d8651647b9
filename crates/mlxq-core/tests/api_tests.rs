//! Integration tests for the ConverterApi public interface.
//!
//! The interpreter is replaced by a shell script so the full pipeline runs
//! without mlx-lm installed.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::Duration;

use mlxq_core::{
    ConversionRequest, ConverterApi, JobState, MlxqError, Preset, QuantizationConfig,
    SourceKind, ToolInvocation,
};
use tempfile::TempDir;

/// Create an executable stand-in for `python` inside `dir`.
fn fake_python(dir: &TempDir, body: &str) -> String {
    let path = dir.path().join("python");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("Failed to write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

fn api_with(python: String) -> ConverterApi {
    ConverterApi::builder()
        .python(python)
        .grace_period(Duration::from_millis(300))
        .build()
}

fn request(base: &Path, source: &str) -> ConversionRequest {
    ConversionRequest {
        source: source.to_string(),
        output_base: base.to_path_buf(),
        use_timestamp: false,
        config: QuantizationConfig::default(),
    }
}

#[tokio::test]
async fn test_failed_conversion_reports_tool_output() {
    let tools = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let api = api_with(fake_python(
        &tools,
        "echo loading...; echo 'error: bad shape' >&2; exit 1",
    ));

    let mut handle = api.start_conversion(request(out.path(), "org/model")).unwrap();
    let mut lines = handle.take_lines().unwrap();
    let mut seen = Vec::new();
    while let Some(line) = lines.recv().await {
        seen.push(line);
    }
    let outcome = handle.wait().await;

    assert!(seen.contains(&"loading...".to_string()));
    assert!(seen.contains(&"error: bad shape".to_string()));
    assert_eq!(outcome.state, JobState::Failed);
    assert!(outcome
        .diagnostic
        .as_deref()
        .unwrap()
        .contains("error: bad shape"));
    assert!(matches!(
        outcome.into_result(),
        Err(MlxqError::ConversionFailed { exit_code: Some(1), .. })
    ));
    assert!(!api.is_running());
}

#[tokio::test]
async fn test_tool_creates_output_not_us() {
    let tools = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    // Stand-in that creates the --mlx-path directory like mlx_lm does.
    let api = api_with(fake_python(
        &tools,
        r#"while [ $# -gt 0 ]; do [ "$1" = "--mlx-path" ] && mkdir "$2"; shift; done"#,
    ));

    let handle = api.start_conversion(request(out.path(), "org/model")).unwrap();
    let output = handle.output_path().unwrap().to_path_buf();
    let outcome = handle.wait().await;

    assert_eq!(outcome.state, JobState::Succeeded);
    assert!(output.is_dir());
    assert_eq!(output, out.path().join("org_model"));

    // The next allocation steps around the directory the tool created.
    let preview = api.preview(&request(out.path(), "org/model")).unwrap();
    assert_eq!(preview.output_path, out.path().join("org_model_1"));
}

#[tokio::test]
async fn test_concurrent_start_is_rejected() {
    let tools = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let api = api_with(fake_python(&tools, "sleep 5"));

    let first = api.start_conversion(request(out.path(), "a/one")).unwrap();
    let second = api.start_conversion(request(out.path(), "b/two"));

    match second {
        Err(MlxqError::ConcurrentJob { running_id }) => assert_eq!(running_id, first.id()),
        other => panic!("expected ConcurrentJob, got {other:?}"),
    }
    assert_eq!(first.state(), JobState::Running);

    assert!(api.cancel_conversion());
    assert_eq!(first.wait().await.state, JobState::Cancelled);
    assert!(!api.cancel_conversion());
}

#[tokio::test]
async fn test_output_name_reused_after_job_without_output() {
    let tools = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let api = api_with(fake_python(&tools, "exit 1"));

    let first = api.start_conversion(request(out.path(), "org/model")).unwrap();
    let first_path = first.output_path().unwrap().to_path_buf();
    assert_eq!(first.wait().await.state, JobState::Failed);

    let second = api.start_conversion(request(out.path(), "org/model")).unwrap();
    let second_path = second.output_path().unwrap().to_path_buf();
    second.wait().await;

    assert_eq!(first_path, second_path);
    assert!(!second_path.exists());
}

#[tokio::test]
async fn test_preview_uses_preset_and_invocation() {
    let out = TempDir::new().unwrap();
    let api = ConverterApi::builder()
        .python("python3")
        .invocation(ToolInvocation::DottedSubmodule)
        .build();

    let mut req = request(out.path(), "mistralai/Mistral-7B");
    Preset::Quality.apply(&mut req.config);
    let preview = api.preview(&req).unwrap();

    assert_eq!(preview.source.kind, SourceKind::RemoteRepoId);
    assert_eq!(&preview.argv[..3], &["python3", "-m", "mlx_lm.convert"]);
    assert!(preview.command_line.contains("--q-bits 8 --q-group-size 64"));
    assert!(!api.is_running());
}

#[tokio::test]
async fn test_local_directory_source_is_passed_verbatim() {
    let out = TempDir::new().unwrap();
    let model = out.path().join("checkpoints").join("My Model");
    std::fs::create_dir_all(&model).unwrap();
    let api = ConverterApi::new();

    let preview = api
        .preview(&request(&out.path().join("mlx"), &model.to_string_lossy()))
        .unwrap();

    assert_eq!(preview.source.kind, SourceKind::LocalDirectory);
    assert_eq!(preview.output_path, out.path().join("mlx").join("My Model"));
    let idx = preview.argv.iter().position(|a| a == "--hf-path").unwrap();
    assert_eq!(preview.argv[idx + 1], model.to_string_lossy());
    assert!(preview.command_line.contains("'"));
}

#[tokio::test]
async fn test_missing_interpreter_is_dependency_error() {
    let out = TempDir::new().unwrap();
    let api = api_with("/nonexistent/mlxq/python3".to_string());

    let err = api
        .start_conversion(request(out.path(), "org/model"))
        .unwrap_err();
    assert!(err.is_dependency_missing());
    assert!(!api.is_running());
    assert!(api.current_job().is_none());
}

#[tokio::test]
async fn test_environment_report_with_fake_tool() {
    let tools = TempDir::new().unwrap();
    let out = TempDir::new().unwrap();
    let api = api_with(fake_python(&tools, "exit 0"));

    assert_eq!(
        api.probe_tool().await.unwrap(),
        Some(ToolInvocation::ModuleSubcommand)
    );
    let report = api.check_environment(out.path()).await;
    assert!(report.entry("mlx_lm").unwrap().passed);
    assert_eq!(report.tool, Some(ToolInvocation::ModuleSubcommand));
}
