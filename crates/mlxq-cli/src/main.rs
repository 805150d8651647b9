//! mlxq - convert and quantize models for Apple MLX from the command line.
//!
//! A thin front-end over `mlxq-core`: it resolves flags against the saved
//! settings, starts one conversion, streams the tool's output, and maps the
//! job outcome onto the exit status.

mod settings;
mod sink;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mlxq_core::config::{AppConfig, SystemConfig};
use mlxq_core::conversion::command_line;
use mlxq_core::{
    platform, ConversionRequest, ConverterApi, DType, JobState, Preset, QuantizationConfig,
    ToolInvocation,
};
use tracing::debug;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use settings::Settings;
use sink::ConsoleSink;

/// Exit status after a user cancel, as for SIGINT.
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "mlxq", version)]
#[command(about = "Convert and quantize Hugging Face models for Apple MLX")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Python interpreter with mlx-lm installed
    #[arg(long, global = true)]
    python: Option<String>,

    /// Call the converter as `python -m mlx_lm.convert` (older mlx-lm)
    #[arg(long, global = true)]
    legacy_invocation: bool,

    /// Settings file (defaults to ~/.mlx_quant_gui.json)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a conversion, streaming mlx_lm output. Ctrl-C cancels.
    Convert {
        #[command(flatten)]
        job: JobArgs,

        /// Remember these choices for later runs
        #[arg(long)]
        save: bool,
    },
    /// Show the command a conversion would run without starting it
    Preview {
        #[command(flatten)]
        job: JobArgs,
    },
    /// Check platform, mlx-lm availability and free disk space
    Check {
        /// Directory whose free space is checked
        #[arg(long)]
        output_base: Option<PathBuf>,
    },
    /// List quantization presets
    Presets,
    /// Print the command that raises the GPU wired memory limit
    Sysctl {
        /// Limit in megabytes
        #[arg(long)]
        mb: Option<u64>,
    },
    /// Open the output base directory in the file manager
    Open {
        #[arg(long)]
        output_base: Option<PathBuf>,
    },
}

#[derive(clap::Args, Debug)]
struct JobArgs {
    /// Local model directory or file, or a Hugging Face repo id (org/name)
    source: String,

    /// Directory under which the output folder is created
    #[arg(long)]
    output_base: Option<PathBuf>,

    /// Do not append a timestamp to the output folder name
    #[arg(long)]
    no_timestamp: bool,

    /// Quantization preset: fast, quality, tiny, balanced or custom
    #[arg(long)]
    preset: Option<Preset>,

    /// Quantization bits (2, 3, 4, 6 or 8)
    #[arg(long)]
    bits: Option<u32>,

    /// Quantization group size
    #[arg(long)]
    group_size: Option<u32>,

    /// Weight dtype: float16, bfloat16 or float32
    #[arg(long)]
    dtype: Option<DType>,

    /// Convert without quantizing
    #[arg(long)]
    no_quantize: bool,

    /// Allow custom model code from the repository
    #[arg(long)]
    trust_remote_code: bool,

    /// Use only locally cached Hugging Face files
    #[arg(long)]
    offline: bool,

    /// Ask mlx_lm to validate without writing weights
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Library diagnostics go to stderr; stdout carries the conversion log.
    let default_level = if args.debug { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let settings_path = match &args.settings {
        Some(path) => path.clone(),
        None => platform::settings_path()?,
    };
    let mut settings = Settings::load(&settings_path);
    debug!("Settings file: {}", settings_path.display());

    let sink = ConsoleSink;
    let api = build_api(&args, &settings);

    match args.command {
        Command::Convert { job, save } => {
            let (preset, request) = resolve_request(&job, &settings)?;
            if save {
                settings.remember(preset, &request.config);
                settings.output_base = Some(request.output_base.clone());
                settings.use_timestamp = request.use_timestamp;
                if args.python.is_some() {
                    settings.python = args.python.clone();
                }
                settings.save(&settings_path)?;
                sink.info(&format!("Saved settings to {}", settings_path.display()));
            }
            run_convert(&api, request, sink).await
        }
        Command::Preview { job } => {
            let (_, request) = resolve_request(&job, &settings)?;
            let preview = api.preview(&request)?;
            println!("Source:  {} ({})", preview.source.raw_input, preview.source.kind);
            println!("Output:  {}", preview.output_path.display());
            println!("Command: {}", preview.command_line);
            Ok(ExitCode::SUCCESS)
        }
        Command::Check { output_base } => {
            let base = resolve_output_base(output_base, &settings)?;
            let report = api.check_environment(&base).await;
            for entry in &report.entries {
                let mark = if entry.passed { "ok" } else { "!!" };
                println!("[{mark}] {:<10} {}", entry.name, entry.detail);
            }
            let tool_ok = report.entry("mlx_lm").is_some_and(|e| e.passed);
            Ok(if tool_ok {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Presets => {
            for preset in Preset::ALL {
                match preset.values() {
                    Some((bits, group_size, dtype)) => println!(
                        "{:<9} {:<22} bits={bits} group_size={group_size} dtype={dtype}",
                        preset.key(),
                        preset.display_name()
                    ),
                    None => println!(
                        "{:<9} {:<22} values from --bits, --group-size and --dtype",
                        preset.key(),
                        preset.display_name()
                    ),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Sysctl { mb } => {
            let mb = mb
                .or(settings.wired_limit_mb)
                .unwrap_or(SystemConfig::DEFAULT_WIRED_LIMIT_MB);
            if !platform::is_apple_silicon() {
                sink.warning("The wired memory limit only applies to Apple Silicon");
            }
            println!("{}", platform::wired_limit_command(mb));
            Ok(ExitCode::SUCCESS)
        }
        Command::Open { output_base } => {
            let base = resolve_output_base(output_base, &settings)?;
            std::fs::create_dir_all(&base)
                .with_context(|| format!("creating {}", base.display()))?;
            platform::open_in_file_manager(&base)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_api(args: &Args, settings: &Settings) -> ConverterApi {
    let mut builder = ConverterApi::builder();
    if let Some(python) = args.python.as_ref().or(settings.python.as_ref()) {
        builder = builder.python(python.clone());
    }
    if args.legacy_invocation {
        builder = builder.invocation(ToolInvocation::DottedSubmodule);
    }
    builder.build()
}

fn resolve_output_base(flag: Option<PathBuf>, settings: &Settings) -> Result<PathBuf> {
    match flag.or_else(|| settings.output_base.clone()) {
        Some(base) => Ok(base),
        None => Ok(platform::default_output_base()?),
    }
}

/// Flags override saved settings; an explicit value turns the preset into `Custom`.
fn resolve_config(job: &JobArgs, settings: &Settings) -> (Preset, QuantizationConfig) {
    let mut config = settings.quantization();
    let mut preset = job.preset.unwrap_or(settings.preset);
    preset.apply(&mut config);

    if job.bits.is_some() || job.group_size.is_some() || job.dtype.is_some() {
        preset = Preset::Custom;
    }
    if let Some(bits) = job.bits {
        config.bits = bits;
    }
    if let Some(group_size) = job.group_size {
        config.group_size = group_size;
    }
    if let Some(dtype) = job.dtype {
        config.dtype = dtype;
    }

    if job.no_quantize {
        config.quantize = false;
    }
    config.trust_remote_code |= job.trust_remote_code;
    config.offline |= job.offline;
    config.dry_run = job.dry_run;
    (preset, config)
}

fn resolve_request(job: &JobArgs, settings: &Settings) -> Result<(Preset, ConversionRequest)> {
    let (preset, config) = resolve_config(job, settings);
    let request = ConversionRequest {
        source: job.source.clone(),
        output_base: resolve_output_base(job.output_base.clone(), settings)?,
        use_timestamp: settings.use_timestamp && !job.no_timestamp,
        config,
    };
    Ok((preset, request))
}

async fn run_convert(
    api: &ConverterApi,
    request: ConversionRequest,
    sink: ConsoleSink,
) -> Result<ExitCode> {
    let dry_run = request.config.dry_run;
    sink.info(&format!("Source: {}", request.source));

    let mut handle = match api.start_conversion(request) {
        Ok(handle) => handle,
        Err(e) => {
            debug!("Conversion not started ({})", e.category());
            sink.error(&e.to_string());
            if e.is_dependency_missing() {
                sink.info(&format!(
                    "Ensure mlx-lm is installed: {}",
                    AppConfig::INSTALL_HINT
                ));
            }
            return Ok(ExitCode::FAILURE);
        }
    };

    if let Some(job) = api.current_job() {
        sink.info(&format!("Command: {}", command_line(&job.argv)));
    }
    if let Some(path) = handle.output_path() {
        sink.info(&format!("Output: {}", path.display()));
    }

    let control = handle.control();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            sink.warning("Stopping conversion...");
            control.cancel();
        }
    });

    if let Some(mut lines) = handle.take_lines() {
        while let Some(line) = lines.recv().await {
            sink.info(&line);
        }
    }
    let outcome = handle.wait().await;
    interrupt.abort();

    Ok(match outcome.state {
        JobState::Succeeded => {
            if dry_run {
                sink.success("Dry run complete");
            } else if let Some(path) = handle.output_path() {
                sink.success(&format!("Conversion complete: {}", path.display()));
            }
            ExitCode::SUCCESS
        }
        JobState::Cancelled => {
            sink.warning("Conversion cancelled");
            ExitCode::from(EXIT_CANCELLED)
        }
        _ => {
            let summary = outcome
                .diagnostic
                .as_deref()
                .and_then(|d| d.lines().next())
                .unwrap_or("conversion failed");
            sink.error(summary);
            ExitCode::FAILURE
        }
    })
}
