use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use cipta_core::backend::InferenceBackend;
use cipta_core::config::{config_path, data_dir, initialize_data_dir, AppConfig};
use cipta_core::imageio::default_output_path;
use cipta_core::logging::{self, FileSinkPlan, LoggingInitOptions, DEFAULT_LOG_FILTER};
use cipta_core::pipeline::{self, Stage, UpscaleJob};
use cipta_core::upscaler::{ModelIo, Upscaler, UpscalerConfig};

#[derive(Parser)]
#[command(name = "cipta", about = "Local 4x image upscaling with Real-ESRGAN")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        global = true,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        global = true,
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,

    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upscale one image and export it as PNG.
    Upscale(UpscaleArgs),
    /// Print the model's inputs and outputs as JSON.
    Inspect(ModelArgs),
    /// Create the data directory and print the active config.
    Config,
}

#[derive(Args, Default)]
struct ModelArgs {
    #[arg(long, help = "ONNX model path (overrides config)")]
    model: Option<PathBuf>,
    #[arg(long, help = "Execution backend: cpu, cuda or tensorrt")]
    backend: Option<String>,
}

#[derive(Args)]
struct UpscaleArgs {
    #[arg(help = "Image to upscale (PNG, JPEG, WebP, BMP or GIF)")]
    input: PathBuf,
    #[arg(short = 'o', long, help = "Output PNG path")]
    output: Option<PathBuf>,
    #[command(flatten)]
    model: ModelArgs,
    #[arg(
        long,
        value_name = "PIXELS",
        help = "Largest accepted input, 0 disables the check"
    )]
    max_pixels: Option<u64>,
    #[arg(long, value_name = "PATH", help = "Also write a before/after composite")]
    compare: Option<PathBuf>,
    #[arg(
        long,
        value_name = "PERCENT",
        value_parser = clap::value_parser!(u8).range(0..=100),
        help = "Divider position of the composite"
    )]
    split: Option<u8>,
    #[arg(long, help = "Print the job report as JSON")]
    json: bool,
}

pub async fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    let resolved_data_dir = data_dir(cli.data_dir.as_deref());

    cipta_core::runtime::setup_runtime_libs();
    init_logging(
        Some(resolved_data_dir.as_path()),
        cli.verbose,
        cli.log_filter.as_deref(),
    );
    cipta_core::runtime::log_runtime_lib_status();
    log_startup_metadata(&resolved_data_dir);

    match cli.command {
        Commands::Upscale(args) => run_upscale(args, &resolved_data_dir).await,
        Commands::Inspect(args) => run_inspect(args, &resolved_data_dir).await,
        Commands::Config => show_config(&resolved_data_dir),
    }
}

fn init_logging(data_dir: Option<&Path>, verbose: u8, cli_log_filter: Option<&str>) {
    let init_options = LoggingInitOptions {
        data_dir: data_dir.map(Path::to_path_buf),
        verbose,
        cli_log_filter: cli_log_filter.map(ToString::to_string),
        rust_log_env: std::env::var("RUST_LOG").ok(),
        ..Default::default()
    };
    let init_plan = logging::compose_logging_init_plan(&init_options);
    let console_filter = init_plan.filters.console_filter;
    let file_filter = init_plan.filters.file_filter;

    match init_plan.file_sink {
        FileSinkPlan::Ready(ready) => {
            let console_env_filter = parse_env_filter_with_fallback(&console_filter, "console");
            let file_env_filter = parse_env_filter_with_fallback(&file_filter, "file");

            let subscriber = tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_filter(console_env_filter),
                )
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(ready.appender)
                        .with_filter(file_env_filter),
                );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
            }
        }
        FileSinkPlan::Fallback(fallback) => {
            let attempted_log_dir = fallback
                .attempted_log_dir
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<none>".to_string());
            let reason = fallback.reason;

            let console_env_filter = parse_env_filter_with_fallback(&console_filter, "console");
            let subscriber = tracing_subscriber::registry().with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_filter(console_env_filter),
            );

            if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
                eprintln!(
                    "Failed to initialize tracing subscriber: {error}. Continuing without structured tracing."
                );
                return;
            }

            warn!(
                attempted_log_dir = %attempted_log_dir,
                reason = %reason,
                "Persistent file logging unavailable; continuing with console-only logging"
            );
        }
    }
}

fn parse_env_filter_with_fallback(filter: &str, sink_name: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_else(|error| {
        eprintln!(
            "Invalid {sink_name} log filter '{filter}': {error}. Falling back to '{DEFAULT_LOG_FILTER}'."
        );
        tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

fn log_startup_metadata(data_dir: &Path) {
    info!(
        pid = std::process::id(),
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %data_dir.display(),
        config_path = %config_path(data_dir).display(),
        "Runtime startup metadata"
    );
}

fn load_config(data_dir: &Path) -> AppConfig {
    if let Err(e) = initialize_data_dir(data_dir) {
        warn!(error = %e, "Failed to initialize data directory");
    }
    match AppConfig::load_from_path(&config_path(data_dir)) {
        Ok(config) => config,
        Err(err) => {
            warn!(error = %format!("{err:#}"), "Failed to load config file, using defaults");
            AppConfig::default()
        }
    }
}

/// Config values with `--model` and `--backend` applied on top.
fn resolve_upscaler_config(
    config: &AppConfig,
    data_dir: &Path,
    args: &ModelArgs,
) -> UpscalerConfig {
    let mut upscaler_config = config.upscaler_config(data_dir);
    if let Some(model) = &args.model {
        upscaler_config.model_path = model.clone();
    }
    if let Some(backend) = &args.backend {
        upscaler_config.backend = InferenceBackend::from_str_lossy(backend);
    }
    upscaler_config
}

fn build_job(config: &AppConfig, args: &UpscaleArgs) -> UpscaleJob {
    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_path(&args.input, &config.output.file_prefix));
    let split = args.split.unwrap_or(config.output.compare_split);

    UpscaleJob {
        input: args.input.clone(),
        output,
        max_pixels: args.max_pixels.unwrap_or(config.inference.max_pixels),
        compare: args.compare.clone().map(|path| (path, split)),
    }
}

async fn run_upscale(args: UpscaleArgs, data_dir: &Path) -> Result<()> {
    let config = load_config(data_dir);
    let upscaler_config = resolve_upscaler_config(&config, data_dir, &args.model);
    let job = build_job(&config, &args);

    info!(
        input = %job.input.display(),
        output = %job.output.display(),
        model = %upscaler_config.model_path.display(),
        backend = %upscaler_config.backend,
        "Starting upscale job"
    );

    let report = tokio::task::spawn_blocking(move || {
        pipeline::run(&job, &upscaler_config, |stage: Stage| {
            info!(stage = ?stage, "{stage}");
        })
    })
    .await
    .context("upscale task failed to complete")??;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.output.display());
        if let Some(comparison) = &report.comparison {
            println!("{}", comparison.display());
        }
    }
    Ok(())
}

async fn run_inspect(args: ModelArgs, data_dir: &Path) -> Result<()> {
    let config = load_config(data_dir);
    let upscaler_config = resolve_upscaler_config(&config, data_dir, &args);

    let io: ModelIo = tokio::task::spawn_blocking(move || {
        Upscaler::load(&upscaler_config).map(|upscaler| upscaler.model_io().clone())
    })
    .await
    .context("inspect task failed to complete")??;

    println!("{}", serde_json::to_string_pretty(&io)?);
    Ok(())
}

fn show_config(data_dir: &Path) -> Result<()> {
    initialize_data_dir(data_dir)?;
    let cfg_path = config_path(data_dir);
    let config = AppConfig::load_from_path(&cfg_path)?;

    println!("# {}", cfg_path.display());
    print!(
        "{}",
        toml::to_string_pretty(&config).context("failed to serialize config TOML")?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("arguments should parse")
    }

    fn upscale_args(cli: Cli) -> UpscaleArgs {
        match cli.command {
            Commands::Upscale(args) => args,
            _ => panic!("expected upscale subcommand"),
        }
    }

    #[test]
    fn upscale_parses_all_flags() {
        let cli = parse(&[
            "cipta",
            "-vv",
            "--data-dir",
            "/tmp/cipta",
            "upscale",
            "photo.jpg",
            "-o",
            "out.png",
            "--model",
            "x4.onnx",
            "--backend",
            "cuda",
            "--max-pixels",
            "0",
            "--compare",
            "cmp.png",
            "--split",
            "30",
            "--json",
        ]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/cipta")));

        let args = upscale_args(cli);
        assert_eq!(args.input, PathBuf::from("photo.jpg"));
        assert_eq!(args.output, Some(PathBuf::from("out.png")));
        assert_eq!(args.model.model, Some(PathBuf::from("x4.onnx")));
        assert_eq!(args.model.backend.as_deref(), Some("cuda"));
        assert_eq!(args.max_pixels, Some(0));
        assert_eq!(args.compare, Some(PathBuf::from("cmp.png")));
        assert_eq!(args.split, Some(30));
        assert!(args.json);
    }

    #[test]
    fn global_flags_accepted_after_subcommand() {
        let cli = parse(&["cipta", "inspect", "--log-filter", "cipta_core=debug", "-v"]);
        assert_eq!(cli.log_filter.as_deref(), Some("cipta_core=debug"));
        assert_eq!(cli.verbose, 1);
        assert!(matches!(cli.command, Commands::Inspect(_)));
    }

    #[test]
    fn split_out_of_range_is_rejected() {
        assert!(Cli::try_parse_from(["cipta", "upscale", "a.png", "--split", "101"]).is_err());
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["cipta"]).is_err());
    }

    #[test]
    fn job_defaults_come_from_config() {
        let config = AppConfig::default();
        let args = upscale_args(parse(&[
            "cipta",
            "upscale",
            "shots/cat.v2.jpg",
            "--compare",
            "cmp.png",
        ]));

        let job = build_job(&config, &args);
        assert_eq!(job.output, PathBuf::from("shots/CiptaDigital-HD-cat.png"));
        assert_eq!(job.max_pixels, 1_000_000);
        assert_eq!(job.compare, Some((PathBuf::from("cmp.png"), 50)));
    }

    #[test]
    fn job_flags_override_config() {
        let mut config = AppConfig::default();
        config.output.compare_split = 70;
        let args = upscale_args(parse(&[
            "cipta",
            "upscale",
            "cat.png",
            "-o",
            "big.png",
            "--max-pixels",
            "42",
        ]));

        let job = build_job(&config, &args);
        assert_eq!(job.output, PathBuf::from("big.png"));
        assert_eq!(job.max_pixels, 42);
        assert_eq!(job.compare, None);
    }

    #[test]
    fn model_flags_override_config() {
        let config = AppConfig::default();
        let data_dir = Path::new("/data");

        let from_config = resolve_upscaler_config(&config, data_dir, &ModelArgs::default());
        assert_eq!(
            from_config.model_path,
            PathBuf::from("/data/models/realesrgan.onnx")
        );
        assert_eq!(from_config.backend, InferenceBackend::Cpu);

        let overridden = resolve_upscaler_config(
            &config,
            data_dir,
            &ModelArgs {
                model: Some(PathBuf::from("local.onnx")),
                backend: Some("trt".to_string()),
            },
        );
        assert_eq!(overridden.model_path, PathBuf::from("local.onnx"));
        assert_eq!(overridden.backend, InferenceBackend::Tensorrt);
    }

    #[test]
    fn load_config_falls_back_on_broken_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        std::fs::write(temp.path().join("config.toml"), "[inference\n").expect("write config");
        assert_eq!(load_config(temp.path()), AppConfig::default());
    }
}
