use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use doorcam_pipeline::config::CameraSource;
use doorcam_pipeline::{DoorcamConfig, DoorcamOrchestrator};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Compact,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "doorcam")]
#[command(about = "Always-on door camera: motion-triggered recording, live MJPEG stream and local display")]
#[command(version)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "doorcam.toml")]
    config: PathBuf,

    /// Enable debug level logging
    #[arg(short, long)]
    debug: bool,

    /// Enable info level logging
    #[arg(short, long)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    quiet: bool,

    /// Log output format
    #[arg(long, value_enum, default_value = "pretty")]
    log_format: LogFormat,

    /// Also write a daily rolling log file into this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    validate_config: bool,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,

    /// Use the synthetic test camera instead of the configured device
    #[arg(long)]
    synthetic: bool,

    /// SPACE triggers a recording, q or Esc quits
    #[arg(long)]
    keyboard: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let log_guard = match init_logging(&args) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialise logging: {:#}", e);
            std::process::exit(1);
        }
    };

    let exit_code = match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };

    info!("Doorcam exiting with code {}", exit_code);
    drop(log_guard);
    std::process::exit(exit_code);
}

async fn run(args: Args) -> Result<i32> {
    info!("Starting Doorcam v{}", env!("CARGO_PKG_VERSION"));

    let mut config = DoorcamConfig::load_from_file(&args.config)
        .with_context(|| format!("invalid configuration in {}", args.config.display()))?;
    if args.synthetic {
        config.camera.source = CameraSource::Synthetic;
    }

    if args.validate_config {
        println!("Configuration is valid");
        return Ok(0);
    }

    if args.print_config {
        let rendered = toml::to_string_pretty(&config).context("failed to render configuration")?;
        println!("{}", rendered);
        return Ok(0);
    }

    let mut orchestrator = DoorcamOrchestrator::new(config).context("failed to create components")?;
    orchestrator.set_keyboard_enabled(args.keyboard);

    if let Err(e) = orchestrator.start().await {
        error!("Startup failed: {}", e);
        if let Err(stop_error) = orchestrator.shutdown().await {
            warn!("Cleanup after failed startup: {}", stop_error);
        }
        return Ok(1);
    }

    Ok(orchestrator.run().await?)
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("doorcam_pipeline={},doorcam={}", log_level, log_level)));

    let console = match args.log_format {
        LogFormat::Json => fmt::layer().json().with_target(true).boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(false).boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
    };

    let (file, guard) = match &args.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "doorcam.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer).boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file)
        .try_init()
        .context("tracing subscriber already set")?;

    Ok(guard)
}
