use std::path::PathBuf;

use aimg_contracts::audit::AuditLog;
use aimg_contracts::request::{ImageSize, RequestDescriptor, RequestMode, Sinks};
use aimg_contracts::settings::{Settings, DEFAULT_SETTINGS_FILE};
use aimg_engine::{
    DispatchReport, Dispatcher, EnvCredentials, HttpFetcher, ModelChoice, OpenAiImageApi,
    SystemBrowser,
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "aimg",
    version,
    about = "Generate images from a text prompt or variations of an existing image"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create images from a text prompt.
    Create(CreateArgs),
    /// Create variations of a square PNG.
    Vary(VaryArgs),
}

#[derive(Debug, Parser)]
struct CreateArgs {
    #[arg(long)]
    prompt: String,
    #[command(flatten)]
    request: RequestArgs,
}

#[derive(Debug, Parser)]
struct VaryArgs {
    #[arg(long)]
    image: PathBuf,
    #[command(flatten)]
    request: RequestArgs,
}

#[derive(Debug, Clone, Default, Args)]
struct RequestArgs {
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    settings: PathBuf,
    /// Number of images, 1 to 10.
    #[arg(long)]
    count: Option<u8>,
    /// 256, 512 or 1024.
    #[arg(long)]
    size: Option<ImageSize>,
    /// Open results in the browser.
    #[arg(long)]
    browser: bool,
    /// Write results to numbered PNG files.
    #[arg(long)]
    file: bool,
    /// Output template; `images/Image.png` writes `images/Image0.png`, ...
    #[arg(long)]
    output: Option<PathBuf>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    log: Option<PathBuf>,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("aimg error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<i32> {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            tracing::warn!(error = %err, "ignoring unreadable .env");
        }
    }
    let cli = Cli::parse();
    let (base, args) = match cli.command {
        Command::Create(args) => (RequestDescriptor::prompt_create(args.prompt), args.request),
        Command::Vary(args) => (RequestDescriptor::variation(args.image), args.request),
    };
    let settings = load_settings(&args)?;
    let descriptor = build_descriptor(base, &settings, &args);

    let mut dispatcher = Dispatcher::new(
        Box::new(OpenAiImageApi::new()),
        Box::new(EnvCredentials::default()),
        Box::new(SystemBrowser),
        Box::new(HttpFetcher::new()),
    )
    .with_models(model_choice(&settings, &args, descriptor.mode))
    .with_audit_log(AuditLog::new(args.log.clone().unwrap_or_else(|| settings.log.clone())));

    let report = dispatcher.dispatch(&descriptor)?;
    print_report(&report);
    if report.is_complete() {
        Ok(0)
    } else {
        Ok(2)
    }
}

fn load_settings(args: &RequestArgs) -> Result<Settings> {
    Settings::load(&args.settings)
        .with_context(|| format!("failed loading settings from {}", args.settings.display()))
}

/// Fills a fresh descriptor from settings, then applies command-line overrides.
fn build_descriptor(
    base: RequestDescriptor,
    settings: &Settings,
    args: &RequestArgs,
) -> RequestDescriptor {
    // Any sink flag replaces the configured sinks.
    let sinks = if args.browser || args.file {
        Sinks {
            browser: args.browser,
            file: args.file,
        }
    } else {
        settings.sinks()
    };
    base.with_size(args.size.unwrap_or(settings.size))
        .with_count(args.count.unwrap_or(settings.number))
        .with_sinks(sinks)
        .with_output_template(args.output.clone().unwrap_or_else(|| settings.output.clone()))
}

fn model_choice(settings: &Settings, args: &RequestArgs, mode: RequestMode) -> ModelChoice {
    let mut models = ModelChoice {
        create: settings.create_model.clone(),
        variation: settings.variation_model.clone(),
    };
    if let Some(model) = args.model.clone() {
        match mode {
            RequestMode::PromptCreate => models.create = model,
            RequestMode::Variation => models.variation = model,
        }
    }
    models
}

fn print_report(report: &DispatchReport) {
    for index in &report.opened {
        if let Some(image) = report.images.get(*index) {
            println!("Opened {}", image.url);
        }
    }
    for path in &report.written {
        println!("Wrote {}", path.display());
    }
    for failure in &report.failures {
        eprintln!("aimg warning: {failure}");
    }
    if !report.written.is_empty() {
        println!("Image file(s) created");
    }
}
