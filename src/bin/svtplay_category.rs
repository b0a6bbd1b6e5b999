use std::io;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use svtplay_category::app::{self, Orchestrator, ProgressSink, RunOptions, TracingSink};
use svtplay_category::cancel::CancelToken;
use svtplay_category::catalog::{Catalog, SvtPlayCatalog};
use svtplay_category::config::{Config, ConfigLoader, Settings};
use svtplay_category::domain::ItemId;
use svtplay_category::downloader::SystemDownloader;
use svtplay_category::error::CategoryError;
use svtplay_category::output::{JsonOutput, OutputMode, TextOutput};
use svtplay_category::store::{FileStateStore, StateStore};

#[derive(Parser)]
#[command(name = "svtplay-category")]
#[command(about = "Download every video of an SVT Play category page via svtplay-dl")]
#[command(version)]
struct Cli {
    /// JSON config file (default: ./svtplay-category.json when present)
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print machine-readable JSON instead of a text summary
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download everything new in the category (default)")]
    Run(RunArgs),
    #[command(about = "Mark a series URL as complete so it is never checked again")]
    MarkComplete(MarkArgs),
    #[command(about = "Remove a URL from the seen file so it is checked again")]
    UnmarkComplete(MarkArgs),
    #[command(about = "Show tracked state, failing items and stale series")]
    Status(StatusArgs),
}

#[derive(Args, Clone, Default)]
struct StateArgs {
    /// Tracks completed standalone items and series
    #[arg(long)]
    seen_file: Option<Utf8PathBuf>,

    /// Tracks downloaded episode URLs
    #[arg(long)]
    episodes_file: Option<Utf8PathBuf>,

    /// Tracks series check history
    #[arg(long)]
    series_state_file: Option<Utf8PathBuf>,

    /// Tracks download failures
    #[arg(long)]
    errors_file: Option<Utf8PathBuf>,
}

#[derive(Args, Clone, Default)]
struct RunArgs {
    /// Category page URL
    #[arg(long)]
    url: Option<String>,

    /// Base output directory handed to the downloader
    #[arg(long)]
    output_dir: Option<Utf8PathBuf>,

    #[command(flatten)]
    state: StateArgs,

    /// Delay between downloads in seconds
    #[arg(long)]
    sleep: Option<f64>,

    /// Days without new episodes before suggesting completion
    #[arg(long)]
    stale_days: Option<u32>,

    /// Stop after N successful downloads (0 = no limit)
    #[arg(long, value_name = "N")]
    max_dl: Option<usize>,

    /// Downloader executable
    #[arg(long)]
    downloader: Option<String>,

    /// Print what would be downloaded without downloading or saving state
    #[arg(long)]
    dry_run: bool,
}

#[derive(Args, Clone)]
struct MarkArgs {
    url: String,

    #[command(flatten)]
    state: StateArgs,
}

#[derive(Args, Clone, Default)]
struct StatusArgs {
    #[command(flatten)]
    state: StateArgs,

    /// Days without new episodes before suggesting completion
    #[arg(long)]
    stale_days: Option<u32>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<CategoryError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CategoryError) -> u8 {
    match error {
        CategoryError::InvalidItemId(_)
        | CategoryError::InvalidArgument(_)
        | CategoryError::ConfigRead(_)
        | CategoryError::ConfigParse(_) => 2,
        CategoryError::CatalogHttp(_)
        | CategoryError::CatalogStatus { .. }
        | CategoryError::CatalogParse(_)
        | CategoryError::EmptyCatalog
        | CategoryError::MissingTool(_) => 3,
        CategoryError::StateRead { .. } | CategoryError::StateCorrupt { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config = cli.config.as_deref();

    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run_download(config, args, output_mode),
        Commands::MarkComplete(args) => run_mark(config, args, true, output_mode),
        Commands::UnmarkComplete(args) => run_mark(config, args, false, output_mode),
        Commands::Status(args) => run_status(config, args, output_mode),
    }
}

fn state_overrides(state: StateArgs) -> Config {
    Config {
        seen_file: state.seen_file,
        episodes_file: state.episodes_file,
        series_state_file: state.series_state_file,
        errors_file: state.errors_file,
        ..Config::default()
    }
}

fn run_download(
    config: Option<&str>,
    args: RunArgs,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let overrides = Config {
        catalog_url: args.url,
        output_dir: args.output_dir,
        sleep_secs: args.sleep,
        stale_days: args.stale_days,
        max_downloads: args.max_dl,
        downloader: args.downloader,
        ..state_overrides(args.state)
    };
    let settings = ConfigLoader::resolve(config, overrides)?;
    let dry_run = args.dry_run;

    // Load state before touching the network so a corrupt store fails fast.
    let store = FileStateStore::new(settings.state.clone());
    let state = store.load()?;

    let cancel = CancelToken::new();
    cancel.install_handler()?;

    let downloader = SystemDownloader::new(
        &settings.downloader,
        settings.output_dir.as_std_path(),
        cancel.clone(),
    );
    if !dry_run && !downloader.is_available() {
        return Err(CategoryError::MissingTool(settings.downloader.clone()).into());
    }

    let catalog = SvtPlayCatalog::new()?;
    let items = catalog.discover(&settings.catalog_url)?;

    let options = run_options(&settings, dry_run);
    let mut orchestrator = Orchestrator::new(state, store, downloader, cancel, options);
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Interactive => &TracingSink,
        OutputMode::NonInteractive => &JsonOutput,
    };
    let report = orchestrator.run(&items, sink)?;

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_run(&report).into_diagnostic(),
        OutputMode::Interactive => {
            TextOutput::write_run(&mut io::stdout().lock(), &report).into_diagnostic()
        }
    }
}

fn run_options(settings: &Settings, dry_run: bool) -> RunOptions {
    RunOptions {
        dry_run,
        max_downloads: settings.max_downloads,
        delay: settings.delay,
        stale_days: settings.stale_days,
    }
}

fn run_mark(
    config: Option<&str>,
    args: MarkArgs,
    marking: bool,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let settings = ConfigLoader::resolve(config, state_overrides(args.state))?;
    let id: ItemId = args.url.parse()?;
    let store = FileStateStore::new(settings.state);
    let result = if marking {
        app::mark_complete(&store, &id)
    } else {
        app::unmark_complete(&store, &id)
    }?;
    info!(id = %result.id, changed = result.changed, "seen file updated");

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_mark(&result).into_diagnostic(),
        OutputMode::Interactive => {
            TextOutput::write_mark(&mut io::stdout().lock(), &result, marking).into_diagnostic()
        }
    }
}

fn run_status(
    config: Option<&str>,
    args: StatusArgs,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let overrides = Config {
        stale_days: args.stale_days,
        ..state_overrides(args.state)
    };
    let settings = ConfigLoader::resolve(config, overrides)?;
    let state = FileStateStore::new(settings.state).load()?;
    let report = app::status(&state, Utc::now(), settings.stale_days);

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_status(&report).into_diagnostic(),
        OutputMode::Interactive => {
            TextOutput::write_status(&mut io::stdout().lock(), &report).into_diagnostic()
        }
    }
}
