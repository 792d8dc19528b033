use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use dialoguer::Confirm;
use dialoguer::theme::ColorfulTheme;
use miette::IntoDiagnostic;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use clld_meta::app::App;
use clld_meta::config::ConfigLoader;
use clld_meta::error::MetaError;
use clld_meta::output::{HumanOutput, JsonOutput, OutputMode};
use clld_meta::store::Store;
use clld_meta::zenodo::{ZenodoClient, ZenodoHttpClient};

#[derive(Parser)]
#[command(name = "clld-meta")]
#[command(about = "Curate a CLDF catalog of the datasets published in Zenodo communities")]
#[command(version, author)]
struct Cli {
    /// Print results as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Update the Zenodo metadata cache")]
    Updatemd(ProjectArgs),
    #[command(about = "Download dataset archives of selected records")]
    Download(ProjectArgs),
    #[command(about = "Build the CLDF catalog from downloaded datasets")]
    Makecldf(ProjectArgs),
    #[command(about = "Delete downloaded files known not to be CLDF metadata")]
    Cleanup(CleanupArgs),
}

#[derive(Args)]
struct ProjectArgs {
    /// Project directory (defaults to the current directory).
    project_dir: Option<PathBuf>,
}

#[derive(Args)]
struct CleanupArgs {
    project_dir: Option<PathBuf>,

    /// Delete without asking.
    #[arg(long, short = 'y')]
    yes: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<MetaError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MetaError) -> u8 {
    match error {
        MetaError::MissingMetadata(_) | MetaError::MissingDatasets(_) => 2,
        MetaError::ZenodoHttp(_)
        | MetaError::ZenodoStatus { .. }
        | MetaError::ZenodoResponse(_)
        | MetaError::RetriesExhausted { .. }
        | MetaError::ChecksumMismatch { .. } => 3,
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
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    match cli.command {
        Commands::Updatemd(args) => {
            let store = open_store(args.project_dir.as_deref())?;
            let config = ConfigLoader::resolve(store.project_root().as_std_path())?;
            let zenodo = ZenodoHttpClient::new(&config)?;
            let app = App::new(store, config, zenodo);
            run_updatemd(app, output_mode)
        }
        Commands::Download(args) => {
            let store = open_store(args.project_dir.as_deref())?;
            let config = ConfigLoader::resolve(store.project_root().as_std_path())?;
            let zenodo = ZenodoHttpClient::new(&config)?;
            let app = App::new(store, config, zenodo);
            run_download(app, output_mode)
        }
        Commands::Makecldf(args) => {
            let store = open_store(args.project_dir.as_deref())?;
            let config = ConfigLoader::resolve(store.project_root().as_std_path())?;
            let app = App::new(store, config, NopZenodo);
            run_makecldf(app, output_mode)
        }
        Commands::Cleanup(args) => {
            let store = open_store(args.project_dir.as_deref())?;
            let config = ConfigLoader::resolve(store.project_root().as_std_path())?;
            let app = App::new(store, config, NopZenodo);
            run_cleanup(app, args.yes, output_mode)
        }
    }
}

fn open_store(project_dir: Option<&Path>) -> miette::Result<Store> {
    match project_dir {
        Some(dir) => Ok(Store::from_path(dir)?),
        None => Ok(Store::current_dir()?),
    }
}

fn run_updatemd<Z: ZenodoClient>(app: App<Z>, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::Json => {
            let result = app.update_metadata(&JsonOutput)?;
            JsonOutput::print_sync(&result).into_diagnostic()
        }
        OutputMode::Human => {
            let result = app.update_metadata(&HumanOutput)?;
            HumanOutput::print_sync(&result);
            Ok(())
        }
    }
}

fn run_download<Z: ZenodoClient>(app: App<Z>, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::Json => {
            let result = app.download(&JsonOutput)?;
            JsonOutput::print_download(&result).into_diagnostic()
        }
        OutputMode::Human => {
            let result = app.download(&HumanOutput)?;
            HumanOutput::print_download(&result);
            Ok(())
        }
    }
}

fn run_makecldf<Z: ZenodoClient>(app: App<Z>, output_mode: OutputMode) -> miette::Result<()> {
    match output_mode {
        OutputMode::Json => {
            let result = app.make_cldf(&JsonOutput)?;
            JsonOutput::print_catalog(&result).into_diagnostic()
        }
        OutputMode::Human => {
            let result = app.make_cldf(&HumanOutput)?;
            HumanOutput::print_catalog(&result);
            Ok(())
        }
    }
}

fn run_cleanup<Z: ZenodoClient>(
    app: App<Z>,
    yes: bool,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let confirm = |paths: &[String]| {
        if yes {
            return true;
        }
        for path in paths {
            eprintln!("{path}");
        }
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Delete {} file(s) known not to be CLDF?", paths.len()))
            .default(false)
            .show_default(true)
            .interact()
            .unwrap_or(false)
    };

    match output_mode {
        OutputMode::Json => {
            let result = app.cleanup(confirm, &JsonOutput)?;
            JsonOutput::print_cleanup(&result).into_diagnostic()
        }
        OutputMode::Human => {
            let result = app.cleanup(confirm, &HumanOutput)?;
            HumanOutput::print_cleanup(&result);
            Ok(())
        }
    }
}

/// Stands in for the Zenodo client in stages that never go online.
#[derive(Clone, Copy)]
struct NopZenodo;

impl ZenodoClient for NopZenodo {
    fn list_community(&self, _community: &str) -> Result<Vec<Value>, MetaError> {
        Err(MetaError::ZenodoHttp(
            "Zenodo client not configured".to_string(),
        ))
    }

    fn download_file(&self, _url: &str, _destination: &Path) -> Result<(), MetaError> {
        Err(MetaError::ZenodoHttp(
            "Zenodo client not configured".to_string(),
        ))
    }
}
