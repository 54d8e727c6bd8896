use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use splash_adapters::{ActiveRosterClient, RosterSource, StaticRoster};
use splash_storage::SplashDb;
use splash_sync::{JobContext, JobKind, JobReport, JobRunner, JobSettings, Settings, WriteMode};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "splash-cli")]
#[command(about = "Reconcile a Splash meet database against the active roster and club list")]
struct Cli {
    /// Settings file (defaults to $SPLASH_UTILITIES_CONFIG or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Write changes for this run regardless of `update_database`
    #[arg(long, global = true, conflicts_with = "dry_run")]
    live: bool,
    /// Only log changes for this run regardless of `update_database`
    #[arg(long, global = true)]
    dry_run: bool,
    /// Use a saved roster JSON file instead of the roster endpoint
    #[arg(long, global = true)]
    roster_file: Option<PathBuf>,
    /// Print reports as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Update club regions and preferred names from the club CSV
    FixClubs,
    /// Update para classification codes from the active roster
    FixPara,
    /// Update para athlete names from the active roster, writing a rollback log
    UpdateParaNames,
    /// Restore athlete names from the rollback log
    RollbackNames,
    /// Remove trailing single-letter initials from first names
    RemoveInitials,
    /// Create an empty meet database
    InitDb { path: PathBuf },
    /// Show or change saved settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Print every setting
    Show,
    /// Print the settings file location
    Path,
    /// Validate, store and save one setting
    Set { key: String, value: String },
}

struct RunOptions {
    live: bool,
    dry_run: bool,
    roster_file: Option<PathBuf>,
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        config,
        live,
        dry_run,
        roster_file,
        json,
        command,
    } = Cli::parse();

    let config_path = match config {
        Some(path) => path,
        None => Settings::default_path()?,
    };
    let mut settings = Settings::load(&config_path)
        .with_context(|| format!("loading settings from {}", config_path.display()))?;
    init_logging(&settings.log_path())?;

    let options = RunOptions {
        live,
        dry_run,
        roster_file,
        json,
    };
    let kind = match command {
        Commands::FixClubs => JobKind::UpdateClubs,
        Commands::FixPara => JobKind::UpdatePara,
        Commands::UpdateParaNames => JobKind::UpdateParaNames,
        Commands::RollbackNames => JobKind::RollbackNames,
        Commands::RemoveInitials => JobKind::RemoveInitials,
        Commands::InitDb { path } => return init_db(&path).await,
        Commands::Config { action } => return config_command(&mut settings, action, options.json),
    };

    let report = run(kind, &settings, &options).await?;
    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary_line());
    }
    if !report.is_success() {
        bail!("{} did not complete", report.job);
    }
    Ok(())
}

/// Console on stderr plus a plain-text log file; `RUST_LOG` overrides `info`.
fn init_logging(log_path: &Path) -> Result<()> {
    if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("opening log file {}", log_path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        .try_init()
        .context("installing log subscriber")?;
    Ok(())
}

async fn run(kind: JobKind, settings: &Settings, options: &RunOptions) -> Result<JobReport> {
    let mut job_settings = JobSettings::from_settings(settings).context("reading job settings")?;
    if options.live {
        job_settings.write_mode = WriteMode::Live;
    } else if options.dry_run {
        job_settings.write_mode = WriteMode::DryRun;
    }

    let roster: Arc<dyn RosterSource> = match &options.roster_file {
        Some(path) => Arc::new(
            StaticRoster::from_json_file(path)
                .with_context(|| format!("loading roster {}", path.display()))?,
        ),
        None => Arc::new(ActiveRosterClient::new()?),
    };
    info!(roster = %roster.describe(), client_id = settings.client_id(), "starting job");

    let runner = JobRunner::new();
    let handle = runner.start(kind, JobContext::new(job_settings, roster))?;
    Ok(handle.wait().await?)
}

async fn init_db(path: &Path) -> Result<()> {
    let db = SplashDb::create(path)
        .await
        .with_context(|| format!("creating {}", path.display()))?;
    let connection = db.connection_string().to_string();
    db.close().await?;
    println!("created {connection}");
    Ok(())
}

fn config_command(settings: &mut Settings, action: ConfigAction, json: bool) -> Result<()> {
    match action {
        ConfigAction::Show => {
            if json {
                let values: BTreeMap<&str, &str> = settings.iter().collect();
                println!("{}", serde_json::to_string_pretty(&values)?);
            } else {
                for (key, value) in settings.iter() {
                    println!("{key} = {value}");
                }
            }
        }
        ConfigAction::Path => println!("{}", settings.path().display()),
        ConfigAction::Set { key, value } => {
            settings.set_str(&key, &value)?;
            settings.save()?;
            println!("{key} = {}", settings.get_str(&key)?);
        }
    }
    Ok(())
}
