use clap::{Args, Parser, Subcommand};
use env_stash::collect::Collection;
use env_stash::config::{Config, Overrides, Settings};
use env_stash::gateway::{GatewayError, SecretGateway};
use env_stash::hook;
use env_stash::sync::{PullStatus, PushOutcome, SyncEngine, SyncError};
use std::path::{Path, PathBuf};

const LIST_VALUE_WIDTH: usize = 50;

#[derive(Parser)]
#[command(
  name = "env-stash",
  about = "Keep your .env files in sync with a single remote secret",
  version,
  author
)]
struct Cli {
  #[command(subcommand)]
  command: Command,

  /// Project root (defaults to the current directory)
  #[arg(short = 'C', long = "dir", global = true)]
  dir: Option<PathBuf>,

  /// Verbose output (-v for verbose, -vv for very verbose)
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,
}

#[derive(Subcommand)]
enum Command {
  /// Upload all .env files to the remote secret
  Push {
    #[command(flatten)]
    remote: RemoteArgs,
  },
  /// Recreate .env files from the remote secret
  Pull {
    #[command(flatten)]
    remote: RemoteArgs,

    /// Replace .env files that already exist
    #[arg(short, long)]
    overwrite: bool,
  },
  /// List the variables a push would upload
  List,
  /// Write a .env-stash.json configuration file
  Init {
    /// Project name, used as the secret name
    #[arg(short, long)]
    project: Option<String>,
  },
  /// Install a git pre-push hook that runs `env-stash push`
  InstallHook,
}

#[derive(Args)]
struct RemoteArgs {
  /// Project name, used as the secret name
  #[arg(short, long)]
  project: Option<String>,

  /// AWS region
  #[arg(short, long)]
  region: Option<String>,

  /// AWS (SSO) profile
  #[arg(long)]
  profile: Option<String>,
}

impl From<RemoteArgs> for Overrides {
  fn from(args: RemoteArgs) -> Self {
    Self {
      project: args.project,
      region: args.region,
      profile: args.profile,
    }
  }
}

fn setup_tracing(verbose: u8) {
  use tracing_subscriber::fmt;
  use tracing_subscriber::prelude::*;

  let log_level = match verbose {
    0 => "warn",
    1 => "debug",
    _ => "trace",
  };

  tracing_subscriber::registry()
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(tracing_subscriber::EnvFilter::new(
      std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
    ))
    .init();
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  let cli = Cli::parse();

  setup_tracing(cli.verbose);

  let root = match cli.dir {
    Some(dir) => dir,
    None => std::env::current_dir()?,
  };

  match cli.command {
    Command::Push { remote } => push(&root, remote.into()),
    Command::Pull { remote, overwrite } => pull(&root, remote.into(), overwrite),
    Command::List => list(&root),
    Command::Init { project } => init(&root, project),
    Command::InstallHook => install_hook(&root),
  }
}

fn settings(root: &Path, overrides: Overrides) -> Result<Settings, Box<dyn std::error::Error>> {
  let config = Config::load(root)?;
  Ok(config.resolve(root, overrides, |key| std::env::var(key).ok()))
}

fn print_target(action: &str, settings: &Settings) {
  println!("{} project: {}", action, settings.project_name);
  if let Some(profile) = &settings.remote.profile {
    println!("Using AWS profile: {}", profile);
  }
  println!("Region: {}", settings.remote.region);
}

#[cfg(feature = "aws")]
fn connect(settings: &Settings) -> Result<impl SecretGateway, GatewayError> {
  env_stash::aws::AwsSecretsManager::new(&settings.remote)
}

#[cfg(not(feature = "aws"))]
fn connect(_settings: &Settings) -> Result<impl SecretGateway, GatewayError> {
  Err::<env_stash::gateway::MemoryGateway, _>(GatewayError::transport(
    "env-stash was built without the `aws` feature",
  ))
}

fn push(root: &Path, overrides: Overrides) -> Result<(), Box<dyn std::error::Error>> {
  let settings = settings(root, overrides)?;
  print_target("Syncing", &settings);

  let collector = settings.collector()?;
  let engine = SyncEngine::new(connect(&settings)?);
  let report = match engine.push(&collector, root, &settings.project_name) {
    Ok(report) => report,
    Err(err @ SyncError::Encode(_)) => {
      eprintln!("  ! {}", err);
      eprintln!("Nothing was pushed");
      return Err(err.into());
    }
    Err(err) => return Err(err.into()),
  };

  for failure in &report.failures {
    eprintln!("  ! {}", failure);
  }

  if report.outcome == PushOutcome::NothingToSync {
    println!("No .env files found, nothing to sync");
    return Ok(());
  }

  println!(
    "Found {} environment variables across files:",
    report.variable_count()
  );
  for (file, count) in &report.files {
    println!("  - {}: {} variables", file, count);
  }

  match report.outcome {
    PushOutcome::Created => println!("Created secret: {}", settings.project_name),
    PushOutcome::Updated => println!("Updated secret: {}", settings.project_name),
    PushOutcome::NothingToSync => {}
  }
  println!("✅ Successfully synced");

  Ok(())
}

fn pull(root: &Path, overrides: Overrides, overwrite: bool) -> Result<(), Box<dyn std::error::Error>> {
  let settings = settings(root, overrides)?;
  print_target("Pulling", &settings);

  let engine = SyncEngine::new(connect(&settings)?);
  let report = engine.pull(root, &settings.project_name, overwrite)?;

  println!("Found {} .env file(s) in the secret:", report.files.len());
  for file in &report.files {
    match &file.status {
      PullStatus::Created => println!("  - {}: created ({} variables)", file.file, file.variables),
      PullStatus::Overwritten => {
        println!("  - {}: overwritten ({} variables)", file.file, file.variables)
      }
      PullStatus::Skipped => println!(
        "  - {}: exists (skipped, use --overwrite to replace)",
        file.file
      ),
      PullStatus::Failed(reason) => eprintln!("  ! {}: {}", file.file, reason),
    }
  }

  println!("✅ Successfully pulled");

  Ok(())
}

fn list(root: &Path) -> Result<(), Box<dyn std::error::Error>> {
  let settings = settings(root, Overrides::default())?;
  let collection: Collection = settings.collector()?.collect_all(root);

  for failure in &collection.failures {
    eprintln!("  ! {}", failure);
  }

  if collection.is_empty() {
    println!("No .env files found");
    return Ok(());
  }

  println!("Environment variables to sync:\n");
  for (file, vars) in collection.by_file() {
    println!("{}:", file);
    for (key, value) in vars {
      println!("  {}={}", key, truncate(&value, LIST_VALUE_WIDTH));
    }
    println!();
  }

  Ok(())
}

fn truncate(value: &str, width: usize) -> String {
  if value.chars().count() <= width {
    return value.to_string();
  }
  let head: String = value.chars().take(width - 3).collect();
  format!("{}...", head)
}

fn init(root: &Path, project: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
  let mut config = Config::load(root)?;
  if project.is_some() {
    config.project_name = project;
  }

  let path = config.save(root)?;
  println!("Created {}", path.display());
  if let Some(name) = &config.project_name {
    println!("Project name: {}", name);
  }

  Ok(())
}

fn install_hook(root: &Path) -> Result<(), Box<dyn std::error::Error>> {
  let path = hook::install_pre_push(root)?;
  println!("✅ Git pre-push hook installed at {}", path.display());
  println!("Your .env files will now sync automatically before each push");
  Ok(())
}
