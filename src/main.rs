// ABOUTME: CLI entry point for revsync
// ABOUTME: Parses commands, loads configuration and routes to the sync library

use anyhow::Context;
use clap::{Parser, Subcommand};
use revsync::config::{CentralTarget, ConfigOverrides, SyncConfig};
use revsync::{CentralStore, ChangeSet, LocalStore, PgCentral, SqliteCentral};
use std::fs;
use std::path::{Path, PathBuf};
use tokio_postgres::Client;

#[derive(Parser)]
#[command(name = "revsync")]
#[command(about = "Revision-based bidirectional sync between SQLite clients and a central store", long_about = None)]
#[command(version)]
struct Cli {
    /// Allow self-signed TLS certificates (insecure - use only for testing)
    #[arg(
        long = "allow-self-signed-certs",
        global = true,
        default_value_t = false
    )]
    allow_self_signed_certs: bool,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log: Option<String>,
    /// Path to a revsync config.toml (default: ~/.revsync/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Connection attempts beyond the first when the central store is unreachable
    #[arg(long = "connect-retries", global = true)]
    connect_retries: Option<u32>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the pending local changes as a ChangeSet
    Collect {
        /// Local SQLite database
        #[arg(long, env = "REVSYNC_LOCAL_DB")]
        local: Option<PathBuf>,
        /// Write the ChangeSet here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Apply a ChangeSet received from the central store
    Apply {
        #[arg(long, env = "REVSYNC_LOCAL_DB")]
        local: Option<PathBuf>,
        /// ChangeSet JSON file
        #[arg(long)]
        input: PathBuf,
    },
    /// Run one central sync session for a client ChangeSet and emit the reply
    ServeSync {
        /// PostgreSQL URL or sqlite:<path>
        #[arg(long, env = "REVSYNC_CENTRAL_URL")]
        central: Option<String>,
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Run a full round: collect, sync with the central store, apply
    Sync {
        #[arg(long, env = "REVSYNC_LOCAL_DB")]
        local: Option<PathBuf>,
        #[arg(long, env = "REVSYNC_CENTRAL_URL")]
        central: Option<String>,
    },
    /// Show the local revision and pending changes
    Status {
        #[arg(long, env = "REVSYNC_LOCAL_DB")]
        local: Option<PathBuf>,
    },
}

impl Commands {
    fn overrides(&self) -> (Option<PathBuf>, Option<String>) {
        match self {
            Commands::Collect { local, .. }
            | Commands::Apply { local, .. }
            | Commands::Status { local } => (local.clone(), None),
            Commands::ServeSync { central, .. } => (None, central.clone()),
            Commands::Sync { local, central } => (local.clone(), central.clone()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (local_db, central_url) = cli.command.overrides();
    let config = SyncConfig::load(cli.config.as_deref())?.merge(ConfigOverrides {
        local_db,
        central_url,
        allow_self_signed_certs: cli.allow_self_signed_certs,
        connect_retries: cli.connect_retries,
        log: cli.log.clone(),
    });

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. Otherwise --log flag, then the config file, then "info"
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log.clone()));

    // Logs go to stderr so ChangeSets printed on stdout stay parseable
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    revsync::postgres::init_tls_policy(config.allow_self_signed_certs);

    match cli.command {
        Commands::Collect { output, .. } => {
            let local = LocalStore::open(config.require_local_db()?)?;
            let change_set = local.collect_changes()?;
            write_change_set(&change_set, output.as_deref())
        }
        Commands::Apply { input, .. } => {
            let change_set = read_change_set(&input)?;
            let mut local = LocalStore::open(config.require_local_db()?)?;
            local
                .apply_changes(&change_set)
                .with_context(|| format!("Failed to apply {}", input.display()))?;
            tracing::info!("Local store is now at revision {}", change_set.revision);
            Ok(())
        }
        Commands::ServeSync { input, output, .. } => {
            let incoming = read_change_set(&input)?;
            let target = config.require_central()?;
            let mut client = None;
            let mut central = open_central(&target, config.connect_retries, &mut client).await?;
            let reply = revsync::sync(central.as_mut(), &incoming)
                .await
                .with_context(|| format!("Sync session against {} failed", target.describe()))?;
            write_change_set(&reply, output.as_deref())
        }
        Commands::Sync { .. } => {
            let target = config.require_central()?;
            let mut local = LocalStore::open(config.require_local_db()?)?;
            let mut client = None;
            let mut central = open_central(&target, config.connect_retries, &mut client).await?;
            let stats = revsync::run_round(&mut local, central.as_mut())
                .await
                .with_context(|| format!("Sync round against {} failed", target.describe()))?;
            tracing::info!(
                "Round complete: central revision {} -> {}",
                stats.revision_before,
                stats.revision_after
            );
            for table in &stats.tables {
                tracing::info!(
                    "  {}: sent {} changes/{} deletes, received {} changes/{} deletes",
                    table.table,
                    table.incoming_changes,
                    table.incoming_deletes,
                    table.outgoing_changes,
                    table.outgoing_deletes
                );
            }
            Ok(())
        }
        Commands::Status { .. } => {
            let local = LocalStore::open(config.require_local_db()?)?;
            let status = local.status()?;
            let (changes, deletes) = local.collect_changes()?.counts();
            println!("Revision:        {}", status.revision);
            println!("Log entries:     {}", status.pending_entries);
            println!("Pending changes: {}", changes);
            println!("Pending deletes: {}", deletes);
            println!("Tracked tables:  {}", status.tracked_tables.join(", "));
            Ok(())
        }
    }
}

/// Open the configured central store. A PostgreSQL client is parked in
/// `client` so the returned store can borrow it.
async fn open_central<'a>(
    target: &CentralTarget,
    retries: u32,
    client: &'a mut Option<Client>,
) -> anyhow::Result<Box<dyn CentralStore + 'a>> {
    tracing::info!("Connecting to central store {}", target.describe());
    match target {
        CentralTarget::Postgres(url) => {
            let connected = revsync::postgres::connect_with_retry(url, retries).await?;
            let client: &'a Client = client.insert(connected);
            Ok(Box::new(PgCentral::new(client)))
        }
        CentralTarget::Sqlite(path) => {
            let store = SqliteCentral::open(path).with_context(|| {
                format!("Failed to open central store {}", path.display())
            })?;
            Ok(Box::new(store))
        }
    }
}

fn read_change_set(path: &Path) -> anyhow::Result<ChangeSet> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    ChangeSet::from_json(&contents)
        .with_context(|| format!("Failed to parse ChangeSet in {}", path.display()))
}

fn write_change_set(change_set: &ChangeSet, output: Option<&Path>) -> anyhow::Result<()> {
    let json = change_set
        .to_json_pretty()
        .context("Failed to serialize ChangeSet")?;
    match output {
        Some(path) => {
            fs::write(path, json + "\n")
                .with_context(|| format!("Failed to write {}", path.display()))?;
            let (changes, deletes) = change_set.counts();
            tracing::info!(
                "Wrote {} changes and {} deletes to {}",
                changes,
                deletes,
                path.display()
            );
        }
        None => println!("{}", json),
    }
    Ok(())
}
