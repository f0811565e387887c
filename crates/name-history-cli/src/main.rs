use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use name_history_core::{
    merge_all, BatchConfig, BatchDriver, BatchEvent, Identifier, Snapshot, StoreErrorPolicy,
};
use name_history_store_sqlite::SqliteHistoryStore;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "nh")]
#[command(about = "Name history snapshot synchronizer")]
struct Cli {
    #[arg(long, global = true, default_value = "./names.sqlite3")]
    db: PathBuf,

    /// Enable debug logging.
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fill empty identifier histories from snapshot files.
    Sync(SyncArgs),
    /// Merge snapshot files into one snapshot file.
    Merge(MergeArgs),
    /// Print the stored history of one identifier.
    History(HistoryArgs),
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    Stats,
    /// List every identifier with stored history.
    Identifiers,
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct SyncArgs {
    /// Source tag written on every inserted row.
    #[arg(short, long)]
    source: Option<i64>,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum)]
    on_store_error: Option<StoreErrorPolicyArg>,
    #[arg(long, default_value_t = false)]
    merge_inputs: bool,
    #[arg(long, default_value_t = false)]
    quiet: bool,
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct MergeArgs {
    #[arg(long)]
    out: PathBuf,
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

#[derive(Debug, Args)]
struct HistoryArgs {
    uuid: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StoreErrorPolicyArg {
    Halt,
    SkipIdentifier,
}

impl From<StoreErrorPolicyArg> for StoreErrorPolicy {
    fn from(value: StoreErrorPolicyArg) -> Self {
        match value {
            StoreErrorPolicyArg::Halt => Self::Halt,
            StoreErrorPolicyArg::SkipIdentifier => Self::SkipIdentifier,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Sync(args) => run_sync(&cli.db, &args),
        Command::Merge(args) => run_merge(&args),
        Command::History(args) => run_history(&cli.db, &args),
        Command::Db { command } => run_db(&cli.db, &command),
    }
}

fn load_config(path: Option<&Path>) -> Result<BatchConfig> {
    let Some(path) = path else {
        return Ok(BatchConfig::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_config(args: &SyncArgs) -> Result<BatchConfig> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(source) = args.source {
        config.source = source;
    }
    if let Some(policy) = args.on_store_error {
        config.on_store_error = policy.into();
    }
    if args.merge_inputs {
        config.merge_inputs = true;
    }
    Ok(config)
}

fn print_progress(event: BatchEvent<'_>) {
    match event {
        BatchEvent::InputStarted { input, total } => eprintln!("got data @{input}: {total}"),
        BatchEvent::IdentifierSynced(progress) => {
            eprintln!("finished {:.2}%: {}", progress.percent(), progress.identifier);
        }
    }
}

fn run_sync(db: &Path, args: &SyncArgs) -> Result<()> {
    let config = resolve_config(args)?;
    tracing::debug!(?config, db = %db.display(), "resolved sync configuration");
    let mut store = SqliteHistoryStore::open(db)?;

    let report = {
        let mut driver = BatchDriver::new(&mut store, config);
        let mut progress = |event: BatchEvent<'_>| {
            if !args.quiet {
                print_progress(event);
            }
        };
        driver.run_paths(&args.inputs, &mut progress)?
    };
    store.close()?;

    emit_json(serde_json::json!({
        "source": report.source,
        "inputs": report.inputs,
        "inserted_identifiers": report.inserted_identifiers(),
        "inserted_rows": report.inserted_rows(),
        "skipped_identifiers": report.skipped_identifiers(),
        "failed_identifiers": report.failed_identifiers()
    }))
}

fn run_merge(args: &MergeArgs) -> Result<()> {
    let snapshots = args
        .inputs
        .iter()
        .map(|path| Snapshot::load(path))
        .collect::<Result<Vec<_>, _>>()?;
    let merged = merge_all(snapshots);

    let file = File::create(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer(&mut writer, &merged)
        .with_context(|| format!("failed to write merged snapshot to {}", args.out.display()))?;
    writer.flush().with_context(|| format!("failed to flush {}", args.out.display()))?;

    emit_json(serde_json::json!({
        "out": args.out,
        "inputs": args.inputs.len(),
        "identifiers": merged.len()
    }))
}

fn run_history(db: &Path, args: &HistoryArgs) -> Result<()> {
    let identifier = Identifier::parse(&args.uuid)?;
    let store = SqliteHistoryStore::open_existing(db)?;
    let history = store.name_history(&identifier)?;

    emit_json(serde_json::json!({
        "uuid": identifier,
        "names": history
    }))
}

fn run_db(db: &Path, command: &DbCommand) -> Result<()> {
    let store = SqliteHistoryStore::open_existing(db)?;
    match command {
        DbCommand::Stats => emit_json(serde_json::to_value(store.stats()?)?),
        DbCommand::Identifiers => {
            let identifiers = store.identifiers()?;
            emit_json(serde_json::json!({
                "count": identifiers.len(),
                "identifiers": identifiers
            }))
        }
        DbCommand::IntegrityCheck => {
            let report = store.integrity_check()?;
            emit_json(serde_json::json!({
                "quick_check_ok": report.quick_check_ok,
                "quick_check_message": report.quick_check_message,
                "ok": report.quick_check_ok
            }))
        }
    }
}
