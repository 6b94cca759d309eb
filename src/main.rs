use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use catena_agent::AgentRegistry;
use catena_chain::Chain;
use catena_config::ChainDef;
use catena_engine::{ChainEngine, ChannelNotifier, EngineConfig};
use catena_store::{ExecutionStatus, ExecutionStore, SqliteStore};

/// Catena - runs chains of AI agents
#[derive(Parser)]
#[command(name = "catena")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.catena)
  #[arg(long, global = true, env = "CATENA_DATA_DIR")]
  data_dir: Option<PathBuf>,

  /// Path to the execution database (default: <data-dir>/catena.db)
  #[arg(long, global = true)]
  db: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Validate a chain definition and print its topology
  Validate {
    /// Path to the chain file (JSON)
    chain_file: PathBuf,
  },

  /// Run a chain with a JSON input read from stdin
  Run {
    /// Path to the chain file (JSON)
    chain_file: PathBuf,
  },

  /// Show a stored execution
  Status {
    /// The execution id printed by `run`
    execution_id: String,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("catena=info,warn")),
    )
    .with_writer(io::stderr)
    .init();

  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".catena"),
  };
  let db_path = cli.db.unwrap_or_else(|| data_dir.join("catena.db"));

  match cli.command {
    Some(Commands::Validate { chain_file }) => validate(&chain_file),
    Some(Commands::Run { chain_file }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run_chain(chain_file, db_path))
    }
    Some(Commands::Status { execution_id }) => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(show_status(execution_id, db_path))
    }
    None => {
      println!("catena - use --help to see available commands");
      Ok(())
    }
  }
}

fn read_chain(chain_file: &Path) -> Result<ChainDef> {
  let content = std::fs::read_to_string(chain_file)
    .with_context(|| format!("failed to read chain file: {}", chain_file.display()))?;

  ChainDef::from_json(&content)
    .with_context(|| format!("failed to parse chain file: {}", chain_file.display()))
}

fn validate(chain_file: &Path) -> Result<()> {
  let chain = Chain::lock(read_chain(chain_file)?).context("invalid chain definition")?;

  println!(
    "{} (v{}) - {:?}, {:?}",
    chain.name, chain.version, chain.execution_mode, chain.failure_policy
  );
  for step in chain.steps() {
    let after = if step.predecessors.is_empty() {
      "input".to_string()
    } else {
      step.predecessors.join(", ")
    };
    match &step.condition {
      Some(condition) => println!("  {} [{}] <- {} when {}", step.name, step.agent, after, condition),
      None => println!("  {} [{}] <- {}", step.name, step.agent, after),
    }
  }
  for warning in chain.warnings() {
    println!("warning: {}", warning);
  }

  Ok(())
}

async fn open_store(db_path: &Path) -> Result<SqliteStore> {
  if let Some(parent) = db_path.parent() {
    tokio::fs::create_dir_all(parent)
      .await
      .with_context(|| format!("failed to create data directory: {}", parent.display()))?;
  }

  SqliteStore::open(&format!("sqlite://{}", db_path.display()))
    .await
    .with_context(|| format!("failed to open execution store: {}", db_path.display()))
}

async fn run_chain(chain_file: PathBuf, db_path: PathBuf) -> Result<()> {
  let def = read_chain(&chain_file)?;
  eprintln!("Loaded chain: {}", def.name);

  let input = read_input_from_stdin()?;
  let store = Arc::new(open_store(&db_path).await?);

  let (tx, mut rx) = mpsc::unbounded_channel();
  let engine = ChainEngine::with_notifier(
    store,
    Arc::new(AgentRegistry::with_builtins()),
    EngineConfig::default(),
    ChannelNotifier::new(tx),
  );

  let printer = tokio::spawn(async move {
    while let Some(event) = rx.recv().await {
      let finished = event.is_finished();
      if let Ok(line) = serde_json::to_string(&event) {
        eprintln!("{}", line);
      }
      if finished {
        break;
      }
    }
  });

  let execution_id = engine
    .start(def, input)
    .await
    .context("failed to start chain")?;
  eprintln!("Execution: {}", execution_id);

  let execution = tokio::select! {
    result = engine.wait(&execution_id) => result?,
    _ = tokio::signal::ctrl_c() => {
      warn!(execution_id = %execution_id, "interrupted, cancelling");
      engine.cancel(&execution_id).await?;
      engine.wait(&execution_id).await?
    }
  };
  let _ = printer.await;

  let stored = engine.load(&execution_id).await?;
  println!("{}", serde_json::to_string_pretty(&stored)?);

  if execution.status != ExecutionStatus::Completed {
    bail!("execution {} ended {:?}", execution_id, execution.status);
  }
  Ok(())
}

async fn show_status(execution_id: String, db_path: PathBuf) -> Result<()> {
  let store = open_store(&db_path).await?;
  let stored = store
    .load_execution(&execution_id)
    .await
    .with_context(|| format!("failed to load execution {}", execution_id))?;

  println!("{}", serde_json::to_string_pretty(&stored)?);
  Ok(())
}

fn read_input_from_stdin() -> Result<serde_json::Value> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    return Ok(serde_json::json!({}));
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read chain input from stdin")?;

  if input.trim().is_empty() {
    Ok(serde_json::json!({}))
  } else {
    serde_json::from_str(&input).context("failed to parse chain input JSON from stdin")
  }
}
