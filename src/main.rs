use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use stately::devtools::Tape;
use stately::runtime::event_loop;
use stately::{util, Config, ModuleDef, StateRuntime, TimeTravelFactory};

#[derive(Debug, Parser)]
#[command(name = "stately", version, about = "Reactive state modules with a time-travel mirror")]
struct Cli {
    /// Config file (defaults to ~/.stately/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (defaults to ~/.stately)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Append every dispatched devtools event to this JSONL tape
    #[arg(long, global = true)]
    tape: Option<PathBuf>,

    /// Tape to ~/.stately/tapes/events.jsonl unless --tape is given
    #[arg(long, global = true)]
    record: bool,

    /// Log to stderr at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log to ~/.stately/logs/stately.log instead of stderr
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Register a counter module and increment it
    Counter {
        #[arg(long, default_value_t = 3)]
        times: u32,
    },
    /// Print the action signatures recorded on a tape
    Replay { path: PathBuf },
}

fn init_logging(cli: &Cli) -> Result<()> {
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    if cli.log_file {
        fs::create_dir_all(util::logs_dir())?;
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(util::log_file_path())?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(log_file)
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let config = match &cli.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::load(),
    };
    let config = config.with_env_overrides();
    Ok(match (&cli.tape, cli.record) {
        (Some(path), _) => config.with_tape_path(path),
        (None, true) => config.with_tape_path(util::default_tape_path()),
        (None, false) => config,
    })
}

fn counter_def() -> ModuleDef {
    ModuleDef::new()
        .value("count", 0)
        .method("increment", |m, _| {
            let count: i64 = m.get_as("count")?;
            m.set("count", count + 1)?;
            Ok(Value::Null)
        })
}

async fn run_counter(config: Config, times: u32) -> Result<()> {
    let factory = TimeTravelFactory::new();
    let runtime = StateRuntime::builder()
        .config(config)
        .inspector(factory.clone())
        .build();
    let pump = event_loop::spawn_pump(runtime.clone(), event_loop::DEFAULT_TICK);

    let counter = runtime.register("counter", counter_def())?;
    for _ in 0..times {
        counter.call("increment", &[])?;
    }
    event_loop::settle(&runtime).await;
    pump.abort();

    let signatures: Vec<Value> = factory
        .last()
        .map(|inspector| {
            inspector
                .events()
                .iter()
                .map(|event| event["type"].clone())
                .collect()
        })
        .unwrap_or_default();
    let report = json!({
        "snapshot": counter.snapshot(),
        "actions": signatures,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_replay(path: &Path) -> Result<()> {
    let tape = Tape::read_jsonl_from_path(path)
        .with_context(|| format!("reading tape {}", path.display()))?;
    for signature in tape.signatures() {
        println!("{signature}");
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    util::init_data_dir(cli.data_dir.clone());
    init_logging(&cli)?;

    match &cli.command {
        Command::Counter { times } => {
            let config = load_config(&cli)?;
            let local = tokio::task::LocalSet::new();
            local.run_until(run_counter(config, *times)).await
        }
        Command::Replay { path } => run_replay(path),
    }
}
