//! tn-node: store-and-forward telemetry node.
//!
//! Entry point for the node runtime:
//! - `run` cycles until the battery gate shuts the node down
//! - `cycle` and `drain` run a single step for bench work and cron
//! - `status` and `check` inspect the queue volume and the configuration

use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tn_common::{OutputFormat, RecordId};
use tn_config::{resolve_config, ConfigError, ConfigPath, NodeConfig};
use tn_core::exit_codes::ExitCode;
use tn_core::logging::{event_names, init_logging, LogConfig, LogFormat, LogLevel};
use tn_core::{
    BatteryGate, ControllerSettings, CycleEventType, CycleOutcome, CycleStatus, HttpTransport,
    NoWait, OfflineTransport, RetryController, SensorSampler, SimulatedSource, Sleeper,
    ThreadSleeper, Transport,
};
use tn_queue::{QueueStore, RecordStatus, Schema, StoreError};

/// Telenode - durable store-and-forward telemetry node
#[derive(Parser)]
#[command(name = "tn-node")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Global options available to all commands
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Path to node.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the storage volume from the config
    #[arg(long, global = true, env = "TELENODE_VOLUME")]
    volume: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "text")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log format on stderr (human, jsonl)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Cycle until the battery gate shuts the node down
    Run(RunArgs),

    /// Run one operating cycle: drain, sample, queue, send
    Cycle(RuntimeArgs),

    /// Drain the pending backlog without sampling
    Drain(RuntimeArgs),

    /// Show queue state on the storage volume
    Status(StatusArgs),

    /// Validate configuration and storage
    Check,

    /// Configuration management
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
struct RuntimeArgs {
    /// Never contact the backend; every submission fails
    #[arg(long)]
    offline: bool,

    /// Seed the simulated probe for reproducible readings
    #[arg(long)]
    seed: Option<u64>,

    /// Skip sleeps between accumulation rounds and cycles
    #[arg(long)]
    no_wait: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    runtime: RuntimeArgs,

    /// Stop after this many cycles
    #[arg(long)]
    cycles: Option<u64>,
}

#[derive(Args, Debug)]
struct StatusArgs {
    /// Report which log holds this record id
    #[arg(long)]
    id: Option<u32>,

    /// Include the raw pending and sent lines
    #[arg(long)]
    lines: bool,
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Print where the configuration was found
    Path,
    /// Print the built-in default configuration
    Default,
}

type NodeController =
    RetryController<SensorSampler<SimulatedSource>, Box<dyn Transport>, BatteryGate, Box<dyn Sleeper>>;

// ============================================================================
// Main entry point
// ============================================================================

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version also arrive here and are not failures.
            let code = if e.use_stderr() {
                ExitCode::ArgsError
            } else {
                ExitCode::Clean
            };
            let _ = e.print();
            std::process::exit(code.as_i32());
        }
    };

    let cli_level = if cli.global.quiet {
        Some(LogLevel::Error)
    } else {
        match cli.global.verbose {
            0 => None,
            1 => Some(LogLevel::Debug),
            _ => Some(LogLevel::Trace),
        }
    };
    init_logging(&LogConfig::from_env(cli_level, cli.global.log_format));

    let exit_code = match &cli.command {
        Commands::Run(args) => run_node(&cli.global, args),
        Commands::Cycle(args) => run_cycle(&cli.global, args),
        Commands::Drain(args) => run_drain(&cli.global, args),
        Commands::Status(args) => run_status(&cli.global, args),
        Commands::Check => run_check(&cli.global),
        Commands::Config(args) => run_config(&cli.global, args),
    };

    std::process::exit(exit_code.as_i32());
}

// ============================================================================
// Setup
// ============================================================================

/// Resolve and load the config, applying the `--volume` override.
fn load_config(global: &GlobalOpts) -> Result<(NodeConfig, ConfigPath), ConfigError> {
    let resolved = resolve_config(global.config.as_deref());
    let mut config = NodeConfig::load(&resolved)?;
    if let Some(volume) = &global.volume {
        config.storage.volume = volume.clone();
    }
    tracing::info!(
        event = event_names::CONFIG_LOADED,
        source = %resolved.source,
        volume = %config.storage.volume.display(),
        "config loaded"
    );
    Ok((config, resolved))
}

fn build_controller(config: &NodeConfig, args: &RuntimeArgs) -> NodeController {
    let store = QueueStore::open(&config.storage);
    let schema = Schema::from_sensors(&config.sensors);
    let source = match args.seed {
        Some(seed) => SimulatedSource::seeded(seed),
        None => SimulatedSource::new(),
    };
    let sampler = SensorSampler::new(source, config.sensors.clone());
    let transport: Box<dyn Transport> = if args.offline {
        Box::new(OfflineTransport)
    } else {
        Box::new(HttpTransport::new(&config.transport))
    };
    let sleeper: Box<dyn Sleeper> = if args.no_wait {
        Box::new(NoWait)
    } else {
        Box::new(ThreadSleeper)
    };

    RetryController::new(
        store,
        schema,
        ControllerSettings::from_config(config),
        config.operating,
        sampler,
        transport,
        BatteryGate::from_config(&config.power),
        sleeper,
    )
}

/// Exit code for a finished cycle.
fn outcome_exit_code(outcome: &CycleOutcome) -> ExitCode {
    if outcome.status == CycleStatus::Shutdown {
        return ExitCode::Shutdown;
    }
    if !outcome.storage_available {
        return ExitCode::StorageUnavailable;
    }
    match outcome.pending {
        None => ExitCode::IoError,
        Some(0) if !outcome.deferred => ExitCode::Clean,
        Some(_) => ExitCode::Deferred,
    }
}

// ============================================================================
// Command implementations
// ============================================================================

fn run_node(global: &GlobalOpts, args: &RunArgs) -> ExitCode {
    let (config, _) = match load_config(global) {
        Ok(loaded) => loaded,
        Err(e) => return output_config_error(global, &e),
    };
    let mut controller = build_controller(&config, &args.runtime);
    if !controller.store().is_available() {
        tracing::warn!(
            volume = %config.storage.volume.display(),
            "storage volume not mounted, cycling without persistence"
        );
    }

    let summary = controller.run(args.cycles);
    let pending = controller.store().count_pending().ok();
    let exit_code = if summary.shutdown {
        ExitCode::Shutdown
    } else if !controller.store().is_available() {
        ExitCode::StorageUnavailable
    } else {
        match pending {
            Some(0) => ExitCode::Clean,
            Some(_) => ExitCode::Deferred,
            None => ExitCode::IoError,
        }
    };

    match global.format {
        OutputFormat::Json => print_json(&json!({
            "command": "run",
            "device_id": config.device_id,
            "summary": summary,
            "pending": pending,
            "params": controller.params(),
            "exit_code": exit_code.code_name(),
        })),
        OutputFormat::Text => {
            println!("cycles:   {}", summary.cycles);
            println!("queued:   {}", summary.queued);
            println!("promoted: {}", summary.promoted);
            println!("pending:  {}", display_count(pending));
            println!("shutdown: {}", summary.shutdown);
        }
    }
    exit_code
}

fn run_cycle(global: &GlobalOpts, args: &RuntimeArgs) -> ExitCode {
    let (config, _) = match load_config(global) {
        Ok(loaded) => loaded,
        Err(e) => return output_config_error(global, &e),
    };
    let mut controller = build_controller(&config, args);
    let outcome = controller.run_cycle();
    output_outcome(global, "cycle", &outcome)
}

fn run_drain(global: &GlobalOpts, args: &RuntimeArgs) -> ExitCode {
    let (config, _) = match load_config(global) {
        Ok(loaded) => loaded,
        Err(e) => return output_config_error(global, &e),
    };
    let mut controller = build_controller(&config, args);
    let outcome = controller.drain_only();
    output_outcome(global, "drain", &outcome)
}

fn output_outcome(global: &GlobalOpts, command: &str, outcome: &CycleOutcome) -> ExitCode {
    let exit_code = outcome_exit_code(outcome);
    match global.format {
        OutputFormat::Json => print_json(&json!({
            "command": command,
            "outcome": outcome,
            "exit_code": exit_code.code_name(),
        })),
        OutputFormat::Text => {
            println!("status:    {:?}", outcome.status);
            println!("storage:   {}", if outcome.storage_available { "mounted" } else { "unavailable" });
            println!("attempts:  {}", outcome.attempts);
            println!("promoted:  {}", outcome.promoted);
            println!("discarded: {}", outcome.discarded);
            println!("deferred:  {}", outcome.deferred);
            if let Some(id) = outcome.queued {
                println!("queued:    {} (sent immediately: {})", id, outcome.immediate_sent);
            }
            println!("pending:   {}", display_count(outcome.pending));
            println!(
                "params:    period_ms={} accumulation={}",
                outcome.params.period_ms, outcome.params.accumulation
            );
            for event in outcome
                .events
                .iter()
                .filter(|e| e.event_type != CycleEventType::Promoted)
            {
                println!("  {}: {}", event.event_type.event_name(), event.detail);
            }
        }
    }
    exit_code
}

fn run_status(global: &GlobalOpts, args: &StatusArgs) -> ExitCode {
    let (config, _) = match load_config(global) {
        Ok(loaded) => loaded,
        Err(e) => return output_config_error(global, &e),
    };
    let store = QueueStore::open(&config.storage);
    if !store.is_available() {
        return output_storage_unavailable(global, &config);
    }

    let state = match read_queue_state(&store, args) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(event = event_names::STORAGE_FAILED, error = %e, "cannot read queue state");
            output_error(global, "status", &e.to_string());
            return ExitCode::IoError;
        }
    };
    let QueueState {
        pending,
        sent,
        last_id,
        oldest,
        record,
        lines,
    } = state;

    match global.format {
        OutputFormat::Json => {
            let mut report = json!({
                "command": "status",
                "device_id": config.device_id,
                "volume": store.volume().display().to_string(),
                "pending": pending,
                "sent": sent,
                "last_record_id": last_id,
                "oldest_pending": oldest,
            });
            if let Some((id, status)) = &record {
                report["record"] = json!({ "id": id, "status": status });
            }
            if let Some((pending_lines, sent_lines)) = &lines {
                report["pending_lines"] = json!(pending_lines);
                report["sent_lines"] = json!(sent_lines);
            }
            print_json(&report);
        }
        OutputFormat::Text => {
            println!("volume:         {}", store.volume().display());
            println!("pending:        {}", pending);
            println!("sent:           {}", sent);
            println!("last record id: {}", last_id);
            if let Some(oldest) = &oldest {
                println!("oldest pending: {}", oldest);
            }
            if let Some((id, status)) = &record {
                let status = match status {
                    Some(RecordStatus::Pending) => "pending",
                    Some(RecordStatus::Sent) => "sent",
                    None => "unknown",
                };
                println!("record {}:     {}", id, status);
            }
            if let Some((pending_lines, sent_lines)) = &lines {
                println!("--- pending");
                pending_lines.iter().for_each(|l| println!("{}", l));
                println!("--- sent");
                sent_lines.iter().for_each(|l| println!("{}", l));
            }
        }
    }
    ExitCode::Clean
}

/// Queue state shown by `status`.
struct QueueState {
    pending: usize,
    sent: usize,
    last_id: u32,
    oldest: Option<String>,
    record: Option<(u32, Option<RecordStatus>)>,
    lines: Option<(Vec<String>, Vec<String>)>,
}

fn read_queue_state(store: &QueueStore, args: &StatusArgs) -> Result<QueueState, StoreError> {
    let record = match args.id {
        Some(id) => Some((id, store.status_of(RecordId(id))?)),
        None => None,
    };
    let lines = if args.lines {
        Some((store.pending_lines()?, store.sent_lines()?))
    } else {
        None
    };
    Ok(QueueState {
        pending: store.count_pending()?,
        sent: store.count_sent()?,
        last_id: store.last_record_id()?,
        oldest: store.peek_oldest_pending()?,
        record,
        lines,
    })
}

fn run_check(global: &GlobalOpts) -> ExitCode {
    let mut results: Vec<serde_json::Value> = Vec::new();

    let config = match load_config(global) {
        Ok((config, resolved)) => {
            results.push(json!({
                "check": "config",
                "status": "ok",
                "source": resolved.source.to_string(),
                "path": resolved.path.as_ref().map(|p| p.display().to_string()),
            }));
            config
        }
        Err(e) => {
            results.push(json!({
                "check": "config",
                "status": "error",
                "error": e.to_string(),
            }));
            print_checks(global, &results);
            return ExitCode::ConfigError;
        }
    };

    let store = QueueStore::open(&config.storage);
    let storage_ok = store.is_available();
    let recovery = if storage_ok { store.recover().ok() } else { None };
    results.push(json!({
        "check": "storage",
        "status": if storage_ok { "ok" } else { "error" },
        "volume": config.storage.volume.display().to_string(),
        "recovery": recovery,
    }));
    results.push(json!({
        "check": "transport",
        "status": "ok",
        "endpoint": config.transport.endpoint,
        "timeout_ms": config.transport.timeout_ms,
    }));
    results.push(json!({
        "check": "sensors",
        "status": "ok",
        "fields": Schema::from_sensors(&config.sensors).names().collect::<Vec<_>>(),
    }));

    print_checks(global, &results);
    if storage_ok {
        ExitCode::Clean
    } else {
        ExitCode::StorageUnavailable
    }
}

fn print_checks(global: &GlobalOpts, results: &[serde_json::Value]) {
    match global.format {
        OutputFormat::Json => print_json(&json!({ "command": "check", "checks": results })),
        OutputFormat::Text => {
            for result in results {
                let name = result["check"].as_str().unwrap_or("?");
                let status = result["status"].as_str().unwrap_or("?");
                match result["error"].as_str() {
                    Some(error) => println!("{:<10} {} ({})", name, status, error),
                    None => println!("{:<10} {}", name, status),
                }
            }
        }
    }
}

fn run_config(global: &GlobalOpts, args: &ConfigArgs) -> ExitCode {
    match args.command {
        ConfigCommands::Show => match load_config(global) {
            Ok((config, _)) => {
                print_json(&config);
                ExitCode::Clean
            }
            Err(e) => output_config_error(global, &e),
        },
        ConfigCommands::Path => {
            let resolved = resolve_config(global.config.as_deref());
            match global.format {
                OutputFormat::Json => print_json(&json!({
                    "path": resolved.path.as_ref().map(|p| p.display().to_string()),
                    "source": resolved.source.to_string(),
                })),
                OutputFormat::Text => match &resolved.path {
                    Some(path) => println!("{} ({})", path.display(), resolved.source),
                    None => println!("(none, {})", resolved.source),
                },
            }
            ExitCode::Clean
        }
        ConfigCommands::Default => {
            print_json(&NodeConfig::default());
            ExitCode::Clean
        }
    }
}

// ============================================================================
// Output helpers
// ============================================================================

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => tracing::error!(error = %e, "failed to serialize output"),
    }
}

fn display_count(count: Option<usize>) -> String {
    count.map(|n| n.to_string()).unwrap_or_else(|| "?".to_string())
}

fn output_error(global: &GlobalOpts, command: &str, message: &str) {
    match global.format {
        OutputFormat::Json => print_json(&json!({
            "command": command,
            "error": message,
        })),
        OutputFormat::Text => eprintln!("tn-node {}: {}", command, message),
    }
}

fn output_config_error(global: &GlobalOpts, err: &ConfigError) -> ExitCode {
    tracing::error!(event = event_names::CONFIG_ERROR, error = %err, "config error");
    output_error(global, "config", &err.to_string());
    ExitCode::ConfigError
}

fn output_storage_unavailable(global: &GlobalOpts, config: &NodeConfig) -> ExitCode {
    output_error(
        global,
        "storage",
        &format!("volume not mounted: {}", config.storage.volume.display()),
    );
    ExitCode::StorageUnavailable
}
