//! titlewatch command line
//!
//! Every subcommand prints exactly one JSON value on stdout. Logs and error
//! details go to stderr (and optionally a log file), so stdout stays parseable
//! even when something fails.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use clap::error::ErrorKind;
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use titlewatch::automation::{
    AppConfig, ChatReader, DedupPolicy, Deduplicator, Dispatcher, EventSink, Runner, ShutdownFlag,
};
use titlewatch::capture::{
    Actuator, AdbDevice, CaptureDevice, DryRunActuator, FileDevice, RetryingCapture,
};
use titlewatch::detection::{classify, save_highlight};
use titlewatch::ocr::Tesseract;
use titlewatch::paths;

#[derive(Parser)]
#[command(name = "titlewatch", version, about = "Screen state and title request detection over adb")]
struct Cli {
    /// Also append logs to <data dir>/logs/titlewatch.log
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Classify one frame and print the state as JSON
    Classify {
        #[arg(long)]
        config: PathBuf,
        #[command(flatten)]
        source: Source,
    },
    /// Read the chat box of one frame and print the title requests as a JSON list
    ReadChat {
        #[arg(long)]
        config: PathBuf,
        #[command(flatten)]
        source: Source,
    },
    /// Run the polling loop until Ctrl+C (or --cycles) and print a summary
    Run {
        #[arg(long)]
        config: PathBuf,
        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<u64>,
        /// Log taps instead of sending them to the device
        #[arg(long)]
        dry_run: bool,
    },
    /// Load and validate a config, including every template image
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },
}

/// Where a one-shot command gets its frame. Defaults to the configured device.
#[derive(Args)]
#[group(multiple = false)]
struct Source {
    /// Read a saved screenshot instead of capturing
    #[arg(long)]
    screenshot: Option<PathBuf>,
    /// adb serial to capture from, overriding the config
    #[arg(long)]
    device: Option<String>,
}

fn init_logging(log_file: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    let file_layer = if log_file {
        paths::ensure_directories().context("Failed to create log directory")?;
        let path = paths::get_logs_dir().join("titlewatch.log");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

fn main() -> ExitCode {
    let args: Vec<OsString> = std::env::args_os().collect();
    let cli = match Cli::try_parse_from(&args) {
        Ok(cli) => cli,
        Err(e) => return usage_error(e, &args),
    };

    if let Err(e) = init_logging(cli.log_file) {
        eprintln!("{:#}", e);
    }

    // Panics are logged; `respond` still prints a JSON value
    panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!(" at {}:{}:{}", loc.file(), loc.line(), loc.column()))
            .unwrap_or_default();
        error!("panic{}: {}", location, panic_message(panic_info.payload()));
    }));

    match respond(Some(cli.command.name()), || execute(&cli.command)) {
        Ok(value) => {
            println!("{}", value);
            ExitCode::SUCCESS
        }
        Err(value) => {
            println!("{}", value);
            ExitCode::FAILURE
        }
    }
}

/// Bad arguments still leave one JSON value on stdout. Help and version
/// output are printed as clap formats them.
fn usage_error(err: clap::Error, args: &[OsString]) -> ExitCode {
    let _ = err.print();
    match err.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
        _ => {
            let rendered = err.to_string();
            let message = rendered.lines().next().unwrap_or("invalid arguments");
            println!("{}", failure_value(subcommand_in(args), message));
            ExitCode::from(2)
        }
    }
}

/// First argument naming a known subcommand.
fn subcommand_in(args: &[OsString]) -> Option<&'static str> {
    args.iter()
        .skip(1)
        .filter_map(|arg| arg.to_str())
        .find_map(|arg| Command::NAMES.iter().copied().find(|name| *name == arg))
}

/// What a failed command prints instead of its result.
fn failure_value(command: Option<&str>, message: &str) -> Value {
    match command {
        Some("read-chat") => json!([]),
        _ => json!({ "error": message }),
    }
}

/// Runs a command, turning errors and panics into its failure value.
fn respond<F>(command: Option<&str>, run: F) -> Result<Value, Value>
where
    F: FnOnce() -> Result<Value>,
{
    let outcome = panic::catch_unwind(AssertUnwindSafe(run))
        .unwrap_or_else(|payload| Err(anyhow!("internal error: {}", panic_message(&*payload))));

    outcome.map_err(|e| {
        let message = format!("{:#}", e);
        error!("{}", message);
        failure_value(command, &message)
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

impl Command {
    const NAMES: [&'static str; 4] = ["classify", "read-chat", "run", "check-config"];

    fn name(&self) -> &'static str {
        match self {
            Command::Classify { .. } => "classify",
            Command::ReadChat { .. } => "read-chat",
            Command::Run { .. } => "run",
            Command::CheckConfig { .. } => "check-config",
        }
    }
}

fn execute(command: &Command) -> Result<Value> {
    match command {
        Command::Classify { config, source } => cmd_classify(config, source),
        Command::ReadChat { config, source } => cmd_read_chat(config, source),
        Command::Run {
            config,
            cycles,
            dry_run,
        } => cmd_run(config, *cycles, *dry_run),
        Command::CheckConfig { config } => cmd_check_config(config),
    }
}

/// Opens the frame source for a one-shot command.
fn open_source(config: &AppConfig, source: &Source) -> Box<dyn CaptureDevice> {
    match (&source.screenshot, &source.device) {
        (Some(path), _) => Box::new(FileDevice::new(path.clone())),
        (None, serial) => {
            let serial = serial.clone().unwrap_or_else(|| config.device_id.clone());
            Box::new(RetryingCapture::new(adb_device(config, serial), config.capture_retry.clone()))
        }
    }
}

fn adb_device(config: &AppConfig, serial: String) -> AdbDevice {
    let device = AdbDevice::new(serial);
    match &config.adb_path {
        Some(adb) => device.with_adb(adb.clone()),
        None => device,
    }
}

fn cmd_classify(config_path: &Path, source: &Source) -> Result<Value> {
    let config = AppConfig::load(config_path)?;
    let library = config.load_library()?;
    let cascade = config.build_cascade(library)?;

    let mut device = open_source(&config, source);
    let frame = device.capture().context("Failed to capture frame")?;
    let state = classify(&frame, &cascade)?;

    if let (Some(dir), Some(matched)) = (&config.debug_annotations, &state.matched) {
        let path = save_highlight(dir, device.device_id(), &state.state, &frame, matched)?;
        info!(path = %path.display(), "debug image saved");
    }

    Ok(serde_json::to_value(&state)?)
}

fn cmd_read_chat(config_path: &Path, source: &Source) -> Result<Value> {
    let config = AppConfig::load(config_path)?;
    let chat = config
        .chat
        .as_ref()
        .ok_or_else(|| anyhow!("no chat section in {}", config_path.display()))?;
    let reader = ChatReader::new(Tesseract::locate()?, chat)?;

    let mut device = open_source(&config, source);
    let frame = device.capture().context("Failed to capture frame")?;

    // The same request can be visible twice in one chat box
    let mut dedup = Deduplicator::new(DedupPolicy::Unbounded);
    let events: Vec<_> = reader
        .read(&frame)?
        .into_iter()
        .filter(|event| dedup.accept(event))
        .collect();

    Ok(serde_json::to_value(&events)?)
}

fn cmd_run(config_path: &Path, cycles: Option<u64>, dry_run: bool) -> Result<Value> {
    let config = AppConfig::load(config_path)?;

    let adb = adb_device(&config, config.device_id.clone());
    let actuator: Box<dyn Actuator> = if dry_run {
        Box::new(DryRunActuator::default())
    } else {
        Box::new(adb.clone())
    };
    let sink: Box<dyn EventSink> = config
        .sink
        .build(&config.device_id)
        .context("Failed to set up event sink")?;

    let mut runner = Runner::new(
        RetryingCapture::new(adb, config.capture_retry.clone()),
        Dispatcher::new(actuator, sink),
        Deduplicator::new(config.dedup.policy),
        config.cycle.clone(),
    )
    .with_debug_dir(config.debug_annotations.clone());

    if config.cycle.classify {
        let library = config.load_library()?;
        runner = runner.with_cascade(config.build_cascade(library)?);
    }
    if config.cycle.read_chat {
        if let Some(chat) = &config.chat {
            let engine = Tesseract::locate().context("read_chat is enabled but tesseract is unavailable")?;
            runner = runner.with_chat(ChatReader::new(engine, chat)?);
        }
    }

    let shutdown = ShutdownFlag::new();
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, stopping after the current cycle");
        handler_flag.request();
    })
    .context("Failed to install Ctrl+C handler")?;

    let summary = runner.run(&shutdown, cycles);
    Ok(serde_json::to_value(&summary)?)
}

fn cmd_check_config(config_path: &Path) -> Result<Value> {
    let config = AppConfig::load(config_path)?;
    let library = config.load_library()?;
    let cascade = config.build_cascade(library.clone())?;
    let parser = config.event_parser()?;

    Ok(json!({
        "ok": true,
        "device": config.device_id,
        "resources_dir": config.resources_dir(),
        "templates": library.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
        "cascade": cascade.groups().iter().map(|g| g.name.as_str()).collect::<Vec<_>>(),
        "home_kingdom": parser.as_ref().map(|p| p.home_kingdom_digits()),
        "dedup": config.dedup.policy,
        "sink": config.sink,
    }))
}
