use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{error, info, warn};

use tether_config::{load_config, load_file, logging, Config};
use tether_dap::{DapSession, SessionState, StreamTransport, Transport};

mod console;

use console::{ConsoleSubscriber, Outcome};

const USAGE: &str = "usage: tether [--config FILE | --config-dir DIR] [--project DIR] [HOST:PORT]";

/// How long to wait for the adapter to acknowledge `disconnect` on Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Parsed command line.
#[derive(Debug, Default, PartialEq)]
struct Args {
    config_file: Option<PathBuf>,
    config_dir: Option<PathBuf>,
    project_dir: Option<PathBuf>,
    address: Option<String>,
    help: bool,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut parsed = Args::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => parsed.help = true,
            "--config" => {
                parsed.config_file = Some(args.next().context("--config needs a file")?.into());
            }
            "--config-dir" => {
                parsed.config_dir =
                    Some(args.next().context("--config-dir needs a directory")?.into());
            }
            "--project" => {
                parsed.project_dir =
                    Some(args.next().context("--project needs a directory")?.into());
            }
            flag if flag.starts_with('-') => bail!("unknown option: {}\n{}", flag, USAGE),
            address => {
                if parsed.address.is_some() {
                    bail!("unexpected argument: {}\n{}", address, USAGE);
                }
                parsed.address = Some(address.to_string());
            }
        }
    }
    if parsed.config_file.is_some() && parsed.config_dir.is_some() {
        bail!("--config and --config-dir are mutually exclusive\n{}", USAGE);
    }
    Ok(parsed)
}

fn load(args: &Args) -> Result<Config> {
    if let Some(file) = &args.config_file {
        return load_file(file).with_context(|| format!("failed to load {}", file.display()));
    }
    let config_dir = args
        .config_dir
        .clone()
        .unwrap_or_else(logging::default_config_dir);
    let project_dir = args
        .project_dir
        .clone()
        .or_else(|| env::current_dir().ok());
    load_config(&config_dir, project_dir.as_deref())
        .with_context(|| format!("failed to load config from {}", config_dir.display()))
}

fn init_logging(config: &Config) -> Result<()> {
    let filter_str = config.log.level.as_filter();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter_str));

    match &config.log.file {
        Some(log_path) => {
            logging::prepare_log_file(log_path)
                .with_context(|| format!("failed to prepare log file {}", log_path.display()))?;
            let log_file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)
                .with_context(|| format!("failed to open log file {}", log_path.display()))?;
            tracing_subscriber::fmt()
                .with_writer(std::sync::Mutex::new(log_file))
                .with_ansi(false)
                .with_env_filter(env_filter)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_writer(std::io::stderr)
                .with_env_filter(env_filter)
                .init();
        }
    }

    info!("tether starting, log level: {}", filter_str);
    Ok(())
}

async fn run_session(config: Config, address: String) -> Result<()> {
    let options = config
        .session_options()
        .context("invalid launch configuration")?;

    let transport = StreamTransport::connect_tcp(address.as_str())
        .await
        .with_context(|| format!("failed to connect to debug adapter at {}", address))?;
    info!("connected to debug adapter at {}", address);
    let transport: Arc<dyn Transport> = Arc::new(transport);

    let session = DapSession::new(Arc::clone(&transport), options);
    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    session.subscribe(Arc::new(ConsoleSubscriber::new(done_tx)));

    session.start().context("failed to start debug session")?;
    session.initialize().context("failed to send initialize")?;

    let outcome = tokio::select! {
        outcome = done_rx.recv() => outcome.unwrap_or(Outcome::Disconnected),
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!("failed to listen for Ctrl-C: {}", e);
            }
            info!("interrupted, disconnecting");
            if matches!(session.state(), SessionState::Initializing | SessionState::Initialized) {
                if let Err(e) = session.disconnect(false) {
                    warn!("disconnect failed: {}", e);
                }
                let _ = tokio::time::timeout(SHUTDOWN_GRACE, done_rx.recv()).await;
            }
            Outcome::Disconnected
        }
    };

    if session.pending_requests() > 0 {
        warn!(
            "abandoning {} pending request(s)",
            session.pending_requests()
        );
    }
    session.close();

    match outcome {
        Outcome::Failed => bail!("debug session failed"),
        Outcome::Terminated | Outcome::Disconnected => {
            info!("tether exited cleanly");
            Ok(())
        }
    }
}

fn run(args: Args) -> Result<()> {
    let config = load(&args)?;
    init_logging(&config)?;

    let address = args
        .address
        .clone()
        .unwrap_or_else(|| config.adapter.address());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    let result = runtime.block_on(run_session(config, address));
    if let Err(e) = &result {
        error!("{:#}", e);
    }
    result
}

fn main() {
    let args = match parse_args(env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("tether: {:#}", e);
            std::process::exit(2);
        }
    };
    if args.help {
        println!("{}", USAGE);
        return;
    }

    if let Err(e) = run(args) {
        eprintln!("tether: {:#}", e);
        std::process::exit(1);
    }
}
