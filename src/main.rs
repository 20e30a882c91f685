//! rollcall - minimal peer-discovery node
//!
//! Usage:
//!   rollcall [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>           Configuration file path
//!   -b, --bind <ADDR>             Bind address (default: 0.0.0.0:7400)
//!   -p, --port <PORT>             Listening port (overrides the bind port)
//!   -s, --seed <HOST:PORT>        Seed peer to join on startup
//!   --advertise-host <HOST>       Host other nodes use to reach us
//!   -w, --workers <N>             Number of worker threads (default: CPU count)
//!   -l, --log-level               Log level (error, warn, info, debug, trace)
//!   -h, --help                    Print help

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use rollcall::config::Config;
use rollcall::Node;

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// rollcall - minimal peer-discovery node
#[derive(Parser, Debug)]
#[command(name = "rollcall")]
#[command(author = "Rollcall Contributors")]
#[command(version)]
#[command(about = "Minimal peer-discovery node with seed bootstrap")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP bind address for handshakes
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Listening port (overrides the port of the bind address)
    #[arg(short, long)]
    port: Option<u16>,

    /// Seed peer to join on startup (host:port)
    #[arg(short, long)]
    seed: Option<String>,

    /// Host advertised to other nodes
    #[arg(long)]
    advertise_host: Option<String>,

    /// Number of worker threads (0 = auto)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise defaults plus env overrides
    let loaded = match &args.config {
        Some(path) => Config::load(path),
        None => Config::from_env(),
    };
    let mut config = match loaded {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading config: {}", e);
            std::process::exit(1);
        }
    };

    // Setup logging - CLI overrides config, config overrides default (info)
    let log_level = args.log_level.unwrap_or_else(|| {
        match config.log.level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    });

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    // CLI args override file config
    if let Some(bind) = args.bind {
        config.node.bind = bind;
    }
    if let Some(port) = args.port {
        config.node.bind.set_port(port);
    }
    if let Some(seed) = args.seed {
        config.node.seed = Some(seed);
    }
    if let Some(host) = args.advertise_host {
        config.node.advertise_host = Some(host);
    }
    if let Some(workers) = args.workers {
        config.node.workers = workers;
    }
    if let Err(e) = config.validate() {
        eprintln!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let node_config = config.node;
    let workers = node_config.worker_threads();

    info!("Starting rollcall node");
    info!("  Bind address: {}", node_config.bind);
    info!("  Workers: {}", workers);
    match &node_config.seed {
        Some(seed) => info!("  Seed: {}", seed),
        None => info!("  Seed: none (lone node)"),
    }
    info!("  Handshake timeout: {:?}", node_config.handshake_timeout);
    info!("  Report interval: {:?}", node_config.report_interval);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .thread_name("rollcall-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let node = match Node::start(node_config).await {
            Ok(node) => node,
            Err(e) => {
                error!("Node failed to start: {}", e);
                return Err(e);
            }
        };

        node.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Interrupted while waiting for shutdown signal: {}", e);
            }
        })
        .await;

        Ok(())
    })?;

    Ok(())
}
