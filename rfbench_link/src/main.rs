//! # rfbench Binary
//!
//! Command-line front end for the RF bench instrument link.
//!
//! # Usage
//!
//! ```bash
//! # Watch status samples from the simulated instrument
//! rfbench --simulate monitor
//!
//! # Same, as JSON lines
//! rfbench --simulate monitor --jsonl --count 10
//!
//! # One foreground command
//! rfbench --host 192.168.0.20 send "SOURce:FREQuency?"
//!
//! # Feed an axis (other fed axes are homed first)
//! rfbench --config /etc/rfbench/link.toml feed THETA
//!
//! # Route the RF path
//! rfbench link FEED_X_THETA
//! ```

use clap::{Parser, Subcommand};
use rfbench_common::axis::Axis;
use rfbench_common::compensation::parse_frequency_ghz;
use rfbench_common::config::{ConfigError, ConfigLoader};
use rfbench_common::consts::DEFAULT_CONFIG_PATH;
use rfbench_common::sample::StatusSample;
use rfbench_link::config::LinkConfig;
use rfbench_link::motion::OperationKind;
use rfbench_link::session::Session;
use rfbench_link::sim::SimInstrument;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Status reads before a simulated move settles.
const SIM_SETTLE_READS: u32 = 3;

/// rfbench - RF bench instrument link and motion control
#[derive(Parser, Debug)]
#[command(name = "rfbench")]
#[command(version)]
#[command(about = "Instrument link, status polling and motion control for the RF test bench")]
#[command(long_about = None)]
struct Args {
    /// Path to link configuration file (link.toml)
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Instrument host, overrides the configuration file
    #[arg(long)]
    host: Option<String>,

    /// Instrument port, overrides the configuration file
    #[arg(short, long)]
    port: Option<u16>,

    /// Start a simulated instrument on localhost and connect to it
    #[arg(short = 's', long)]
    simulate: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print status samples until Ctrl+C
    Monitor {
        /// One JSON object per sample
        #[arg(long)]
        jsonl: bool,

        /// Stop after this many samples
        #[arg(long)]
        count: Option<u64>,
    },
    /// Send one command and print the reply
    Send {
        /// Command text, e.g. "SOURce:POWer?"
        text: String,
    },
    /// Feed an axis and wait for confirmation
    Feed { axis: Axis },
    /// Home an axis and wait for confirmation
    Home { axis: Axis },
    /// Route the RF path (CONFigure:LINK)
    Link { name: String },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("rfbench failed: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    setup_tracing(&args);

    info!("rfbench v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = load_config(&args.config)?;
    if let Some(host) = &args.host {
        config.link.host = host.clone();
    }
    if let Some(port) = args.port {
        config.link.port = port;
    }

    let _sim = if args.simulate {
        let sim = SimInstrument::bind("127.0.0.1:0", SIM_SETTLE_READS).await?;
        info!("Simulation mode: instrument at {}", sim.local_addr());
        config.link.host = "127.0.0.1".to_string();
        config.link.port = sim.port();
        Some(sim)
    } else {
        None
    };
    config.validate()?;

    let session = Session::new(config);
    session.connect().await?;

    let result = match args.command {
        Command::Monitor { jsonl, count } => monitor(&session, jsonl, count).await,
        Command::Send { text } => {
            let reply = session.send_command(&text).await?;
            println!("{}", reply.text().unwrap_or("(no reply expected)"));
            Ok(())
        }
        Command::Feed { axis } => run_motion(&session, OperationKind::Feed, axis).await,
        Command::Home { axis } => run_motion(&session, OperationKind::Home, axis).await,
        Command::Link { name } => {
            session.configure_link(&name).await?;
            println!("Link routed to {}", name.trim());
            Ok(())
        }
    };

    session.shutdown().await;
    info!("rfbench shutdown complete");
    result
}

/// Load `path`, falling back to defaults when the file does not exist.
fn load_config(path: &Path) -> Result<LinkConfig, ConfigError> {
    match LinkConfig::load(path) {
        Ok(config) => {
            info!("Loaded configuration from {}", path.display());
            Ok(config)
        }
        Err(ConfigError::FileNotFound) => {
            warn!("{} not found, using default configuration", path.display());
            Ok(LinkConfig::default())
        }
        Err(e) => Err(e),
    }
}

async fn monitor(session: &Session, jsonl: bool, count: Option<u64>) -> Result<(), Box<dyn std::error::Error>> {
    let mut samples = session.subscribe_samples();
    let mut printed = 0u64;
    let mut freq_ghz = None;

    loop {
        if count.is_some_and(|limit| printed >= limit) {
            return Ok(());
        }
        let sample = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                return Ok(());
            }
            sample = samples.recv() => match sample {
                Ok(sample) => sample,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Monitor skipped {} samples", skipped);
                    continue;
                }
                Err(RecvError::Closed) => return Ok(()),
            },
        };

        if let Some(freq) = sample.source().frequency.as_deref().and_then(parse_frequency_ghz) {
            freq_ghz = Some(freq);
        }
        if jsonl {
            println!("{}", serde_json::to_string(&sample)?);
        } else {
            println!("{}", describe(session, &sample, freq_ghz));
        }
        printed += 1;
    }
}

fn describe(session: &Session, sample: &StatusSample, freq_ghz: Option<f64>) -> String {
    let axis = sample.axis();
    let field = |value: Option<&str>| value.unwrap_or("-").to_string();
    let (reach, home, speed) = match sample.readout(axis) {
        Some(r) => (field(r.reach.as_deref()), field(r.home.as_deref()), field(r.speed.as_deref())),
        None => ("-".to_string(), "-".to_string(), "-".to_string()),
    };

    let source = sample.source();
    let source_text = if let Some(freq) = source.frequency.as_deref() {
        format!("freq={freq}")
    } else if let Some(power) = source.power.as_deref() {
        let shown = freq_ghz.and_then(|f| session.display_power(power, f));
        format!("power={}", shown.unwrap_or_else(|| power.to_string()))
    } else {
        format!("rf={}", field(source.rf_output.as_deref()))
    };

    format!(
        "#{:<6} {:<5} reach={:<4} home={:<4} speed={:<6} {}  [{}]",
        sample.tick(),
        axis,
        reach,
        home,
        speed,
        source_text,
        session.motion_snapshot().status
    )
}

/// Request one operation and wait for its completion event.
async fn run_motion(session: &Session, kind: OperationKind, axis: Axis) -> Result<(), Box<dyn std::error::Error>> {
    let mut events = session.subscribe_operations();
    match kind {
        OperationKind::Feed => session.request_feed(axis)?,
        OperationKind::Home => session.request_home(axis)?,
    }
    info!("Requested {} {}", kind, axis);

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                return Ok(());
            }
            event = events.recv() => event?,
        };

        let verdict = if event.success() { "confirmed" } else { "FAILED" };
        println!("{} {}: {}", event.kind, event.axis, verdict);
        if event.axis == axis && event.kind == kind {
            return match event.error {
                Some(e) => Err(e.into()),
                None => Ok(()),
            };
        }
    }
}

/// Setup tracing subscriber based on CLI arguments.
fn setup_tracing(args: &Args) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
