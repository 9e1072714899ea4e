//! The `run` command: start the agent and stay in the foreground.
//!
//! Flags override values from `config.ini`. While running, typing `q` or
//! `dqn` followed by Enter switches the recommendation algorithm, and
//! Ctrl+C (or `quit`) shuts the agent down gracefully.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, ValueEnum};
use sigil::agent::{AgentConfig, AgentHandle, PositionConfig, SigilAgent};
use sigil::config::{ConfigFile, ConfigKey};
use sigil::heatmap::{HeatmapDisplay, HeatmapPanel};
use sigil::logging::{default_log_file, init_logging, LoggingConfig};
use sigil::poller::TrackedPosition;
use sigil::recommendation::{Algorithm, AlgorithmSelector};
use sigil::reporter::SpeedDisplay;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::CliError;
use crate::notifier::ConsoleNotifier;

/// Recommendation algorithm selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq)]
pub enum AlgorithmArg {
    /// Tabular Q-learning recommendations
    #[value(alias = "q")]
    QLearning,
    /// Deep Q-network recommendations with predicted speeds
    Dqn,
}

impl From<AlgorithmArg> for Algorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::QLearning => Algorithm::QLearning,
            AlgorithmArg::Dqn => Algorithm::Dqn,
        }
    }
}

/// Arguments for `sigil run`.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Backend base URL (default from config, then http://localhost:5000)
    #[arg(long)]
    pub backend: Option<String>,

    /// Initial recommendation algorithm
    #[arg(long, value_enum)]
    pub algorithm: Option<AlgorithmArg>,

    /// Also write received heatmaps to this directory as PNG files
    #[arg(long)]
    pub heatmap_dir: Option<PathBuf>,

    /// Fixed device latitude
    #[arg(long, requires = "lon", allow_hyphen_values = true)]
    pub lat: Option<f64>,

    /// Fixed device longitude
    #[arg(long, requires = "lat", allow_hyphen_values = true)]
    pub lon: Option<f64>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Write logs to this file as well (rotated daily); pass without a value for the default location
    #[arg(long, num_args = 0..=1)]
    pub log_file: Option<Option<PathBuf>>,
}

/// Run the agent until interrupted.
pub fn run(args: RunArgs) -> Result<(), CliError> {
    let agent_config = resolve_config(ConfigFile::load()?, &args)?;

    let log_file = match args.log_file {
        Some(Some(path)) => Some(path),
        Some(None) => default_log_file(),
        None => None,
    };

    // Logging must be set up before the runtime exists (local offset lookup).
    let _log_guard = init_logging(&LoggingConfig {
        verbose: args.verbose,
        log_file,
    })?;

    println!("{}", console::style("Sigil telemetry agent").bold());
    println!("  Backend:   {}", agent_config.backend_url);
    println!("  Algorithm: {}", agent_config.algorithm);
    match &agent_config.position {
        PositionConfig::Fixed(coord) => println!("  Position:  {} (fixed)", coord),
        PositionConfig::GeoIp(url) => println!("  Position:  GeoIP via {}", url),
        PositionConfig::Unavailable => println!("  Position:  unavailable"),
    }
    if let Some(dir) = &agent_config.heatmap_output_dir {
        println!("  Heatmaps:  {}", dir.display());
    }
    println!();
    println!("Type 'q' or 'dqn' + Enter to switch algorithm. Press Ctrl+C to exit.");
    println!();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;

    runtime.block_on(run_agent(agent_config))
}

async fn run_agent(agent_config: AgentConfig) -> Result<(), CliError> {
    let handle = SigilAgent::new(agent_config)
        .with_notifier(Arc::new(ConsoleNotifier::default()))
        .start()?;
    let shutdown = handle.cancellation_token();

    let signal_token = shutdown.clone();
    ctrlc::set_handler(move || {
        println!();
        println!("Received shutdown signal, stopping...");
        signal_token.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    spawn_input_reader(handle.selector(), shutdown.clone());
    let status = tokio::spawn(print_status(
        StatusSources::from_handle(&handle),
        shutdown.clone(),
    ));

    shutdown.cancelled().await;
    handle.shutdown().await;
    let _ = status.await;

    println!("Agent stopped.");
    Ok(())
}

/// Apply command-line overrides with the same validation as `config set`.
fn resolve_config(mut config: ConfigFile, args: &RunArgs) -> Result<AgentConfig, CliError> {
    if let Some(backend) = &args.backend {
        ConfigKey::BackendUrl.set(&mut config, backend)?;
    }
    if let (Some(lat), Some(lon)) = (args.lat, args.lon) {
        ConfigKey::PositionLatitude.set(&mut config, &lat.to_string())?;
        ConfigKey::PositionLongitude.set(&mut config, &lon.to_string())?;
    }
    if let Some(algorithm) = args.algorithm {
        config.algorithm = algorithm.into();
    }
    if let Some(dir) = &args.heatmap_dir {
        config.heatmap_output_dir = Some(dir.clone());
    }
    Ok(config.to_agent_config())
}

/// Read algorithm switches from stdin on a plain thread.
///
/// The thread is not joined; it ends with the process.
fn spawn_input_reader(selector: AlgorithmSelector, shutdown: CancellationToken) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let input = line.trim();
            if input.is_empty() {
                continue;
            }
            if matches!(input, "quit" | "exit") {
                shutdown.cancel();
                break;
            }
            match input.parse::<Algorithm>() {
                Ok(algorithm) => {
                    if selector.select(algorithm) != algorithm {
                        println!("Switched to {}", algorithm);
                    }
                }
                Err(e) => println!("{}", e),
            }
            if shutdown.is_cancelled() {
                break;
            }
        }
        debug!("Input reader finished");
    });
}

struct StatusSources {
    speeds: SpeedDisplay,
    heatmaps: HeatmapDisplay,
    tracked: TrackedPosition,
}

impl StatusSources {
    fn from_handle(handle: &AgentHandle) -> Self {
        Self {
            speeds: handle.speeds(),
            heatmaps: handle.heatmaps(),
            tracked: handle.tracked_position(),
        }
    }
}

/// Print speed changes and heatmap arrivals until shutdown.
async fn print_status(sources: StatusSources, shutdown: CancellationToken) {
    let mut speeds = sources.speeds.subscribe();
    let mut heatmaps = sources.heatmaps.subscribe();
    let mut last_sample = speeds.borrow().sample;
    let mut last_board = heatmaps.borrow().clone();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            Ok(()) = speeds.changed() => {
                let reading = *speeds.borrow_and_update();
                if reading.sample != last_sample {
                    last_sample = reading.sample;
                    println!(
                        "Download: {}  Upload: {}  (tracked position {})",
                        reading.download_text(),
                        reading.upload_text(),
                        sources.tracked.get()
                    );
                }
            }

            Ok(()) = heatmaps.changed() => {
                let board = heatmaps.borrow_and_update().clone();
                for (label, before, after) in [
                    ("Upload", &last_board.upload, &board.upload),
                    ("Download", &last_board.download, &board.download),
                ] {
                    if before != after {
                        print_heatmap(label, after);
                    }
                }
                last_board = board;
            }

            else => break,
        }
    }

    info!("Status output stopped");
}

fn print_heatmap(label: &str, panel: &HeatmapPanel) {
    match panel.image() {
        Some(image) => match image.dimensions {
            Some((w, h)) => println!("{} heatmap updated ({}x{})", label, w, h),
            None => println!("{} heatmap updated ({} bytes)", label, image.data.len()),
        },
        None => println!("{} heatmap loading...", label),
    }
}
