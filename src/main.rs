use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use txgate::clock::{Clock, HighWaterClock, SystemClock};
use txgate::config::{LoggingConfig, TxGateConfig};
use txgate::input::{process_line, spawn_line_reader};
use txgate::ratelimit::{OutOfOrderPolicy, RateLimiter, Sweeper};

/// Sliding-window admission control over a stream of `key [timestamp]` lines.
#[derive(Debug, Parser)]
#[command(name = "txgate", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum admitted events per key per window
    #[arg(long)]
    max_events: Option<u64>,

    /// Window width, in the unit of the input timestamps
    #[arg(long, allow_negative_numbers = true)]
    window_seconds: Option<i64>,

    /// Handling of out-of-order timestamps: reject or accept
    #[arg(long)]
    out_of_order: Option<OutOfOrderPolicy>,

    /// Seconds between idle-key sweeps
    #[arg(long)]
    sweep_interval_secs: Option<u64>,

    /// Disable the idle-key sweeper
    #[arg(long)]
    no_sweep: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn apply(&self, config: &mut TxGateConfig) {
        if let Some(max_events) = self.max_events {
            config.limiter.max_events = max_events;
        }
        if let Some(window_seconds) = self.window_seconds {
            config.limiter.window_seconds = window_seconds;
        }
        if let Some(out_of_order) = self.out_of_order {
            config.limiter.out_of_order = out_of_order;
        }
        if let Some(interval) = self.sweep_interval_secs {
            config.sweeper.interval_secs = interval;
        }
        if self.no_sweep {
            config.sweeper.enabled = false;
        }
        if self.json_logs {
            config.logging.json = true;
        }
    }
}

/// Read the configuration file (or defaults) and apply command-line overrides.
///
/// Runs before the subscriber is installed, so it does not log.
fn load_config(args: &Args) -> anyhow::Result<TxGateConfig> {
    let mut config = match &args.config {
        Some(path) => TxGateConfig::from_file(path)?,
        None => TxGateConfig::from_env()?,
    };
    args.apply(&mut config);
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_tracing(&config.logging);

    info!("Starting txgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    match &args.config {
        Some(path) => info!(path = %path.display(), "Configuration loaded"),
        None => info!("Using default configuration"),
    }

    let policy = config.window_policy()?;
    let limiter = Arc::new(RateLimiter::with_policy(policy));
    info!(
        max_events = policy.max_events(),
        window_seconds = policy.window_seconds(),
        out_of_order = ?policy.out_of_order(),
        "Rate limiter initialized"
    );

    // Lines without a timestamp are stamped from the wall clock; the sweeper
    // follows the greatest timestamp evaluated, so it stays on the input's
    // timeline even when callers supply their own.
    let wall_clock = SystemClock::new();
    let high_water = Arc::new(HighWaterClock::new());

    let sweeper = if config.sweeper.enabled {
        let sweeper_config = config.sweeper_config()?;
        let clock: Arc<dyn Clock> = high_water.clone();
        Some(Sweeper::new(limiter.clone(), clock, sweeper_config).start())
    } else {
        None
    };

    tokio::select! {
        result = process_stdin(&limiter, &wall_clock, &high_water) => {
            result?;
            info!("Input exhausted");
        }
        _ = shutdown_signal() => {}
    }

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }

    info!(keys = limiter.key_count(), "txgate stopped");
    Ok(())
}

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Feed stdin lines to the limiter and print one decision per event.
///
/// Stdin is read on its own thread; abandoning this future on shutdown leaves
/// that thread behind rather than blocking runtime teardown.
async fn process_stdin(
    limiter: &RateLimiter,
    clock: &dyn Clock,
    high_water: &HighWaterClock,
) -> anyhow::Result<()> {
    let mut lines = spawn_line_reader(std::io::BufReader::new(std::io::stdin()))?;
    let mut line_no = 0u64;

    while let Some(line) = lines.recv().await {
        let line = line?;
        line_no += 1;

        match process_line(limiter, &line, clock, high_water) {
            Ok(Some(decision)) => {
                let verdict = if decision.allowed { "allowed" } else { "denied" };
                println!("{}\t{}\t{}", decision.key, decision.timestamp, verdict);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping input line");
            }
        }
    }

    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
