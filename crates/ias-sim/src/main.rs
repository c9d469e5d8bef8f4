mod backoff;
mod events;
mod link;
mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ias-sim", about = "Lossy-link simulator for IAS Zone status delivery")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive a zone server over a simulated lossy link, print events as JSONL.
    Run {
        /// Number of status updates to generate.
        #[arg(long, default_value = "20")]
        updates: u32,
        /// Delay between updates in ms (simulated time).
        #[arg(long, default_value = "1000")]
        interval_ms: u64,
        /// Probability that a notification is not acknowledged (0.0..=1.0).
        #[arg(long, default_value = "0.2")]
        loss: f64,
        /// RNG seed, for reproducible runs.
        #[arg(long, default_value = "1")]
        seed: u64,
        /// Link latency in ms.
        #[arg(long, default_value = "50")]
        latency_ms: u64,
        /// Override the queue capacity.
        #[arg(long)]
        capacity: Option<usize>,
        /// JSON zone configuration file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Take the network down at this simulated time (ms).
        #[arg(long)]
        outage_at_ms: Option<u64>,
        /// How long the outage lasts (ms).
        #[arg(long, default_value = "30000")]
        outage_ms: u64,
    },

    /// Print the backoff schedule a retry policy produces.
    Backoff {
        /// First backoff in seconds.
        #[arg(long, default_value = "3")]
        first: u32,
        /// Multiplier applied after each failure.
        #[arg(long, default_value = "2")]
        ratio: u32,
        /// Backoff ceiling in seconds.
        #[arg(long, default_value = "12")]
        max: u32,
        /// Attempts before the entry is dropped.
        #[arg(long, default_value = "10")]
        attempts: u32,
        /// Retry forever (schedule is cut at --attempts).
        #[arg(long)]
        unlimited: bool,
    },
}

#[tokio::main(flavor = "current_thread", start_paused = true)]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    eprintln!("ias-sim v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Run {
            updates,
            interval_ms,
            loss,
            seed,
            latency_ms,
            capacity,
            config,
            outage_at_ms,
            outage_ms,
        } => {
            if !(0.0..=1.0).contains(&loss) {
                anyhow::bail!("--loss must be within 0.0..=1.0, got {loss}");
            }
            run::run(run::RunConfig {
                updates,
                interval_ms,
                loss,
                seed,
                latency_ms,
                capacity,
                config,
                outage: outage_at_ms.map(|at| (at, outage_ms)),
            })
            .await?;
        }

        Command::Backoff {
            first,
            ratio,
            max,
            attempts,
            unlimited,
        } => {
            backoff::run(ias_zone::RetryPolicy {
                first_backoff_secs: first,
                backoff_ratio: ratio,
                max_backoff_secs: max,
                unlimited_retries: unlimited,
                max_attempts: attempts,
            })?;
        }
    }

    Ok(())
}
