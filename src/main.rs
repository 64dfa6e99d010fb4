//! # Vibra - Bulk Music Recognition CLI
//!
//! Fingerprints audio files and identifies them against a remote
//! recognition service, over collections of any size.
//!
//! ## Features
//!
//! - **Worker Pool**: up to 16 threads sharing one work queue
//! - **Rate-Limit Handling**: progressive cooldowns, or proxy rotation when a rotation URL is set
//! - **Resumable**: results are autosaved and `--resume` skips files already done
//! - **Consensus Mode**: `--precise` checks several segments per file
//! - **Signal Handling**: Ctrl-C / SIGTERM flush results before exiting
//!
//! ## Usage
//!
//! ```bash
//! # Recognize a whole library, 4 threads, picking up where the last run stopped
//! vibra bulk /path/to/music -t 4 --resume
//!
//! # One file, flattened output with Apple Music metadata
//! vibra recognize song.mp3 --unified --enrich
//!
//! # Which IP does the service see through this proxy?
//! vibra ip --proxy-host 127.0.0.1 --proxy-port 9050 --proxy-type socks5
//!
//! # Fresh Tor circuit
//! vibra new-circuit
//! ```

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vibra::commands::bulk::BulkCommand;
use vibra::commands::circuit::NewCircuitCommand;
use vibra::commands::ip::IpCommand;
use vibra::commands::recognize::RecognizeCommand;
use vibra::commands::ProxyArgs;

/// Vibra - resilient bulk music recognition
#[derive(Parser)]
#[command(
    name = "vibra",
    about = "Resilient bulk music recognition",
    long_about = "Fingerprints audio files and identifies them against a remote recognition service, with rate-limit handling, proxy rotation and resumable results.",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Recognize every audio file under a directory
    Bulk {
        /// Directory to scan for audio files
        path: PathBuf,
        /// Results file
        #[arg(long, short = 'o', default_value = "results.json")]
        output: PathBuf,
        /// Worker threads (clamped to 1-16)
        #[arg(long, short = 't', default_value_t = 1, allow_negative_numbers = true)]
        threads: i64,
        /// Seconds to wait after each file
        #[arg(long, short = 'w', default_value_t = 2.0, allow_negative_numbers = true)]
        delay: f64,
        /// Skip files that already have a result in the output file
        #[arg(long)]
        resume: bool,
        /// Check several segments per file and require agreement
        #[arg(long)]
        precise: bool,
        /// Glob of paths to leave out, relative to the directory (repeatable)
        #[arg(long, value_name = "GLOB")]
        exclude: Vec<String>,
        /// Seconds to wait for a rotated proxy to become reachable
        #[arg(long, default_value_t = 60)]
        rotation_timeout: u64,
        #[command(flatten)]
        proxy: ProxyArgs,
    },
    /// Recognize a single file and print the response
    Recognize {
        /// Audio file
        file: PathBuf,
        /// Check several segments and require agreement
        #[arg(long)]
        precise: bool,
        /// Print the flattened response format
        #[arg(long)]
        unified: bool,
        /// Add Apple Music metadata
        #[arg(long)]
        enrich: bool,
        #[command(flatten)]
        proxy: ProxyArgs,
    },
    /// Print the egress IP seen by the outside world
    Ip {
        #[command(flatten)]
        proxy: ProxyArgs,
    },
    /// Request a new Tor circuit through the control port
    NewCircuit {
        /// Control port address (defaults to VIBRA_TOR_CONTROL or 127.0.0.1:9051)
        #[arg(long)]
        control: Option<String>,
        /// Control port password (defaults to VIBRA_TOR_PASSWORD)
        #[arg(long)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vibra=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let result = match cli.command {
        Commands::Bulk {
            path,
            output,
            threads,
            delay,
            resume,
            precise,
            exclude,
            rotation_timeout,
            proxy,
        } => {
            info!(
                "Starting bulk command for path: {:?}, output: {:?}",
                path, output
            );
            BulkCommand::new(
                path,
                output,
                threads,
                delay,
                resume,
                precise,
                exclude,
                rotation_timeout,
                proxy.into(),
            )
            .execute()
            .await
            .map(|summary| {
                if summary.interrupted {
                    // Worker threads may still be blocked in network calls
                    std::process::exit(0);
                }
            })
        }
        Commands::Recognize {
            file,
            precise,
            unified,
            enrich,
            proxy,
        } => {
            RecognizeCommand::new(file, precise, unified, enrich, proxy.into())
                .execute()
                .await
        }
        Commands::Ip { proxy } => IpCommand::new(proxy.into()).execute().await.map(|_| ()),
        Commands::NewCircuit { control, password } => {
            NewCircuitCommand::new(control, password).execute().await
        }
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }
}
