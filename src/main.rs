//! CLI entry point for edgecap.
//!
//! `edgecap run` starts the daemon: telemetry acquisition + broker
//! publishing on one loop, the capture pump on another, and the control
//! plane on the accept loop. `edgecap header` prints the WAV header for a
//! given format, useful when checking interoperability of stored captures.

use clap::{Parser, Subcommand};
use edgecap::config::Settings;
use edgecap::storage::wav_header;
use log::error;

#[derive(Parser)]
#[command(name = "edgecap")]
#[command(about = "Headless edge acquisition daemon", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon.
    Run {
        /// Config name under config/ (defaults to "default").
        #[arg(long)]
        config: Option<String>,
    },

    /// Print the 44-byte WAV header for the given parameters.
    Header {
        #[arg(long)]
        raw_size: u32,
        #[arg(long, default_value_t = 44100)]
        sample_rate: u32,
        #[arg(long, default_value_t = 16)]
        bit_depth: u16,
        #[arg(long, default_value_t = 1)]
        channels: u16,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let settings = match Settings::new(config.as_deref()) {
                Ok(settings) => settings,
                Err(e) => {
                    eprintln!("Failed to load configuration: {e}");
                    std::process::exit(2);
                }
            };

            env_logger::Builder::from_env(
                env_logger::Env::default().default_filter_or(settings.log_level.as_str()),
            )
            .init();

            if let Err(e) = edgecap::app::run(settings).await {
                // Fail-stop: stay inert instead of running degraded.
                error!("Fatal initialization error: {e}; halting");
                edgecap::app::halt().await;
            }
        }
        Commands::Header {
            raw_size,
            sample_rate,
            bit_depth,
            channels,
        } => {
            let header = wav_header(raw_size, sample_rate, bit_depth, channels);
            for row in header.chunks(8) {
                let hex: Vec<String> = row.iter().map(|b| format!("{b:02x}")).collect();
                println!("{}", hex.join(" "));
            }
        }
    }
}
