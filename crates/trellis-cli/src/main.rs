//! Trellis CLI - Command-line interface for Trellis
//!
//! Watches live directory graphs from a graph-serving node and inspects
//! graph description files offline.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "trellis")]
#[command(author = "Trellis Contributors")]
#[command(version)]
#[command(about = "Live attention graphs for public keys", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default config file
    Init,

    /// Subscribe to the graph around a public key and print each snapshot
    Watch {
        /// Public key to watch
        public_key: String,

        /// Directory the graph belongs to
        #[arg(short, long, default_value = "")]
        directory: String,

        /// Minimum ranking to show, in percent
        #[arg(short = 'f', long, default_value = "0", value_parser = clap::value_parser!(u8).range(0..=100))]
        filter: u8,

        /// Server URL (overrides the config file)
        #[arg(long)]
        url: Option<String>,

        /// Exit after the first snapshot
        #[arg(long)]
        once: bool,

        /// Output as JSON instead of formatted text
        #[arg(long)]
        json: bool,
    },

    /// Parse a graph description file offline
    Parse {
        /// File containing the graph description
        file: PathBuf,

        /// Public key of the root identity
        #[arg(short, long)]
        root: String,

        /// Minimum ranking to show, in percent
        #[arg(short = 'f', long, default_value = "0", value_parser = clap::value_parser!(u8).range(0..=100))]
        filter: u8,

        /// Output as JSON instead of formatted text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let result = match cli.command {
        Commands::Init => commands::init(cli.config.as_deref()),
        Commands::Watch {
            public_key,
            directory,
            filter,
            url,
            once,
            json,
        } => {
            commands::watch(
                cli.config.as_deref(),
                url,
                &public_key,
                &directory,
                filter,
                once,
                json,
            )
            .await
        }
        Commands::Parse {
            file,
            root,
            filter,
            json,
        } => commands::parse(&file, &root, filter, json),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}
