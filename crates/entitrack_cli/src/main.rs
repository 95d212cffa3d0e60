//! entitrack CLI
//!
//! Command-line tools for entitrack export bundles.
//!
//! # Commands
//!
//! - `inspect` - Display bundle metadata and entity counts
//! - `convert` - Re-encode a bundle as JSON or CBOR

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// entitrack command-line bundle tools.
#[derive(Parser)]
#[command(name = "entitrack")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display bundle metadata and entity counts
    Inspect {
        /// Path to the bundle (JSON or CBOR)
        bundle: PathBuf,

        /// List every entity
        #[arg(short, long)]
        entities: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Re-encode a bundle
    Convert {
        /// Bundle to read (JSON or CBOR)
        input: PathBuf,

        /// File to write
        output: PathBuf,

        /// Target encoding (json, cbor)
        #[arg(short, long, default_value = "cbor")]
        to: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Inspect {
            bundle,
            entities,
            format,
        } => {
            commands::inspect::run(&bundle, &format, entities)?;
        }
        Commands::Convert { input, output, to } => {
            let written = commands::convert::run(&input, &output, &to)?;
            println!("Wrote {} bytes to {}", written, output.display());
        }
        Commands::Version => {
            println!("entitrack CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("entitrack core v{}", entitrack_core::VERSION);
        }
    }

    Ok(())
}
