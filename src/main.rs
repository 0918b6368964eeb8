// SPDX-License-Identifier: GPL-3.0-only

use burst_camera::AppResult;
use burst_camera::constants::app_info;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "burst-camera")]
#[command(about = "Camera session controller with burst capture")]
#[command(version = app_info::version())]
#[command(subcommand_required = false)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras
    List,

    /// Take a photo
    Photo {
        /// Use the front camera
        #[arg(short, long)]
        front: bool,

        /// Output directory (default: ~/Pictures/EagleEye)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Take a burst of photos
    Burst {
        /// Number of photos (default: from config, normally 10)
        #[arg(short, long)]
        count: Option<usize>,

        /// Use the front camera
        #[arg(short, long)]
        front: bool,

        /// Output directory (default: ~/Pictures/EagleEye)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Interactive session (capture, burst, switch, pause, resume, quit)
    Run {
        /// Start with the front camera
        #[arg(short, long)]
        front: bool,
    },
}

fn main() -> AppResult<()> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=burst_camera=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::List) => cli::list_cameras(),
        Some(Commands::Photo { front, output }) => cli::take_photos(Some(1), front, output),
        Some(Commands::Burst {
            count,
            front,
            output,
        }) => cli::take_photos(count, front, output),
        Some(Commands::Run { front }) => cli::run_interactive(front),
        None => cli::run_interactive(false),
    }
}
