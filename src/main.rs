//! tunegrab - Download, tag and stream albums from YouTube Music playlists

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod acquisition;
mod catalog;
mod cli;
mod config;
mod pipeline;
mod playback;
mod tagging;
mod utils;

use cli::{Cli, Commands};
use utils::QuietWhenInteractive;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "tunegrab=debug"
    } else {
        "tunegrab=info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(QuietWhenInteractive::new(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        ))
        .init();

    match cli.command {
        Commands::Tracks {
            playlist,
            album_json,
        } => {
            cli::commands::tracks(playlist, album_json.as_deref()).await?;
        }
        Commands::Download(args) => {
            cli::commands::download(args).await?;
        }
        Commands::Play {
            playlist,
            start,
            album_json,
        } => {
            cli::play::play(playlist, start, album_json.as_deref()).await?;
        }
        Commands::Config { init } => {
            cli::commands::config(init)?;
        }
        Commands::Completion { shell } => {
            cli::commands::completion(shell);
        }
    }

    Ok(())
}
