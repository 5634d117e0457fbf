//! CLI module for tunegrab

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::pipeline::Codec;

pub mod commands;
pub mod play;

#[derive(Parser, Debug)]
#[command(name = "tunegrab", about = "Download and tag albums from YouTube Music playlists")]
#[command(version, author)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the tracks of an album playlist
    Tracks {
        /// Playlist id or music.youtube.com playlist URL
        #[arg(value_name = "PLAYLIST", value_parser = parse_playlist)]
        playlist: String,

        /// Read album metadata from a JSON file instead of the playlist
        #[arg(long, value_name = "FILE")]
        album_json: Option<PathBuf>,
    },

    /// Download, tag and save tracks
    Download(DownloadArgs),

    /// Stream tracks with keyboard controls
    Play {
        /// Playlist id or music.youtube.com playlist URL
        #[arg(value_name = "PLAYLIST", value_parser = parse_playlist)]
        playlist: String,

        /// Track number to start with
        #[arg(long, value_name = "N")]
        start: Option<usize>,

        /// Read album metadata from a JSON file instead of the playlist
        #[arg(long, value_name = "FILE")]
        album_json: Option<PathBuf>,
    },

    /// Show or initialize the configuration file
    Config {
        /// Write a config file with default values
        #[arg(long)]
        init: bool,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[derive(Args, Debug)]
pub struct DownloadArgs {
    /// Playlist id or music.youtube.com playlist URL
    #[arg(value_name = "PLAYLIST", value_parser = parse_playlist)]
    pub playlist: String,

    /// Track numbers to download (e.g. 1,3,5); prompts when omitted
    #[arg(short, long, value_delimiter = ',', conflicts_with = "all")]
    pub tracks: Vec<u32>,

    /// Download every track
    #[arg(long)]
    pub all: bool,

    /// Destination directory
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Audio format
    #[arg(short, long, value_enum)]
    pub format: Option<Codec>,

    /// Read album metadata from a JSON file instead of the playlist
    #[arg(long, value_name = "FILE", conflicts_with = "no_metadata")]
    pub album_json: Option<PathBuf>,

    /// Skip metadata lookup; files only get cover art
    #[arg(long)]
    pub no_metadata: bool,

    /// Write MP3 tags as ID3v2.3 + ID3v1 for older players
    #[arg(long)]
    pub id3v23: bool,
}

/// Accept either a bare playlist id or a URL carrying `list=<id>`
fn parse_playlist(value: &str) -> Result<String, String> {
    let value = value.trim();
    if !value.contains("://") {
        return if value.is_empty() {
            Err("playlist id is empty".to_string())
        } else {
            Ok(value.to_string())
        };
    }

    let url = url::Url::parse(value).map_err(|e| format!("invalid playlist URL: {}", e))?;
    url.query_pairs()
        .find(|(key, _)| key == "list")
        .map(|(_, id)| id.into_owned())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| "URL has no list= parameter".to_string())
}
