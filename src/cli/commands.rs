//! CLI command handlers

use anyhow::{Context, Result};
use clap_complete::generate;
use colored::Colorize;
use dialoguer::{Confirm, MultiSelect};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use super::DownloadArgs;
use crate::acquisition::YtDlp;
use crate::catalog::{AlbumMetadata, Catalog, FileCatalog, PlaylistCatalog};
use crate::config::Settings;
use crate::pipeline::{
    CancellationToken, DownloadPipeline, DownloadRequest, Outcome, PipelineEvent,
};
use crate::utils::InteractiveGuard;

/// yt-dlp as configured
pub(crate) fn ytdlp(settings: &Settings) -> YtDlp {
    YtDlp::new(&settings.ytdlp_path).with_ffmpeg_location(settings.ffmpeg_location.clone())
}

/// Album metadata from a JSON file, or from the playlist itself
pub(crate) async fn load_album(
    settings: &Settings,
    playlist: &str,
    album_json: Option<&Path>,
) -> Result<AlbumMetadata> {
    let catalog: Box<dyn Catalog> = match album_json {
        Some(path) => Box::new(
            FileCatalog::load(path)
                .with_context(|| format!("Failed to load album metadata from {:?}", path))?,
        ),
        None => Box::new(PlaylistCatalog::new(&settings.ytdlp_path)),
    };

    catalog
        .album(playlist)
        .await
        .with_context(|| format!("Failed to look up playlist {}", playlist))
}

/// Handle the `tracks` command
pub async fn tracks(playlist: String, album_json: Option<&Path>) -> Result<()> {
    let settings = Settings::load()?;
    println!("{}", "Fetching album...".cyan());

    let album = load_album(&settings, &playlist, album_json).await?;
    print_album(&album);
    Ok(())
}

pub(crate) fn print_album(album: &AlbumMetadata) {
    println!();
    println!("{}", album.title.green().bold());
    if let Some(artists) = album.artist_names() {
        match album.year {
            Some(year) => println!("  {} ({})", artists, year),
            None => println!("  {}", artists),
        }
    }
    println!();

    for (index, track) in album.tracks.iter().enumerate() {
        let artists = track
            .artist_names()
            .map(|a| format!(" — {}", a))
            .unwrap_or_default();
        println!(
            "  {:>2}. {}{}  {}",
            index + 1,
            track.title,
            artists.dimmed(),
            track.duration_display().dimmed()
        );
    }
}

/// Handle the `download` command
pub async fn download(args: DownloadArgs) -> Result<()> {
    let settings = Settings::load()?;

    let album = if args.no_metadata {
        None
    } else {
        println!("{}", "Fetching album...".cyan());
        Some(Arc::new(
            load_album(&settings, &args.playlist, args.album_json.as_deref()).await?,
        ))
    };

    let positions = select_positions(&args, album.as_deref())?;
    if positions.is_empty() {
        println!("{}", "No tracks selected.".yellow());
        return Ok(());
    }

    let destination = args.output.clone().unwrap_or_else(|| settings.destination());
    let codec = args.format.unwrap_or(settings.default_format);
    let request = DownloadRequest {
        playlist_id: args.playlist.clone(),
        positions,
        destination: destination.clone(),
        codec,
        album,
    };

    println!(
        "Downloading {} track(s) as {} to {}",
        request.positions.len(),
        codec.to_string().cyan(),
        destination.display()
    );

    let pipeline = Arc::new(DownloadPipeline::new(
        Arc::new(ytdlp(&settings)),
        settings.pipeline_options(args.id3v23),
    ));
    let cancel = CancellationToken::new();
    let (handle, mut events) = pipeline.spawn(request, cancel.clone());

    let progress = ProgressBar::new(100);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("#>-"),
    );

    let interactive = InteractiveGuard::enter();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(PipelineEvent::Progress { percent, label }) => {
                    progress.set_position(u64::from(percent));
                    progress.set_message(label);
                }
                Some(PipelineEvent::Finished(_)) | None => break,
            },
            result = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                if result.is_ok() {
                    cancel.cancel();
                    progress.set_message("Cancelling after the current item...");
                }
            }
        }
    }
    progress.finish_and_clear();
    drop(interactive);

    let outcome = handle.await.context("Download task panicked")?;
    report(outcome, &destination)
}

/// Track positions from flags, or from an interactive prompt
fn select_positions(args: &DownloadArgs, album: Option<&AlbumMetadata>) -> Result<Vec<u32>> {
    if !args.tracks.is_empty() {
        return Ok(args.tracks.clone());
    }

    let album = album.context(
        "Track numbers are required with --no-metadata; pass them with --tracks",
    )?;

    if args.all {
        let count = u32::try_from(album.tracks.len()).context("Too many tracks")?;
        return Ok((1..=count).collect());
    }

    let labels: Vec<String> = album
        .tracks
        .iter()
        .enumerate()
        .map(|(i, t)| format!("{:>2}. {}  {}", i + 1, t.display_label(), t.duration_display()))
        .collect();

    let selected = MultiSelect::new()
        .with_prompt("Select tracks (space to toggle, enter to confirm)")
        .items(&labels)
        .interact()
        .context("Failed to read track selection")?;

    debug!("Selected rows: {:?}", selected);
    selected
        .into_iter()
        .map(|row| u32::try_from(row + 1).context("Track number out of range"))
        .collect()
}

fn report(outcome: Outcome, destination: &Path) -> Result<()> {
    match outcome {
        Outcome::Success(delivery) => {
            println!(
                "{}",
                format!(
                    "Downloaded {} track(s) to {}",
                    delivery.delivered,
                    destination.display()
                )
                .green()
                .bold()
            );
            for file in &delivery.files {
                let name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                println!("  {}", name);
            }
            if !delivery.warnings.is_empty() {
                println!();
                println!("{}", "Some files were saved without tags:".yellow().bold());
                for warning in &delivery.warnings {
                    println!("  {}", warning.yellow());
                }
            }
            Ok(())
        }
        Outcome::Cancelled => {
            println!("{}", "Download cancelled.".yellow());
            Ok(())
        }
        Outcome::Failed { summary, detail } => {
            eprintln!("{}", summary.red().bold());
            eprintln!();
            eprintln!("{}", detail);
            anyhow::bail!(summary)
        }
    }
}

/// Handle the `config` command
pub fn config(init: bool) -> Result<()> {
    let path = Settings::config_path()?;

    if init {
        if path.exists() {
            let overwrite = Confirm::new()
                .with_prompt(format!("{} exists. Overwrite with defaults?", path.display()))
                .default(false)
                .interact()
                .context("Failed to read confirmation")?;
            if !overwrite {
                return Ok(());
            }
        }
        let path = Settings::default().save()?;
        println!("{} {}", "Wrote".green().bold(), path.display());
        return Ok(());
    }

    let settings = Settings::load()?;
    println!("{} {}", "Config file:".bold(), path.display());
    if !path.exists() {
        println!("{}", "(not created yet; showing defaults)".dimmed());
    }
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&settings).context("Failed to serialize config")?
    );
    println!();
    println!(
        "Downloads go to {} unless -o is given.",
        settings.destination().display().to_string().cyan()
    );
    Ok(())
}

/// Handle the `completion` command
pub fn completion(shell: clap_complete::Shell) {
    let mut cmd = <super::Cli as clap::CommandFactory>::command();
    generate(shell, &mut cmd, "tunegrab", &mut io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::TrackMetadata;

    fn args(tracks: Vec<u32>, all: bool) -> DownloadArgs {
        DownloadArgs {
            playlist: "PL".to_string(),
            tracks,
            all,
            output: None,
            format: None,
            album_json: None,
            no_metadata: false,
            id3v23: false,
        }
    }

    fn album(count: usize) -> AlbumMetadata {
        AlbumMetadata {
            title: "X".to_string(),
            tracks: (0..count)
                .map(|i| TrackMetadata {
                    title: format!("T{}", i),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_explicit_tracks_win() {
        let positions = select_positions(&args(vec![4, 2], false), None).unwrap();
        assert_eq!(positions, vec![4, 2]);
    }

    #[test]
    fn test_all_tracks() {
        let positions = select_positions(&args(vec![], true), Some(&album(3))).unwrap();
        assert_eq!(positions, vec![1, 2, 3]);
    }

    #[test]
    fn test_all_needs_metadata() {
        assert!(select_positions(&args(vec![], true), None).is_err());
    }

    #[test]
    fn test_report_failure_is_error() {
        let outcome = Outcome::Failed {
            summary: "Download failed.".to_string(),
            detail: "boom".to_string(),
        };
        assert!(report(outcome, Path::new(".")).is_err());
        assert!(report(Outcome::Cancelled, Path::new(".")).is_ok());
    }
}
