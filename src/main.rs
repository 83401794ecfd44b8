mod backends;
mod config;
mod error;
mod preview;
mod scanner;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use backends::{Availability, BackendSet};
use config::Config;
use preview::{PreviewRequest, PreviewResult, PreviewScheduler};
use scanner::{list_directory, ExifTool};

/// Preview box for the listing view.
const PREVIEW_MAX_WIDTH: u32 = 266;
const PREVIEW_MAX_HEIGHT: u32 = 200;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("raview=info".parse().unwrap()),
        )
        .init();

    let config = Config::load()?;
    let exiftool = ExifTool::new(&config);
    if exiftool.probe().await {
        if let Some(version) = exiftool.version() {
            info!(%version, "exiftool ready");
        }
    } else {
        warn!("exiftool missing; falling back to built-in extension list");
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("--info") => {
            let file = args.get(1).context("usage: raview --info <file>")?;
            show_metadata(&exiftool, Path::new(file)).await
        }
        Some("--set") => {
            let assignment = args.get(2).context("usage: raview --set <file> <tag>=<value>")?;
            let file = args.get(1).context("usage: raview --set <file> <tag>=<value>")?;
            let (tag, value) = assignment
                .split_once('=')
                .context("tag assignment must look like Rating=5")?;
            exiftool.write_tag(Path::new(file), tag, value).await?;
            println!("wrote {}={} to {}", tag, value, file);
            Ok(())
        }
        other => {
            let dir = other.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
            browse(&config, &exiftool, &dir).await
        }
    }
}

/// Print grouped metadata for a single file.
async fn show_metadata(exiftool: &ExifTool, file: &Path) -> Result<()> {
    let record = exiftool.read_file_metadata(file).await?;
    println!("{}", record.source_file);
    println!("{}", serde_json::to_string_pretty(&record.groups)?);
    Ok(())
}

/// List a directory and generate previews for every media file in it.
async fn browse(config: &Config, exiftool: &ExifTool, dir: &Path) -> Result<()> {
    let dir = dir
        .canonicalize()
        .with_context(|| format!("Cannot open directory: {:?}", dir))?;
    info!(?dir, capacity = config.capacity, "Browsing directory");

    let backend_set = Arc::new(BackendSet::standard(config));
    backend_set.probe_all().await;

    let available = ["ufraw-batch", "dcraw", "imagemagick"]
        .iter()
        .filter(|name| backend_set.availability(name) == Availability::Available)
        .count();
    if available == 0 {
        warn!("No preview backends available; files will show no preview");
    }

    let entries = list_directory(&dir, exiftool)?;
    if entries.is_empty() {
        bail!("No media found in {:?}", dir);
    }

    if exiftool.availability() == Availability::Available {
        match exiftool.read_dir_metadata(&dir).await {
            Ok(records) => info!(records = records.len(), "Read directory metadata"),
            Err(e) => warn!(error = %e, "Directory metadata read failed"),
        }
    }

    let scheduler = PreviewScheduler::new(Arc::clone(&backend_set), config);

    // A user abandoning the batch drops the queued jobs; in-flight
    // conversions still finish.
    let ctrl_c_sched = scheduler.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_sched.clear_pending();
        }
    });

    let (tx, rx) = flume::unbounded();
    let mut submitted = 0usize;
    for entry in &entries {
        if entry.is_dir() {
            println!("[dir]  {}", entry.name);
            continue;
        }
        scheduler.submit(PreviewRequest {
            source: entry.path.clone(),
            max_width: PREVIEW_MAX_WIDTH,
            max_height: PREVIEW_MAX_HEIGHT,
            sink: tx.clone(),
        });
        println!(
            "[file] {} ({} bytes, mtime {})",
            entry.name, entry.size, entry.mtime
        );
        submitted += 1;
    }
    drop(tx);

    info!(
        submitted,
        capacity = scheduler.capacity(),
        in_flight = scheduler.in_use(),
        queued = scheduler.queued_len(),
        "Submitted preview jobs"
    );

    // clear_pending (ctrl-c) closes the loop early: dropped jobs never send.
    while let Ok(outcome) = rx.recv_async().await {
        match outcome.result {
            PreviewResult::Ready(path) => {
                println!(
                    "[ok]   #{} {} -> {}",
                    outcome.job.id(),
                    outcome.source.display(),
                    path.display()
                );
            }
            PreviewResult::Unavailable => {
                println!("[none] #{} {}", outcome.job.id(), outcome.source.display());
            }
        }
    }

    Ok(())
}
