use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};

use instarchive::download::{DownloadQueue, HttpMediaFetcher};
use instarchive::model::DownloadPreference;
use instarchive::pages::CapturedPages;
use instarchive::sync::{self, SyncOptions, SyncOutcome};
use instarchive::{feed, store};

#[derive(Debug, Parser)]
#[command(author, version, about = "Archive a saved-post collection into a local snapshot")]
struct Args {
    /// Archive directory (holds data.yml and media/)
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MediaArg {
    None,
    Thumbnail,
    All,
}

impl From<MediaArg> for DownloadPreference {
    fn from(arg: MediaArg) -> Self {
        match arg {
            MediaArg::None => DownloadPreference::None,
            MediaArg::Thumbnail => DownloadPreference::Thumbnail,
            MediaArg::All => DownloadPreference::All,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create a new archive for a collection URL
    Init {
        /// Saved-collection URL
        #[arg(long)]
        url: String,

        /// How much media to download on each fetch
        #[arg(long, value_enum, default_value = "all")]
        download_media: MediaArg,
    },
    /// Fetch new posts (and media) into the archive
    Fetch {
        /// Directory of captured feed page JSON files, newest page first
        #[arg(long)]
        pages: PathBuf,

        /// Re-fetch the whole collection and update existing posts
        #[arg(long)]
        refetch: bool,

        /// Maximum pages to consume
        #[arg(long)]
        max_page: Option<usize>,

        /// Skip media downloads for this run regardless of the preference
        #[arg(long)]
        skip_media: bool,
    },
    /// Delete posts (and their media) from the archive by short code
    Delete {
        /// Codes of the posts to delete (one or more)
        #[arg(required = true)]
        codes: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    match args.command {
        Command::Init {
            url,
            download_media,
        } => init(&args.dir, url, download_media.into()),
        Command::Fetch {
            pages,
            refetch,
            max_page,
            skip_media,
        } => fetch(&args.dir, &pages, refetch, max_page, skip_media).await,
        Command::Delete { codes } => delete(&args.dir, &codes),
    }
}

fn delete(dir: &PathBuf, codes: &[String]) -> Result<()> {
    let summary = store::delete_posts(dir, codes)?;
    println!(
        "Deleted {} posts and {} media files",
        summary.posts_removed, summary.media_files_removed
    );
    Ok(())
}

fn init(dir: &PathBuf, url: String, download_media: DownloadPreference) -> Result<()> {
    let collection = feed::parse_collection_url(&url)?;
    store::init_record(dir, url, download_media)?;
    println!(
        "Initialized archive for {}'s collection \"{}\" (media: {})",
        collection.username,
        collection.collection_name,
        download_media.as_str()
    );
    Ok(())
}

async fn fetch(
    dir: &PathBuf,
    pages: &PathBuf,
    refetch: bool,
    max_page: Option<usize>,
    skip_media: bool,
) -> Result<()> {
    let started = Instant::now();
    let previous = store::load_record(dir)?;

    let mut source = CapturedPages::from_dir(pages)?;
    let options = SyncOptions {
        refresh: refetch,
        max_pages: max_page,
    };
    let report = sync::synchronize(&previous, &mut source, options).await?;

    if report.outcome == SyncOutcome::NoNewPosts {
        println!("No new post found");
        return Ok(());
    }

    let media_report = if skip_media || report.media_sources.is_empty() {
        None
    } else {
        let media_dir = store::ensure_media_dir(dir)?;
        let queue = DownloadQueue::new(Arc::new(HttpMediaFetcher::new()), media_dir);
        Some(queue.run(report.media_sources.clone()).await)
    };

    // Metadata write happens after the sync succeeded in full; download
    // failures never roll it back.
    store::save_record(dir, &report.record).context("failed to write archive record")?;
    info!(posts = report.record.posts.len(), "archive record written");

    let elapsed = started.elapsed().as_secs_f64();
    match media_report {
        Some(media) if media.failed > 0 => {
            warn!(failed = media.failed, "some media could not be downloaded");
            println!(
                "Fetched {} new posts ({} media downloaded, {} failed) in {:.1} seconds",
                report.new_post_count(),
                media.succeeded,
                media.failed,
                elapsed
            );
        }
        Some(media) => println!(
            "Fetched {} new posts and {} media in {:.1} seconds",
            report.new_post_count(),
            media.succeeded,
            elapsed
        ),
        None => println!(
            "Fetched {} new posts in {:.1} seconds",
            report.new_post_count(),
            elapsed
        ),
    }
    Ok(())
}
