//! Bounded concurrent download queue for post media.
//!
//! One unit of queue work is one post's media: a single image or video, or
//! every frame of a carousel fetched in parallel. Each unit is retried as a
//! whole up to the attempt cap, then tallied as permanently failed without
//! aborting the rest of the queue.
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::try_join_all;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::model::{MediaKind, MediaSource};

pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_MAX_ATTEMPTS: usize = 10;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Transfers one asset's bytes to a local path.
///
/// Split out as a trait so tests can script successes and transient
/// failures without a network.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Real fetcher backed by reqwest.
pub struct HttpMediaFetcher {
    http: reqwest::Client,
}

impl HttpMediaFetcher {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .user_agent("instarchive/0.1")
            .build()
            .expect("reqwest client");
        Self { http }
    }
}

impl Default for HttpMediaFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        let res = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("request failed: {url}"))?
            .error_for_status()
            .with_context(|| format!("bad status: {url}"))?;
        let bytes = res
            .bytes()
            .await
            .with_context(|| format!("body read failed: {url}"))?;
        tokio::fs::write(dest, &bytes)
            .await
            .with_context(|| format!("write failed: {}", dest.display()))?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DownloadReport {
    pub succeeded: usize,
    pub failed: usize,
}

pub struct DownloadQueue {
    fetcher: Arc<dyn MediaFetcher>,
    media_dir: PathBuf,
    concurrency: usize,
    max_attempts: usize,
}

impl DownloadQueue {
    pub fn new(fetcher: Arc<dyn MediaFetcher>, media_dir: PathBuf) -> Self {
        Self {
            fetcher,
            media_dir,
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_limits(mut self, concurrency: usize, max_attempts: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Download every source and block until all of them settled.
    ///
    /// At most `concurrency` units are in flight at once. Failures are
    /// counted, never fatal; completion order does not matter to callers
    /// since the record's ordering was fixed before downloads start.
    pub async fn run(&self, sources: Vec<MediaSource>) -> DownloadReport {
        let total = sources.len();
        if total == 0 {
            return DownloadReport::default();
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let completed = Arc::new(AtomicUsize::new(0));
        let mut tasks: JoinSet<bool> = JoinSet::new();

        for source in sources {
            let fetcher = Arc::clone(&self.fetcher);
            let semaphore = Arc::clone(&semaphore);
            let completed = Arc::clone(&completed);
            let media_dir = self.media_dir.clone();
            let max_attempts = self.max_attempts;

            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("download semaphore closed");
                let result =
                    download_with_retry(fetcher.as_ref(), &source, &media_dir, max_attempts).await;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                match &result {
                    Ok(()) => info!(done, total, code = %source.code, "fetched media"),
                    Err(err) => {
                        warn!(?err, done, total, code = %source.code, "media permanently failed")
                    }
                }
                result.is_ok()
            });
        }

        let mut report = DownloadReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(true) => report.succeeded += 1,
                Ok(false) => report.failed += 1,
                Err(err) => {
                    warn!(?err, "download task aborted");
                    report.failed += 1;
                }
            }
        }

        if report.failed > 0 {
            warn!(failed = report.failed, total, "some posts failed to download");
        }
        report
    }
}

async fn download_with_retry(
    fetcher: &dyn MediaFetcher,
    source: &MediaSource,
    media_dir: &Path,
    max_attempts: usize,
) -> Result<()> {
    let mut last_err = None;
    for attempt in 1..=max_attempts {
        match download_source(fetcher, source, media_dir).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                warn!(?err, attempt, max_attempts, code = %source.code, "download attempt failed");
                last_err = Some(err);
                if attempt < max_attempts {
                    tokio::time::sleep(RETRY_BASE_DELAY * attempt as u32).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("download failed: {}", source.code)))
}

async fn download_source(
    fetcher: &dyn MediaFetcher,
    source: &MediaSource,
    media_dir: &Path,
) -> Result<()> {
    match &source.kind {
        MediaKind::Image { url } => {
            fetcher
                .fetch(url, &media_dir.join(format!("{}.jpg", source.code)))
                .await
        }
        MediaKind::Video { url } => {
            fetcher
                .fetch(url, &media_dir.join(format!("{}.mp4", source.code)))
                .await
        }
        MediaKind::Carousel { urls } => {
            let dir = media_dir.join(&source.code);
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("create carousel dir: {}", dir.display()))?;
            try_join_all(urls.iter().enumerate().map(|(index, url)| {
                let dest = dir.join(carousel_frame_name(index, url));
                async move { fetcher.fetch(url, &dest).await }
            }))
            .await?;
            Ok(())
        }
    }
}

/// `{1-based frame index}_{basename of the URL path}`, query string dropped.
fn carousel_frame_name(index: usize, url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let base = path.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or("asset");
    format!("{}_{}", index + 1, base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carousel_frame_names_are_indexed_and_stripped() {
        assert_eq!(
            carousel_frame_name(0, "https://cdn.example/x/y/photo.jpg?sig=abc"),
            "1_photo.jpg"
        );
        assert_eq!(
            carousel_frame_name(2, "https://cdn.example/clip.mp4"),
            "3_clip.mp4"
        );
        assert_eq!(carousel_frame_name(0, "https://cdn.example/"), "1_asset");
    }
}
