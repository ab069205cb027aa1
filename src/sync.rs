//! The synchronize operation: drive the feed, detect convergence, merge.
use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};

use crate::feed::{self, ConvergenceDetector, FeedDecision, FeedError};
use crate::merge;
use crate::model::{ArchiveRecord, MediaSource, Post, RemoteBatch};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    InvalidCollectionUrl(#[from] FeedError),
    #[error("rate limited by the remote platform; aborting this run")]
    RateLimited,
    #[error("authentication required or rejected: {0}")]
    Auth(String),
    #[error("feed error: {0}")]
    Feed(anyhow::Error),
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::Feed(err)
    }
}

/// A source of remote feed pages, newest page first.
///
/// Implementations wrap whatever surface actually produces pages (a browser
/// automation session, captured API responses on disk, a test script).
/// Consumption is pull-based: when the detector has seen enough, the caller
/// simply stops pulling and drops the source, which ends page production
/// upstream. Login, 2FA and rate-limit conditions surface as `SyncError`
/// variants rather than being absorbed here.
#[async_trait]
pub trait FeedSource: Send {
    /// Next page, or `None` once the remote feed is exhausted.
    async fn next_batch(&mut self) -> Result<Option<RemoteBatch>, SyncError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Re-fetch the whole collection and overwrite saved posts wholesale.
    pub refresh: bool,
    /// Optional cap on how many pages to pull.
    pub max_pages: Option<usize>,
}

/// How the fetch phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The newest remote post is exactly the last one saved; nothing to do.
    NoNewPosts,
    /// Stopped early after reaching previously saved territory.
    ConvergedWithOverlap,
    /// The feed (or the page cap) ran out before any overlap was seen.
    ExhaustedWithoutOverlap,
}

#[derive(Debug)]
pub struct SyncReport {
    /// The merged record, ready for the terminal write.
    pub record: ArchiveRecord,
    /// Genuinely new posts, oldest-first.
    pub new_posts: Vec<Post>,
    /// Media to download for the newly fetched posts, per the record's
    /// download preference. Empty when the preference is `none`.
    pub media_sources: Vec<MediaSource>,
    pub outcome: SyncOutcome,
    pub pages_fetched: usize,
}

impl SyncReport {
    pub fn new_post_count(&self) -> usize {
        self.new_posts.len()
    }
}

/// Run one incremental synchronization pass against `source`.
///
/// Reads `previous` (never mutates it) and returns the merged record; the
/// caller owns the terminal write. Fails without producing a record on any
/// feed error, so a failed run can never corrupt the existing archive.
pub async fn synchronize(
    previous: &ArchiveRecord,
    source: &mut dyn FeedSource,
    options: SyncOptions,
) -> Result<SyncReport, SyncError> {
    let collection = feed::parse_collection_url(&previous.url)?;
    info!(
        username = %collection.username,
        collection = %collection.collection_name,
        refresh = options.refresh,
        "starting synchronization"
    );

    let mut detector = if options.refresh {
        ConvergenceDetector::unanchored()
    } else {
        ConvergenceDetector::new(&previous.posts)
    };

    let mut batches: Vec<RemoteBatch> = Vec::new();
    let mut outcome = SyncOutcome::ExhaustedWithoutOverlap;

    while options
        .max_pages
        .map_or(true, |cap| batches.len() < cap)
    {
        let Some(batch) = source.next_batch().await? else {
            break;
        };
        let decision = detector.observe(&batch);
        debug!(
            page = detector.batches_seen(),
            items = batch.items.len(),
            ?decision,
            "received feed page"
        );
        batches.push(batch);

        match decision {
            FeedDecision::Continue => {}
            FeedDecision::NoNewPosts => {
                info!("newest remote post is already saved; no new posts");
                return Ok(SyncReport {
                    record: previous.clone(),
                    new_posts: Vec::new(),
                    media_sources: Vec::new(),
                    outcome: SyncOutcome::NoNewPosts,
                    pages_fetched: detector.batches_seen(),
                });
            }
            FeedDecision::Overlap => {
                outcome = SyncOutcome::ConvergedWithOverlap;
                break;
            }
        }
    }

    let pages_fetched = batches.len();
    let aggregated = feed::flatten_batches(batches);

    // In refresh mode every fetched post is re-taken; otherwise slice at the
    // last saved anchor (with the backward-scan fallback inside).
    let anchor: &[Post] = if options.refresh { &[] } else { &previous.posts };
    let new_raws = merge::new_raw_posts(&aggregated, anchor);

    let media_sources: Vec<MediaSource> = new_raws
        .iter()
        .filter_map(|raw| MediaSource::from_raw(raw, previous.download_media))
        .collect();

    let fetched_posts: Vec<Post> = new_raws.iter().map(Post::from_raw).collect();
    let (merged, new_posts) = merge::merge_posts(&previous.posts, &fetched_posts, options.refresh);

    info!(
        pages = pages_fetched,
        fetched = fetched_posts.len(),
        new = new_posts.len(),
        "synchronization complete"
    );

    let mut record = previous.clone();
    record.posts = merged;
    record.last_synced_at = Some(Utc::now());

    Ok(SyncReport {
        record,
        new_posts,
        media_sources,
        outcome,
        pages_fetched,
    })
}
