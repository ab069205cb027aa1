//! Page aggregation and convergence detection for the paginated remote feed.
//!
//! The feed is consumed top-down: batch 0 holds the newest posts and each
//! batch lists its posts newest-first. The archive record stores posts
//! oldest-first, so both levels get reversed before merging.
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::model::{Post, RawPost, RemoteBatch};

/// How many of the most recently saved pks we keep as convergence anchors.
/// A single key is fragile (the post may have been deleted remotely between
/// runs); ten gives headroom against a handful of deletions without scanning
/// the whole record on every batch.
pub const ANCHOR_WINDOW: usize = 10;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("invalid collection URL: {0}")]
    InvalidCollectionUrl(String),
}

/// Parsed form of a saved-collection URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRef {
    pub username: String,
    pub collection_name: String,
    pub collection_id: String,
}

static COLLECTION_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^https://www\.instagram\.com/(?P<username>[A-Za-z0-9._-]+)/saved/(?P<collection_name>[^/]+)/?(?P<collection_id>\d+)?/?$",
    )
    .expect("valid collection URL regex")
});

/// Validate and split a collection URL. Fails fast before any network work.
pub fn parse_collection_url(url: &str) -> Result<CollectionRef, FeedError> {
    let caps = COLLECTION_URL_RE
        .captures(url)
        .ok_or_else(|| FeedError::InvalidCollectionUrl(url.to_string()))?;
    Ok(CollectionRef {
        username: caps["username"].to_string(),
        collection_name: caps["collection_name"].to_string(),
        collection_id: caps
            .name("collection_id")
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "all-posts".to_string()),
    })
}

/// Flatten received batches into a single oldest-first sequence.
///
/// Input shape: `[[12, 11, 10], [9, 8, 7], ...]` (newest page first, newest
/// post first within each page). Output: `[..., 7, 8, 9, 10, 11, 12]`.
/// Works identically for truncated batch sequences, so a fetch cut short by
/// convergence still yields a validly ordered suffix of the full history.
pub fn flatten_batches(batches: Vec<RemoteBatch>) -> Vec<RawPost> {
    batches
        .into_iter()
        .rev()
        .flat_map(|batch| batch.items.into_iter().rev())
        .collect()
}

/// Decision taken after observing one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedDecision {
    /// Keep pulling pages.
    Continue,
    /// The newest remote post is exactly the last one saved; nothing to do.
    NoNewPosts,
    /// A saved anchor key appeared in this batch; everything older is known.
    Overlap,
}

/// Streaming convergence detector.
///
/// Fed one batch at a time as pages arrive, so the caller can stop scrolling
/// the remote feed the moment known territory is reached. Holds only the
/// anchor window of saved pks; first runs (empty window) never converge early.
#[derive(Debug)]
pub struct ConvergenceDetector {
    /// Last [`ANCHOR_WINDOW`] saved pks, oldest-first.
    anchor_keys: Vec<String>,
    batches_seen: usize,
}

impl ConvergenceDetector {
    pub fn new(saved_posts: &[Post]) -> Self {
        let start = saved_posts.len().saturating_sub(ANCHOR_WINDOW);
        Self {
            anchor_keys: saved_posts[start..].iter().map(|p| p.pk.clone()).collect(),
            batches_seen: 0,
        }
    }

    /// Detector that never converges; used for first runs and refresh mode.
    pub fn unanchored() -> Self {
        Self {
            anchor_keys: Vec::new(),
            batches_seen: 0,
        }
    }

    pub fn batches_seen(&self) -> usize {
        self.batches_seen
    }

    /// Observe the next batch (newest-first items) and decide whether to
    /// keep pulling pages.
    pub fn observe(&mut self, batch: &RemoteBatch) -> FeedDecision {
        self.batches_seen += 1;

        if self.anchor_keys.is_empty() {
            return FeedDecision::Continue;
        }

        // First page, first item: the newest post the remote has. If it is
        // the last post we saved, the run has nothing to fetch at all.
        if self.batches_seen == 1 {
            if let (Some(newest_remote), Some(newest_saved)) =
                (batch.items.first(), self.anchor_keys.last())
            {
                if &newest_remote.pk == newest_saved {
                    return FeedDecision::NoNewPosts;
                }
            }
        }

        let overlap = batch
            .items
            .iter()
            .any(|item| self.anchor_keys.iter().any(|anchor| anchor == &item.pk));
        if overlap {
            FeedDecision::Overlap
        } else {
            FeedDecision::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PostUser;

    fn raw(pk: &str) -> RawPost {
        RawPost {
            pk: pk.to_string(),
            id: format!("{pk}_1"),
            media_type: 1,
            code: format!("c{pk}"),
            user: PostUser {
                pk: "1".into(),
                username: "u".into(),
                full_name: "U".into(),
            },
            location: None,
            caption: None,
            image_versions2: None,
            video_versions: None,
            carousel_media: None,
            extra: serde_json::Map::new(),
        }
    }

    fn post(pk: &str) -> Post {
        Post::from_raw(&raw(pk))
    }

    fn batch(pks: &[&str]) -> RemoteBatch {
        RemoteBatch::new(pks.iter().map(|pk| raw(pk)).collect())
    }

    #[test]
    fn parse_collection_url_accepts_canonical_forms() {
        let parsed =
            parse_collection_url("https://www.instagram.com/alice/saved/travel/17843760/").unwrap();
        assert_eq!(parsed.username, "alice");
        assert_eq!(parsed.collection_name, "travel");
        assert_eq!(parsed.collection_id, "17843760");

        let parsed = parse_collection_url("https://www.instagram.com/alice/saved/all-posts")
            .unwrap();
        assert_eq!(parsed.collection_id, "all-posts");
    }

    #[test]
    fn parse_collection_url_rejects_garbage() {
        for bad in [
            "",
            "not a url",
            "https://www.instagram.com/alice/",
            "https://example.com/alice/saved/travel/",
        ] {
            assert!(parse_collection_url(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn flatten_reverses_both_batch_and_item_order() {
        let flat = flatten_batches(vec![
            batch(&["12", "11", "10", "9"]),
            batch(&["8", "7", "6", "5"]),
            batch(&["4", "3", "2", "1"]),
        ]);
        let pks: Vec<&str> = flat.iter().map(|p| p.pk.as_str()).collect();
        assert_eq!(
            pks,
            vec!["1", "2", "3", "4", "5", "6", "7", "8", "9", "10", "11", "12"]
        );
    }

    #[test]
    fn flatten_of_truncated_sequence_is_still_oldest_first() {
        // Only the two newest pages arrived before convergence.
        let flat = flatten_batches(vec![batch(&["12", "11"]), batch(&["10", "9"])]);
        let pks: Vec<&str> = flat.iter().map(|p| p.pk.as_str()).collect();
        assert_eq!(pks, vec!["9", "10", "11", "12"]);
    }

    #[test]
    fn first_run_never_converges() {
        let mut detector = ConvergenceDetector::new(&[]);
        for _ in 0..5 {
            assert_eq!(detector.observe(&batch(&["9", "8", "7"])), FeedDecision::Continue);
        }
    }

    #[test]
    fn no_new_posts_on_first_batch() {
        let saved: Vec<Post> = ["1", "2", "3"].iter().map(|pk| post(pk)).collect();
        let mut detector = ConvergenceDetector::new(&saved);
        assert_eq!(detector.observe(&batch(&["3", "2", "1"])), FeedDecision::NoNewPosts);
    }

    #[test]
    fn converges_when_anchor_window_key_appears() {
        // Saved A..J oldest-first; remote returns [[J, I], [H, G, F]].
        let saved: Vec<Post> = ["A", "B", "C", "D", "E", "F", "G", "H", "I", "J"]
            .iter()
            .map(|pk| post(pk))
            .collect();
        let mut detector = ConvergenceDetector::new(&saved);
        // First batch's newest item is J == last saved, so the run is a no-op.
        assert_eq!(detector.observe(&batch(&["J", "I"])), FeedDecision::NoNewPosts);

        // With two genuinely new posts in front, the detector must continue
        // past them and stop on the batch containing a saved key.
        let mut detector = ConvergenceDetector::new(&saved);
        assert_eq!(detector.observe(&batch(&["L", "K"])), FeedDecision::Continue);
        assert_eq!(detector.observe(&batch(&["J", "I"])), FeedDecision::Overlap);
    }

    #[test]
    fn anchor_window_is_bounded_to_ten_keys() {
        let saved: Vec<Post> = (1..=25).map(|i| post(&i.to_string())).collect();
        let mut detector = ConvergenceDetector::new(&saved);
        // pk 15 fell out of the window, pk 16 is its oldest member.
        assert_eq!(detector.observe(&batch(&["15"])), FeedDecision::Continue);
        assert_eq!(detector.observe(&batch(&["16"])), FeedDecision::Overlap);
    }

    #[test]
    fn deleted_newest_post_still_converges_via_window() {
        let saved: Vec<Post> = ["A", "B", "C", "D", "E"].iter().map(|pk| post(pk)).collect();
        let mut detector = ConvergenceDetector::new(&saved);
        // E was deleted remotely; the feed jumps from new posts straight to D.
        assert_eq!(detector.observe(&batch(&["G", "F"])), FeedDecision::Continue);
        assert_eq!(detector.observe(&batch(&["D", "C"])), FeedDecision::Overlap);
    }
}
