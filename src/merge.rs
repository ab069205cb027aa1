//! Incremental merge engine: decide which fetched posts are new and fold
//! them into the previously saved sequence without duplication or loss.
use std::collections::HashMap;

use tracing::warn;

use crate::model::{Post, RawPost};

/// Where the new posts start inside the aggregated oldest-first sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewPostBoundary {
    /// Everything from this index onward is new.
    From(usize),
    /// No saved post was found anywhere in the fetched sequence. The whole
    /// sequence is treated as new; callers should surface a warning since a
    /// duplicate is possible if the remote reordered history.
    NoOverlap,
}

impl NewPostBoundary {
    pub fn start_index(&self) -> usize {
        match self {
            NewPostBoundary::From(i) => *i,
            NewPostBoundary::NoOverlap => 0,
        }
    }
}

/// Locate the first genuinely new post in `fetched` (oldest-first).
///
/// Prefers the last saved post as the anchor; if the remote deleted it,
/// walks the saved sequence backward (most recent first) until any saved pk
/// is found. An empty saved sequence means a first run: everything is new.
pub fn first_new_index(fetched: &[RawPost], saved: &[Post]) -> NewPostBoundary {
    if saved.is_empty() {
        return NewPostBoundary::From(0);
    }

    let index_of = |pk: &str| fetched.iter().position(|raw| raw.pk == pk);

    if let Some(last_saved) = saved.last() {
        if let Some(i) = index_of(&last_saved.pk) {
            return NewPostBoundary::From(i + 1);
        }
    }

    for post in saved.iter().rev() {
        if let Some(i) = index_of(&post.pk) {
            return NewPostBoundary::From(i + 1);
        }
    }

    NewPostBoundary::NoOverlap
}

/// Merge freshly fetched posts into the saved sequence.
///
/// `fetched` must be oldest-first and already cut down to the convergence
/// point. Saved posts keep their relative order. In refresh mode a saved
/// post whose pk reappears in `fetched` is replaced wholesale by the fresh
/// version; otherwise the saved copy wins. Returns the merged sequence and
/// the posts that were genuinely new (oldest-first), deduplicated by pk.
pub fn merge_posts(saved: &[Post], fetched: &[Post], refresh: bool) -> (Vec<Post>, Vec<Post>) {
    let fetched_by_pk: HashMap<&str, &Post> =
        fetched.iter().map(|post| (post.pk.as_str(), post)).collect();

    let mut merged: Vec<Post> = saved
        .iter()
        .map(|old| {
            if refresh {
                fetched_by_pk
                    .get(old.pk.as_str())
                    .map(|fresh| (*fresh).clone())
                    .unwrap_or_else(|| old.clone())
            } else {
                old.clone()
            }
        })
        .collect();

    let mut new_posts: Vec<Post> = Vec::new();
    let mut index_by_pk: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, post)| (post.pk.clone(), i))
        .collect();

    for post in fetched {
        match index_by_pk.get(&post.pk) {
            Some(&i) => {
                // Duplicate pk inside the fetched sequence itself, or a
                // saved post re-observed in refresh mode: last write wins.
                if refresh {
                    merged[i] = post.clone();
                }
            }
            None => {
                index_by_pk.insert(post.pk.clone(), merged.len());
                merged.push(post.clone());
                new_posts.push(post.clone());
            }
        }
    }

    (merged, new_posts)
}

/// Convenience used by the pipeline: slice the aggregated raw sequence at
/// the boundary and warn when the conservative fallback kicks in.
pub fn new_raw_posts<'a>(fetched: &'a [RawPost], saved: &[Post]) -> &'a [RawPost] {
    if fetched.is_empty() {
        return fetched;
    }
    match first_new_index(fetched, saved) {
        NewPostBoundary::From(i) => &fetched[i.min(fetched.len())..],
        NewPostBoundary::NoOverlap => {
            warn!(
                fetched = fetched.len(),
                saved = saved.len(),
                "no previously saved post found in fetched sequence; treating everything as new"
            );
            fetched
        }
    }
}
