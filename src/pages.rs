//! Feed source that replays captured API responses from disk.
//!
//! The interactive browser session (login, 2FA, scrolling) is a separate
//! tool; it dumps each `/api/v1/feed/...` response to a JSON file. This
//! source reads those files in filename order, newest page first, which is
//! the order the capture surface observed them.
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::model::{RawPost, RemoteBatch};
use crate::sync::{FeedSource, SyncError};

/// Wire shape of one feed response.
#[derive(Debug, Deserialize)]
struct FeedResponse {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    items: Vec<FeedItem>,
}

#[derive(Debug, Deserialize)]
struct FeedItem {
    media: RawPost,
}

pub struct CapturedPages {
    files: VecDeque<PathBuf>,
}

impl CapturedPages {
    /// Collect `*.json` files under `dir`, sorted by filename.
    pub fn from_dir(dir: &Path) -> Result<Self, SyncError> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("cannot read pages directory: {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        files.sort();
        debug!(pages = files.len(), dir = %dir.display(), "captured pages found");
        Ok(Self {
            files: files.into(),
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[async_trait]
impl FeedSource for CapturedPages {
    async fn next_batch(&mut self) -> Result<Option<RemoteBatch>, SyncError> {
        let Some(path) = self.files.pop_front() else {
            return Ok(None);
        };
        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("cannot read page file: {}", path.display()))?;
        let response: FeedResponse = serde_json::from_str(&content)
            .with_context(|| format!("invalid page file: {}", path.display()))?;

        // The platform reports throttling and expired sessions in-band.
        if response.status.as_deref() == Some("fail") {
            let message = response.message.unwrap_or_default();
            if message.contains("rate") || message.contains("wait") {
                return Err(SyncError::RateLimited);
            }
            return Err(SyncError::Auth(message));
        }

        Ok(Some(RemoteBatch::new(
            response.items.into_iter().map(|item| item.media).collect(),
        )))
    }
}
