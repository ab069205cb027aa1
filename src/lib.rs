pub mod download;
pub mod feed;
pub mod merge;
pub mod model;
pub mod pages;
pub mod store;
pub mod sync;

pub use download::{DownloadQueue, DownloadReport, HttpMediaFetcher, MediaFetcher};
pub use model::{ArchiveRecord, DownloadPreference, MediaSource, Post, RawPost, RemoteBatch};
pub use sync::{synchronize, FeedSource, SyncOptions, SyncOutcome, SyncReport};
