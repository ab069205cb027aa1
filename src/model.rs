use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How much media to pull down for each post.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DownloadPreference {
    /// Metadata only, no media bytes.
    None,
    /// Only the cover image of each post, even for videos and carousels.
    Thumbnail,
    /// Full assets, including every carousel frame.
    All,
}

impl DownloadPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadPreference::None => "none",
            DownloadPreference::Thumbnail => "thumbnail",
            DownloadPreference::All => "all",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostUser {
    pub pk: String,
    pub username: String,
    pub full_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub pk: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub short_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lng: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Caption {
    pub pk: String,
    pub text: String,
    pub created_at: i64,
}

/// A saved post as it lives in the archive record. Immutable once written;
/// the merge engine only ever replaces it wholesale in refresh mode.
///
/// `pk` is the platform-assigned stable identifier and the only field used
/// for identity. `code` is the short code used for deriving media paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Post {
    pub pk: String,
    pub id: String,
    pub media_type: i64,
    pub code: String,
    pub user: PostUser,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<Caption>,
}

impl Post {
    /// Project a raw feed item down to the fields we persist.
    pub fn from_raw(raw: &RawPost) -> Self {
        Self {
            pk: raw.pk.clone(),
            id: raw.id.clone(),
            media_type: raw.media_type,
            code: raw.code.clone(),
            user: raw.user.clone(),
            location: raw.location.clone(),
            caption: raw.caption.clone(),
        }
    }
}

/// Image renditions offered by the remote API, best candidate first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageVersions {
    pub candidates: Vec<MediaUrl>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaUrl {
    pub url: String,
}

/// One frame of a carousel post. Videos also carry `image_versions2`
/// (their cover image), so `image_versions2` is the common denominator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CarouselFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_versions2: Option<ImageVersions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_versions: Option<Vec<MediaUrl>>,
}

/// A raw post exactly as the remote feed returned it. Fields we do not
/// model are preserved in `extra` so nothing is lost before projection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawPost {
    pub pk: String,
    pub id: String,
    pub media_type: i64,
    pub code: String,
    pub user: PostUser,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<Caption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_versions2: Option<ImageVersions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_versions: Option<Vec<MediaUrl>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carousel_media: Option<Vec<CarouselFrame>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One page of the paginated remote feed, newest item first within the page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteBatch {
    pub items: Vec<RawPost>,
}

impl RemoteBatch {
    pub fn new(items: Vec<RawPost>) -> Self {
        Self { items }
    }
}

/// What to download for one post, derived at fetch time and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    Image { url: String },
    Video { url: String },
    Carousel { urls: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSource {
    /// Secondary key of the post, used to derive the target path.
    pub code: String,
    pub kind: MediaKind,
}

fn best_url(
    image_versions2: Option<&ImageVersions>,
    video_versions: Option<&[MediaUrl]>,
) -> Option<String> {
    if let Some(first) = video_versions.and_then(|videos| videos.first()) {
        return Some(first.url.clone());
    }
    image_versions2
        .and_then(|iv| iv.candidates.first())
        .map(|c| c.url.clone())
}

impl MediaSource {
    /// Derive the media source for a raw post under the given preference.
    /// Returns `None` when the post carries no downloadable asset (or the
    /// preference is `None`).
    pub fn from_raw(raw: &RawPost, preference: DownloadPreference) -> Option<Self> {
        match preference {
            DownloadPreference::None => None,
            DownloadPreference::Thumbnail => {
                let url = raw
                    .image_versions2
                    .as_ref()
                    .or_else(|| {
                        raw.carousel_media
                            .as_ref()
                            .and_then(|frames| frames.first())
                            .and_then(|frame| frame.image_versions2.as_ref())
                    })
                    .and_then(|iv| iv.candidates.first())
                    .map(|c| c.url.clone())?;
                Some(Self {
                    code: raw.code.clone(),
                    kind: MediaKind::Image { url },
                })
            }
            DownloadPreference::All => {
                if let Some(frames) = &raw.carousel_media {
                    let urls: Vec<String> = frames
                        .iter()
                        .filter_map(|frame| {
                            best_url(
                                frame.image_versions2.as_ref(),
                                frame.video_versions.as_deref(),
                            )
                        })
                        .collect();
                    if urls.is_empty() {
                        return None;
                    }
                    return Some(Self {
                        code: raw.code.clone(),
                        kind: MediaKind::Carousel { urls },
                    });
                }
                let url = best_url(raw.image_versions2.as_ref(), raw.video_versions.as_deref())?;
                let kind = if raw.video_versions.as_ref().is_some_and(|v| !v.is_empty()) {
                    MediaKind::Video { url }
                } else {
                    MediaKind::Image { url }
                };
                Some(Self {
                    code: raw.code.clone(),
                    kind,
                })
            }
        }
    }
}

/// The on-disk archive record: single source of truth across runs.
/// `posts` is ordered oldest-first and contains no duplicate pks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveRecord {
    pub url: String,
    pub download_media: DownloadPreference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub posts: Vec<Post>,
}

impl ArchiveRecord {
    pub fn new(url: String, download_media: DownloadPreference) -> Self {
        Self {
            url,
            download_media,
            last_synced_at: None,
            posts: Vec::new(),
        }
    }
}
