//! On-disk archive record: `data.yml` next to a `media/` directory.
//!
//! The record is read once at the start of a run and written once at the
//! end. The write goes through a temp file plus rename so an interrupted
//! run can never corrupt the previous snapshot.
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::{ArchiveRecord, DownloadPreference};

pub const DATA_FILENAME: &str = "data.yml";
pub const MEDIA_DIRECTORY_NAME: &str = "media";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("archive not initialized (no {DATA_FILENAME} found); run `instarchive init` first")]
    NotInitialized,
    #[error("archive already initialized ({DATA_FILENAME} exists)")]
    AlreadyInitialized,
    #[error("invalid archive record: {0}")]
    Invalid(&'static str),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub fn data_file(dir: &Path) -> PathBuf {
    dir.join(DATA_FILENAME)
}

pub fn media_dir(dir: &Path) -> PathBuf {
    dir.join(MEDIA_DIRECTORY_NAME)
}

/// Create a fresh record. Refuses to clobber an existing archive.
pub fn init_record(
    dir: &Path,
    url: String,
    download_media: DownloadPreference,
) -> Result<ArchiveRecord, StoreError> {
    let path = data_file(dir);
    if path.exists() {
        return Err(StoreError::AlreadyInitialized);
    }
    let record = ArchiveRecord::new(url, download_media);
    save_record(dir, &record)?;
    Ok(record)
}

/// Load and validate the record for this archive directory.
pub fn load_record(dir: &Path) -> Result<ArchiveRecord, StoreError> {
    let path = data_file(dir);
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotInitialized)
        }
        Err(err) => return Err(err.into()),
    };
    let record: ArchiveRecord = serde_yaml::from_str(&content)?;
    validate(&record)?;
    Ok(record)
}

/// Terminal single replace of the record. Writes a sibling temp file and
/// renames it over the old one.
pub fn save_record(dir: &Path, record: &ArchiveRecord) -> Result<(), StoreError> {
    validate(record)?;
    fs::create_dir_all(dir)?;
    let path = data_file(dir);
    let tmp = dir.join(format!("{DATA_FILENAME}.tmp"));
    fs::write(&tmp, serde_yaml::to_string(record)?)?;
    fs::rename(&tmp, &path)?;
    Ok(())
}

/// Ensure the media directory exists; returns its path.
pub fn ensure_media_dir(dir: &Path) -> Result<PathBuf, StoreError> {
    let media = media_dir(dir);
    fs::create_dir_all(&media)?;
    Ok(media)
}

/// Outcome of a delete operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    pub posts_removed: usize,
    pub media_files_removed: usize,
}

/// Remove posts matching the given codes from the record and delete their
/// media (a single file for images/videos, a whole directory for
/// carousels). Ends with the usual terminal record replace.
pub fn delete_posts(dir: &Path, codes: &[String]) -> Result<DeleteSummary, StoreError> {
    let mut record = load_record(dir)?;
    let before = record.posts.len();
    record
        .posts
        .retain(|post| !codes.iter().any(|code| code == &post.code));

    let mut summary = DeleteSummary {
        posts_removed: before - record.posts.len(),
        media_files_removed: 0,
    };

    let media = media_dir(dir);
    if media.is_dir() {
        for code in codes {
            summary.media_files_removed += remove_media_for_code(&media, code)?;
        }
    }

    save_record(dir, &record)?;
    Ok(summary)
}

/// Delete `media/<code>` (carousel directory) or `media/<code>.<ext>`.
/// Matches on the exact code stem so `ab` never claims `abc.jpg`.
fn remove_media_for_code(media: &Path, code: &str) -> Result<usize, StoreError> {
    let mut removed = 0;
    for entry in fs::read_dir(media)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let matches = name == code
            || name
                .strip_prefix(code)
                .is_some_and(|rest| rest.starts_with('.'));
        if !matches {
            continue;
        }

        let path = entry.path();
        if path.is_dir() {
            removed += fs::read_dir(&path)?.count();
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
            removed += 1;
        }
    }
    Ok(removed)
}

fn validate(record: &ArchiveRecord) -> Result<(), StoreError> {
    if record.url.trim().is_empty() {
        return Err(StoreError::Invalid("url must be non-empty"));
    }
    let mut seen = HashSet::with_capacity(record.posts.len());
    for post in &record.posts {
        if post.pk.is_empty() {
            return Err(StoreError::Invalid("post with empty pk"));
        }
        if !seen.insert(post.pk.as_str()) {
            return Err(StoreError::Invalid("duplicate post pk"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Post, PostUser};
    use tempfile::tempdir;

    fn post(pk: &str) -> Post {
        Post {
            pk: pk.into(),
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
        }
    }

    const URL: &str = "https://www.instagram.com/alice/saved/travel/123/";

    #[test]
    fn init_then_load_round_trips() {
        let td = tempdir().unwrap();
        let record = init_record(td.path(), URL.into(), DownloadPreference::All).unwrap();
        assert!(record.posts.is_empty());

        let loaded = load_record(td.path()).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn init_refuses_existing_archive() {
        let td = tempdir().unwrap();
        init_record(td.path(), URL.into(), DownloadPreference::None).unwrap();
        assert!(matches!(
            init_record(td.path(), URL.into(), DownloadPreference::None),
            Err(StoreError::AlreadyInitialized)
        ));
    }

    #[test]
    fn missing_file_is_not_initialized() {
        let td = tempdir().unwrap();
        assert!(matches!(
            load_record(td.path()),
            Err(StoreError::NotInitialized)
        ));
    }

    #[test]
    fn save_replaces_previous_record() {
        let td = tempdir().unwrap();
        let mut record = init_record(td.path(), URL.into(), DownloadPreference::All).unwrap();
        record.posts.push(post("1"));
        record.posts.push(post("2"));
        save_record(td.path(), &record).unwrap();

        let loaded = load_record(td.path()).unwrap();
        assert_eq!(loaded.posts.len(), 2);
        assert!(!td.path().join(format!("{DATA_FILENAME}.tmp")).exists());
    }

    #[test]
    fn duplicate_pks_are_rejected() {
        let td = tempdir().unwrap();
        let mut record = ArchiveRecord::new(URL.into(), DownloadPreference::All);
        record.posts.push(post("1"));
        record.posts.push(post("1"));
        assert!(matches!(
            save_record(td.path(), &record),
            Err(StoreError::Invalid(_))
        ));
    }

    fn setup_archive(td: &tempfile::TempDir, pks: &[&str]) {
        let mut record = ArchiveRecord::new(URL.into(), DownloadPreference::All);
        record.posts = pks.iter().map(|pk| post(pk)).collect();
        save_record(td.path(), &record).unwrap();
        fs::create_dir_all(media_dir(td.path())).unwrap();
    }

    #[test]
    fn delete_removes_post_and_its_media_file() {
        let td = tempdir().unwrap();
        setup_archive(&td, &["1", "2"]);
        let media = media_dir(td.path());
        fs::write(media.join("c1.jpg"), b"x").unwrap();
        fs::write(media.join("c2.mp4"), b"x").unwrap();

        let summary = delete_posts(td.path(), &["c1".to_string()]).unwrap();
        assert_eq!(summary.posts_removed, 1);
        assert_eq!(summary.media_files_removed, 1);

        let record = load_record(td.path()).unwrap();
        assert_eq!(record.posts.len(), 1);
        assert_eq!(record.posts[0].pk, "2");
        assert!(!media.join("c1.jpg").exists());
        assert!(media.join("c2.mp4").exists());
    }

    #[test]
    fn delete_removes_whole_carousel_directory() {
        let td = tempdir().unwrap();
        setup_archive(&td, &["1"]);
        let media = media_dir(td.path());
        let carousel = media.join("c1");
        fs::create_dir_all(&carousel).unwrap();
        fs::write(carousel.join("1_a.jpg"), b"x").unwrap();
        fs::write(carousel.join("2_b.mp4"), b"x").unwrap();

        let summary = delete_posts(td.path(), &["c1".to_string()]).unwrap();
        assert_eq!(summary.posts_removed, 1);
        assert_eq!(summary.media_files_removed, 2);
        assert!(!carousel.exists());
        assert!(load_record(td.path()).unwrap().posts.is_empty());
    }

    #[test]
    fn delete_unknown_code_leaves_archive_untouched() {
        let td = tempdir().unwrap();
        setup_archive(&td, &["1", "2"]);

        let summary = delete_posts(td.path(), &["nope".to_string()]).unwrap();
        assert_eq!(summary, DeleteSummary::default());
        assert_eq!(load_record(td.path()).unwrap().posts.len(), 2);
    }

    #[test]
    fn delete_matches_exact_code_stem_only() {
        let td = tempdir().unwrap();
        setup_archive(&td, &["1"]);
        let media = media_dir(td.path());
        fs::write(media.join("c1.jpg"), b"x").unwrap();
        fs::write(media.join("c10.jpg"), b"x").unwrap();

        let summary = delete_posts(td.path(), &["c1".to_string()]).unwrap();
        assert_eq!(summary.media_files_removed, 1);
        assert!(!media.join("c1.jpg").exists());
        assert!(media.join("c10.jpg").exists());
    }

    #[test]
    fn delete_on_missing_archive_is_not_initialized() {
        let td = tempdir().unwrap();
        assert!(matches!(
            delete_posts(td.path(), &["c1".to_string()]),
            Err(StoreError::NotInitialized)
        ));
    }

    #[test]
    fn unknown_download_preference_fails_to_parse() {
        let td = tempdir().unwrap();
        fs::write(
            data_file(td.path()),
            "url: https://www.instagram.com/a/saved/b/\ndownload_media: sometimes\nposts: []\n",
        )
        .unwrap();
        assert!(matches!(load_record(td.path()), Err(StoreError::Yaml(_))));
    }
}
