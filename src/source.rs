//! Resolving user queries into tracks.
//!
//! Catalog lookups (search, playlists on streaming services) live behind the
//! [`SourceManager`] trait; the engine only ever sees the resulting tracks.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use std::path::Path;

use crate::track::{AudioMeta, Track, TrackSource};

lazy_static! {
    static ref URL_RE: Regex = Regex::new(
        r"(?i)^(?:http|ftp)s?://(?:(?:[A-Z0-9](?:[A-Z0-9-]{0,61}[A-Z0-9])?\.)+(?:[A-Z]{2,6}\.?|[A-Z0-9-]{2,}\.?)|localhost|\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3})(?::\d+)?(?:/?|[/?]\S+)$"
    )
    .expect("URL regex is valid");
}

/// Whether `url` looks like an absolute http(s)/ftp(s) URL.
pub fn validate_url(url: &str) -> bool {
    URL_RE.is_match(url)
}

#[derive(Debug)]
pub struct Playlist {
    pub tracks: Vec<Track>,
    pub info: Option<AudioMeta>,
}

#[async_trait]
pub trait SourceManager: Send + Sync {
    /// Best match for `query`.
    async fn get_track(&self, query: &str) -> Result<Track>;

    async fn search_tracks(&self, query: &str) -> Result<Vec<Track>>;

    async fn get_playlist(&self, query: &str) -> Result<Playlist>;
}

/// Resolves URLs and local paths directly, without any catalog: a URL or a
/// file is a single track, a directory is a playlist of the files in it.
#[derive(Clone, Debug, Default)]
pub struct DirectSourceManager;

impl DirectSourceManager {
    fn url_track(url: &str) -> Track {
        let title = url
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').find(|segment| !segment.is_empty()))
            .unwrap_or(url);

        Track::new(TrackSource::locator(url), AudioMeta::new(title))
    }

    fn file_track(path: &Path) -> Track {
        let title = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Track::new(
            TrackSource::locator(path.to_string_lossy()),
            AudioMeta::new(title),
        )
    }
}

#[async_trait]
impl SourceManager for DirectSourceManager {
    async fn get_track(&self, query: &str) -> Result<Track> {
        let query = query.trim();

        if validate_url(query) {
            return Ok(Self::url_track(query));
        }

        let path = Path::new(query);
        let metadata = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("{query} is neither a URL nor a readable file"))?;

        if !metadata.is_file() {
            bail!("{query} is not a file");
        }

        Ok(Self::file_track(path))
    }

    async fn search_tracks(&self, query: &str) -> Result<Vec<Track>> {
        // Without a catalog the only match is the query itself
        Ok(vec![self.get_track(query).await?])
    }

    async fn get_playlist(&self, query: &str) -> Result<Playlist> {
        let dir = Path::new(query.trim());
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .with_context(|| format!("Failed to read playlist directory {}", dir.display()))?;

        let mut paths = vec![];
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                paths.push(entry.path());
            }
        }
        paths.sort();

        let tracks = paths.iter().map(|path| Self::file_track(path)).collect();
        let info = dir
            .file_name()
            .map(|name| AudioMeta::new(name.to_string_lossy()));

        Ok(Playlist { tracks, info })
    }
}
