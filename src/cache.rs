use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};
use serde_json::Value;
use tokio::fs;
use tracing::debug;

use crate::track::TrackMetadata;

#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

/// Single-record JSON store holding the last reconciled track.
pub struct LastSeenCache {
    path: PathBuf,
}

impl LastSeenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the stored record. A missing, unreadable or malformed file
    /// reads as no record.
    pub async fn load(&self) -> Option<TrackMetadata> {
        let data = match fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(err) => {
                debug!(path = %self.path.display(), error = %err, "No cached song");
                return None;
            }
        };

        let value: Value = match serde_json::from_str(&data) {
            Ok(value) => value,
            Err(err) => {
                debug!(path = %self.path.display(), error = %err, "Ignoring malformed cache file");
                return None;
            }
        };
        if !is_record(&value) {
            debug!(path = %self.path.display(), "Cache file holds no song record");
            return None;
        }

        match serde_json::from_value(value) {
            Ok(track) => Some(track),
            Err(err) => {
                debug!(path = %self.path.display(), error = %err, "Ignoring malformed cache file");
                None
            }
        }
    }

    /// Replaces the stored record. The new content is written to a sibling
    /// file and renamed over the old one, so a failed write leaves the
    /// previous record intact.
    pub async fn store(&self, track: &TrackMetadata) -> Result<(), CacheError> {
        let data = serde_json::to_string(track)?;
        let staging = self.staging_path();
        let io = |source| CacheError::Io {
            path: self.path.clone(),
            source,
        };

        if let Err(err) = fs::write(&staging, data).await {
            let _ = fs::remove_file(&staging).await;
            return Err(io(err));
        }
        if let Err(err) = fs::rename(&staging, &self.path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(io(err));
        }
        Ok(())
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| OsString::from("cache"));
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// A record is an object carrying at least one of the compared keys.
fn is_record(value: &Value) -> bool {
    value.as_object().is_some_and(|map| {
        ["title", "artist", "album"]
            .iter()
            .any(|key| map.contains_key(*key))
    })
}
