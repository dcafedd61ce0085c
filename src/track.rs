use serde::{Deserialize, Serialize};

/// Metadata for the track the player reports as current.
///
/// Two values compare equal when title, artist and album match. The album
/// artist is carried along (and persisted) but never takes part in change
/// detection.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_artist: String,
}

impl PartialEq for TrackMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.title == other.title && self.artist == other.artist && self.album == other.album
    }
}

impl Eq for TrackMetadata {}

impl TrackMetadata {
    /// Builds metadata from the `Key  Value` block printed by the player CLI.
    ///
    /// Each line is trimmed and split on whitespace; the first token is the
    /// key and the remaining tokens, joined by single spaces, are the value.
    /// Keys that never appear stay empty.
    pub fn parse(output: &str) -> Self {
        let mut track = TrackMetadata::default();
        for line in output.trim().lines() {
            let mut tokens = line.split_whitespace();
            let Some(key) = tokens.next() else {
                continue;
            };
            let value = tokens.collect::<Vec<_>>().join(" ");
            match key {
                "Title" => track.title = value,
                "Artist" => track.artist = value,
                "Album" => track.album = value,
                "AlbumArtist" => track.album_artist = value,
                _ => {}
            }
        }
        track
    }

    /// `Artist - Title`, exactly as reported.
    pub fn label(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }
}

/// Label for the previously reconciled track. A missing record or missing
/// parts of it show as `N/A`.
pub fn last_seen_label(last_seen: Option<&TrackMetadata>) -> String {
    fn or_na(value: Option<&str>) -> &str {
        match value {
            Some(value) if !value.is_empty() => value,
            _ => "N/A",
        }
    }
    format!(
        "{} - {}",
        or_na(last_seen.map(|track| track.artist.as_str())),
        or_na(last_seen.map(|track| track.title.as_str()))
    )
}

/// Whether `current` should trigger a reload given the last reconciled track.
pub fn has_changed(current: &TrackMetadata, last_seen: Option<&TrackMetadata>) -> bool {
    last_seen != Some(current)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PlaybackState {
    Playing,
    NotPlaying,
}

impl PlaybackState {
    /// Only the exact token `Playing` counts as active playback.
    pub fn from_status(status: &str) -> Self {
        if status.trim() == "Playing" {
            PlaybackState::Playing
        } else {
            PlaybackState::NotPlaying
        }
    }
}
