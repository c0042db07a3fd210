use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an album: exact, case-sensitive (artist, title) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlbumKey {
    pub artist: String,
    pub title: String,
}

impl AlbumKey {
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            artist: artist.into(),
            title: title.into(),
        }
    }
}

impl fmt::Display for AlbumKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.artist, self.title)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Album {
    pub artist: String,
    pub title: String,
    /// Size of the canonical track listing. `None` means the length could
    /// not be determined and the album is left out of length statistics.
    pub track_count: Option<u32>,
    pub listen_count: u64,
}

impl Album {
    pub fn new(key: &AlbumKey, track_count: Option<u32>) -> Self {
        Self {
            artist: key.artist.clone(),
            title: key.title.clone(),
            track_count,
            listen_count: 0,
        }
    }

    pub fn key(&self) -> AlbumKey {
        AlbumKey::new(self.artist.clone(), self.title.clone())
    }

    pub fn listen(&mut self) {
        self.listen_count = self.listen_count.saturating_add(1);
    }
}

/// One scrobbled play as reported by the history service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayEvent {
    pub artist: String,
    pub album: Option<String>,
    pub track: String,
}

impl PlayEvent {
    pub fn new(artist: &str, album: Option<&str>, track: &str) -> Self {
        Self {
            artist: artist.to_string(),
            album: album.map(str::to_string),
            track: track.to_string(),
        }
    }

    /// Album identity of this play, or `None` when the play carries no
    /// album affiliation.
    pub fn album_key(&self) -> Option<AlbumKey> {
        let album = self.album.as_deref()?;
        if album.is_empty() {
            return None;
        }
        Some(AlbumKey::new(self.artist.clone(), album))
    }
}

/// Result of asking the catalog whether an album exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogOutcome {
    Found { track_count: Option<u32> },
    DefinitelyAbsent,
    LookupFailed(String),
}
