use crate::model::{Album, AlbumKey};
use crate::persist::{self, DecodeError};
use anyhow::Result;
use std::collections::HashMap;
use std::path::Path;

const FORMAT: &str = "albums";

/// Albums discovered in one user's history, keyed by identity.
///
/// Entries are only ever inserted or updated, never removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlbumStore {
    albums: HashMap<AlbumKey, Album>,
}

impl AlbumStore {
    pub fn get(&self, key: &AlbumKey) -> Option<&Album> {
        self.albums.get(key)
    }

    pub fn get_mut(&mut self, key: &AlbumKey) -> Option<&mut Album> {
        self.albums.get_mut(key)
    }

    pub fn contains(&self, key: &AlbumKey) -> bool {
        self.albums.contains_key(key)
    }

    /// Returns the album stored under `key`, inserting the one built by
    /// `factory` first if there is none.
    pub fn upsert(
        &mut self,
        key: AlbumKey,
        factory: impl FnOnce(&AlbumKey) -> Album,
    ) -> &mut Album {
        self.albums.entry(key).or_insert_with_key(factory)
    }

    /// Albums whose track count is known. Albums of unknown length are left
    /// out rather than counted as empty.
    pub fn values(&self) -> impl Iterator<Item = &Album> {
        self.albums
            .values()
            .filter(|album| album.track_count.is_some())
    }

    pub fn all(&self) -> impl Iterator<Item = &Album> {
        self.albums.values()
    }

    pub fn len(&self) -> usize {
        self.albums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.albums.is_empty()
    }

    pub fn total_listens(&self) -> u64 {
        self.albums
            .values()
            .fold(0_u64, |sum, album| sum.saturating_add(album.listen_count))
    }

    pub fn serialize(&self) -> Result<String> {
        let mut albums: Vec<&Album> = self.albums.values().collect();
        albums.sort_by(|a, b| (&a.artist, &a.title).cmp(&(&b.artist, &b.title)));
        persist::encode(FORMAT, &albums)
    }

    pub fn deserialize(raw: &str) -> Result<Self, DecodeError> {
        let list: Vec<Album> = persist::decode(FORMAT, raw)?;
        let mut albums = HashMap::with_capacity(list.len());
        for album in list {
            let key = album.key();
            if albums.contains_key(&key) {
                return Err(DecodeError::Duplicate(key.to_string()));
            }
            albums.insert(key, album);
        }
        Ok(Self { albums })
    }

    pub fn load(path: &Path) -> Self {
        persist::restore_or_default(path, Self::deserialize)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        persist::write_state(path, &self.serialize()?, Self::deserialize)
    }
}
