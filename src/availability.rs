use crate::model::AlbumKey;
use crate::persist::{self, DecodeError};
use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;

const FORMAT: &str = "unavailable";

/// Albums the catalog has definitively reported as absent.
///
/// Shared by every user. Membership is only ever added: an identity lands
/// here after a definitive "not found" answer, never after a failed lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvailabilityCache {
    absent: HashSet<AlbumKey>,
}

impl AvailabilityCache {
    pub fn contains(&self, key: &AlbumKey) -> bool {
        self.absent.contains(key)
    }

    /// Returns `true` if the identity was not already recorded.
    pub fn add(&mut self, key: AlbumKey) -> bool {
        self.absent.insert(key)
    }

    pub fn len(&self) -> usize {
        self.absent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.absent.is_empty()
    }

    pub fn serialize(&self) -> Result<String> {
        let mut entries: Vec<&AlbumKey> = self.absent.iter().collect();
        entries.sort();
        persist::encode(FORMAT, &entries)
    }

    pub fn deserialize(raw: &str) -> Result<Self, DecodeError> {
        let entries: Vec<AlbumKey> = persist::decode(FORMAT, raw)?;
        Ok(Self {
            absent: entries.into_iter().collect(),
        })
    }

    pub fn load(path: &Path) -> Self {
        persist::restore_or_default(path, Self::deserialize)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        persist::write_state(path, &self.serialize()?, Self::deserialize)
    }
}
