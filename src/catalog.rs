use crate::model::{AlbumKey, CatalogOutcome};

/// Service that can confirm whether an album is available.
///
/// A lookup never returns an error: transport trouble is reported as
/// [`CatalogOutcome::LookupFailed`] so the caller can tell it apart from a
/// definitive "not found".
pub trait Catalog {
    fn search(&mut self, key: &AlbumKey) -> CatalogOutcome;
}
