use crate::album_store::AlbumStore;
use crate::availability::AvailabilityCache;
use crate::catalog::Catalog;
use crate::config::DataDir;
use crate::model::{Album, CatalogOutcome, PlayEvent};
use anyhow::Result;
use log::{debug, info, warn};
use thiserror::Error;

/// Persisting the run's results failed. The aggregated store is handed back
/// so the caller can retry the save instead of losing the run.
#[derive(Debug, Error)]
#[error("failed to persist aggregated state: {source}")]
pub struct AggregateError {
    pub store: AlbumStore,
    #[source]
    pub source: anyhow::Error,
}

/// Counters describing what one pass over the history did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub events: u64,
    pub without_album: u64,
    pub counted: u64,
    pub known_absent: u64,
    pub lookups: u64,
    pub discovered: u64,
    pub newly_absent: u64,
    pub lookup_failures: u64,
}

/// In-memory state of one aggregation pass.
///
/// Only albums the catalog confirms are kept. Definitive "not found" answers
/// go into the shared [`AvailabilityCache`] so later plays skip the lookup;
/// failed lookups are not remembered and are retried on the next play.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    store: AlbumStore,
    cache: AvailabilityCache,
    summary: RunSummary,
}

impl Accumulator {
    pub fn new(store: AlbumStore, cache: AvailabilityCache) -> Self {
        Self {
            store,
            cache,
            summary: RunSummary::default(),
        }
    }

    pub fn store(&self) -> &AlbumStore {
        &self.store
    }

    pub fn cache(&self) -> &AvailabilityCache {
        &self.cache
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    pub fn into_parts(self) -> (AlbumStore, AvailabilityCache) {
        (self.store, self.cache)
    }

    /// Applies one play. The first play of a newly confirmed album counts as
    /// its first listen.
    pub fn record<C: Catalog + ?Sized>(&mut self, event: &PlayEvent, catalog: &mut C) {
        self.summary.events += 1;

        let Some(key) = event.album_key() else {
            self.summary.without_album += 1;
            return;
        };

        if let Some(album) = self.store.get_mut(&key) {
            album.listen();
            self.summary.counted += 1;
            return;
        }

        if self.cache.contains(&key) {
            self.summary.known_absent += 1;
            return;
        }

        self.summary.lookups += 1;
        match catalog.search(&key) {
            CatalogOutcome::Found { track_count } => {
                info!("{key}");
                self.store
                    .upsert(key, |key| Album::new(key, track_count))
                    .listen();
                self.summary.discovered += 1;
                self.summary.counted += 1;
            }
            CatalogOutcome::DefinitelyAbsent => {
                debug!("not in catalog: {key}");
                self.cache.add(key);
                self.summary.newly_absent += 1;
            }
            CatalogOutcome::LookupFailed(reason) => {
                warn!("catalog lookup for {key} failed: {reason}");
                self.summary.lookup_failures += 1;
            }
        }
    }
}

/// Runs aggregations against a catalog, resuming from and saving to a data
/// directory.
pub struct Aggregator<C> {
    catalog: C,
    data_dir: DataDir,
}

impl<C: Catalog> Aggregator<C> {
    pub fn new(catalog: C, data_dir: DataDir) -> Self {
        Self { catalog, data_dir }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Folds `events` into the saved album store of `username` and saves the
    /// result along with the shared availability cache.
    ///
    /// Missing or unreadable saved state starts the run empty. A history
    /// error ends the stream early; everything consumed before it is kept.
    pub fn aggregate<I>(&mut self, username: &str, events: I) -> Result<AlbumStore, AggregateError>
    where
        I: IntoIterator<Item = Result<PlayEvent>>,
    {
        let albums_path = self.data_dir.albums_path(username);
        let unavailable_path = self.data_dir.unavailable_path();

        let store = AlbumStore::load(&albums_path);
        let cache = AvailabilityCache::load(&unavailable_path);
        info!(
            "resuming {username} with {} albums, {} known unavailable",
            store.len(),
            cache.len()
        );

        let mut acc = Accumulator::new(store, cache);
        for event in events {
            match event {
                Ok(event) => acc.record(&event, &mut self.catalog),
                Err(err) => {
                    warn!("history ended early: {err:#}");
                    break;
                }
            }
        }

        let summary = acc.summary();
        info!(
            "{} plays read, {} counted, {} albums discovered, {} unavailable, {} lookups failed",
            summary.events,
            summary.counted,
            summary.discovered,
            summary.newly_absent,
            summary.lookup_failures
        );

        let (store, cache) = acc.into_parts();
        if let Err(source) = store.save(&albums_path) {
            return Err(AggregateError { store, source });
        }
        if let Err(source) = cache.save(&unavailable_path) {
            return Err(AggregateError { store, source });
        }
        Ok(store)
    }
}
