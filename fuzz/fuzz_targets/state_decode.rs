#![no_main]

use libfuzzer_sys::fuzz_target;
use tally::album_store::AlbumStore;
use tally::availability::AvailabilityCache;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(store) = AlbumStore::deserialize(raw) {
        let again = store.serialize().expect("serialize decoded store");
        assert_eq!(AlbumStore::deserialize(&again).ok(), Some(store));
    }
    if let Ok(cache) = AvailabilityCache::deserialize(raw) {
        let again = cache.serialize().expect("serialize decoded cache");
        assert_eq!(AvailabilityCache::deserialize(&again).ok(), Some(cache));
    }
});
