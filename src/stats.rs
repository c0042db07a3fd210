use crate::album_store::AlbumStore;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Per-stream payout in US dollars, as reported by Digital Music News
/// (January 2018).
pub const PAYOUT_RATES: [(&str, f64); 10] = [
    ("groove music", 0.02730),
    ("napster", 0.01682),
    ("tidal", 0.01284),
    ("apple music", 0.00783),
    ("amazon", 0.0074),
    ("deezer", 0.00624),
    ("google play", 0.00611),
    ("spotify", 0.00397),
    ("pandora", 0.00134),
    ("youtube", 0.00074),
];

#[derive(Debug, Clone, PartialEq)]
pub struct StatsSummary {
    pub albums: usize,
    pub artists: usize,
    /// Listens summed over each artist's albums, averaged over artists.
    pub avg_artist_streams: f64,
    pub avg_album_streams: f64,
    pub avg_album_length: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payout {
    pub service: &'static str,
    pub per_album: f64,
    pub per_track: f64,
}

/// Summarizes the albums of known length. `None` when there are none.
pub fn summarize(store: &AlbumStore) -> Option<StatsSummary> {
    let mut artist_streams: HashMap<&str, u64> = HashMap::new();
    let mut albums = 0_usize;
    let mut listens = 0_u64;
    let mut tracks = 0_u64;

    for album in store.values() {
        let Some(track_count) = album.track_count else {
            continue;
        };
        albums += 1;
        listens = listens.saturating_add(album.listen_count);
        tracks = tracks.saturating_add(u64::from(track_count));
        let streams = artist_streams.entry(album.artist.as_str()).or_default();
        *streams = streams.saturating_add(album.listen_count);
    }

    if albums == 0 {
        return None;
    }

    let artists = artist_streams.len();
    let artist_total: u64 = artist_streams.values().sum();
    Some(StatsSummary {
        albums,
        artists,
        avg_artist_streams: artist_total as f64 / artists as f64,
        avg_album_streams: listens as f64 / albums as f64,
        avg_album_length: tracks as f64 / albums as f64,
    })
}

impl StatsSummary {
    pub fn payouts(&self) -> Vec<Payout> {
        PAYOUT_RATES
            .iter()
            .map(|&(service, rate)| {
                let per_album = rate * self.avg_album_streams;
                let per_track = if self.avg_album_length > 0.0 {
                    per_album / self.avg_album_length
                } else {
                    0.0
                };
                Payout {
                    service,
                    per_album,
                    per_track,
                }
            })
            .collect()
    }
}

pub fn render(username: &str, summary: Option<&StatsSummary>) -> String {
    let mut out = String::new();
    let Some(summary) = summary else {
        let _ = writeln!(out, "{username} has no albums with a known length yet.");
        return out;
    };

    let _ = writeln!(out, "{username}'s averages:");
    let _ = writeln!(out, "\tartist streams: {:.2}", summary.avg_artist_streams);
    let _ = writeln!(out, "\talbum streams: {:.2}", summary.avg_album_streams);
    let _ = writeln!(out, "\talbum length: {:.2} tracks", summary.avg_album_length);
    let _ = writeln!(out, "\tpayouts:");
    for payout in summary.payouts() {
        let _ = writeln!(
            out,
            "\t\t{}: ${:.3}/album, ${:.3}/track",
            payout.service, payout.per_album, payout.per_track
        );
    }
    out
}

pub fn print_report(username: &str, store: &AlbumStore) {
    print!("{}", render(username, summarize(store).as_ref()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Album, AlbumKey};

    fn store_with(albums: &[(&str, &str, Option<u32>, u64)]) -> AlbumStore {
        let mut store = AlbumStore::default();
        for (artist, title, track_count, listens) in albums {
            let album = store.upsert(AlbumKey::new(*artist, *title), |key| {
                Album::new(key, *track_count)
            });
            album.listen_count = *listens;
        }
        store
    }

    #[test]
    fn averages_use_listens_per_artist() {
        let store = store_with(&[
            ("A", "X", Some(10), 6),
            ("A", "W", Some(8), 2),
            ("B", "Y", Some(12), 4),
        ]);
        let summary = summarize(&store).expect("summary");

        assert_eq!(summary.albums, 3);
        assert_eq!(summary.artists, 2);
        assert!((summary.avg_artist_streams - 6.0).abs() < 1e-9);
        assert!((summary.avg_album_streams - 4.0).abs() < 1e-9);
        assert!((summary.avg_album_length - 10.0).abs() < 1e-9);
    }

    #[test]
    fn albums_of_unknown_length_are_ignored() {
        let store = store_with(&[("A", "X", Some(10), 2), ("B", "Y", None, 100)]);
        let summary = summarize(&store).expect("summary");
        assert_eq!(summary.albums, 1);
        assert!((summary.avg_album_streams - 2.0).abs() < 1e-9);

        assert_eq!(summarize(&store_with(&[("B", "Y", None, 3)])), None);
    }

    #[test]
    fn payouts_follow_rate_table() {
        let summary = StatsSummary {
            albums: 1,
            artists: 1,
            avg_artist_streams: 100.0,
            avg_album_streams: 100.0,
            avg_album_length: 10.0,
        };
        let payouts = summary.payouts();
        assert_eq!(payouts.len(), PAYOUT_RATES.len());
        assert_eq!(payouts[0].service, "groove music");
        assert!((payouts[0].per_album - 2.73).abs() < 1e-9);
        assert!((payouts[0].per_track - 0.273).abs() < 1e-9);
    }

    #[test]
    fn render_lists_every_service() {
        let store = store_with(&[("A", "X", Some(10), 100)]);
        let text = render("alice", summarize(&store).as_ref());

        assert!(text.starts_with("alice's averages:\n"));
        assert!(text.contains("\t\tspotify: $0.397/album, $0.040/track\n"));
        assert_eq!(text.matches("/album").count(), PAYOUT_RATES.len());
        assert_eq!(
            render("bob", None),
            "bob has no albums with a known length yet.\n"
        );
    }
}
