use crate::model::PlayEvent;
use anyhow::Result;

/// Lazily fetched plays, most recent first. An `Err` item ends the stream.
pub type Plays<'a> = Box<dyn Iterator<Item = Result<PlayEvent>> + 'a>;

/// Service that records what a user listened to.
pub trait History {
    fn recent_plays<'a>(&'a self, username: &str) -> Result<Plays<'a>>;
}
