use crate::history::{History, Plays};
use crate::model::PlayEvent;
use anyhow::{Context, Result};
use log::{debug, warn};
use serde_json::Value;
use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

const API_ROOT: &str = "https://ws.audioscrobbler.com/2.0/";
const PAGE_SIZE: u32 = 200;
const PAGE_ATTEMPTS: u32 = 3;
const PAGE_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastfmCredentials {
    pub api_key: String,
    pub api_secret: String,
}

pub struct LastfmClient {
    http_client: ureq::Agent,
    credentials: LastfmCredentials,
    session_key: Option<String>,
}

impl LastfmClient {
    pub fn new(credentials: LastfmCredentials) -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(30))
            .timeout_write(Duration::from_secs(15))
            .build();
        Self {
            http_client,
            credentials,
            session_key: None,
        }
    }

    /// Opens an authenticated session for `username`. Later requests are
    /// signed with it.
    pub fn authenticate(&mut self, username: &str, password: &str) -> Result<()> {
        let params = self.signed(vec![
            ("method".to_string(), "auth.getMobileSession".to_string()),
            ("username".to_string(), username.to_string()),
            ("password".to_string(), password.to_string()),
        ]);
        let form: Vec<(&str, &str)> = params
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        let response = match self.http_client.post(API_ROOT).send_form(&form) {
            Ok(response) => response,
            // Last.fm reports bad credentials as a 4xx with a JSON body.
            Err(ureq::Error::Status(_, response)) => response,
            Err(err) => return Err(err).context("Last.fm authentication request failed"),
        };
        let body: Value = response
            .into_json()
            .context("failed to parse Last.fm authentication response")?;
        let key = parse_session(&body)?;
        debug!("authenticated with Last.fm as {username}");
        self.session_key = Some(key);
        Ok(())
    }

    /// Adds `api_key`, the session key if any, and `api_sig` to `params`.
    fn signed(&self, mut params: Vec<(String, String)>) -> Vec<(String, String)> {
        params.push(("api_key".to_string(), self.credentials.api_key.clone()));
        if let Some(session_key) = &self.session_key {
            params.push(("sk".to_string(), session_key.clone()));
        }
        let signature = api_signature(&params, &self.credentials.api_secret);
        params.push(("api_sig".to_string(), signature));
        params.push(("format".to_string(), "json".to_string()));
        params
    }

    fn recent_tracks_url(&self, username: &str, page: u32) -> String {
        let params = self.signed(vec![
            ("method".to_string(), "user.getRecentTracks".to_string()),
            ("user".to_string(), username.to_string()),
            ("limit".to_string(), PAGE_SIZE.to_string()),
            ("page".to_string(), page.to_string()),
        ]);
        let query: Vec<String> = params
            .iter()
            .map(|(key, value)| format!("{key}={}", urlencoding::encode(value)))
            .collect();
        format!("{API_ROOT}?{}", query.join("&"))
    }

    fn fetch_page(&self, username: &str, page: u32) -> Result<RecentPage> {
        let url = self.recent_tracks_url(username, page);
        let response = match self.http_client.get(&url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(err) => {
                return Err(err).with_context(|| format!("Last.fm request for page {page} failed"));
            }
        };
        let body: Value = response
            .into_json()
            .with_context(|| format!("failed to parse Last.fm page {page}"))?;
        parse_recent_page(&body)
    }
}

impl History for LastfmClient {
    fn recent_plays<'a>(&'a self, username: &str) -> Result<Plays<'a>> {
        Ok(Box::new(RecentPlays {
            client: self,
            username: username.to_string(),
            next_page: 1,
            total_pages: None,
            buffered: VecDeque::new(),
            finished: false,
        }))
    }
}

/// Walks the scrobble history page by page, fetching each page only when
/// the previous one is used up.
struct RecentPlays<'a> {
    client: &'a LastfmClient,
    username: String,
    next_page: u32,
    total_pages: Option<u32>,
    buffered: VecDeque<PlayEvent>,
    finished: bool,
}

impl Iterator for RecentPlays<'_> {
    type Item = Result<PlayEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(play) = self.buffered.pop_front() {
                return Some(Ok(play));
            }
            if self.finished {
                return None;
            }
            if self.total_pages.is_some_and(|total| self.next_page > total) {
                self.finished = true;
                return None;
            }

            let page = self.next_page;
            let fetched = with_retries(PAGE_ATTEMPTS, PAGE_RETRY_DELAY, |attempt| {
                if attempt > 1 {
                    debug!("fetching history page {page}, attempt {attempt}");
                }
                self.client.fetch_page(&self.username, page)
            });
            match fetched {
                Ok(page) => {
                    debug!(
                        "fetched history page {}/{} for {}",
                        self.next_page, page.total_pages, self.username
                    );
                    self.total_pages = Some(page.total_pages);
                    self.next_page += 1;
                    if page.plays.is_empty() {
                        self.finished = true;
                    }
                    self.buffered.extend(page.plays);
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Runs `fetch` up to `max_attempts` times, doubling the pause after each
/// failure. The last error is returned if every attempt fails.
fn with_retries<T>(
    max_attempts: u32,
    base_delay: Duration,
    mut fetch: impl FnMut(u32) -> Result<T>,
) -> Result<T> {
    let mut attempt = 1_u32;
    let mut delay = base_delay;
    loop {
        match fetch(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts => {
                warn!("{err:#}, retrying in {delay:?}");
                thread::sleep(delay);
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct RecentPage {
    plays: Vec<PlayEvent>,
    total_pages: u32,
}

/// md5 over the parameters sorted by name, concatenated as `namevalue`,
/// followed by the shared secret. `format` and `callback` are not signed.
fn api_signature(params: &[(String, String)], secret: &str) -> String {
    let mut signed: Vec<&(String, String)> = params
        .iter()
        .filter(|(key, _)| key != "format" && key != "callback")
        .collect();
    signed.sort_by(|a, b| a.0.cmp(&b.0));
    let mut payload = String::new();
    for (key, value) in signed {
        payload.push_str(key);
        payload.push_str(value);
    }
    payload.push_str(secret);
    format!("{:x}", md5::compute(payload))
}

fn api_error(body: &Value) -> Option<String> {
    let code = body.get("error")?.as_i64()?;
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    Some(format!("Last.fm error {code}: {message}"))
}

fn parse_session(body: &Value) -> Result<String> {
    if let Some(message) = api_error(body) {
        anyhow::bail!(message);
    }
    body.get("session")
        .and_then(|session| session.get("key"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .context("Last.fm authentication response has no session key")
}

fn array_or_single(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(item @ Value::Object(_)) => vec![item],
        _ => Vec::new(),
    }
}

fn text_of(value: Option<&Value>) -> Option<&str> {
    match value? {
        Value::String(text) => Some(text.as_str()),
        object @ Value::Object(_) => object.get("#text").and_then(Value::as_str),
        _ => None,
    }
}

fn parse_recent_page(body: &Value) -> Result<RecentPage> {
    if let Some(message) = api_error(body) {
        anyhow::bail!(message);
    }
    let recent = body
        .get("recenttracks")
        .context("Last.fm response has no recenttracks")?;
    let total_pages = recent
        .get("@attr")
        .and_then(|attr| attr.get("totalPages"))
        .and_then(|pages| match pages {
            Value::String(text) => text.parse().ok(),
            Value::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
            _ => None,
        })
        .unwrap_or(0);

    let plays = array_or_single(recent.get("track"))
        .into_iter()
        .filter(|track| {
            // The track currently playing is listed first but is not a scrobble yet.
            track
                .get("@attr")
                .and_then(|attr| attr.get("nowplaying"))
                .and_then(Value::as_str)
                != Some("true")
        })
        .filter_map(|track| {
            let artist = text_of(track.get("artist"))?;
            let title = track.get("name").and_then(Value::as_str)?;
            let album = text_of(track.get("album")).filter(|album| !album.is_empty());
            Some(PlayEvent::new(artist, album, title))
        })
        .collect();

    Ok(RecentPage { plays, total_pages })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> LastfmClient {
        LastfmClient::new(LastfmCredentials {
            api_key: String::from("key"),
            api_secret: String::from("secret"),
        })
    }

    #[test]
    fn signature_sorts_params_and_skips_format() {
        let params = vec![
            ("method".to_string(), "auth.getMobileSession".to_string()),
            ("api_key".to_string(), "key".to_string()),
            ("format".to_string(), "json".to_string()),
        ];
        let expected = format!(
            "{:x}",
            md5::compute("api_keykeymethodauth.getMobileSessionsecret")
        );
        assert_eq!(api_signature(&params, "secret"), expected);
    }

    #[test]
    fn recent_tracks_url_is_encoded_and_signed() {
        let url = client().recent_tracks_url("some user", 3);
        assert!(url.starts_with(API_ROOT));
        assert!(url.contains("user=some%20user"));
        assert!(url.contains("page=3"));
        assert!(url.contains("api_sig="));
        assert!(url.ends_with("format=json"));
    }

    #[test]
    fn page_parsing_skips_now_playing_and_blank_albums() {
        let body = json!({
            "recenttracks": {
                "@attr": { "page": "1", "totalPages": "4" },
                "track": [
                    {
                        "@attr": { "nowplaying": "true" },
                        "artist": { "#text": "A" },
                        "album": { "#text": "X" },
                        "name": "live"
                    },
                    {
                        "artist": { "#text": "A" },
                        "album": { "#text": "X" },
                        "name": "t1"
                    },
                    {
                        "artist": { "#text": "B" },
                        "album": { "#text": "" },
                        "name": "single"
                    }
                ]
            }
        });

        let page = parse_recent_page(&body).expect("page");
        assert_eq!(page.total_pages, 4);
        assert_eq!(
            page.plays,
            vec![
                PlayEvent::new("A", Some("X"), "t1"),
                PlayEvent::new("B", None, "single"),
            ]
        );
    }

    #[test]
    fn single_track_page_is_not_an_array() {
        let body = json!({
            "recenttracks": {
                "@attr": { "totalPages": "1" },
                "track": { "artist": { "#text": "A" }, "album": { "#text": "X" }, "name": "t" }
            }
        });
        assert_eq!(parse_recent_page(&body).expect("page").plays.len(), 1);
    }

    #[test]
    fn page_fetch_recovers_from_a_transient_failure() {
        let mut calls = 0;
        let page = with_retries(3, Duration::ZERO, |attempt| {
            calls += 1;
            if attempt < 2 {
                anyhow::bail!("Last.fm error 16: temporarily unavailable");
            }
            Ok(attempt)
        });
        assert_eq!(page.expect("second attempt"), 2);
        assert_eq!(calls, 2);
    }

    #[test]
    fn page_fetch_gives_up_after_bounded_attempts() {
        let mut calls = 0;
        let result: Result<()> = with_retries(3, Duration::ZERO, |attempt| {
            calls += 1;
            anyhow::bail!("page failed on attempt {attempt}")
        });
        let err = result.expect_err("every attempt failed");
        assert_eq!(calls, 3);
        assert!(err.to_string().contains("attempt 3"));
    }

    #[test]
    fn api_errors_are_reported() {
        let body = json!({ "error": 6, "message": "User not found" });
        let err = parse_recent_page(&body).expect_err("error body");
        assert!(err.to_string().contains("User not found"));
        assert!(parse_session(&body).is_err());
        assert_eq!(
            parse_session(&json!({ "session": { "name": "u", "key": "abc" } })).expect("key"),
            "abc"
        );
    }
}
