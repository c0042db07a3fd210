use crate::catalog::Catalog;
use crate::model::{AlbumKey, CatalogOutcome};
use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use time::OffsetDateTime;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const SEARCH_URL: &str = "https://api.spotify.com/v1/search";
const TOKEN_EXPIRY_MARGIN_SECONDS: i64 = 60;
const MAX_SEARCH_ATTEMPTS: u32 = 4;
const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpotifyCredentials {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CachedToken {
    access_token: String,
    expires_at_epoch_seconds: i64,
}

impl CachedToken {
    fn is_fresh(&self, now_epoch_seconds: i64) -> bool {
        self.expires_at_epoch_seconds - TOKEN_EXPIRY_MARGIN_SECONDS > now_epoch_seconds
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, PartialEq, Eq)]
enum SearchError {
    Unauthorized,
    /// HTTP 429, with the wait the server asked for if it sent one.
    RateLimited(Option<Duration>),
    /// 5xx that is usually gone a moment later.
    Unavailable(u16),
    Failed(String),
}

impl SearchError {
    fn into_reason(self) -> String {
        match self {
            SearchError::Unauthorized => String::from("Spotify rejected a fresh token"),
            SearchError::RateLimited(_) => String::from("Spotify kept rate limiting the search"),
            SearchError::Unavailable(code) => format!("Spotify returned HTTP {code}"),
            SearchError::Failed(reason) => reason,
        }
    }
}

/// Spotify catalog using the client-credentials flow. The access token is
/// cached per account in the data directory and refreshed when it expires
/// or is rejected.
pub struct SpotifyCatalog {
    http_client: ureq::Agent,
    credentials: SpotifyCredentials,
    token_path: PathBuf,
    token: CachedToken,
}

impl SpotifyCatalog {
    /// Obtains an access token, reusing the one cached at `token_path` while
    /// it is still valid.
    pub fn connect(credentials: SpotifyCredentials, token_path: PathBuf) -> Result<Self> {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(15))
            .timeout_write(Duration::from_secs(15))
            .build();

        let now = now_epoch_seconds();
        let cached = load_cached_token(&token_path).filter(|token| token.is_fresh(now));
        let (token, fetched) = match cached {
            Some(token) => {
                debug!("reusing cached Spotify token from {}", token_path.display());
                (token, false)
            }
            None => (request_token(&http_client, &credentials)?, true),
        };

        let catalog = Self {
            http_client,
            credentials,
            token_path,
            token,
        };
        if fetched {
            catalog.store_token();
        }
        Ok(catalog)
    }

    fn refresh_token(&mut self) -> Result<()> {
        self.token = request_token(&self.http_client, &self.credentials)?;
        self.store_token();
        Ok(())
    }

    fn store_token(&self) {
        let written = serde_json::to_string_pretty(&self.token)
            .context("failed to encode Spotify token")
            .and_then(|json| {
                if let Some(parent) = self.token_path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&self.token_path, json)
                    .with_context(|| format!("failed to write {}", self.token_path.display()))
            });
        if let Err(err) = written {
            warn!("could not cache Spotify token: {err:#}");
        }
    }

    fn search_once(&self, key: &AlbumKey) -> Result<CatalogOutcome, SearchError> {
        let query = format!("{} {}", key.artist, key.title);
        let response = self
            .http_client
            .get(SEARCH_URL)
            .query("q", &query)
            .query("type", "album")
            .query("limit", "1")
            .set(
                "Authorization",
                &format!("Bearer {}", self.token.access_token),
            )
            .call();
        let response = response.map_err(classify_failure)?;
        let body: Value = response
            .into_json()
            .map_err(|err| SearchError::Failed(format!("unreadable search response: {err}")))?;
        Ok(parse_search(&body))
    }
}

impl Catalog for SpotifyCatalog {
    /// Refreshes the token once if it is rejected. Rate limits and 5xx
    /// answers are retried a bounded number of times before the lookup is
    /// reported as failed.
    fn search(&mut self, key: &AlbumKey) -> CatalogOutcome {
        let mut refreshed = false;
        let mut attempt = 1_u32;
        loop {
            let err = match self.search_once(key) {
                Ok(outcome) => return outcome,
                Err(err) => err,
            };
            if err == SearchError::Unauthorized && !refreshed {
                debug!("Spotify token rejected, requesting a new one");
                refreshed = true;
                if let Err(err) = self.refresh_token() {
                    return CatalogOutcome::LookupFailed(format!("{err:#}"));
                }
                continue;
            }
            match retry_delay(&err, attempt).filter(|_| attempt < MAX_SEARCH_ATTEMPTS) {
                Some(wait) => {
                    warn!("Spotify search for {key} deferred ({err:?}), retrying in {wait:?}");
                    thread::sleep(wait);
                    attempt += 1;
                }
                None => return CatalogOutcome::LookupFailed(err.into_reason()),
            }
        }
    }
}

fn classify_failure(err: ureq::Error) -> SearchError {
    match err {
        ureq::Error::Status(401, _) => SearchError::Unauthorized,
        ureq::Error::Status(429, response) => {
            SearchError::RateLimited(response.header("Retry-After").and_then(parse_retry_after))
        }
        ureq::Error::Status(code @ (500 | 502 | 503 | 504), _) => SearchError::Unavailable(code),
        ureq::Error::Status(code, _) => {
            SearchError::Failed(format!("Spotify returned HTTP {code}"))
        }
        err => SearchError::Failed(err.to_string()),
    }
}

/// Only the delay-seconds form is understood; an HTTP date falls back to
/// the regular backoff.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(6);
    BASE_RETRY_DELAY
        .checked_mul(1_u32 << exponent)
        .unwrap_or(MAX_RETRY_DELAY)
        .min(MAX_RETRY_DELAY)
}

fn retry_delay(err: &SearchError, attempt: u32) -> Option<Duration> {
    match err {
        SearchError::RateLimited(Some(wait)) => Some((*wait).min(MAX_RETRY_DELAY)),
        SearchError::RateLimited(None) | SearchError::Unavailable(_) => {
            Some(backoff_delay(attempt))
        }
        SearchError::Unauthorized | SearchError::Failed(_) => None,
    }
}

fn now_epoch_seconds() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

fn load_cached_token(path: &Path) -> Option<CachedToken> {
    let raw = fs::read_to_string(path).ok()?;
    serde_json::from_str(&raw).ok()
}

fn basic_auth(credentials: &SpotifyCredentials) -> String {
    let pair = format!("{}:{}", credentials.client_id, credentials.client_secret);
    format!("Basic {}", STANDARD.encode(pair))
}

fn request_token(
    http_client: &ureq::Agent,
    credentials: &SpotifyCredentials,
) -> Result<CachedToken> {
    let response: TokenResponse = http_client
        .post(TOKEN_URL)
        .set("Authorization", &basic_auth(credentials))
        .send_form(&[("grant_type", "client_credentials")])
        .context("Spotify token request failed")?
        .into_json()
        .context("failed to parse Spotify token response")?;
    Ok(CachedToken {
        access_token: response.access_token,
        expires_at_epoch_seconds: now_epoch_seconds() + response.expires_in,
    })
}

/// Found if the search returned any album; the first hit's `total_tracks` is
/// taken as the album length.
fn parse_search(body: &Value) -> CatalogOutcome {
    let Some(items) = body
        .get("albums")
        .and_then(|albums| albums.get("items"))
        .and_then(Value::as_array)
    else {
        return CatalogOutcome::LookupFailed(String::from("search response has no album list"));
    };

    match items.first() {
        None => CatalogOutcome::DefinitelyAbsent,
        Some(album) => CatalogOutcome::Found {
            track_count: album
                .get("total_tracks")
                .and_then(Value::as_u64)
                .and_then(|count| u32::try_from(count).ok()),
        },
    }
}
