use crate::lastfm::LastfmCredentials;
use crate::spotify::SpotifyCredentials;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "tally";
const ALBUMS_DIR: &str = "albums";
const UNAVAILABLE_FILE: &str = "unavailable.json";
const SETTINGS_FILE: &str = "settings.json";

pub const DATA_DIR_ENV: &str = "TALLY_DATA_DIR";

/// Resolves the data directory: explicit override, then `TALLY_DATA_DIR`,
/// then `~/.config/tally`.
pub fn data_root(override_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = override_dir {
        return Ok(dir.to_path_buf());
    }
    if let Ok(dir) = env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .context("neither HOME nor USERPROFILE is set")?;
    Ok(PathBuf::from(home).join(".config").join(APP_DIR))
}

/// Layout of the files kept between runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn albums_path(&self, username: &str) -> PathBuf {
        self.root
            .join(ALBUMS_DIR)
            .join(format!("{}.json", file_stem(username)))
    }

    pub fn unavailable_path(&self) -> PathBuf {
        self.root.join(UNAVAILABLE_FILE)
    }

    pub fn spotify_token_path(&self, account: &str) -> PathBuf {
        self.root
            .join(format!("spotify_token_{}.json", file_stem(account)))
    }

    pub fn settings_path(&self) -> PathBuf {
        self.root.join(SETTINGS_FILE)
    }
}

/// Percent-encodes `name` so distinct names never share a file and no name
/// can leave the data directory.
fn file_stem(name: &str) -> String {
    if name.is_empty() {
        // Never produced by the encoder, so it cannot collide.
        return String::from("%");
    }
    urlencoding::encode(name).into_owned()
}

/// API credentials for the two services.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub lastfm_api_key: Option<String>,
    #[serde(default)]
    pub lastfm_api_secret: Option<String>,
    #[serde(default)]
    pub spotify_client_id: Option<String>,
    #[serde(default)]
    pub spotify_client_secret: Option<String>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse settings file {}", path.display()))?;
        Ok(settings)
    }

    /// Replaces fields with values found through `lookup`, keyed by the
    /// `TALLY_*` variable names.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let fields = [
            ("TALLY_LASTFM_API_KEY", &mut self.lastfm_api_key),
            ("TALLY_LASTFM_API_SECRET", &mut self.lastfm_api_secret),
            ("TALLY_SPOTIFY_CLIENT_ID", &mut self.spotify_client_id),
            ("TALLY_SPOTIFY_CLIENT_SECRET", &mut self.spotify_client_secret),
        ];
        for (name, field) in fields {
            if let Some(value) = lookup(name).filter(|value| !value.trim().is_empty()) {
                *field = Some(value.trim().to_string());
            }
        }
        self
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| env::var(name).ok())
    }

    pub fn lastfm(&self) -> Result<LastfmCredentials> {
        Ok(LastfmCredentials {
            api_key: required(&self.lastfm_api_key, "lastfm_api_key")?,
            api_secret: required(&self.lastfm_api_secret, "lastfm_api_secret")?,
        })
    }

    pub fn spotify(&self) -> Result<SpotifyCredentials> {
        Ok(SpotifyCredentials {
            client_id: required(&self.spotify_client_id, "spotify_client_id")?,
            client_secret: required(&self.spotify_client_secret, "spotify_client_secret")?,
        })
    }
}

fn required(value: &Option<String>, field: &str) -> Result<String> {
    match value.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => anyhow::bail!(
            "missing {field}: set it in {SETTINGS_FILE} or via TALLY_{}",
            field.to_ascii_uppercase()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn explicit_data_dir_wins() {
        let root = data_root(Some(Path::new("/tmp/tally-data"))).expect("root");
        assert_eq!(root, PathBuf::from("/tmp/tally-data"));
    }

    #[test]
    fn per_user_files_are_kept_apart() {
        let dir = DataDir::new("/data");
        assert_eq!(
            dir.albums_path("alice"),
            PathBuf::from("/data/albums/alice.json")
        );
        assert_ne!(dir.albums_path("alice"), dir.albums_path("bob"));
        assert_eq!(
            dir.albums_path("../etc/passwd"),
            PathBuf::from("/data/albums/..%2Fetc%2Fpasswd.json")
        );
        assert_ne!(dir.albums_path("a.b"), dir.albums_path("a_b"));
        assert_ne!(dir.albums_path("a b"), dir.albums_path("a_b"));
        assert_ne!(dir.albums_path(""), dir.albums_path("_"));
        assert_eq!(dir.unavailable_path(), PathBuf::from("/data/unavailable.json"));
    }

    #[test]
    fn overrides_replace_file_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("TALLY_LASTFM_API_KEY", "env-key"),
            ("TALLY_SPOTIFY_CLIENT_ID", "  "),
        ]);
        let settings = Settings {
            lastfm_api_key: Some(String::from("file-key")),
            spotify_client_id: Some(String::from("file-id")),
            ..Settings::default()
        }
        .with_overrides(|name| vars.get(name).map(|value| value.to_string()));

        assert_eq!(settings.lastfm_api_key.as_deref(), Some("env-key"));
        assert_eq!(settings.spotify_client_id.as_deref(), Some("file-id"));
    }

    #[test]
    fn missing_credentials_name_the_field() {
        let settings = Settings {
            lastfm_api_key: Some(String::from("key")),
            ..Settings::default()
        };
        let err = settings.lastfm().expect_err("secret missing");
        assert!(err.to_string().contains("lastfm_api_secret"));
    }

    #[test]
    fn settings_file_is_optional() {
        let dir = tempdir().expect("tempdir");
        let data = DataDir::new(dir.path());
        assert_eq!(
            Settings::load(&data.settings_path()).expect("load"),
            Settings::default()
        );

        fs::write(
            data.settings_path(),
            r#"{"spotify_client_id":"id","spotify_client_secret":"secret"}"#,
        )
        .expect("write");
        let creds = Settings::load(&data.settings_path())
            .expect("load")
            .spotify()
            .expect("spotify creds");
        assert_eq!(creds.client_id, "id");
    }
}
