use anyhow::{Context, Result};
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::OffsetDateTime;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed state: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("expected {expected} state, found {found}")]
    WrongFormat {
        expected: &'static str,
        found: String,
    },
    #[error("unsupported state version {0}")]
    UnsupportedVersion(u32),
    #[error("duplicate entry {0}")]
    Duplicate(String),
}

/// Why a saved state could not be restored. Every variant is recoverable:
/// callers start from an empty collection.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("no saved state at {}", path.display())]
    Missing { path: PathBuf },
    #[error("failed to read {}: {source}", path.display())]
    Unreadable { path: PathBuf, source: io::Error },
    #[error("corrupt state in {}: {source}", path.display())]
    Corrupt { path: PathBuf, source: DecodeError },
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    format: &'a str,
    version: u32,
    saved_at: i64,
    data: &'a T,
}

#[derive(Deserialize)]
struct RawEnvelope {
    format: String,
    version: u32,
    data: serde_json::Value,
}

/// Wraps `data` in an envelope tagged with `format` and the current version.
pub fn encode<T: Serialize>(format: &str, data: &T) -> Result<String> {
    let envelope = Envelope {
        format,
        version: FORMAT_VERSION,
        saved_at: OffsetDateTime::now_utc().unix_timestamp(),
        data,
    };
    serde_json::to_string_pretty(&envelope).with_context(|| format!("failed to encode {format}"))
}

/// A file tagged for another kind of state, or written with another version,
/// is rejected instead of being half-read.
pub fn decode<T: DeserializeOwned>(format: &'static str, raw: &str) -> Result<T, DecodeError> {
    let envelope: RawEnvelope = serde_json::from_str(raw)?;
    if envelope.format != format {
        return Err(DecodeError::WrongFormat {
            expected: format,
            found: envelope.format,
        });
    }
    if envelope.version != FORMAT_VERSION {
        return Err(DecodeError::UnsupportedVersion(envelope.version));
    }
    Ok(serde_json::from_value(envelope.data)?)
}

pub fn read_state<T>(
    path: &Path,
    decode: impl FnOnce(&str) -> Result<T, DecodeError>,
) -> Result<T, StateError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(StateError::Missing {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(StateError::Unreadable {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    decode(&raw).map_err(|source| StateError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

/// Restores a saved state, falling back to `T::default()` on any failure.
pub fn restore_or_default<T: Default>(
    path: &Path,
    decode: impl FnOnce(&str) -> Result<T, DecodeError>,
) -> T {
    match read_state(path, decode) {
        Ok(state) => state,
        Err(err @ StateError::Missing { .. }) => {
            debug!("{err}, starting empty");
            T::default()
        }
        Err(err) => {
            warn!("{err}, starting empty");
            T::default()
        }
    }
}

/// Replaces `path` with `contents`, renaming the new file into place.
///
/// The file being replaced is copied to a `.bak` sibling only if `decode`
/// still accepts it, so a corrupt file never overwrites the last good backup.
pub fn write_state<T>(
    path: &Path,
    contents: &str,
    decode: impl FnOnce(&str) -> Result<T, DecodeError>,
) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    match read_state(path, decode) {
        Ok(_) => {
            let backup = path.with_extension("json.bak");
            if let Err(err) = fs::copy(path, &backup) {
                warn!("failed to back up {}: {err}", path.display());
            }
        }
        Err(StateError::Missing { .. }) => {}
        Err(err) => warn!("{err}, keeping the previous backup"),
    }
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, contents)
        .with_context(|| format!("failed to write {}", staging.display()))?;
    fs::rename(&staging, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn decode_rejects_other_format_tags() {
        let raw = encode("albums", &vec![1, 2, 3]).expect("encode");
        let err = decode::<Vec<u32>>("unavailable", &raw).expect_err("wrong tag");
        assert!(matches!(err, DecodeError::WrongFormat { .. }));
    }

    #[test]
    fn decode_rejects_future_versions() {
        let raw = r#"{"format":"albums","version":99,"saved_at":0,"data":[]}"#;
        let err = decode::<Vec<u32>>("albums", raw).expect_err("future version");
        assert!(matches!(err, DecodeError::UnsupportedVersion(99)));
    }

    #[test]
    fn missing_file_is_reported_as_missing() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("absent.json");
        let err = read_state(&path, |raw| decode::<Vec<u32>>("albums", raw)).expect_err("missing");
        assert!(matches!(err, StateError::Missing { .. }));
    }

    #[test]
    fn truncated_file_falls_back_to_default() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"format":"albums","vers"#).expect("write");
        let restored: Vec<u32> = restore_or_default(&path, |raw| decode("albums", raw));
        assert!(restored.is_empty());
    }

    fn decode_numbers(raw: &str) -> Result<Vec<u32>, DecodeError> {
        decode("albums", raw)
    }

    #[test]
    fn write_keeps_backup_of_previous_file() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("state.json");
        let first = encode("albums", &vec![1]).expect("encode");
        let second = encode("albums", &vec![1, 2]).expect("encode");
        write_state(&path, &first, decode_numbers).expect("first write");
        write_state(&path, &second, decode_numbers).expect("second write");

        assert_eq!(fs::read_to_string(&path).expect("read"), second);
        assert_eq!(
            fs::read_to_string(path.with_extension("json.bak")).expect("read backup"),
            first
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_does_not_replace_backup() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let good = encode("albums", &vec![7]).expect("encode");
        write_state(&path, &good, decode_numbers).expect("first write");
        write_state(&path, &good, decode_numbers).expect("second write");

        fs::write(&path, r#"{"format":"albums","#).expect("corrupt");
        let fresh = encode("albums", &Vec::<u32>::new()).expect("encode");
        write_state(&path, &fresh, decode_numbers).expect("write over corrupt file");

        let backup = read_state(&path.with_extension("json.bak"), decode_numbers).expect("backup");
        assert_eq!(backup, vec![7]);
    }
}
