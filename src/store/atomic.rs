use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::StoreError;

/// Reads a JSON document, treating a missing, empty, unreadable or malformed file as
/// `T::default()`.
pub(crate) fn read_json_or_default<T>(path: &Path, label: &str) -> T
where
    T: DeserializeOwned + Default,
{
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no {label} file yet");
            return T::default();
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read {label}; starting empty");
            return T::default();
        }
    };

    if raw.trim().is_empty() {
        return T::default();
    }

    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "malformed {label}; starting empty");
            T::default()
        }
    }
}

pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    write_atomic_with(path, bytes, |_| Ok(()))
}

/// Writes `bytes` to a sibling temp file and renames it over `path`. `before_rename`
/// runs once the temp file is complete.
pub(crate) fn write_atomic_with<F>(path: &Path, bytes: &[u8], before_rename: F) -> Result<(), StoreError>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| StoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let temp = temp_path_for(path);
    let written = (|| -> io::Result<()> {
        let mut file = File::create(&temp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        drop(file);
        before_rename(&temp)?;
        fs::rename(&temp, path)
    })();

    if let Err(source) = written {
        if let Err(cleanup) = fs::remove_file(&temp)
            && cleanup.kind() != io::ErrorKind::NotFound
        {
            warn!(path = %temp.display(), error = %cleanup, "failed to remove temp file");
        }
        return Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

pub(crate) fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("state"));
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn crash(_: &Path) -> io::Result<()> {
        Err(io::Error::other("simulated crash before rename"))
    }

    #[test]
    fn temp_file_sits_next_to_target() {
        assert_eq!(
            temp_path_for(Path::new("/data/subscriptions.json")),
            PathBuf::from("/data/subscriptions.json.tmp")
        );
    }

    #[test]
    fn write_then_read_round_trips_and_leaves_no_temp() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("nested").join("state.json");
        let mut value = BTreeMap::new();
        value.insert("繁花".to_string(), 3_u32);

        write_json_atomic(&path, &value).expect("write");

        let loaded: BTreeMap<String, u32> = read_json_or_default(&path, "state");
        assert_eq!(loaded, value);
        assert!(!temp_path_for(&path).exists());
        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.contains("繁花"), "written as UTF-8, not escaped: {raw}");
        assert!(raw.contains('\n'), "written with indentation");
    }

    #[test]
    fn crash_between_temp_write_and_rename_keeps_original_bytes() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("subscriptions.json");
        write_atomic(&path, b"{\"subscriptions\": []}").expect("seed");
        let before = fs::read(&path).expect("read seed");

        for attempt in 0..2 {
            let payload = format!("{{\"subscriptions\": [{attempt}]}}");
            let err = write_atomic_with(&path, payload.as_bytes(), crash)
                .expect_err("crash must surface");
            assert!(matches!(err, StoreError::Io { .. }));
            assert_eq!(fs::read(&path).expect("read after crash"), before);
            assert!(!temp_path_for(&path).exists(), "temp file cleaned up");
        }
    }

    #[test]
    fn failed_write_never_creates_a_missing_target() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("play_history.json");

        let _ = write_atomic_with(&path, b"{}", crash);

        assert!(!path.exists());
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn unreadable_documents_load_as_default() {
        let dir = TempDir::new().expect("temp dir");
        let missing = dir.path().join("missing.json");
        let empty = dir.path().join("empty.json");
        let corrupt = dir.path().join("corrupt.json");
        fs::write(&empty, "  \n").expect("write empty");
        fs::write(&corrupt, "{\"subscriptions\": [").expect("write corrupt");

        for path in [missing, empty, corrupt] {
            let loaded: BTreeMap<String, u32> = read_json_or_default(&path, "state");
            assert!(loaded.is_empty(), "{}", path.display());
        }
    }
}
