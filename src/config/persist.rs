//! Whole-file JSON persistence.
//!
//! Writes go to a sibling temporary file which is then renamed over the
//! target, so a reader sees either the old or the new content and never a
//! truncated file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{Result, SvdgfError};

/// Distinguishes temporary files of concurrent writes within one process.
static TMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// Outcome of reading a persisted mapping.
#[derive(Debug)]
pub enum ReadOutcome<T> {
    Loaded(T),
    Missing,
    /// The file exists but could not be read or deserialized.
    Malformed(SvdgfError),
}

/// Read `path` as JSON. Files written as single-quoted dictionaries are accepted too.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> ReadOutcome<T> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return ReadOutcome::Missing,
        Err(err) => {
            return ReadOutcome::Malformed(SvdgfError::ConfigDeserialization {
                path: path.display().to_string(),
                message: err.to_string(),
            });
        }
    };

    match serde_json::from_str::<T>(&text) {
        Ok(value) => ReadOutcome::Loaded(value),
        Err(first) => match serde_json::from_str::<T>(&text.replace('\'', "\"")) {
            Ok(value) => {
                log::debug!("{} read as a single-quoted dictionary", path.display());
                ReadOutcome::Loaded(value)
            }
            Err(_) => ReadOutcome::Malformed(SvdgfError::ConfigDeserialization {
                path: path.display().to_string(),
                message: first.to_string(),
            }),
        },
    }
}

/// Serialize `value` and atomically replace `path` with it.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_string_pretty(value)
        .map_err(|e| SvdgfError::Io(format!("failed to serialize {}: {e}", path.display())))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| SvdgfError::Io(format!("failed to create {}: {e}", parent.display())))?;
    }

    let tmp = temp_path(path);
    fs::write(&tmp, body + "\n")
        .map_err(|e| SvdgfError::Io(format!("failed to write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        SvdgfError::Io(format!("failed to replace {}: {e}", path.display()))
    })
}

/// Copy a malformed file aside as `<name>.bak` before it is overwritten.
pub fn backup(path: &Path) -> Option<PathBuf> {
    let mut name = path.file_name()?.to_os_string();
    name.push(".bak");
    let dest = path.with_file_name(name);
    fs::copy(path, &dest).ok().map(|_| dest)
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "config".into());
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    name.push(format!(".tmp{}-{n}", std::process::id()));
    path.with_file_name(name)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    /// Fresh empty directory under the system temp dir.
    pub fn scratch_dir(label: &str) -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!("svdgf-{label}-{}-{n}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
