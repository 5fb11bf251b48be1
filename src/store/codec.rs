//! Crash-safe JSON document I/O.
//!
//! Documents are written to a `.tmp` sibling and renamed over the final
//! path, so the file on disk is always either the old or the new complete
//! document. Reads treat a missing or corrupt file as "use the default"
//! rather than as fatal.

use crate::errors::Result;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Sibling path the document is staged at before the atomic rename:
/// `users.json` -> `users.json.tmp`.
fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

/// Serialize `value` as pretty-printed JSON and atomically replace `path`.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let staged = tmp_path(path);
    let body = serde_json::to_string_pretty(value)?;
    fs::write(&staged, body)?;
    fs::rename(&staged, path)?;
    Ok(())
}

/// Deserialize `path`, falling back to `default` on any I/O or parse
/// failure. A missing file is the normal first-run case and only logged at
/// debug; a corrupt file is worth a warning.
pub fn read_json_or<T: DeserializeOwned>(path: &Path, default: T) -> T {
    let body = match fs::read_to_string(path) {
        Ok(body) => body,
        Err(e) => {
            debug!("document {} not readable ({}), using default", path.display(), e);
            return default;
        }
    };
    match serde_json::from_str(&body) {
        Ok(value) => value,
        Err(e) => {
            warn!("document {} failed to parse ({}), using default", path.display(), e);
            default
        }
    }
}
