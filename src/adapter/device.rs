// src/adapter/device.rs
// E2EE device-data persistence: opaque blob, written atomically

use crate::error::Result;
use std::path::Path;
use tracing::debug;

/// Atomically replace the device-data file: write to a sibling temp file,
/// then rename over the target so readers never observe a torn write.
pub fn save(path: &Path, blob: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, blob)?;
    std::fs::rename(&tmp, path)?;
    debug!(path = %path.display(), bytes = blob.len(), "Device data persisted");
    Ok(())
}

/// Load the blob if the file exists.
pub fn load(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(blob) => Ok(Some(blob)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
