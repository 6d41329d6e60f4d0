//! Atomic file replacement.
//!
//! Workflow files are never truncated in place: new content goes to a
//! temporary file next to the original and is renamed over it.

use crate::error::{Error, Result};
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically replaces `path` with `data` via a tempfile in the same directory,
/// keeping the original file's permissions.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let permissions = std::fs::metadata(path).ok().map(|m| m.permissions());

    let mut tmp = NamedTempFile::new_in(dir).map_err(|err| Error::io(dir, err))?;
    tmp.write_all(data).map_err(|err| Error::io(tmp.path(), err))?;
    tmp.as_file().sync_all().map_err(|err| Error::io(tmp.path(), err))?;
    if let Some(permissions) = permissions {
        tmp.as_file()
            .set_permissions(permissions)
            .map_err(|err| Error::io(tmp.path(), err))?;
    }
    tmp.persist(path).map_err(|err| Error::io(path, err.error))?;
    Ok(())
}
