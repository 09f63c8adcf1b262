//! Atomic file replacement.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crate::error::{Result, StateError};

/// Write `contents` to `path` via a sibling temporary file and rename.
///
/// `mode` sets unix permissions on the temporary file before any byte is
/// written, so secrets are never briefly world-readable.
pub fn write_atomic(path: &Path, contents: &[u8], mode: Option<u32>) -> Result<()> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            StateError::io(
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"),
            )
        })?;
    let tmp_path = path.with_file_name(format!(".{file_name}.tmp"));

    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        if let Some(mode) = mode {
            options.mode(mode);
        }
    }
    #[cfg(not(unix))]
    let _ = mode;

    // A leftover temp file would keep its old permissions.
    let _ = fs::remove_file(&tmp_path);

    let mut file = options
        .open(&tmp_path)
        .map_err(|e| StateError::io(&tmp_path, e))?;
    file.write_all(contents)
        .and_then(|()| file.sync_all())
        .map_err(|e| StateError::io(&tmp_path, e))?;
    drop(file);

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(StateError::io(path, e));
    }
    Ok(())
}
