//! `flock`-based locks.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use crate::error::{LockError, Result};
use crate::{validate_lock_name, LockGuard, LockManager};

/// Advisory file locks under a single directory, one file per lock name.
///
/// The lock files themselves are left in place; only the `flock` on the open
/// descriptor carries meaning.
#[derive(Debug, Clone)]
pub struct FileLockManager {
    dir: PathBuf,
}

impl FileLockManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.lock"))
    }

    fn open(&self, name: &str) -> Result<File> {
        let io_err = |source| LockError::Io {
            name: name.to_string(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io_err)?;
        let path = self.lock_path(name);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&path, fs::Permissions::from_mode(0o600)) {
                tracing::warn!(path = %path.display(), err = %e, "failed to restrict lock file permissions");
            }
        }

        Ok(file)
    }
}

impl LockManager for FileLockManager {
    fn try_acquire(&self, name: &str) -> Result<Option<LockGuard>> {
        validate_lock_name(name)?;
        let file = self.open(name)?;
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(LockGuard::new(name, file))),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(source) => Err(LockError::Io {
                name: name.to_string(),
                source,
            }),
        }
    }

    fn name(&self) -> &str {
        "file"
    }
}
