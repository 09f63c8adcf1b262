//! Owner-only credential files.
//!
//! Layout: `<root>/<slug>.env` with `<root>` at mode `0700` and each file at
//! mode `0600`.

use preview_types::{Credential, Slug};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::atomic::write_atomic;
use crate::error::{Result, StateError};

const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;

/// Credential persistence, kept apart from environment records.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, slug: &Slug) -> PathBuf {
        self.root.join(format!("{slug}.env"))
    }

    /// Load the stored credential, if any.
    pub fn load(&self, slug: &Slug) -> Result<Option<Credential>> {
        let path = self.path(slug);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::io(&path, e)),
        };
        Credential::parse_env_file(&contents)
            .map(Some)
            .map_err(|e| StateError::Corrupt {
                slug: slug.to_string(),
                reason: format!("credential file: {e}"),
            })
    }

    pub fn save(&self, slug: &Slug, credential: &Credential) -> Result<()> {
        self.ensure_root()?;
        write_atomic(
            &self.path(slug),
            credential.to_env_file().as_bytes(),
            Some(FILE_MODE),
        )?;
        debug!(slug = %slug, keys = ?credential.keys().collect::<Vec<_>>(), "credential saved");
        Ok(())
    }

    /// Remove the credential. Absent files are not an error.
    pub fn delete(&self, slug: &Slug) -> Result<bool> {
        let path = self.path(slug);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StateError::io(&path, e)),
        }
    }

    fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| StateError::io(&self.root, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.root, fs::Permissions::from_mode(DIR_MODE))
                .map_err(|e| StateError::io(&self.root, e))?;
        }
        #[cfg(not(unix))]
        let _ = DIR_MODE;
        Ok(())
    }
}
