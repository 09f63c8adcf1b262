//! Filesystem-backed state store.
//!
//! Layout: `<root>/<slug>/state.json`, one directory per environment.

use async_trait::async_trait;
use preview_types::{Environment, Slug};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::atomic::write_atomic;
use crate::error::{Result, StateError};
use crate::StateStore;

const STATE_FILE: &str = "state.json";

/// JSON state records on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn env_dir(&self, slug: &Slug) -> PathBuf {
        self.root.join(slug.as_str())
    }

    pub fn record_path(&self, slug: &Slug) -> PathBuf {
        self.env_dir(slug).join(STATE_FILE)
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get(&self, slug: &Slug) -> Result<Environment> {
        let path = self.record_path(slug);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StateError::NotFound(slug.to_string()))
            }
            Err(e) => return Err(StateError::io(&path, e)),
        };
        let record: Environment =
            serde_json::from_str(&contents).map_err(|e| StateError::Corrupt {
                slug: slug.to_string(),
                reason: e.to_string(),
            })?;
        if &record.slug != slug {
            return Err(StateError::Corrupt {
                slug: slug.to_string(),
                reason: format!("record belongs to {}", record.slug),
            });
        }
        Ok(record)
    }

    async fn put(&self, slug: &Slug, record: &Environment) -> Result<()> {
        let dir = self.env_dir(slug);
        fs::create_dir_all(&dir).map_err(|e| StateError::io(&dir, e))?;
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&dir.join(STATE_FILE), &json, None)?;
        debug!(slug = %slug, "state record written");
        Ok(())
    }

    async fn delete(&self, slug: &Slug) -> Result<bool> {
        let dir = self.env_dir(slug);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(slug = %slug, "state record deleted");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StateError::io(&dir, e)),
        }
    }

    async fn list(&self) -> Result<Vec<Slug>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StateError::io(&self.root, e)),
        };

        let mut slugs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StateError::io(&self.root, e))?;
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().map(Slug::parse) {
                Some(Ok(slug)) => slugs.push(slug),
                _ => warn!(entry = ?name, "ignoring non-slug entry in state root"),
            }
        }
        slugs.sort();
        Ok(slugs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use preview_types::ImageRef;

    fn record(slug: &Slug) -> Environment {
        Environment::created(
            slug.clone(),
            "feature/a",
            "abc",
            &ImageRef::new("r", "t"),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        let slug = Slug::parse("pr-1").unwrap();

        assert!(matches!(store.get(&slug).await, Err(StateError::NotFound(_))));
        assert!(!store.exists(&slug).await.unwrap());

        let env = record(&slug);
        store.put(&slug, &env).await.unwrap();
        assert_eq!(store.get(&slug).await.unwrap(), env);
        assert_eq!(store.list().await.unwrap(), vec![slug.clone()]);

        assert!(store.delete(&slug).await.unwrap());
        assert!(!store.env_dir(&slug).exists());
        assert!(!store.delete(&slug).await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_record_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        let slug = Slug::parse("pr-2").unwrap();

        fs::create_dir_all(store.env_dir(&slug)).unwrap();
        fs::write(
            store.record_path(&slug),
            r#"{"branch":"b","slug":"pr-2","commitSha":"c","createdAt":"2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        assert!(matches!(store.get(&slug).await, Err(StateError::Corrupt { .. })));
        assert!(store.exists(&slug).await.unwrap());
    }

    #[tokio::test]
    async fn record_for_another_slug_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        let a = Slug::parse("a").unwrap();
        let b = Slug::parse("b").unwrap();

        store.put(&b, &record(&a)).await.unwrap();
        assert!(matches!(store.get(&b).await, Err(StateError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn list_skips_foreign_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        fs::create_dir_all(dir.path().join("Not_A_Slug")).unwrap();
        fs::write(dir.path().join("stray-file"), "x").unwrap();
        for s in ["b", "a"] {
            let slug = Slug::parse(s).unwrap();
            store.put(&slug, &record(&slug)).await.unwrap();
        }

        let listed: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(listed, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn list_on_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("nope"));
        assert!(store.list().await.unwrap().is_empty());
    }
}
