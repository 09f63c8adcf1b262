//! Environment records.
//!
//! An [`Environment`] is the durable, secret-free metadata for one preview
//! instance. It exists exactly as long as the instance's stack is running.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::slug::Slug;

/// Resolved image source for a deploy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub registry: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(registry: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            tag: tag.into(),
        }
    }

    /// Resolve registry and tag independently: explicit input first, then
    /// the value persisted by the previous deploy, then the default.
    pub fn resolve(
        registry: Option<&str>,
        tag: Option<&str>,
        previous: Option<&Environment>,
        default: &ImageRef,
    ) -> Self {
        let registry = registry
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .or_else(|| previous.and_then(|p| p.registry.clone()))
            .unwrap_or_else(|| default.registry.clone());
        let tag = tag
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .or_else(|| previous.and_then(|p| p.tag.clone()))
            .unwrap_or_else(|| default.tag.clone());
        Self { registry, tag }
    }
}

/// Persisted metadata for one preview environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub branch: String,
    pub slug: Slug,
    pub commit_sha: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

impl Environment {
    /// Record for a freshly created environment.
    pub fn created(
        slug: Slug,
        branch: impl Into<String>,
        commit_sha: impl Into<String>,
        image: &ImageRef,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            branch: branch.into(),
            slug,
            commit_sha: commit_sha.into(),
            created_at: now,
            updated_at: now,
            registry: Some(image.registry.clone()),
            tag: Some(image.tag.clone()),
        }
    }

    /// Record after an update deploy.
    ///
    /// `created_at` is kept; `updated_at` never moves backwards.
    pub fn refreshed(
        &self,
        branch: Option<&str>,
        commit_sha: impl Into<String>,
        image: &ImageRef,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            branch: branch
                .map(str::to_string)
                .unwrap_or_else(|| self.branch.clone()),
            slug: self.slug.clone(),
            commit_sha: commit_sha.into(),
            created_at: self.created_at,
            updated_at: now.max(self.updated_at),
            registry: Some(image.registry.clone()),
            tag: Some(image.tag.clone()),
        }
    }

    /// Time since the last deploy.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.updated_at
    }

    /// Strictly older than `ttl`.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.age(now) > ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slug() -> Slug {
        Slug::parse("pr-1").unwrap()
    }

    #[test]
    fn serializes_camel_case_without_secrets() {
        let env = Environment::created(
            slug(),
            "feature/x",
            "abc123",
            &ImageRef::new("ghcr.io/acme", "pr-1"),
            Utc::now(),
        );
        let json = serde_json::to_value(&env).unwrap();
        assert!(json.get("commitSha").is_some());
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
        assert_eq!(json["branch"], "feature/x");
    }

    #[test]
    fn record_without_updated_at_fails_to_parse() {
        let raw = r#"{"branch":"b","slug":"pr-1","commitSha":"a","createdAt":"2024-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<Environment>(raw).is_err());

        let raw = r#"{"branch":"b","slug":"pr-1","commitSha":"a","createdAt":"2024-01-01T00:00:00Z","updatedAt":"yesterday"}"#;
        assert!(serde_json::from_str::<Environment>(raw).is_err());
    }

    #[test]
    fn refresh_preserves_created_at_and_is_monotonic() {
        let t0 = Utc::now();
        let image = ImageRef::new("r", "t");
        let env = Environment::created(slug(), "b", "c1", &image, t0);

        let later = env.refreshed(None, "c2", &image, t0 + Duration::hours(1));
        assert_eq!(later.created_at, t0);
        assert_eq!(later.updated_at, t0 + Duration::hours(1));
        assert_eq!(later.commit_sha, "c2");
        assert_eq!(later.branch, "b");

        let skewed = later.refreshed(Some("b2"), "c3", &image, t0);
        assert_eq!(skewed.updated_at, t0 + Duration::hours(1));
        assert_eq!(skewed.branch, "b2");
    }

    #[test]
    fn expiry_is_strict() {
        let now = Utc::now();
        let image = ImageRef::new("r", "t");
        let ttl = Duration::hours(72);

        let old = Environment::created(slug(), "b", "c", &image, now - Duration::hours(73));
        let young = Environment::created(slug(), "b", "c", &image, now - Duration::hours(71));
        let exact = Environment::created(slug(), "b", "c", &image, now - ttl);

        assert!(old.is_expired(now, ttl));
        assert!(!young.is_expired(now, ttl));
        assert!(!exact.is_expired(now, ttl));
    }

    #[test]
    fn image_resolution_precedence() {
        let default = ImageRef::new("default.io", "latest");
        let prev = Environment::created(slug(), "b", "c", &ImageRef::new("prev.io", "v1"), Utc::now());

        let r = ImageRef::resolve(Some("cli.io"), None, Some(&prev), &default);
        assert_eq!(r, ImageRef::new("cli.io", "v1"));

        let r = ImageRef::resolve(None, None, None, &default);
        assert_eq!(r, default);

        let r = ImageRef::resolve(Some(""), Some("v2"), Some(&prev), &default);
        assert_eq!(r, ImageRef::new("prev.io", "v2"));
    }
}
