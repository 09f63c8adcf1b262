//! Environment slugs.
//!
//! A slug is the canonical identifier of a preview environment. It doubles as
//! the DNS host label and as a path component on disk, so the accepted
//! alphabet is deliberately narrow.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum slug length (one DNS label).
pub const MAX_SLUG_LEN: usize = 63;

/// Errors produced when validating a slug.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlugError {
    #[error("slug must not be empty")]
    Empty,

    #[error("slug is {len} characters long, maximum is {MAX_SLUG_LEN}")]
    TooLong { len: usize },

    #[error("slug contains invalid character {ch:?} at position {position}")]
    InvalidChar { ch: char, position: usize },
}

/// Validated environment identifier matching `^[a-z0-9-]{1,63}$`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Slug(String);

impl Slug {
    /// Validate and wrap a slug.
    pub fn parse(value: impl AsRef<str>) -> Result<Self, SlugError> {
        let value = value.as_ref();
        if value.is_empty() {
            return Err(SlugError::Empty);
        }
        if value.len() > MAX_SLUG_LEN {
            return Err(SlugError::TooLong { len: value.len() });
        }
        if let Some((position, ch)) = value
            .chars()
            .enumerate()
            .find(|(_, c)| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
        {
            return Err(SlugError::InvalidChar { ch, position });
        }
        Ok(Self(value.to_string()))
    }

    /// Derive a slug from a git branch name.
    ///
    /// Lowercases, maps every run of characters outside `[a-z0-9]` to a
    /// single `-`, trims leading/trailing hyphens and truncates to
    /// [`MAX_SLUG_LEN`].
    pub fn from_branch(branch: &str) -> Result<Self, SlugError> {
        let mut out = String::with_capacity(branch.len());
        let mut pending_hyphen = false;
        for c in branch.chars().flat_map(char::to_lowercase) {
            if c.is_ascii_lowercase() || c.is_ascii_digit() {
                if pending_hyphen && !out.is_empty() {
                    out.push('-');
                }
                pending_hyphen = false;
                out.push(c);
            } else {
                pending_hyphen = true;
            }
        }
        out.truncate(MAX_SLUG_LEN);
        let trimmed = out.trim_end_matches('-');
        Self::parse(trimmed)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lock name for the per-environment lock.
    pub fn lock_name(&self) -> String {
        format!("env-{}", self.0)
    }
}

impl fmt::Display for Slug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Slug {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for Slug {
    type Err = SlugError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Slug {
    type Error = SlugError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Slug> for String {
    fn from(slug: Slug) -> Self {
        slug.0
    }
}
