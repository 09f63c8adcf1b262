//! Per-environment credentials.
//!
//! Credentials are stored apart from the environment record, in a
//! `KEY=value` file readable only by the owning user.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

const GENERATED_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialParseError {
    #[error("line {line}: expected KEY=value")]
    MissingSeparator { line: usize },

    #[error("line {line}: empty key")]
    EmptyKey { line: usize },
}

/// Secret key/value pairs for one environment.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credential {
    entries: BTreeMap<String, String>,
}

impl Credential {
    /// Generate a credential with a random alphanumeric secret under `key`.
    pub fn generate(key: &str) -> Self {
        let secret: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(GENERATED_SECRET_LEN)
            .map(char::from)
            .collect();
        let mut entries = BTreeMap::new();
        entries.insert(key.to_string(), secret);
        Self { entries }
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as an env file.
    pub fn to_env_file(&self) -> String {
        let mut out = String::new();
        for (k, v) in &self.entries {
            out.push_str(k);
            out.push('=');
            out.push_str(v);
            out.push('\n');
        }
        out
    }

    /// Parse an env file. Blank lines and `#` comments are ignored.
    pub fn parse_env_file(contents: &str) -> Result<Self, CredentialParseError> {
        let mut entries = BTreeMap::new();
        for (idx, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or(CredentialParseError::MissingSeparator { line: idx + 1 })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(CredentialParseError::EmptyKey { line: idx + 1 });
            }
            entries.insert(key.to_string(), value.to_string());
        }
        Ok(Self { entries })
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.keys().map(|k| (k, "<redacted>")))
            .finish()
    }
}
