//! Deploy modes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// How a deploy treats existing state for its slug.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployMode {
    /// Clean slate: tear down anything left over, new credential, new record.
    #[default]
    Fresh,
    /// Redeploy of a known environment: keep record, credential and volumes.
    Update,
}

impl DeployMode {
    pub fn is_fresh(self) -> bool {
        matches!(self, DeployMode::Fresh)
    }
}

impl fmt::Display for DeployMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployMode::Fresh => write!(f, "fresh"),
            DeployMode::Update => write!(f, "update"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown deploy mode {0:?}, expected \"fresh\" or \"update\"")]
pub struct ParseModeError(String);

impl FromStr for DeployMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fresh" => Ok(DeployMode::Fresh),
            "update" => Ok(DeployMode::Update),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_modes() {
        assert_eq!("fresh".parse::<DeployMode>().unwrap(), DeployMode::Fresh);
        assert_eq!("UPDATE".parse::<DeployMode>().unwrap(), DeployMode::Update);
        assert!("rolling".parse::<DeployMode>().is_err());
        assert_eq!(DeployMode::default(), DeployMode::Fresh);
    }
}
