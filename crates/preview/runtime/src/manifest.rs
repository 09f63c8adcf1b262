//! Compose file inspection.
//!
//! Only the parts the manager reasons about are read: service names and
//! their labels. Everything else is passed to the runtime untouched.

use serde_yaml::Value;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("invalid compose YAML: {0}")]
    Yaml(String),

    #[error("compose file has no services")]
    NoServices,

    #[error("service {service:?} has malformed labels")]
    MalformedLabels { service: String },
}

/// One service of a compose file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceLabels {
    pub name: String,
    labels: Vec<(String, Option<String>)>,
}

impl ServiceLabels {
    /// Whether the service carries `label`, given as `key=value` or `key`.
    pub fn carries(&self, label: &str) -> bool {
        let (key, value) = match label.split_once('=') {
            Some((key, value)) => (key.trim(), Some(value.trim())),
            None => (label.trim(), None),
        };
        self.labels.iter().any(|(k, v)| {
            k == key && value.map_or(true, |want| v.as_deref() == Some(want))
        })
    }
}

/// Services of a parsed compose file, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeManifest {
    services: Vec<ServiceLabels>,
}

impl ComposeManifest {
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let root: Value =
            serde_yaml::from_str(text).map_err(|e| ManifestError::Yaml(e.to_string()))?;
        let Some(services) = root.get("services").and_then(Value::as_mapping) else {
            return Err(ManifestError::NoServices);
        };
        if services.is_empty() {
            return Err(ManifestError::NoServices);
        }

        let mut parsed = Vec::with_capacity(services.len());
        for (name, body) in services {
            let name = scalar(name).unwrap_or_default();
            let labels = match body.get("labels") {
                None | Some(Value::Null) => Vec::new(),
                Some(labels) => parse_labels(labels)
                    .ok_or_else(|| ManifestError::MalformedLabels { service: name.clone() })?,
            };
            parsed.push(ServiceLabels { name, labels });
        }
        Ok(Self { services: parsed })
    }

    pub fn services(&self) -> &[ServiceLabels] {
        &self.services
    }

    /// Number of services carrying `label`.
    pub fn count_labelled(&self, label: &str) -> usize {
        self.services.iter().filter(|s| s.carries(label)).count()
    }

    /// Names of services missing `label`.
    pub fn unlabelled(&self, label: &str) -> Vec<&str> {
        self.services
            .iter()
            .filter(|s| !s.carries(label))
            .map(|s| s.name.as_str())
            .collect()
    }
}

/// Compose accepts labels as a mapping or as a list of `key=value` strings.
fn parse_labels(labels: &Value) -> Option<Vec<(String, Option<String>)>> {
    match labels {
        Value::Mapping(map) => map
            .iter()
            .map(|(k, v)| Some((scalar(k)?, scalar(v))))
            .collect(),
        Value::Sequence(items) => items
            .iter()
            .map(|item| {
                let entry = scalar(item)?;
                Some(match entry.split_once('=') {
                    Some((k, v)) => (k.to_string(), Some(v.to_string())),
                    None => (entry, None),
                })
            })
            .collect(),
        _ => None,
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
