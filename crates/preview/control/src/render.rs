//! Stack template rendering.
//!
//! Templates are compose files with `${NAME}` placeholders drawn from a closed
//! set of variables. `$$` is passed through untouched so compose's own escape
//! keeps working.
//!
//! Every service of a template must carry the ownership label, since the
//! admission quota is counted from labelled units.

use preview_runtime::{ComposeManifest, ManifestError};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

// ── Variables ────────────────────────────────────────────────────────

/// Every variable a template may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TemplateVar {
    Slug,
    CommitSha,
    Credential,
    Registry,
    Tag,
}

impl TemplateVar {
    pub const ALL: [TemplateVar; 5] = [
        TemplateVar::Slug,
        TemplateVar::CommitSha,
        TemplateVar::Credential,
        TemplateVar::Registry,
        TemplateVar::Tag,
    ];

    pub fn placeholder(self) -> &'static str {
        match self {
            TemplateVar::Slug => "SLUG",
            TemplateVar::CommitSha => "COMMIT_SHA",
            TemplateVar::Credential => "CREDENTIAL",
            TemplateVar::Registry => "REGISTRY",
            TemplateVar::Tag => "TAG",
        }
    }
}

impl fmt::Display for TemplateVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.placeholder())
    }
}

impl FromStr for TemplateVar {
    type Err = RenderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TemplateVar::ALL
            .into_iter()
            .find(|v| v.placeholder() == s)
            .ok_or_else(|| RenderError::UnknownVariable(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("unknown template variable ${{{0}}}")]
    UnknownVariable(String),

    #[error("template variable ${{{0}}} has no value")]
    Unresolved(TemplateVar),

    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),

    #[error("failed to read template {path}: {reason}")]
    Read { path: String, reason: String },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("services {services:?} lack the ownership label {label}")]
    Unowned { services: Vec<String>, label: String },
}

/// Values bound for one render.
#[derive(Clone, Default)]
pub struct Bindings {
    values: BTreeMap<TemplateVar, String>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, var: TemplateVar, value: impl Into<String>) -> Self {
        self.values.insert(var, value.into());
        self
    }

    fn resolve(&self, var: TemplateVar) -> Result<&str, RenderError> {
        self.values
            .get(&var)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .ok_or(RenderError::Unresolved(var))
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (var, value) in &self.values {
            match var {
                TemplateVar::Credential => map.entry(var, &"<redacted>"),
                _ => map.entry(var, value),
            };
        }
        map.finish()
    }
}

// ── Renderer ─────────────────────────────────────────────────────────

/// A parsed-on-render stack template.
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    template: String,
}

impl TemplateRenderer {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, RenderError> {
        std::fs::read_to_string(path)
            .map(Self::new)
            .map_err(|e| RenderError::Read {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    /// Variables the template references, in order of first use.
    pub fn variables(&self) -> Result<Vec<TemplateVar>, RenderError> {
        let mut seen = Vec::new();
        self.walk(|piece| {
            if let Piece::Var(var) = piece {
                if !seen.contains(&var) {
                    seen.push(var);
                }
            }
            Ok(())
        })?;
        Ok(seen)
    }

    /// Substitute every placeholder. Fails on the first unknown or
    /// unresolved variable; no partial output is returned.
    pub fn render(&self, bindings: &Bindings) -> Result<String, RenderError> {
        let mut out = String::with_capacity(self.template.len());
        self.walk(|piece| {
            match piece {
                Piece::Text(text) => out.push_str(text),
                Piece::Var(var) => out.push_str(bindings.resolve(var)?),
            }
            Ok(())
        })?;
        Ok(out)
    }

    /// Check that every service of the rendered stack carries `label`.
    ///
    /// Renders with stand-in values, so only the template's structure is
    /// checked.
    pub fn check_ownership(&self, label: &str) -> Result<(), RenderError> {
        let sample = Bindings::new()
            .set(TemplateVar::Slug, "sample")
            .set(TemplateVar::CommitSha, "0000000")
            .set(TemplateVar::Credential, "sample")
            .set(TemplateVar::Registry, "registry.local")
            .set(TemplateVar::Tag, "latest");
        let manifest = ComposeManifest::parse(&self.render(&sample)?)?;
        let unowned = manifest.unlabelled(label);
        if unowned.is_empty() {
            return Ok(());
        }
        Err(RenderError::Unowned {
            services: unowned.into_iter().map(str::to_string).collect(),
            label: label.to_string(),
        })
    }

    fn walk<'a>(
        &'a self,
        mut emit: impl FnMut(Piece<'a>) -> Result<(), RenderError>,
    ) -> Result<(), RenderError> {
        let src = self.template.as_str();
        let bytes = src.as_bytes();
        let mut text_start = 0;
        let mut i = 0;

        while i < bytes.len() {
            if bytes[i] != b'$' {
                i += 1;
                continue;
            }
            match bytes.get(i + 1) {
                Some(b'$') => i += 2,
                Some(b'{') => {
                    let close = src[i + 2..]
                        .find('}')
                        .map(|off| i + 2 + off)
                        .ok_or(RenderError::Unterminated(i))?;
                    emit(Piece::Text(&src[text_start..i]))?;
                    emit(Piece::Var(src[i + 2..close].parse()?))?;
                    i = close + 1;
                    text_start = i;
                }
                _ => i += 1,
            }
        }
        emit(Piece::Text(&src[text_start..]))
    }
}

enum Piece<'a> {
    Text(&'a str),
    Var(TemplateVar),
}

/// Where the stack template comes from.
///
/// Files are read on each [`load`](TemplateSource::load), so operations that
/// never render (destroy, sweep, list) do not depend on the file.
#[derive(Debug, Clone)]
pub enum TemplateSource {
    Inline(TemplateRenderer),
    File(PathBuf),
}

impl TemplateSource {
    pub fn load(&self) -> Result<TemplateRenderer, RenderError> {
        match self {
            TemplateSource::Inline(renderer) => Ok(renderer.clone()),
            TemplateSource::File(path) => TemplateRenderer::from_file(path),
        }
    }
}

impl From<TemplateRenderer> for TemplateSource {
    fn from(renderer: TemplateRenderer) -> Self {
        TemplateSource::Inline(renderer)
    }
}
