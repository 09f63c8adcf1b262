//! Conversions from collaborator errors into [`PreviewError`].

use preview_runtime::RuntimeError;
use preview_types::PreviewError;

use crate::render::RenderError;

impl From<RenderError> for PreviewError {
    fn from(err: RenderError) -> Self {
        PreviewError::Provisioning {
            reason: format!("template: {err}"),
            diagnostics: None,
        }
    }
}

/// Infrastructure failure outside a provisioning step.
pub(crate) fn runtime_error(context: &str, err: RuntimeError) -> PreviewError {
    PreviewError::Runtime(format!("{context}: {err}"))
}

/// Failure while bringing a stack up, keeping the runtime's output.
pub(crate) fn provisioning_error(step: &str, err: RuntimeError) -> PreviewError {
    PreviewError::Provisioning {
        reason: format!("{step}: {err}"),
        diagnostics: err.diagnostics().map(str::to_string),
    }
}

/// Filesystem failure in a working directory.
pub(crate) fn io_error(context: &str, err: std::io::Error) -> PreviewError {
    PreviewError::State(format!("{context}: {err}"))
}
