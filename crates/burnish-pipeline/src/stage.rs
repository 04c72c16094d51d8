//! The transform stage abstraction shared by every file category.

use std::path::PathBuf;

use crate::diagnostic::Diagnostic;
use crate::source::FileEntry;

/// Output of running a stage over one file.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    /// Final file contents
    pub contents: Vec<u8>,

    /// Diagnostics gathered by the stage's validation steps
    pub diagnostics: Vec<Diagnostic>,
}

impl StageOutput {
    pub fn new(contents: impl Into<Vec<u8>>, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            contents: contents.into(),
            diagnostics,
        }
    }

    /// Output with no diagnostics.
    pub fn bytes(contents: impl Into<Vec<u8>>) -> Self {
        Self::new(contents, Vec::new())
    }
}

/// A file that could not be processed at all.
///
/// These are fatal for the file only; the orchestrator skips its output and
/// moves on.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("{path}: file is not valid UTF-8")]
    NotUtf8 { path: PathBuf },

    #[error("{path}: template error: {message}")]
    Template { path: PathBuf, message: String },

    #[error("{path}: cannot resolve import '{import}': {message}")]
    Import {
        path: PathBuf,
        import: String,
        message: String,
    },

    #[error("{path}: stylesheet error: {message}")]
    Stylesheet { path: PathBuf, message: String },

    #[error("{path}: image error: {message}")]
    Image { path: PathBuf, message: String },

    #[error("{path}: unsupported file for stage '{stage}'")]
    Unsupported { path: PathBuf, stage: &'static str },
}

/// Invalid step ordering in a stage definition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stage '{stage}': step '{step}' must run after '{after}'")]
pub struct StepOrderError {
    pub stage: &'static str,
    pub step: &'static str,
    pub after: &'static str,
}

/// An ordered pipeline of steps applied to one file.
///
/// Implementations must be pure with respect to the file: they read the
/// entry and return new contents, and never touch the filesystem output.
pub trait TransformStage: Send + Sync {
    /// Stage identifier (e.g. "markup")
    fn name(&self) -> &'static str;

    /// Names of the steps in execution order.
    fn steps(&self) -> Vec<&'static str>;

    /// Run every step over the file.
    fn run(&self, entry: &FileEntry) -> Result<StageOutput, TransformError>;
}

/// Decode an entry as text or fail the file.
pub(crate) fn entry_text(entry: &FileEntry) -> Result<&str, TransformError> {
    entry.text().map_err(|_| TransformError::NotUtf8 {
        path: entry.path.clone(),
    })
}
