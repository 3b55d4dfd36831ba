//! Error taxonomy for the script transformation core.
//!
//! Every variant is scoped to a single file: a failed transform never aborts a
//! synchronization run, the caller decides between copying the original and
//! failing the build.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransformError>;

#[derive(Error, Debug)]
pub enum TransformError {
    /// The sibling descriptor exists but is not the expected JSON document.
    #[error("malformed scene descriptor {}: {source}", path.display())]
    MalformedDescriptor {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The descriptor display list nests deeper than the traversal budget.
    #[error("scene descriptor {} nests deeper than {limit} levels", path.display())]
    DescriptorTooDeep { path: PathBuf, limit: usize },

    /// The script could not be parsed in its dialect.
    #[error("unsupported syntax in {}: {message}", path.display())]
    UnsupportedSyntax { path: PathBuf, message: String },

    /// The rewritten text failed verification and was not emitted.
    #[error("rewrite of {} produced invalid output: {message}", path.display())]
    InvalidOutput { path: PathBuf, message: String },

    #[error("io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TransformError {
    pub fn unsupported_syntax(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::UnsupportedSyntax {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invalid_output(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InvalidOutput {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Short machine-readable code, used in logs and by the N-API bridge.
    pub fn code(&self) -> &'static str {
        match self {
            TransformError::MalformedDescriptor { .. } => "MALFORMED_DESCRIPTOR",
            TransformError::DescriptorTooDeep { .. } => "DESCRIPTOR_TOO_DEEP",
            TransformError::UnsupportedSyntax { .. } => "UNSUPPORTED_SYNTAX",
            TransformError::InvalidOutput { .. } => "INVALID_OUTPUT",
            TransformError::Io { .. } => "IO_ERROR",
        }
    }
}
