//! Error types for formdoc.
//!
//! Each stage owns its error enum. Only [`RenderError`] ever reaches the
//! caller of a document pipeline; [`ConvertError`] is absorbed into a
//! fallback delivery.

use std::path::PathBuf;
use std::time::Duration;

/// Result type alias for formdoc operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The umbrella error type for the crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The question script is malformed.
    #[error("script: {0}")]
    Script(#[from] ScriptError),

    /// Rendering the template failed.
    #[error("render: {0}")]
    Render(#[from] RenderError),

    /// Converting the rendered document failed.
    #[error("convert: {0}")]
    Convert(#[from] ConvertError),
}

/// A question script failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptError {
    /// The script has no fields.
    #[error("script has no fields")]
    Empty,

    /// A field has an empty key.
    #[error("field #{index} has an empty key")]
    EmptyKey {
        /// Position of the offending field.
        index: usize,
    },

    /// Two fields share a key.
    #[error("duplicate field key: {0}")]
    DuplicateKey(String),
}

/// Rendering answers into a template failed.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// The template file could not be read.
    #[error("cannot read template {path}: {source}")]
    Template {
        /// Template location.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The template is not a readable zip archive, or writing the output archive failed.
    #[error("archive: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// A document part could not be decoded.
    #[error("cannot read part {name}: {source}")]
    Part {
        /// Archive entry name.
        name: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The template is structurally unusable.
    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    /// Rendering produced no bytes.
    #[error("rendered document is empty")]
    EmptyOutput,

    /// The blocking render task panicked or was cancelled.
    #[error("render task: {0}")]
    Task(String),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Converting a rendered document into the primary format failed.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// The converter program could not be started.
    #[error("cannot start {program}: {source}")]
    Spawn {
        /// Program that was invoked.
        program: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The converter did not finish in time.
    #[error("conversion timed out after {0:?}")]
    Timeout(Duration),

    /// The converter exited unsuccessfully.
    #[error("converter exited with status {status:?}: {stderr}")]
    Failed {
        /// Exit code, if the process was not killed by a signal.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// The converter reported success but left no output file.
    #[error("converter produced no file at {0}")]
    MissingOutput(PathBuf),

    /// The converter produced an empty file.
    #[error("converted document is empty")]
    EmptyOutput,

    /// Conversion is switched off.
    #[error("conversion is disabled")]
    Disabled,

    /// I/O error while staging files.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
