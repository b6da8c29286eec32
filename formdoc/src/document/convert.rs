//! Conversion of rendered documents into the primary delivery format.

use crate::error::ConvertError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// Default time allowed for one conversion.
pub const DEFAULT_CONVERT_TIMEOUT: Duration = Duration::from_secs(120);

/// Converts a file on disk into another format.
#[async_trait]
pub trait Converter: Send + Sync {
    /// Extension of the produced file, without the dot.
    fn extension(&self) -> &str;

    /// Convert `source`, writing the result into `out_dir`.
    ///
    /// Returns the path of the produced file.
    async fn convert(&self, source: &Path, out_dir: &Path) -> Result<PathBuf, ConvertError>;
}

/// Converts documents to PDF with a headless office suite.
///
/// Runs `soffice --headless --convert-to pdf --outdir <dir> <file>` with
/// an isolated user profile inside the output directory, so concurrent
/// conversions do not contend for the same profile lock.
#[derive(Debug, Clone)]
pub struct OfficeConverter {
    program: String,
    timeout: Duration,
}

impl Default for OfficeConverter {
    fn default() -> Self {
        Self {
            program: "soffice".to_string(),
            timeout: DEFAULT_CONVERT_TIMEOUT,
        }
    }
}

impl OfficeConverter {
    /// Create a converter using `soffice` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different office binary.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Set the conversion timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The office binary that will be invoked.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }
}

#[async_trait]
impl Converter for OfficeConverter {
    fn extension(&self) -> &str {
        "pdf"
    }

    async fn convert(&self, source: &Path, out_dir: &Path) -> Result<PathBuf, ConvertError> {
        let profile = out_dir.join("lo-profile");

        let mut cmd = Command::new(&self.program);
        cmd.arg(format!("-env:UserInstallation=file://{}", profile.display()))
            .args(["--headless", "--convert-to", "pdf", "--outdir"])
            .arg(out_dir)
            .arg(source)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|source| ConvertError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let output = timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ConvertError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(ConvertError::Failed {
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stem = source.file_stem().unwrap_or_default();
        let produced = out_dir.join(stem).with_extension("pdf");
        if !tokio::fs::try_exists(&produced).await? {
            return Err(ConvertError::MissingOutput(produced));
        }

        debug!(program = %self.program, output = %produced.display(), "converted document");
        Ok(produced)
    }
}

/// A converter that always fails, forcing fallback delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledConverter;

#[async_trait]
impl Converter for DisabledConverter {
    fn extension(&self) -> &str {
        "pdf"
    }

    async fn convert(&self, _source: &Path, _out_dir: &Path) -> Result<PathBuf, ConvertError> {
        Err(ConvertError::Disabled)
    }
}
