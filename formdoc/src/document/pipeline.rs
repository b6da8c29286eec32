//! Render, convert, and fall back.

use super::convert::Converter;
use super::template::Renderer;
use crate::error::{ConvertError, RenderError};
use crate::session::Answers;
use std::sync::Arc;
use tracing::{info, warn};

/// Note attached to a delivery when the primary conversion failed.
pub const FALLBACK_NOTE: &str = "primary conversion failed, delivering fallback format";

/// Base name of generated files when none is configured.
pub const DEFAULT_OUTPUT_NAME: &str = "document";

/// Which format a delivery ended up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// The converted format.
    Primary,
    /// The rendered template, unconverted.
    Fallback,
}

/// A finished document ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryPlan {
    /// File contents.
    pub bytes: Vec<u8>,
    /// File name including extension.
    pub filename: String,
    /// Format of `bytes`.
    pub format: DocumentFormat,
    /// Message for the user to accompany the file.
    pub note: Option<String>,
}

/// Result of the conversion step.
#[derive(Debug)]
pub enum Conversion {
    /// Conversion succeeded.
    Converted(Vec<u8>),
    /// Conversion failed for the given reason; deliver the intermediate document.
    Fallback(String),
}

/// Turns a completed answer set into a deliverable document.
#[derive(Clone)]
pub struct DocumentPipeline {
    renderer: Arc<dyn Renderer>,
    converter: Arc<dyn Converter>,
    output_name: String,
}

impl std::fmt::Debug for DocumentPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentPipeline")
            .field("renderer", &self.renderer.extension())
            .field("converter", &self.converter.extension())
            .field("output_name", &self.output_name)
            .finish()
    }
}

impl DocumentPipeline {
    /// Create a pipeline from a renderer and a converter.
    pub fn new(renderer: Arc<dyn Renderer>, converter: Arc<dyn Converter>) -> Self {
        Self {
            renderer,
            converter,
            output_name: DEFAULT_OUTPUT_NAME.to_string(),
        }
    }

    /// Set the base name of generated files.
    #[must_use]
    pub fn with_output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = name.into();
        self
    }

    /// Base name of generated files.
    #[must_use]
    pub fn output_name(&self) -> &str {
        &self.output_name
    }

    /// Render `answers` and convert the result, falling back to the
    /// rendered document if conversion fails.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError`] if the template cannot be rendered.
    /// Conversion failures never surface as errors.
    pub async fn generate(&self, answers: &Answers) -> Result<DeliveryPlan, RenderError> {
        let rendered = self.renderer.render(answers).await?;
        if rendered.is_empty() {
            return Err(RenderError::EmptyOutput);
        }

        let plan = match self.convert(&rendered).await {
            Conversion::Converted(bytes) => DeliveryPlan {
                bytes,
                filename: format!("{}.{}", self.output_name, self.converter.extension()),
                format: DocumentFormat::Primary,
                note: None,
            },
            Conversion::Fallback(reason) => {
                warn!(error = %reason, "document conversion failed, using fallback");
                DeliveryPlan {
                    bytes: rendered,
                    filename: format!("{}.{}", self.output_name, self.renderer.extension()),
                    format: DocumentFormat::Fallback,
                    note: Some(FALLBACK_NOTE.to_string()),
                }
            }
        };

        info!(
            filename = %plan.filename,
            size = plan.bytes.len(),
            format = ?plan.format,
            "document generated"
        );
        Ok(plan)
    }

    /// Attempt the primary conversion of a rendered document.
    pub async fn convert(&self, rendered: &[u8]) -> Conversion {
        match self.try_convert(rendered).await {
            Ok(bytes) => Conversion::Converted(bytes),
            Err(e) => Conversion::Fallback(e.to_string()),
        }
    }

    async fn try_convert(&self, rendered: &[u8]) -> Result<Vec<u8>, ConvertError> {
        // Removed when dropped, on every return path.
        let workdir = tempfile::Builder::new().prefix("formdoc-").tempdir()?;

        let source = workdir
            .path()
            .join(format!("intermediate.{}", self.renderer.extension()));
        tokio::fs::write(&source, rendered).await?;

        let produced = self.converter.convert(&source, workdir.path()).await?;
        let bytes = tokio::fs::read(&produced).await?;
        if bytes.is_empty() {
            return Err(ConvertError::EmptyOutput);
        }
        Ok(bytes)
    }
}
