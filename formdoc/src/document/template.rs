//! Template rendering.
//!
//! Templates mark fields with `{{ key }}` placeholders. Word processors
//! often split a typed placeholder across several formatting runs, so
//! inside a `.docx` part the braces and the key may be separated by
//! markup; the whole span is replaced with the escaped answer.

use crate::error::RenderError;
use crate::session::Answers;
use async_trait::async_trait;
use quick_xml::escape::{escape as xml_escape, unescape};
use regex::{Captures, Regex};
use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{(?:<[^>]*>)*\{((?:[^{}<]|<[^>]*>)*?)\}(?:<[^>]*>)*\}").expect("valid regex")
});

static MARKUP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid regex"));

/// Document parts of a `.docx` archive that can hold placeholders.
const DOCX_PART_PREFIXES: &[&str] = &[
    "word/document",
    "word/header",
    "word/footer",
    "word/footnotes",
    "word/endnotes",
];

const DOCX_MAIN_PART: &str = "word/document.xml";

/// Turns collected answers into document bytes.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// File extension of the rendered document, without the dot.
    fn extension(&self) -> &str;

    /// Render `answers` into a document.
    async fn render(&self, answers: &Answers) -> Result<Vec<u8>, RenderError>;
}

/// How substituted values are escaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escape {
    /// Insert values verbatim.
    None,
    /// Escape XML special characters.
    Xml,
}

/// Replace every `{{ key }}` in `source` with the matching answer.
///
/// Keys without an answer render as empty text.
#[must_use]
pub fn render_placeholders(source: &str, answers: &Answers, escape: Escape) -> String {
    PLACEHOLDER_RE
        .replace_all(source, |caps: &Captures<'_>| {
            let value = answers.get(&placeholder_key(&caps[1])).unwrap_or_default();
            match escape {
                Escape::None => value.to_string(),
                Escape::Xml => xml_escape(value).into_owned(),
            }
        })
        .into_owned()
}

/// Placeholder key with any run markup Word inserted removed and
/// character references resolved.
fn placeholder_key(raw: &str) -> String {
    let text = MARKUP_RE.replace_all(raw, "");
    match unescape(&text) {
        Ok(key) => key.trim().to_string(),
        Err(_) => text.trim().to_string(),
    }
}

async fn read_template(path: &Path) -> Result<Vec<u8>, RenderError> {
    tokio::fs::read(path)
        .await
        .map_err(|source| RenderError::Template {
            path: path.to_path_buf(),
            source,
        })
}

/// A Word (`.docx`) template.
///
/// The template is re-read on every render, so edits take effect without
/// a restart.
#[derive(Debug, Clone)]
pub struct DocxTemplate {
    path: PathBuf,
}

impl DocxTemplate {
    /// Create a renderer for the template at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Template location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Renderer for DocxTemplate {
    fn extension(&self) -> &str {
        "docx"
    }

    async fn render(&self, answers: &Answers) -> Result<Vec<u8>, RenderError> {
        let template = read_template(&self.path).await?;
        let answers = answers.clone();

        let bytes = tokio::task::spawn_blocking(move || render_docx(&template, &answers))
            .await
            .map_err(|e| RenderError::Task(e.to_string()))??;

        debug!(path = %self.path.display(), size = bytes.len(), "rendered docx template");
        Ok(bytes)
    }
}

fn is_template_part(name: &str) -> bool {
    name.ends_with(".xml")
        && DOCX_PART_PREFIXES
            .iter()
            .any(|prefix| name.starts_with(prefix))
}

/// Substitute answers into every text part of a `.docx` archive.
fn render_docx(template: &[u8], answers: &Answers) -> Result<Vec<u8>, RenderError> {
    let mut archive = ZipArchive::new(Cursor::new(template))?;
    if !archive.file_names().any(|name| name == DOCX_MAIN_PART) {
        return Err(RenderError::InvalidTemplate(format!(
            "missing {DOCX_MAIN_PART}"
        )));
    }

    let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(template.len())));
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();

        if !is_template_part(&name) {
            writer.raw_copy_file(entry)?;
            continue;
        }

        let mut xml = String::new();
        entry
            .read_to_string(&mut xml)
            .map_err(|source| RenderError::Part {
                name: name.clone(),
                source,
            })?;
        let rendered = render_placeholders(&xml, answers, Escape::Xml);

        let options = SimpleFileOptions::default().compression_method(entry.compression());
        writer.start_file(name.as_str(), options)?;
        writer.write_all(rendered.as_bytes())?;
    }

    let bytes = writer.finish()?.into_inner();
    if bytes.is_empty() {
        return Err(RenderError::EmptyOutput);
    }
    Ok(bytes)
}

/// A plain-text template (`.txt`, `.md`, `.html`, ...).
///
/// Values are inserted verbatim.
#[derive(Debug, Clone)]
pub struct TextTemplate {
    path: PathBuf,
    extension: String,
}

impl TextTemplate {
    /// Create a renderer for the template at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("txt")
            .to_string();
        Self { path, extension }
    }
}

#[async_trait]
impl Renderer for TextTemplate {
    fn extension(&self) -> &str {
        &self.extension
    }

    async fn render(&self, answers: &Answers) -> Result<Vec<u8>, RenderError> {
        let template = read_template(&self.path).await?;
        let source = String::from_utf8(template).map_err(|e| {
            RenderError::InvalidTemplate(format!("{} is not UTF-8: {e}", self.path.display()))
        })?;

        let rendered = render_placeholders(&source, answers, Escape::None);
        if rendered.is_empty() {
            return Err(RenderError::EmptyOutput);
        }
        Ok(rendered.into_bytes())
    }
}

/// Pick a renderer from the template's file extension.
pub fn template_from_path(path: impl Into<PathBuf>) -> Arc<dyn Renderer> {
    let path = path.into();
    let is_docx = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("docx"));

    if is_docx {
        Arc::new(DocxTemplate::new(path))
    } else {
        Arc::new(TextTemplate::new(path))
    }
}
