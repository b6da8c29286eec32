//! Document generation.
//!
//! A [`DocumentPipeline`] renders collected answers through a [`Renderer`],
//! tries to convert the result with a [`Converter`], and falls back to the
//! rendered document when conversion fails.

mod convert;
mod pipeline;
mod template;

pub use convert::{Converter, DEFAULT_CONVERT_TIMEOUT, DisabledConverter, OfficeConverter};
pub use pipeline::{
    Conversion, DEFAULT_OUTPUT_NAME, DeliveryPlan, DocumentFormat, DocumentPipeline, FALLBACK_NOTE,
};
pub use template::{
    DocxTemplate, Escape, Renderer, TextTemplate, render_placeholders, template_from_path,
};
