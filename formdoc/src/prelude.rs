//! Commonly used types, for glob import.

pub use crate::document::{
    Conversion, Converter, DeliveryPlan, DisabledConverter, DocumentFormat, DocumentPipeline,
    DocxTemplate, OfficeConverter, Renderer, TextTemplate, template_from_path,
};
pub use crate::error::{ConvertError, Error, RenderError, Result, ScriptError};
pub use crate::script::{Field, Script};
pub use crate::session::{
    Answers, Outcome, Progress, SessionConfig, SessionRegistry, SessionSweeper, SweeperHandle,
};
