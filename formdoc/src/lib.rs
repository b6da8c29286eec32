//! Formdoc walks a user through a fixed questionnaire, one answer per
//! message, and turns the collected answers into a document.
//!
//! The crate is transport-agnostic: a chat front end feeds text into a
//! [`SessionRegistry`](session::SessionRegistry) and, once a session reports
//! [`Outcome::ReadyToGenerate`](session::Outcome::ReadyToGenerate), hands the
//! answers to a [`DocumentPipeline`](document::DocumentPipeline).

pub mod document;
pub mod error;
pub mod prelude;
pub mod script;
pub mod session;

pub use error::{Error, Result};
