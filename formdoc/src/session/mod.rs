//! Per-user conversational state.
//!
//! A [`SessionRegistry`] maps session identifiers to the progress of one
//! pass through a [`Script`](crate::script::Script). Callers drive it with
//! [`begin`](SessionRegistry::begin), [`submit_answer`](SessionRegistry::submit_answer)
//! and [`cancel`](SessionRegistry::cancel), and act on the returned [`Outcome`].

mod registry;
mod state;
mod sweeper;

pub use registry::{Progress, SessionConfig, SessionRegistry};
pub use state::{Answers, Outcome, Session};
pub use sweeper::{SessionSweeper, SweeperHandle};
