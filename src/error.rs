//! Rich diagnostic error types for map-mirror.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]`
//! derives. `MirrorError` aggregates them so handlers can use `?` across
//! subsystem boundaries without losing codes or help text.

use miette::Diagnostic;
use thiserror::Error;

use crate::config::ConfigError;
use crate::paths::PathError;
use crate::reconcile::state::StateError;
use crate::session::SessionError;

/// Top-level error type for the reconciliation engine.
#[derive(Debug, Error, Diagnostic)]
pub enum MirrorError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Path(#[from] PathError),
}

pub type MirrorResult<T> = std::result::Result<T, MirrorError>;
