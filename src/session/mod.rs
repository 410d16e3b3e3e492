//! The map-session seam.
//!
//! The reconciliation engine never speaks to the mapping backend directly. It
//! goes through [`MapSession`] for queries and mutations and receives source
//! changes through an [`EventSource`]. [`memory::MemorySession`] and
//! [`journal::JournalEvents`] are the offline implementations used by the
//! binary and the test suite.

pub mod journal;
pub mod memory;

use miette::Diagnostic;
use thiserror::Error;

use crate::feature::{
    Draft, Feature, FeatureClass, FeatureEvent, FeatureId, Geometry, Inventory, PropertyPatch,
};

pub use journal::JournalEvents;
pub use memory::MemorySession;

/// Errors from a map session.
#[derive(Debug, Error, Diagnostic)]
pub enum SessionError {
    #[error("could not open session for map \"{map}\": {message}")]
    #[diagnostic(
        code(map_mirror::session::open),
        help(
            "The map session must be available before reconciliation can start. \
             Check the map id and that the snapshot file exists and is readable."
        )
    )]
    Open { map: String, message: String },

    #[error("feature not found: \"{id}\"")]
    #[diagnostic(
        code(map_mirror::session::not_found),
        help("The feature was deleted on the map after it was last observed.")
    )]
    NotFound { id: FeatureId },

    #[error("map request failed: {message}")]
    #[diagnostic(code(map_mirror::session::request))]
    Request { message: String },

    #[error("snapshot error for {path}: {message}")]
    #[diagnostic(
        code(map_mirror::session::snapshot),
        help("Snapshot files are JSON arrays of features. Check the file syntax and permissions.")
    )]
    Snapshot { path: String, message: String },

    #[error("event journal error for {path}: {message}")]
    #[diagnostic(
        code(map_mirror::session::journal),
        help("The journal holds one JSON feature event per line.")
    )]
    Journal { path: String, message: String },
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

/// Query and mutation surface of one open map document.
pub trait MapSession {
    /// All current features.
    fn features(&self) -> SessionResult<Vec<Feature>>;

    /// A single feature by id, `None` if it no longer exists.
    fn feature(&self, id: &FeatureId) -> SessionResult<Option<Feature>>;

    /// Live id inventory grouped by class.
    fn inventory(&self) -> SessionResult<Inventory>;

    /// Whether a feature with this id currently exists.
    fn contains(&self, id: &FeatureId) -> SessionResult<bool> {
        Ok(self.feature(id)?.is_some())
    }

    /// Create a feature and return its new id.
    fn create(&mut self, draft: Draft) -> SessionResult<FeatureId>;

    fn edit_properties(&mut self, id: &FeatureId, patch: &PropertyPatch) -> SessionResult<()>;

    fn edit_geometry(&mut self, id: &FeatureId, geometry: &Geometry) -> SessionResult<()>;

    fn delete(&mut self, class: FeatureClass, id: &FeatureId) -> SessionResult<()>;

    /// Clip `line` against the geometry of `boundary`, buffered by `beyond`.
    ///
    /// The uncropped line is consumed. The returned ids are the lines that
    /// remain; the list is empty when nothing of the line lies inside.
    fn crop(
        &mut self,
        line: &FeatureId,
        boundary: &FeatureId,
        beyond: f64,
    ) -> SessionResult<Vec<FeatureId>>;

    /// Note a change delivered through the event stream. Sessions that poll
    /// the backend themselves can ignore it.
    fn observe(&mut self, _event: &FeatureEvent) {}

    /// Push buffered local state out, if the session keeps any.
    fn flush(&mut self) -> SessionResult<()> {
        Ok(())
    }
}

/// Delivers source-map change events, one poll at a time.
pub trait EventSource {
    /// Events observed since the previous poll, in delivery order.
    fn poll(&mut self) -> SessionResult<Vec<FeatureEvent>>;
}
