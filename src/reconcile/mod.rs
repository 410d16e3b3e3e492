//! Reconciliation engine: decides, per source event, how the target map changes.
//!
//! The engine is split by concern, all operating on one [`Mirror`]:
//!
//! - [`state`]: durable outings and source→target correspondence
//! - [`outing`]: outing creation, keying and the assignment rename state machine
//! - [`ingest`]: per-class creation on the target, deferred track cropping
//! - [`propagate`]: new / property / geometry / delete event handlers
//! - [`recovery`]: startup prune-and-replay and the live poll loop
//!
//! Event handling is strictly sequential: each event, including every target
//! call it makes, completes before the next is taken.

pub mod ingest;
pub mod outing;
pub mod propagate;
pub mod recovery;
pub mod state;
pub mod track;

use crate::feature::FeatureId;
use crate::session::MapSession;

pub use outing::RenameAction;
pub use recovery::RecoveryReport;
pub use state::{Outing, PruneReport, ReconciliationState, StateError, StateResult, StateStore};
pub use track::{TrackName, parse_track_name};

/// Tunables for how mirrored features are drawn and cropped.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorSettings {
    /// Buffer added around a boundary before clipping tracks to it.
    pub crop_beyond: f64,
    pub boundary_stroke: String,
    pub boundary_width: f64,
    pub boundary_opacity: f64,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            crop_beyond: 0.001,
            boundary_stroke: "#FF0000".into(),
            boundary_width: 8.0,
            boundary_opacity: 0.4,
        }
    }
}

/// What a handler did with an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Target features were created for a non-assignment source feature.
    Created { targets: Vec<FeatureId> },
    /// A new outing was opened for an assignment.
    OutingOpened { key: String },
    /// An existing outing was reused, adopted or had missing parts recreated.
    OutingRestored { key: String },
    /// Everything the feature maps to already exists on the target.
    AlreadyMirrored,
    /// Existing target features were edited in place.
    Patched { targets: usize },
    /// An outing was re-keyed to a new title in place.
    Renamed { from: String, to: String },
    /// The assignment was paired with a new team; `previous` is kept as history.
    Reassigned { previous: String, key: String },
    /// The assignment number was cleared; the completed outing is left untouched.
    Released { key: String },
    /// Target features were removed.
    Deleted { targets: usize },
    /// The feature's geometry cannot be mirrored.
    Unsupported { reason: String },
    /// More than one target feature matches a feature expected to be singular.
    Ambiguous { targets: usize },
    /// Nothing to do.
    Ignored,
}

/// The reconciliation engine, bound to a source map, a target map and its
/// persisted state.
pub struct Mirror<S, T> {
    source: S,
    target: T,
    store: StateStore,
    settings: MirrorSettings,
}

impl<S: MapSession, T: MapSession> Mirror<S, T> {
    pub fn new(source: S, target: T, store: StateStore, settings: MirrorSettings) -> Self {
        Self {
            source,
            target,
            store,
            settings,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn settings(&self) -> &MirrorSettings {
        &self.settings
    }

    /// Take the sessions and store back, e.g. to simulate a restart.
    pub fn into_parts(self) -> (S, T, StateStore) {
        (self.source, self.target, self.store)
    }
}
