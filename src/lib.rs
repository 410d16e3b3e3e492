// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # map-mirror
//!
//! Live one-way mirroring of a search-and-rescue map into an operations map.
//!
//! ## Architecture
//!
//! - **Feature model** (`feature`): typed features, geometries and events
//! - **Session seam** (`session`): the `MapSession` / `EventSource` traits and
//!   the offline snapshot + journal implementations
//! - **Reconciliation** (`reconcile`): outings, track cropping, event
//!   propagation and crash recovery over a persisted correspondence store
//! - **Configuration** (`config`, `paths`): TOML config and XDG locations
//!
//! ## Library usage
//!
//! ```no_run
//! use map_mirror::reconcile::{Mirror, MirrorSettings, StateStore};
//! use map_mirror::session::MemorySession;
//!
//! let source = MemorySession::new("SRC");
//! let target = MemorySession::new("TGT");
//! let mut mirror = Mirror::new(source, target, StateStore::memory_only(), MirrorSettings::default());
//! let report = mirror.start().unwrap();
//! println!("replayed {}", report.replayed);
//! ```

pub mod config;
pub mod error;
pub mod feature;
pub mod paths;
pub mod reconcile;
pub mod session;
