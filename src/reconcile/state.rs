//! Durable reconciliation state: outings and the source→target correspondence.
//!
//! The whole state is a single JSON document, rewritten after every mutation.
//! It is small (one entry per mirrored feature) and edits arrive one at a time,
//! so a full rewrite per change is cheap enough.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::feature::{FeatureClass, FeatureId, Inventory};

/// Errors from the state store.
#[derive(Debug, Error, Diagnostic)]
pub enum StateError {
    #[error("state file I/O error: {message}")]
    #[diagnostic(
        code(map_mirror::state::io),
        help(
            "Failed to read or write the reconciliation state file. Check that the \
             state directory exists and has correct permissions."
        )
    )]
    Io { message: String },

    #[error("state file {path} is corrupt: {message}")]
    #[diagnostic(
        code(map_mirror::state::corrupt),
        help(
            "The state file could not be parsed. Move it aside to start from an empty \
             state; startup replay will skip nothing and may duplicate target features."
        )
    )]
    Corrupt { path: String, message: String },

    #[error("refusing to record correspondence for assignment \"{id}\"")]
    #[diagnostic(
        code(map_mirror::state::assignment_correspondence),
        help("Assignments are tracked through outing records, never through the correspondence table.")
    )]
    AssignmentCorrespondence { id: FeatureId },
}

pub type StateResult<T> = std::result::Result<T, StateError>;

/// One pairing of an assignment area with a team.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outing {
    /// Unique map key: the normalized title, possibly with a `:N` suffix.
    pub key: String,
    /// Normalized source title this outing was created or last renamed from.
    pub title: String,
    /// Creation order; the highest serial for an assignment is its live outing.
    pub serial: u64,
    #[serde(default)]
    pub source_assignment_id: Option<FeatureId>,
    #[serde(default)]
    pub folder_id: Option<FeatureId>,
    #[serde(default)]
    pub boundary_id: Option<FeatureId>,
    #[serde(default)]
    pub cropped_track_groups: Vec<Vec<FeatureId>>,
    #[serde(default)]
    pub uncropped_track_ids: Vec<FeatureId>,
    #[serde(default)]
    pub clue_ids: Vec<FeatureId>,
}

impl Outing {
    /// Whether any track group, pending track or clue references `id`.
    pub fn references(&self, id: &FeatureId) -> bool {
        self.cropped_track_groups.iter().flatten().any(|t| t == id)
            || self.uncropped_track_ids.contains(id)
            || self.clue_ids.contains(id)
    }

    fn ref_count(&self) -> usize {
        self.uncropped_track_ids.len()
            + self.clue_ids.len()
            + self.cropped_track_groups.iter().map(Vec::len).sum::<usize>()
    }

    /// Keep only the track and clue ids for which `keep` holds. Groups left
    /// empty are removed. Returns how many ids were dropped.
    fn retain_refs(&mut self, mut keep: impl FnMut(&FeatureId) -> bool) -> usize {
        let before = self.ref_count();
        for group in &mut self.cropped_track_groups {
            group.retain(|t| keep(t));
        }
        self.cropped_track_groups.retain(|g| !g.is_empty());
        self.uncropped_track_ids.retain(|t| keep(t));
        self.clue_ids.retain(|t| keep(t));
        before - self.ref_count()
    }
}

/// The persisted aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationState {
    #[serde(default)]
    pub outings: BTreeMap<String, Outing>,
    #[serde(default)]
    pub correspondence: BTreeMap<FeatureId, Vec<FeatureId>>,
    #[serde(default)]
    pub next_serial: u64,
}

/// What startup pruning removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub correspondence_dropped: usize,
    pub target_ids_dropped: usize,
    pub outings_dropped: usize,
    pub outing_refs_dropped: usize,
}

impl PruneReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Reconciliation state bound to its file. Every mutating method persists
/// before returning.
pub struct StateStore {
    path: Option<PathBuf>,
    state: ReconciliationState,
}

impl StateStore {
    /// Load the state file, or start empty if it does not exist.
    pub fn open(path: &Path) -> StateResult<Self> {
        let state = if path.exists() {
            let data = std::fs::read_to_string(path).map_err(|e| StateError::Io {
                message: format!("read {}: {e}", path.display()),
            })?;
            serde_json::from_str(&data).map_err(|e| StateError::Corrupt {
                path: path.display().to_string(),
                message: e.to_string(),
            })?
        } else {
            ReconciliationState::default()
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            state,
        })
    }

    /// A store that never touches disk.
    pub fn memory_only() -> Self {
        Self {
            path: None,
            state: ReconciliationState::default(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn state(&self) -> &ReconciliationState {
        &self.state
    }

    /// Write the whole state to disk.
    pub fn flush(&self) -> StateResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StateError::Io {
                message: format!("create dir {}: {e}", parent.display()),
            })?;
        }
        let json = serde_json::to_string_pretty(&self.state).map_err(|e| StateError::Io {
            message: format!("serialize state: {e}"),
        })?;
        std::fs::write(path, json).map_err(|e| StateError::Io {
            message: format!("write {}: {e}", path.display()),
        })
    }

    // -----------------------------------------------------------------------
    // Correspondence
    // -----------------------------------------------------------------------

    /// Append target ids to the entry for `source`. Assignments are refused.
    pub fn record<I>(&mut self, class: FeatureClass, source: &FeatureId, targets: I) -> StateResult<()>
    where
        I: IntoIterator<Item = FeatureId>,
    {
        let owns_outing = self
            .state
            .outings
            .values()
            .any(|o| o.source_assignment_id.as_ref() == Some(source));
        if class == FeatureClass::Assignment || owns_outing {
            tracing::error!(id = %source, "correspondence requested for an assignment");
            return Err(StateError::AssignmentCorrespondence { id: source.clone() });
        }
        self.state
            .correspondence
            .entry(source.clone())
            .or_default()
            .extend(targets);
        self.flush()
    }

    /// Target ids mirrored from `source`, empty if none.
    pub fn lookup(&self, source: &FeatureId) -> &[FeatureId] {
        self.state
            .correspondence
            .get(source)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_tracked(&self, source: &FeatureId) -> bool {
        self.state.correspondence.contains_key(source)
    }

    /// Remove the entry for `source`, returning its target ids.
    pub fn forget(&mut self, source: &FeatureId) -> StateResult<Vec<FeatureId>> {
        let removed = self.state.correspondence.remove(source).unwrap_or_default();
        self.flush()?;
        Ok(removed)
    }

    /// Swap `old` for `replacement` in whichever entry holds it. Returns the
    /// source id whose entry changed.
    pub fn replace_target(
        &mut self,
        old: &FeatureId,
        replacement: &[FeatureId],
    ) -> StateResult<Option<FeatureId>> {
        let owner = self
            .state
            .correspondence
            .iter()
            .find(|(_, targets)| targets.contains(old))
            .map(|(source, _)| source.clone());
        let Some(source) = owner else {
            return Ok(None);
        };
        if let Some(targets) = self.state.correspondence.get_mut(&source) {
            let mut rebuilt = Vec::with_capacity(targets.len() + replacement.len());
            for t in targets.drain(..) {
                if &t == old {
                    rebuilt.extend(replacement.iter().cloned());
                } else {
                    rebuilt.push(t);
                }
            }
            *targets = rebuilt;
        }
        self.flush()?;
        Ok(Some(source))
    }

    // -----------------------------------------------------------------------
    // Outings
    // -----------------------------------------------------------------------

    pub fn outing(&self, key: &str) -> Option<&Outing> {
        self.state.outings.get(key)
    }

    pub fn outings(&self) -> impl Iterator<Item = &Outing> {
        self.state.outings.values()
    }

    pub fn contains_outing(&self, key: &str) -> bool {
        self.state.outings.contains_key(key)
    }

    /// Insert a new outing under `outing.key`, stamping its serial.
    pub fn insert_outing(&mut self, mut outing: Outing) -> StateResult<()> {
        self.state.next_serial += 1;
        outing.serial = self.state.next_serial;
        self.state.outings.insert(outing.key.clone(), outing);
        self.flush()
    }

    /// Give an existing outing a fresh serial, making it the newest.
    pub fn promote_outing(&mut self, key: &str) -> StateResult<bool> {
        let Some(outing) = self.state.outings.get_mut(key) else {
            return Ok(false);
        };
        self.state.next_serial += 1;
        outing.serial = self.state.next_serial;
        self.flush()?;
        Ok(true)
    }

    /// Mutate an outing in place and persist. Returns `None` if `key` is unknown.
    pub fn update_outing<R>(
        &mut self,
        key: &str,
        f: impl FnOnce(&mut Outing) -> R,
    ) -> StateResult<Option<R>> {
        let Some(outing) = self.state.outings.get_mut(key) else {
            return Ok(None);
        };
        let result = f(outing);
        self.flush()?;
        Ok(Some(result))
    }

    /// Move an outing to a new key.
    pub fn rekey_outing(&mut self, old: &str, new: &str) -> StateResult<bool> {
        let Some(mut outing) = self.state.outings.remove(old) else {
            return Ok(false);
        };
        outing.key = new.to_string();
        self.state.outings.insert(new.to_string(), outing);
        self.flush()?;
        Ok(true)
    }

    /// Remove `ids` from every outing's track groups, pending list and clues.
    pub fn remove_outing_refs(&mut self, ids: &[FeatureId]) -> StateResult<()> {
        let mut changed = false;
        for outing in self.state.outings.values_mut() {
            changed |= outing.retain_refs(|t| !ids.contains(t)) > 0;
        }
        if changed {
            self.flush()?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Recovery
    // -----------------------------------------------------------------------

    /// Drop every reference to an id missing from its live inventory.
    ///
    /// A correspondence entry survives while its source id is live and at
    /// least one of its target ids is. An outing survives while any of its
    /// source, folder or boundary references is live; the dead ones are nulled.
    pub fn prune(&mut self, source: &Inventory, target: &Inventory) -> StateResult<PruneReport> {
        let mut report = PruneReport::default();

        self.state.correspondence.retain(|sid, targets| {
            let before = targets.len();
            targets.retain(|t| target.contains(t));
            report.target_ids_dropped += before - targets.len();
            let keep = source.contains(sid) && (before == 0 || !targets.is_empty());
            if !keep {
                tracing::debug!(source = %sid, "pruning stale correspondence");
                report.correspondence_dropped += 1;
            }
            keep
        });

        self.state.outings.retain(|key, outing| {
            let mut live_refs = 0;
            let mut check = |slot: &mut Option<FeatureId>, inv: &Inventory| {
                if let Some(id) = slot {
                    if inv.contains(id) {
                        live_refs += 1;
                    } else {
                        *slot = None;
                        report.outing_refs_dropped += 1;
                    }
                }
            };
            check(&mut outing.source_assignment_id, source);
            check(&mut outing.folder_id, target);
            check(&mut outing.boundary_id, target);

            report.outing_refs_dropped += outing.retain_refs(|t| target.contains(t));

            if live_refs == 0 {
                tracing::debug!(outing = %key, "pruning outing with no live references");
                report.outings_dropped += 1;
                false
            } else {
                true
            }
        });

        self.flush()?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> Vec<FeatureId> {
        list.iter().map(|s| FeatureId::from(*s)).collect()
    }

    fn inventory(class: FeatureClass, list: &[&str]) -> Inventory {
        ids(list).into_iter().map(|id| (class, id)).collect()
    }

    #[test]
    fn record_appends_never_overwrites() {
        let mut store = StateStore::memory_only();
        let sid = FeatureId::from("s1");
        store.record(FeatureClass::Shape, &sid, ids(&["t1"])).unwrap();
        store.record(FeatureClass::Shape, &sid, ids(&["t2", "t3"])).unwrap();
        assert_eq!(store.lookup(&sid), ids(&["t1", "t2", "t3"]).as_slice());
    }

    #[test]
    fn record_refuses_assignments() {
        let mut store = StateStore::memory_only();
        let err = store
            .record(FeatureClass::Assignment, &"a1".into(), ids(&["t1"]))
            .unwrap_err();
        assert!(matches!(err, StateError::AssignmentCorrespondence { .. }));
        assert!(!store.is_tracked(&"a1".into()));

        store
            .insert_outing(Outing {
                key: "AA101".into(),
                title: "AA101".into(),
                source_assignment_id: Some("a2".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(store.record(FeatureClass::Shape, &"a2".into(), ids(&["t2"])).is_err());
    }

    #[test]
    fn forget_and_lookup_missing() {
        let mut store = StateStore::memory_only();
        let sid = FeatureId::from("s1");
        assert!(store.lookup(&sid).is_empty());
        store.record(FeatureClass::Marker, &sid, ids(&["t1"])).unwrap();
        assert_eq!(store.forget(&sid).unwrap(), ids(&["t1"]));
        assert!(!store.is_tracked(&sid));
        assert!(store.forget(&sid).unwrap().is_empty());
    }

    #[test]
    fn replace_target_splices_group_in_place() {
        let mut store = StateStore::memory_only();
        let sid = FeatureId::from("s1");
        store.record(FeatureClass::Shape, &sid, ids(&["a", "b", "c"])).unwrap();
        let owner = store.replace_target(&"b".into(), &ids(&["b1", "b2"])).unwrap();
        assert_eq!(owner, Some(sid.clone()));
        assert_eq!(store.lookup(&sid), ids(&["a", "b1", "b2", "c"]).as_slice());
        assert_eq!(store.replace_target(&"zzz".into(), &[]).unwrap(), None);
    }

    #[test]
    fn serials_increase_and_rekey_moves_entry() {
        let mut store = StateStore::memory_only();
        store
            .insert_outing(Outing {
                key: "NO TITLE".into(),
                ..Default::default()
            })
            .unwrap();
        store
            .insert_outing(Outing {
                key: "AA101".into(),
                ..Default::default()
            })
            .unwrap();
        assert!(store.outing("AA101").unwrap().serial > store.outing("NO TITLE").unwrap().serial);
        assert!(store.rekey_outing("NO TITLE", "AA102").unwrap());
        assert!(!store.contains_outing("NO TITLE"));
        assert_eq!(store.outing("AA102").unwrap().key, "AA102");
        assert!(!store.rekey_outing("missing", "x").unwrap());

        assert!(store.promote_outing("AA102").unwrap());
        assert!(store.outing("AA102").unwrap().serial > store.outing("AA101").unwrap().serial);
        assert!(!store.promote_outing("missing").unwrap());
    }

    #[test]
    fn remove_outing_refs_drops_empty_groups() {
        let mut store = StateStore::memory_only();
        store
            .insert_outing(Outing {
                key: "AA 101".into(),
                cropped_track_groups: vec![ids(&["c1", "c2"]), ids(&["c3"])],
                uncropped_track_ids: ids(&["u1"]),
                clue_ids: ids(&["k1"]),
                ..Default::default()
            })
            .unwrap();
        store.remove_outing_refs(&ids(&["c3", "u1", "c1"])).unwrap();
        let o = store.outing("AA 101").unwrap();
        assert_eq!(o.cropped_track_groups, vec![ids(&["c2"])]);
        assert!(o.uncropped_track_ids.is_empty());
        assert_eq!(o.clue_ids, ids(&["k1"]));
        assert!(o.references(&"k1".into()));
    }

    #[test]
    fn prune_drops_dead_ids_and_keeps_partial_outings() {
        let mut store = StateStore::memory_only();
        store.record(FeatureClass::Shape, &"s1".into(), ids(&["t1", "t2"])).unwrap();
        store.record(FeatureClass::Shape, &"s2".into(), ids(&["t3"])).unwrap();
        store.record(FeatureClass::Marker, &"gone".into(), ids(&["t4"])).unwrap();
        store
            .insert_outing(Outing {
                key: "AA101".into(),
                source_assignment_id: Some("a1".into()),
                folder_id: Some("f1".into()),
                boundary_id: Some("b-dead".into()),
                ..Default::default()
            })
            .unwrap();
        store
            .insert_outing(Outing {
                key: "BB 7".into(),
                folder_id: Some("f-dead".into()),
                ..Default::default()
            })
            .unwrap();

        let source = inventory(FeatureClass::Shape, &["s1", "s2", "a1"]);
        let target = inventory(FeatureClass::Shape, &["t1", "f1"]);
        let report = store.prune(&source, &target).unwrap();

        assert_eq!(store.lookup(&"s1".into()), ids(&["t1"]).as_slice());
        assert!(!store.is_tracked(&"s2".into()));
        assert!(!store.is_tracked(&"gone".into()));
        let kept = store.outing("AA101").unwrap();
        assert_eq!(kept.folder_id, Some("f1".into()));
        assert_eq!(kept.boundary_id, None);
        assert!(!store.contains_outing("BB 7"));
        assert_eq!(report.correspondence_dropped, 2);
        assert_eq!(report.outings_dropped, 1);
        assert!(!report.is_empty());
    }

    #[test]
    fn state_persists_across_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("state").join("S-T.json");
        {
            let mut store = StateStore::open(&path).unwrap();
            store.record(FeatureClass::Shape, &"s1".into(), ids(&["t1"])).unwrap();
            store
                .insert_outing(Outing {
                    key: "AA101".into(),
                    title: "AA101".into(),
                    ..Default::default()
                })
                .unwrap();
        }
        let store = StateStore::open(&path).unwrap();
        assert_eq!(store.lookup(&"s1".into()), ids(&["t1"]).as_slice());
        assert_eq!(store.outing("AA101").unwrap().serial, 1);
        assert_eq!(store.state().next_serial, 1);
    }

    #[test]
    fn corrupt_state_is_reported() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            StateStore::open(&path),
            Err(StateError::Corrupt { .. })
        ));
    }
}
