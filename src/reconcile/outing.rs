//! Outing lifecycle: creation, keying, completion and assignment renames.
//!
//! An outing is keyed by the assignment's normalized title. A second outing
//! with the same title gets a `:2`, `:3`, ... suffix. At most one outing per
//! source assignment is live: the most recently created one. Older outings
//! are history and are never edited by later renames.

use crate::error::MirrorResult;
use crate::feature::{Draft, Feature, FeatureId, Geometry, PropertyPatch, ShapeStyle};
use crate::reconcile::state::Outing;
use crate::reconcile::track::{compact, has_number, is_placeholder, normalize_title};
use crate::reconcile::{Mirror, Outcome};
use crate::session::MapSession;

/// How a title change on an assignment is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameAction {
    /// Same pairing, new name: re-key the outing and retitle its target objects.
    InPlace,
    /// A new team took the assignment: open a new outing, keep the old one.
    Reassign,
    /// The team finished: leave the completed outing as it is.
    Release,
    /// Nothing to do.
    Keep,
}

/// Decide what a title change means from the presence of a trailing number
/// in the old and new titles.
pub fn classify_rename(old: &str, new: &str) -> RenameAction {
    if old == new {
        return RenameAction::Keep;
    }
    match (is_placeholder(old), has_number(old), has_number(new)) {
        (true, _, _) | (false, false, true) => RenameAction::InPlace,
        (false, true, true) => RenameAction::Reassign,
        (false, true, false) => RenameAction::Release,
        (false, false, false) => RenameAction::Keep,
    }
}

impl<S: MapSession, T: MapSession> Mirror<S, T> {
    /// The live outing for a source assignment: its most recent one.
    pub fn live_outing(&self, assignment: &FeatureId) -> Option<&Outing> {
        self.store
            .outings()
            .filter(|o| o.source_assignment_id.as_ref() == Some(assignment))
            .max_by_key(|o| o.serial)
    }

    /// `title` if unused as an outing key, otherwise `title:N` for the
    /// smallest free `N >= 2`.
    pub fn unique_key(&self, title: &str) -> String {
        if !self.store.contains_outing(title) {
            return title.to_string();
        }
        (2..)
            .map(|n| format!("{title}:{n}"))
            .find(|k| !self.store.contains_outing(k))
            .unwrap_or_else(|| title.to_string())
    }

    /// Find or open the outing for an assignment feature, then create any
    /// missing folder or boundary and crop tracks waiting on it.
    ///
    /// Only the live outing is reused, and only while its title still
    /// matches. A speculative track outing with the same title is adopted.
    pub fn ensure_assignment_outing(&mut self, feature: &Feature) -> MirrorResult<Outcome> {
        self.assignment_outing(feature, true)
    }

    fn assignment_outing(&mut self, feature: &Feature, reuse_live: bool) -> MirrorResult<Outcome> {
        if let Some(g) = &feature.geometry {
            if boundary_kind(g).is_none() {
                tracing::error!(
                    id = %feature.id,
                    title = %feature.title,
                    geometry = g.type_name(),
                    "assignment has an unhandled geometry type"
                );
                return Ok(Outcome::Unsupported {
                    reason: format!("assignment geometry {}", g.type_name()),
                });
            }
        }

        let title = normalize_title(&feature.title);
        let live = self
            .live_outing(&feature.id)
            .filter(|_| reuse_live)
            .filter(|o| o.title == title || is_placeholder(&o.title))
            .map(|o| (o.key.clone(), o.title.clone(), false));
        let existing = live.or_else(|| {
            self.store
                .outings()
                .filter(|o| o.source_assignment_id.is_none() && compact(&o.title) == compact(&title))
                .max_by_key(|o| o.serial)
                .map(|o| (o.key.clone(), o.title.clone(), true))
        });

        let (key, outcome_key_is_new) = match existing {
            Some((key, existing_title, speculative)) => {
                let sid = feature.id.clone();
                let key = if is_placeholder(&existing_title) && !is_placeholder(&title) {
                    self.rename_in_place(&key, &title)?
                } else {
                    key
                };
                let adopted_title = title.clone();
                self.store.update_outing(&key, |o| {
                    o.source_assignment_id = Some(sid);
                    o.title = adopted_title;
                })?;
                if speculative {
                    // The adopted outing becomes the assignment's live one.
                    self.store.promote_outing(&key)?;
                    tracing::info!(key = %key, assignment = %feature.id, "adopted speculative outing");
                }
                (key, false)
            }
            None => {
                let key = self.unique_key(&title);
                let folder = self.target.create(Draft::folder(&key))?;
                self.store.insert_outing(Outing {
                    key: key.clone(),
                    title,
                    source_assignment_id: Some(feature.id.clone()),
                    folder_id: Some(folder),
                    ..Default::default()
                })?;
                tracing::info!(key = %key, assignment = %feature.id, "opened outing");
                (key, true)
            }
        };

        self.complete_outing(&key, feature)?;
        Ok(if outcome_key_is_new {
            Outcome::OutingOpened { key }
        } else {
            Outcome::OutingRestored { key }
        })
    }

    /// Find or speculatively open the outing a track belongs to.
    ///
    /// An exact key match wins; otherwise the newest outing whose title
    /// matches ignoring spaces. A speculative outing has no source assignment
    /// and no boundary until its assignment is seen.
    pub fn ensure_track_outing(&mut self, key: &str) -> MirrorResult<String> {
        if self.store.contains_outing(key) {
            return Ok(key.to_string());
        }
        let family = compact(key);
        if let Some(found) = self
            .store
            .outings()
            .filter(|o| compact(&o.title) == family)
            .max_by_key(|o| o.serial)
        {
            return Ok(found.key.clone());
        }

        let folder = self.target.create(Draft::folder(key))?;
        self.store.insert_outing(Outing {
            key: key.to_string(),
            title: key.to_string(),
            folder_id: Some(folder),
            ..Default::default()
        })?;
        tracing::info!(key = %key, "opened speculative outing for orphan track");
        Ok(key.to_string())
    }

    /// Apply a title change on an assignment to its live outing.
    pub fn rename_assignment(&mut self, feature: &Feature) -> MirrorResult<Outcome> {
        let Some(live) = self.live_outing(&feature.id) else {
            return Ok(Outcome::Ignored);
        };
        let (key, old) = (live.key.clone(), live.title.clone());
        let new = normalize_title(&feature.title);

        match classify_rename(&old, &new) {
            RenameAction::InPlace => {
                let to = self.rename_in_place(&key, &new)?;
                tracing::info!(from = %key, to = %to, "renamed outing in place");
                Ok(Outcome::Renamed { from: key, to })
            }
            RenameAction::Reassign => {
                tracing::info!(previous = %key, title = %new, "assignment re-paired");
                match self.assignment_outing(feature, false)? {
                    Outcome::OutingOpened { key: opened }
                    | Outcome::OutingRestored { key: opened } => Ok(Outcome::Reassigned {
                        previous: key,
                        key: opened,
                    }),
                    other => Ok(other),
                }
            }
            RenameAction::Release => {
                tracing::info!(key = %key, title = %new, "assignment released, keeping outing");
                Ok(Outcome::Released { key })
            }
            RenameAction::Keep => Ok(Outcome::Ignored),
        }
    }

    /// Re-key an outing to `title` and retitle its folder and boundary.
    /// Returns the new key.
    pub(crate) fn rename_in_place(&mut self, key: &str, title: &str) -> MirrorResult<String> {
        let Some(outing) = self.store.outing(key).cloned() else {
            return Ok(key.to_string());
        };
        let new_key = self.unique_key(title);
        let patch = PropertyPatch::title(&new_key);
        for id in [&outing.folder_id, &outing.boundary_id].into_iter().flatten() {
            if self.target.contains(id)? {
                self.target.edit_properties(id, &patch)?;
            }
        }
        self.store.rekey_outing(key, &new_key)?;
        let title = title.to_string();
        self.store.update_outing(&new_key, |o| o.title = title)?;
        Ok(new_key)
    }

    /// Recreate a missing folder or boundary for an outing, then crop any
    /// tracks that were waiting for the boundary.
    fn complete_outing(&mut self, key: &str, feature: &Feature) -> MirrorResult<()> {
        let Some(outing) = self.store.outing(key).cloned() else {
            return Ok(());
        };

        let folder = match &outing.folder_id {
            Some(id) if self.target.contains(id)? => id.clone(),
            _ => {
                let id = self.target.create(Draft::folder(key))?;
                let stored = id.clone();
                self.store.update_outing(key, |o| o.folder_id = Some(stored))?;
                tracing::debug!(key = %key, "recreated outing folder");
                id
            }
        };

        let boundary_live = match &outing.boundary_id {
            Some(id) => self.target.contains(id)?,
            None => false,
        };
        let geometry = feature.geometry.as_ref().filter(|_| !boundary_live);
        if let Some(geometry) = geometry {
            let description = feature.kind.description().unwrap_or_default().to_string();
            let style = ShapeStyle {
                stroke: self.settings.boundary_stroke.clone(),
                stroke_width: self.settings.boundary_width,
                stroke_opacity: self.settings.boundary_opacity,
                fill: None,
                fill_opacity: 0.0,
                pattern: None,
                description,
            };
            let draft = Draft::shape(key, boundary_geometry(geometry), style, Some(folder));
            let boundary = self.target.create(draft)?;
            let stored = boundary.clone();
            self.store.update_outing(key, |o| o.boundary_id = Some(stored))?;
            tracing::info!(key = %key, boundary = %boundary, "drew outing boundary");
        }

        let pending = self
            .store
            .outing(key)
            .is_some_and(|o| o.boundary_id.is_some() && !o.uncropped_track_ids.is_empty());
        if pending {
            self.crop_pending_tracks()?;
        }
        Ok(())
    }
}

/// Boundaries are drawn as polygons or lines, nothing else.
fn boundary_kind(geometry: &Geometry) -> Option<&'static str> {
    match geometry {
        Geometry::Polygon(_) => Some("polygon"),
        Geometry::LineString(_) => Some("line"),
        Geometry::Point(_) | Geometry::MultiLineString(_) => None,
    }
}

/// Only the outer ring of a polygon is drawn.
fn boundary_geometry(geometry: &Geometry) -> Geometry {
    match geometry {
        Geometry::Polygon(rings) => Geometry::Polygon(rings.iter().take(1).cloned().collect()),
        other => other.clone(),
    }
}
