//! Event handlers: new, property-changed, geometry-changed and deleted.

use crate::error::MirrorResult;
use crate::feature::{
    EventKind, Feature, FeatureClass, FeatureEvent, FeatureId, FeatureKind, Geometry,
    PropertyPatch,
};
use crate::reconcile::track::{normalize_title, parse_track_name};
use crate::reconcile::{Mirror, Outcome};
use crate::session::MapSession;

impl<S: MapSession, T: MapSession> Mirror<S, T> {
    /// Route one source event to its handler.
    pub fn handle(&mut self, event: &FeatureEvent) -> MirrorResult<Outcome> {
        let f = &event.feature;
        tracing::debug!(event = ?event.event, id = %f.id, class = %f.class(), title = %f.title, "source event");
        match event.event {
            EventKind::New => self.on_new_feature(f),
            EventKind::PropertyChanged => self.on_property_update(f),
            EventKind::GeometryChanged => self.on_geometry_update(f),
            EventKind::Deleted => self.on_deleted_feature(f),
        }
    }

    /// Mirror a feature unless it is already fully represented on the target.
    pub fn on_new_feature(&mut self, f: &Feature) -> MirrorResult<Outcome> {
        match f.class() {
            FeatureClass::Folder => Ok(Outcome::Ignored),
            FeatureClass::Assignment => {
                let title = normalize_title(&f.title);
                let live = self
                    .live_outing(&f.id)
                    .map(|o| (o.title.clone(), o.folder_id.clone(), o.boundary_id.clone()));
                let outcome = match live {
                    // Title changed while we were not watching.
                    Some((live_title, _, _)) if live_title != title => self.rename_assignment(f)?,
                    Some((_, folder, boundary))
                        if self.exists(folder.as_ref())?
                            && (f.geometry.is_none() || self.exists(boundary.as_ref())?) =>
                    {
                        Outcome::AlreadyMirrored
                    }
                    _ => self.ingest(f)?,
                };
                // A boundary can exist while its tracks are still pending.
                self.crop_pending_tracks()?;
                Ok(outcome)
            }
            FeatureClass::Shape | FeatureClass::Marker | FeatureClass::Clue => {
                if self.store.is_tracked(&f.id) {
                    // An empty entry is a track clipped away entirely; it stays
                    // mirrored only while the feature is still a track.
                    let clipped_away = self.store.lookup(&f.id).is_empty();
                    if self.all_exist(&f.id)? && (!clipped_away || titled_track(f)) {
                        return Ok(Outcome::AlreadyMirrored);
                    }
                    tracing::info!(id = %f.id, title = %f.title, "target copy incomplete or stale, re-importing");
                    self.discard(&f.id)?;
                }
                self.ingest(f)
            }
        }
    }

    /// Propagate a property edit.
    pub fn on_property_update(&mut self, f: &Feature) -> MirrorResult<Outcome> {
        if f.class() == FeatureClass::Assignment {
            return self.rename_assignment(f);
        }
        if !self.store.is_tracked(&f.id) {
            return Ok(Outcome::Ignored);
        }
        if self.is_track(f) {
            return self.reimport(f);
        }

        let targets = self.store.lookup(&f.id).to_vec();
        match targets.as_slice() {
            [] => Ok(Outcome::Ignored),
            [only] => {
                self.target.edit_properties(only, &property_patch(f))?;
                Ok(Outcome::Patched { targets: 1 })
            }
            many => {
                tracing::warn!(
                    id = %f.id,
                    title = %f.title,
                    targets = many.len(),
                    "ambiguous correspondence, property edit skipped"
                );
                Ok(Outcome::Ambiguous {
                    targets: many.len(),
                })
            }
        }
    }

    /// Propagate a geometry edit.
    pub fn on_geometry_update(&mut self, f: &Feature) -> MirrorResult<Outcome> {
        let Some(geometry) = &f.geometry else {
            return Ok(Outcome::Ignored);
        };

        if f.class() == FeatureClass::Assignment {
            return self.update_boundary(f, geometry);
        }
        if !self.store.is_tracked(&f.id) {
            return Ok(Outcome::Ignored);
        }
        if self.is_track(f) {
            return self.reimport(f);
        }
        if matches!(f.kind, FeatureKind::Marker(_) | FeatureKind::Clue(_))
            && !matches!(geometry, Geometry::Point(_))
        {
            tracing::error!(id = %f.id, geometry = geometry.type_name(), "point feature moved to a non-point geometry");
            return Ok(Outcome::Unsupported {
                reason: format!("{} with {}", f.class(), geometry.type_name()),
            });
        }

        let mut patched = 0;
        for id in self.store.lookup(&f.id).to_vec() {
            match self.target.feature(&id)? {
                Some(t) if t.class() != FeatureClass::Folder => {
                    self.target.edit_geometry(&id, geometry)?;
                    patched += 1;
                }
                _ => {}
            }
        }
        Ok(Outcome::Patched { targets: patched })
    }

    /// Remove everything mirrored from a deleted source feature.
    pub fn on_deleted_feature(&mut self, f: &Feature) -> MirrorResult<Outcome> {
        if !self.store.is_tracked(&f.id) {
            return Ok(Outcome::Ignored);
        }
        let removed = self.discard(&f.id)?;
        tracing::info!(id = %f.id, title = %f.title, targets = removed, "deleted mirrored features");
        Ok(Outcome::Deleted { targets: removed })
    }

    /// Move the live outing's boundary. Historical outings are never touched.
    fn update_boundary(&mut self, f: &Feature, geometry: &Geometry) -> MirrorResult<Outcome> {
        let title = normalize_title(&f.title);
        let Some(live) = self.live_outing(&f.id).filter(|o| o.title == title) else {
            return Ok(Outcome::Ignored);
        };
        let boundary = live.boundary_id.clone();
        match boundary {
            Some(id) if self.target.contains(&id)? => {
                let shape = match geometry {
                    Geometry::Polygon(rings) => Geometry::Polygon(rings.iter().take(1).cloned().collect()),
                    Geometry::LineString(_) => geometry.clone(),
                    other => {
                        tracing::error!(id = %f.id, geometry = other.type_name(), "assignment has an unhandled geometry type");
                        return Ok(Outcome::Unsupported {
                            reason: format!("assignment geometry {}", other.type_name()),
                        });
                    }
                };
                self.target.edit_geometry(&id, &shape)?;
                Ok(Outcome::Patched { targets: 1 })
            }
            _ => self.ensure_assignment_outing(f),
        }
    }

    /// Delete-then-reimport, so clipping and outing membership are re-derived.
    fn reimport(&mut self, f: &Feature) -> MirrorResult<Outcome> {
        let removed = self.discard(&f.id)?;
        tracing::info!(id = %f.id, title = %f.title, removed, "re-importing track");
        self.on_new_feature(f)
    }

    /// Delete every live target feature mirrored from `source`, drop their
    /// outing references and forget the entry. Returns how many were deleted.
    fn discard(&mut self, source: &FeatureId) -> MirrorResult<usize> {
        let targets = self.store.lookup(source).to_vec();
        let mut deleted = 0;
        for id in &targets {
            if let Some(t) = self.target.feature(id)? {
                self.target.delete(t.class(), id)?;
                deleted += 1;
            }
        }
        self.store.remove_outing_refs(&targets)?;
        self.store.forget(source)?;
        Ok(deleted)
    }

    /// A line that is, or was, mirrored as a track. An empty entry can
    /// only come from a track that was clipped away entirely.
    fn is_track(&self, f: &Feature) -> bool {
        let targets = self.store.lookup(&f.id);
        titled_track(f)
            || (self.store.is_tracked(&f.id) && targets.is_empty())
            || targets.iter().any(|id| {
                self.store.outings().any(|o| {
                    o.cropped_track_groups.iter().flatten().any(|t| t == id)
                        || o.uncropped_track_ids.contains(id)
                })
            })
    }

    fn all_exist(&self, source: &FeatureId) -> MirrorResult<bool> {
        for id in self.store.lookup(source) {
            if !self.target.contains(id)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn exists(&self, id: Option<&FeatureId>) -> MirrorResult<bool> {
        match id {
            Some(id) => Ok(self.target.contains(id)?),
            None => Ok(false),
        }
    }
}

/// A line shape whose title parses as a track.
fn titled_track(f: &Feature) -> bool {
    matches!(f.kind, FeatureKind::Shape(_))
        && f.geometry.as_ref().is_some_and(Geometry::is_line)
        && parse_track_name(&f.title).is_some()
}

/// Class-specific property copy. Clues only carry title and description;
/// other classes copy their whole property block.
fn property_patch(f: &Feature) -> PropertyPatch {
    match &f.kind {
        FeatureKind::Clue(props) => PropertyPatch {
            title: Some(f.title.clone()),
            description: Some(props.description.clone()),
            kind: None,
        },
        kind => PropertyPatch {
            title: Some(f.title.clone()),
            description: None,
            kind: Some(kind.clone()),
        },
    }
}
