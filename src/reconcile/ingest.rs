//! Feature ingest: create the target representation of a source feature.
//!
//! Dispatch is by class. Tracks (lines titled like `AA101a`) land in their
//! outing's folder, colored by suffix, and are clipped to the outing boundary
//! as soon as one exists. Until then they wait in the outing's pending list.

use crate::error::MirrorResult;
use crate::feature::{
    ClueProps, Draft, Feature, FeatureClass, FeatureId, FeatureKind, Geometry, MarkerStyle,
    ShapeStyle,
};
use crate::reconcile::track::{TrackName, parse_track_name};
use crate::reconcile::{Mirror, Outcome};
use crate::session::MapSession;

/// Marker symbol used for mirrored clues.
pub const CLUE_SYMBOL: &str = "clue";

impl<S: MapSession, T: MapSession> Mirror<S, T> {
    /// Create the target features for `feature` and record them.
    pub fn ingest(&mut self, feature: &Feature) -> MirrorResult<Outcome> {
        match &feature.kind {
            FeatureKind::Assignment(_) => self.ensure_assignment_outing(feature),
            FeatureKind::Shape(style) => match &feature.geometry {
                Some(geometry @ Geometry::LineString(_)) => match parse_track_name(&feature.title) {
                    Some(name) => self.ingest_track(feature, geometry, style, &name),
                    None => self.ingest_plain_shape(feature, geometry, style),
                },
                Some(geometry @ Geometry::Polygon(_)) => {
                    self.ingest_plain_shape(feature, geometry, style)
                }
                other => Ok(unsupported(feature, other.as_ref())),
            },
            FeatureKind::Marker(style) => match &feature.geometry {
                Some(Geometry::Point(position)) => {
                    let draft = Draft::marker(&feature.title, position.clone(), style.clone(), None);
                    let id = self.target.create(draft)?;
                    self.store.record(FeatureClass::Marker, &feature.id, [id.clone()])?;
                    Ok(Outcome::Created { targets: vec![id] })
                }
                other => Ok(unsupported(feature, other.as_ref())),
            },
            FeatureKind::Clue(props) => match &feature.geometry {
                Some(Geometry::Point(position)) => self.ingest_clue(feature, position, props),
                other => Ok(unsupported(feature, other.as_ref())),
            },
            FeatureKind::Folder => Ok(Outcome::Ignored),
        }
    }

    fn ingest_plain_shape(
        &mut self,
        feature: &Feature,
        geometry: &Geometry,
        style: &ShapeStyle,
    ) -> MirrorResult<Outcome> {
        let draft = Draft::shape(&feature.title, geometry.clone(), style.clone(), None);
        let id = self.target.create(draft)?;
        self.store.record(FeatureClass::Shape, &feature.id, [id.clone()])?;
        Ok(Outcome::Created { targets: vec![id] })
    }

    fn ingest_track(
        &mut self,
        feature: &Feature,
        geometry: &Geometry,
        style: &ShapeStyle,
        name: &TrackName,
    ) -> MirrorResult<Outcome> {
        let key = self.ensure_track_outing(&name.outing_key())?;
        let Some(outing) = self.store.outing(&key).cloned() else {
            return Ok(Outcome::Ignored);
        };

        let style = ShapeStyle {
            stroke: name.color().to_string(),
            ..style.clone()
        };
        let draft = Draft::shape(&feature.title, geometry.clone(), style, outing.folder_id.clone());
        let line = self.target.create(draft)?;

        match &outing.boundary_id {
            Some(boundary) => {
                let group = match self.crop_line(&line, boundary) {
                    Ok(group) => group,
                    Err(e) => {
                        // Nothing records the line yet; leaving it would duplicate on retry.
                        if self.target.contains(&line)? {
                            self.target.delete(FeatureClass::Shape, &line)?;
                        }
                        tracing::warn!(line = %line, boundary = %boundary, error = %e, "crop failed, removed uncropped track");
                        return Err(e);
                    }
                };
                self.store
                    .record(FeatureClass::Shape, &feature.id, group.iter().cloned())?;
                if !group.is_empty() {
                    let stored = group.clone();
                    self.store
                        .update_outing(&key, |o| o.cropped_track_groups.push(stored))?;
                }
                tracing::info!(track = %feature.title, outing = %key, pieces = group.len(), "cropped track");
                Ok(Outcome::Created { targets: group })
            }
            None => {
                self.store
                    .record(FeatureClass::Shape, &feature.id, [line.clone()])?;
                let stored = line.clone();
                self.store
                    .update_outing(&key, |o| o.uncropped_track_ids.push(stored))?;
                tracing::info!(track = %feature.title, outing = %key, "track waiting for boundary");
                Ok(Outcome::Created {
                    targets: vec![line],
                })
            }
        }
    }

    fn ingest_clue(
        &mut self,
        feature: &Feature,
        position: &[f64],
        props: &ClueProps,
    ) -> MirrorResult<Outcome> {
        let outing = props
            .assignment_id
            .as_ref()
            .and_then(|sid| self.live_outing(sid))
            .map(|o| (o.key.clone(), o.folder_id.clone()));
        let (outing_key, folder) = match outing {
            Some((key, folder)) => (Some(key), folder),
            None => (None, None),
        };

        let style = MarkerStyle {
            symbol: CLUE_SYMBOL.to_string(),
            description: props.description.clone(),
            ..Default::default()
        };
        let id = self
            .target
            .create(Draft::marker(&feature.title, position.to_vec(), style, folder))?;
        self.store.record(FeatureClass::Clue, &feature.id, [id.clone()])?;
        if let Some(key) = outing_key {
            let stored = id.clone();
            self.store.update_outing(&key, |o| o.clue_ids.push(stored))?;
        }
        Ok(Outcome::Created { targets: vec![id] })
    }

    /// Clip every pending track of every outing that now has a boundary.
    ///
    /// Each clipped track's correspondence entry has its uncropped id swapped
    /// for the clipped group. Returns how many tracks were processed.
    pub fn crop_pending_tracks(&mut self) -> MirrorResult<usize> {
        let work: Vec<(String, FeatureId, Vec<FeatureId>)> = self
            .store
            .outings()
            .filter(|o| !o.uncropped_track_ids.is_empty())
            .filter_map(|o| {
                o.boundary_id
                    .clone()
                    .map(|b| (o.key.clone(), b, o.uncropped_track_ids.clone()))
            })
            .collect();

        let mut processed = 0;
        for (key, boundary, pending) in work {
            for line in pending {
                let group = if self.target.contains(&line)? {
                    self.crop_line(&line, &boundary)?
                } else {
                    tracing::warn!(line = %line, outing = %key, "pending track vanished before cropping");
                    Vec::new()
                };
                self.store.replace_target(&line, &group)?;
                self.store.update_outing(&key, |o| {
                    o.uncropped_track_ids.retain(|t| t != &line);
                    if !group.is_empty() {
                        o.cropped_track_groups.push(group);
                    }
                })?;
                processed += 1;
            }
        }
        if processed > 0 {
            tracing::info!(tracks = processed, "cropped pending tracks");
        }
        Ok(processed)
    }

    fn crop_line(&mut self, line: &FeatureId, boundary: &FeatureId) -> MirrorResult<Vec<FeatureId>> {
        let group = self
            .target
            .crop(line, boundary, self.settings.crop_beyond)?;
        if group.is_empty() {
            tracing::warn!(line = %line, boundary = %boundary, "track lies entirely outside the boundary");
        }
        Ok(group)
    }
}

fn unsupported(feature: &Feature, geometry: Option<&Geometry>) -> Outcome {
    let kind = geometry.map(Geometry::type_name).unwrap_or("no geometry");
    tracing::error!(
        id = %feature.id,
        title = %feature.title,
        class = %feature.class(),
        geometry = kind,
        "unhandled geometry type"
    );
    Outcome::Unsupported {
        reason: format!("{} with {kind}", feature.class()),
    }
}
