//! In-process map document.
//!
//! `MemorySession` keeps features in an ordered map and optionally mirrors
//! them to a JSON snapshot file. Clipping is planar: a vertex is kept when it
//! lies inside the boundary polygon or within `beyond` of any boundary edge,
//! and every run of two or more kept vertices becomes one output line.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::feature::{
    Draft, EventKind, Feature, FeatureClass, FeatureEvent, FeatureId, Geometry, Inventory,
    Position, PropertyPatch,
};
use crate::session::{MapSession, SessionError, SessionResult};

/// A map document held in memory.
#[derive(Debug, Clone)]
pub struct MemorySession {
    map: String,
    features: BTreeMap<FeatureId, Feature>,
    next_id: u64,
    snapshot: Option<PathBuf>,
}

impl MemorySession {
    /// An empty, memory-only map.
    pub fn new(map: impl Into<String>) -> Self {
        Self {
            map: map.into(),
            features: BTreeMap::new(),
            next_id: 1,
            snapshot: None,
        }
    }

    /// A memory-only map pre-populated with `features`.
    pub fn with_features(map: impl Into<String>, features: impl IntoIterator<Item = Feature>) -> Self {
        let mut session = Self::new(map);
        for f in features {
            session.features.insert(f.id.clone(), f);
        }
        session
    }

    /// Open a map from an existing snapshot file. A missing or unreadable
    /// file is an [`SessionError::Open`].
    pub fn open(map: impl Into<String>, path: &Path) -> SessionResult<Self> {
        let map = map.into();
        let data = std::fs::read_to_string(path).map_err(|e| SessionError::Open {
            map: map.clone(),
            message: format!("read {}: {e}", path.display()),
        })?;
        let features: Vec<Feature> =
            serde_json::from_str(&data).map_err(|e| SessionError::Open {
                map: map.clone(),
                message: format!("parse {}: {e}", path.display()),
            })?;
        let mut session = Self::with_features(map, features);
        session.snapshot = Some(path.to_path_buf());
        Ok(session)
    }

    /// Open a snapshot, starting an empty map bound to `path` if it does not exist yet.
    pub fn open_or_create(map: impl Into<String>, path: &Path) -> SessionResult<Self> {
        if path.exists() {
            return Self::open(map, path);
        }
        let mut session = Self::new(map);
        session.snapshot = Some(path.to_path_buf());
        Ok(session)
    }

    pub fn map(&self) -> &str {
        &self.map
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Write the snapshot file, if this session is bound to one.
    pub fn save(&self) -> SessionResult<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SessionError::Snapshot {
                path: parent.display().to_string(),
                message: e.to_string(),
            })?;
        }
        let features: Vec<&Feature> = self.features.values().collect();
        let json = serde_json::to_string_pretty(&features).map_err(|e| SessionError::Snapshot {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        std::fs::write(path, json).map_err(|e| SessionError::Snapshot {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Bring this document in line with an observed change event.
    pub fn apply(&mut self, event: &FeatureEvent) {
        match event.event {
            EventKind::Deleted => {
                self.features.remove(&event.feature.id);
            }
            EventKind::New | EventKind::PropertyChanged | EventKind::GeometryChanged => {
                self.features
                    .insert(event.feature.id.clone(), event.feature.clone());
            }
        }
    }

    /// Features stored in the given folder.
    pub fn children(&self, folder: &FeatureId) -> Vec<&Feature> {
        self.features
            .values()
            .filter(|f| f.folder_id.as_ref() == Some(folder))
            .collect()
    }

    pub fn by_class(&self, class: FeatureClass) -> Vec<&Feature> {
        self.features.values().filter(|f| f.class() == class).collect()
    }

    fn allocate_id(&mut self) -> FeatureId {
        loop {
            let id = FeatureId::new(format!("{}-{}", self.map, self.next_id));
            self.next_id += 1;
            if !self.features.contains_key(&id) {
                return id;
            }
        }
    }

    fn get_mut(&mut self, id: &FeatureId) -> SessionResult<&mut Feature> {
        self.features
            .get_mut(id)
            .ok_or_else(|| SessionError::NotFound { id: id.clone() })
    }
}

impl MapSession for MemorySession {
    fn features(&self) -> SessionResult<Vec<Feature>> {
        Ok(self.features.values().cloned().collect())
    }

    fn feature(&self, id: &FeatureId) -> SessionResult<Option<Feature>> {
        Ok(self.features.get(id).cloned())
    }

    fn inventory(&self) -> SessionResult<Inventory> {
        Ok(self
            .features
            .values()
            .map(|f| (f.class(), f.id.clone()))
            .collect())
    }

    fn contains(&self, id: &FeatureId) -> SessionResult<bool> {
        Ok(self.features.contains_key(id))
    }

    fn create(&mut self, draft: Draft) -> SessionResult<FeatureId> {
        let id = self.allocate_id();
        self.features
            .insert(id.clone(), Feature::from_draft(id.clone(), draft));
        Ok(id)
    }

    fn edit_properties(&mut self, id: &FeatureId, patch: &PropertyPatch) -> SessionResult<()> {
        self.get_mut(id)?.apply_patch(patch);
        Ok(())
    }

    fn edit_geometry(&mut self, id: &FeatureId, geometry: &Geometry) -> SessionResult<()> {
        let feature = self.get_mut(id)?;
        if feature.class() == FeatureClass::Folder {
            return Err(SessionError::Request {
                message: format!("folder {id} has no geometry"),
            });
        }
        feature.geometry = Some(geometry.clone());
        Ok(())
    }

    fn delete(&mut self, class: FeatureClass, id: &FeatureId) -> SessionResult<()> {
        match self.features.get(id) {
            Some(f) if f.class() == class => {
                self.features.remove(id);
                Ok(())
            }
            Some(f) => Err(SessionError::Request {
                message: format!("{id} is a {}, not a {class}", f.class()),
            }),
            None => Err(SessionError::NotFound { id: id.clone() }),
        }
    }

    fn crop(
        &mut self,
        line: &FeatureId,
        boundary: &FeatureId,
        beyond: f64,
    ) -> SessionResult<Vec<FeatureId>> {
        let boundary_geometry = self
            .features
            .get(boundary)
            .and_then(|f| f.geometry.clone())
            .ok_or_else(|| SessionError::NotFound {
                id: boundary.clone(),
            })?;
        let track = self
            .features
            .get(line)
            .cloned()
            .ok_or_else(|| SessionError::NotFound { id: line.clone() })?;
        let Some(Geometry::LineString(points)) = &track.geometry else {
            return Err(SessionError::Request {
                message: format!("{line} is not a line"),
            });
        };

        let segments = clip_line(points, &boundary_geometry, beyond).ok_or_else(|| {
            SessionError::Request {
                message: format!(
                    "cannot crop against a {} boundary",
                    boundary_geometry.type_name()
                ),
            }
        })?;

        let mut segments = segments.into_iter();
        let Some(first) = segments.next() else {
            self.features.remove(line);
            return Ok(Vec::new());
        };

        self.get_mut(line)?.geometry = Some(Geometry::LineString(first));
        let mut ids = vec![line.clone()];
        for segment in segments {
            let id = self.create(Draft {
                title: track.title.clone(),
                folder_id: track.folder_id.clone(),
                geometry: Some(Geometry::LineString(segment)),
                kind: track.kind.clone(),
            })?;
            ids.push(id);
        }
        Ok(ids)
    }

    fn observe(&mut self, event: &FeatureEvent) {
        self.apply(event);
    }

    fn flush(&mut self) -> SessionResult<()> {
        self.save()
    }
}

/// Split `points` into the runs that fall within the buffered boundary.
/// Returns `None` for boundary geometries that cannot be clipped against.
fn clip_line(points: &[Position], boundary: &Geometry, beyond: f64) -> Option<Vec<Vec<Position>>> {
    let edges: Vec<&[Position]> = match boundary {
        Geometry::Polygon(rings) => rings.iter().map(Vec::as_slice).collect(),
        Geometry::LineString(line) => vec![line.as_slice()],
        Geometry::Point(_) | Geometry::MultiLineString(_) => return None,
    };
    let inside = |p: &Position| {
        let in_polygon = match boundary {
            Geometry::Polygon(rings) => rings.first().is_some_and(|outer| point_in_ring(p, outer)),
            _ => false,
        };
        in_polygon || edges.iter().any(|e| distance_to_polyline(p, e) <= beyond)
    };

    let mut segments = Vec::new();
    let mut run: Vec<Position> = Vec::new();
    for p in points {
        if inside(p) {
            run.push(p.clone());
        } else if !run.is_empty() {
            let done = std::mem::take(&mut run);
            if done.len() >= 2 {
                segments.push(done);
            }
        }
    }
    if run.len() >= 2 {
        segments.push(run);
    }
    Some(segments)
}

fn xy(p: &Position) -> (f64, f64) {
    (
        p.first().copied().unwrap_or(0.0),
        p.get(1).copied().unwrap_or(0.0),
    )
}

/// Even-odd ray casting.
fn point_in_ring(p: &Position, ring: &[Position]) -> bool {
    let (x, y) = xy(p);
    let mut inside = false;
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = xy(&ring[i]);
        let (xj, yj) = xy(&ring[j]);
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

fn distance_to_polyline(p: &Position, line: &[Position]) -> f64 {
    match line {
        [] => f64::INFINITY,
        [only] => {
            let (px, py) = xy(p);
            let (ox, oy) = xy(only);
            (px - ox).hypot(py - oy)
        }
        _ => line
            .windows(2)
            .map(|w| distance_to_segment(p, &w[0], &w[1]))
            .fold(f64::INFINITY, f64::min),
    }
}

fn distance_to_segment(p: &Position, a: &Position, b: &Position) -> f64 {
    let (px, py) = xy(p);
    let (ax, ay) = xy(a);
    let (bx, by) = xy(b);
    let (dx, dy) = (bx - ax, by - ay);
    let len2 = dx * dx + dy * dy;
    let t = if len2 == 0.0 {
        0.0
    } else {
        (((px - ax) * dx + (py - ay) * dy) / len2).clamp(0.0, 1.0)
    };
    let (cx, cy) = (ax + t * dx, ay + t * dy);
    (px - cx).hypot(py - cy)
}
