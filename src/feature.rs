//! Typed feature model shared by both map documents.
//!
//! A map feature is a base record (id, title, folder, geometry) plus a
//! class-specific property block. The class is carried by the [`FeatureKind`]
//! variant, so handlers resolve behaviour by pattern matching instead of
//! string-keyed property lookups.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Opaque identifier of a feature within one map document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(String);

impl FeatureId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FeatureId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for FeatureId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for FeatureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Feature classes known to the mapping backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FeatureClass {
    Assignment,
    Shape,
    Marker,
    Clue,
    Folder,
}

impl FeatureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assignment => "Assignment",
            Self::Shape => "Shape",
            Self::Marker => "Marker",
            Self::Clue => "Clue",
            Self::Folder => "Folder",
        }
    }
}

impl std::fmt::Display for FeatureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coordinate tuple: `[lon, lat]`, optionally followed by elevation and time.
pub type Position = Vec<f64>;

/// GeoJSON-shaped geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    LineString(Vec<Position>),
    Polygon(Vec<Vec<Position>>),
    MultiLineString(Vec<Vec<Position>>),
}

impl Geometry {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Point(_) => "Point",
            Self::LineString(_) => "LineString",
            Self::Polygon(_) => "Polygon",
            Self::MultiLineString(_) => "MultiLineString",
        }
    }

    pub fn is_line(&self) -> bool {
        matches!(self, Self::LineString(_))
    }
}

/// Stroke/fill style of a line or polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeStyle {
    #[serde(default = "default_stroke")]
    pub stroke: String,
    #[serde(default = "default_stroke_width")]
    pub stroke_width: f64,
    #[serde(default = "default_stroke_opacity")]
    pub stroke_opacity: f64,
    #[serde(default)]
    pub fill: Option<String>,
    #[serde(default)]
    pub fill_opacity: f64,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub description: String,
}

fn default_stroke() -> String {
    "#FF0000".into()
}
fn default_stroke_width() -> f64 {
    2.0
}
fn default_stroke_opacity() -> f64 {
    1.0
}

impl Default for ShapeStyle {
    fn default() -> Self {
        Self {
            stroke: default_stroke(),
            stroke_width: default_stroke_width(),
            stroke_opacity: default_stroke_opacity(),
            fill: None,
            fill_opacity: 0.0,
            pattern: None,
            description: String::new(),
        }
    }
}

/// Marker presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerStyle {
    #[serde(default = "default_marker_color")]
    pub color: String,
    #[serde(default)]
    pub rotation: Option<f64>,
    #[serde(default = "default_marker_size")]
    pub size: f64,
    #[serde(default = "default_marker_symbol")]
    pub symbol: String,
    #[serde(default)]
    pub description: String,
}

fn default_marker_color() -> String {
    "#FF0000".into()
}
fn default_marker_size() -> f64 {
    1.0
}
fn default_marker_symbol() -> String {
    "point".into()
}

impl Default for MarkerStyle {
    fn default() -> Self {
        Self {
            color: default_marker_color(),
            rotation: None,
            size: default_marker_size(),
            symbol: default_marker_symbol(),
            description: String::new(),
        }
    }
}

/// Properties of a search assignment area.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssignmentProps {
    #[serde(default)]
    pub description: String,
}

/// Properties of a clue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClueProps {
    #[serde(default)]
    pub description: String,
    /// Source id of the assignment the clue was found in, if any.
    #[serde(default)]
    pub assignment_id: Option<FeatureId>,
}

/// Class-specific properties; the variant is the feature's class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class", content = "properties")]
pub enum FeatureKind {
    Assignment(AssignmentProps),
    Shape(ShapeStyle),
    Marker(MarkerStyle),
    Clue(ClueProps),
    Folder,
}

impl FeatureKind {
    pub fn class(&self) -> FeatureClass {
        match self {
            Self::Assignment(_) => FeatureClass::Assignment,
            Self::Shape(_) => FeatureClass::Shape,
            Self::Marker(_) => FeatureClass::Marker,
            Self::Clue(_) => FeatureClass::Clue,
            Self::Folder => FeatureClass::Folder,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Assignment(p) => Some(&p.description),
            Self::Shape(s) => Some(&s.description),
            Self::Marker(m) => Some(&m.description),
            Self::Clue(c) => Some(&c.description),
            Self::Folder => None,
        }
    }

    fn set_description(&mut self, text: String) {
        match self {
            Self::Assignment(p) => p.description = text,
            Self::Shape(s) => s.description = text,
            Self::Marker(m) => m.description = text,
            Self::Clue(c) => c.description = text,
            Self::Folder => {}
        }
    }
}

/// A feature as stored in a map document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    pub id: FeatureId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub folder_id: Option<FeatureId>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(flatten)]
    pub kind: FeatureKind,
}

impl Feature {
    pub fn class(&self) -> FeatureClass {
        self.kind.class()
    }

    /// Attach an id to a draft.
    pub fn from_draft(id: FeatureId, draft: Draft) -> Self {
        Self {
            id,
            title: draft.title,
            folder_id: draft.folder_id,
            geometry: draft.geometry,
            kind: draft.kind,
        }
    }

    /// Apply a property patch in place. Geometry is never touched.
    pub fn apply_patch(&mut self, patch: &PropertyPatch) {
        if let Some(kind) = &patch.kind {
            self.kind = kind.clone();
        }
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(text) = &patch.description {
            self.kind.set_description(text.clone());
        }
    }
}

/// A feature that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub title: String,
    pub folder_id: Option<FeatureId>,
    pub geometry: Option<Geometry>,
    pub kind: FeatureKind,
}

impl Draft {
    pub fn folder(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            folder_id: None,
            geometry: None,
            kind: FeatureKind::Folder,
        }
    }

    pub fn shape(
        title: impl Into<String>,
        geometry: Geometry,
        style: ShapeStyle,
        folder_id: Option<FeatureId>,
    ) -> Self {
        Self {
            title: title.into(),
            folder_id,
            geometry: Some(geometry),
            kind: FeatureKind::Shape(style),
        }
    }

    pub fn marker(
        title: impl Into<String>,
        position: Position,
        style: MarkerStyle,
        folder_id: Option<FeatureId>,
    ) -> Self {
        Self {
            title: title.into(),
            folder_id,
            geometry: Some(Geometry::Point(position)),
            kind: FeatureKind::Marker(style),
        }
    }
}

/// Partial property edit. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Replaces the whole class-specific property block.
    pub kind: Option<FeatureKind>,
}

impl PropertyPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }
}

/// What happened to a feature on the source map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    New,
    PropertyChanged,
    GeometryChanged,
    Deleted,
}

/// One change notification from the source map session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEvent {
    pub event: EventKind,
    pub feature: Feature,
}

/// Live ids of one map document, grouped by class.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inventory {
    by_class: BTreeMap<FeatureClass, BTreeSet<FeatureId>>,
}

impl Inventory {
    pub fn insert(&mut self, class: FeatureClass, id: FeatureId) {
        self.by_class.entry(class).or_default().insert(id);
    }

    pub fn contains(&self, id: &FeatureId) -> bool {
        self.by_class.values().any(|ids| ids.contains(id))
    }

    pub fn ids(&self, class: FeatureClass) -> impl Iterator<Item = &FeatureId> {
        self.by_class.get(&class).into_iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.by_class.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<(FeatureClass, FeatureId)> for Inventory {
    fn from_iter<I: IntoIterator<Item = (FeatureClass, FeatureId)>>(iter: I) -> Self {
        let mut inv = Inventory::default();
        for (class, id) in iter {
            inv.insert(class, id);
        }
        inv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_json_uses_class_tag() {
        let json = r##"{
            "id": "m1",
            "title": "CP",
            "geometry": {"type": "Point", "coordinates": [-120.1, 39.2]},
            "class": "Marker",
            "properties": {"color": "#00FF00", "symbol": "cp"}
        }"##;
        let f: Feature = serde_json::from_str(json).unwrap();
        assert_eq!(f.class(), FeatureClass::Marker);
        let FeatureKind::Marker(style) = &f.kind else {
            panic!("expected marker");
        };
        assert_eq!(style.color, "#00FF00");
        assert_eq!(style.size, 1.0);
        assert_eq!(f.geometry, Some(Geometry::Point(vec![-120.1, 39.2])));
    }

    #[test]
    fn folder_roundtrips_without_properties() {
        let folder = Feature::from_draft("f1".into(), Draft::folder("AA 101"));
        let json = serde_json::to_string(&folder).unwrap();
        let back: Feature = serde_json::from_str(&json).unwrap();
        assert_eq!(back, folder);
    }

    #[test]
    fn patch_description_keeps_style() {
        let mut f = Feature::from_draft(
            "s1".into(),
            Draft::shape(
                "Road",
                Geometry::LineString(vec![vec![0.0, 0.0], vec![1.0, 1.0]]),
                ShapeStyle {
                    stroke: "#123456".into(),
                    ..Default::default()
                },
                None,
            ),
        );
        f.apply_patch(&PropertyPatch {
            title: Some("Trail".into()),
            description: Some("washed out".into()),
            kind: None,
        });
        assert_eq!(f.title, "Trail");
        let FeatureKind::Shape(style) = &f.kind else {
            panic!("expected shape");
        };
        assert_eq!(style.stroke, "#123456");
        assert_eq!(style.description, "washed out");
    }

    #[test]
    fn inventory_contains_across_classes() {
        let inv: Inventory = [
            (FeatureClass::Folder, FeatureId::from("a")),
            (FeatureClass::Shape, FeatureId::from("b")),
        ]
        .into_iter()
        .collect();
        assert!(inv.contains(&"a".into()));
        assert!(inv.contains(&"b".into()));
        assert!(!inv.contains(&"c".into()));
        assert_eq!(inv.len(), 2);
        assert_eq!(inv.ids(FeatureClass::Shape).count(), 1);
    }
}
