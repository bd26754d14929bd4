//! Kind-specific attributes
//!
//! Attributes are a closed union keyed by [`EntityKind`], so anything that
//! dispatches on kind (placement rules, the editor UI) gets exhaustiveness
//! checking. Patches arrive as JSON objects and are deep-merged over the
//! serialized form, then decoded back into the typed variant.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use super::geometry::{check_vec, Aabb, Dimensions, Geometry, Vec3};

// ============================================================================
// EntityKind
// ============================================================================

/// Discriminator over the fixed set of placeable fixtures
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Floor,
    Rack,
    Shelf,
    Bin,
    Obstacle,
    /// Annotation marker; has a position but no volume
    Marker,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Floor,
        EntityKind::Rack,
        EntityKind::Shelf,
        EntityKind::Bin,
        EntityKind::Obstacle,
        EntityKind::Marker,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Floor => "floor",
            EntityKind::Rack => "rack",
            EntityKind::Shelf => "shelf",
            EntityKind::Bin => "bin",
            EntityKind::Obstacle => "obstacle",
            EntityKind::Marker => "marker",
        }
    }

    /// Kinds that must pass placement validation before commit
    pub fn is_collidable(&self) -> bool {
        matches!(
            self,
            EntityKind::Rack | EntityKind::Shelf | EntityKind::Bin | EntityKind::Obstacle
        )
    }

    /// Kinds tracked by the placement validator's spatial index
    pub fn is_spatially_indexed(&self) -> bool {
        matches!(self, EntityKind::Rack | EntityKind::Obstacle)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown entity kind: {}", s))
    }
}

// ============================================================================
// AttributeIssue
// ============================================================================

/// A validation problem, keyed by dotted attribute path
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeIssue {
    pub path: String,
    pub message: String,
}

impl AttributeIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for AttributeIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Join issues into a single human-readable line
pub fn describe_issues(issues: &[AttributeIssue]) -> String {
    issues
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// ============================================================================
// Per-kind attribute structs
// ============================================================================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FloorAttributes {
    pub geometry: Geometry,
    #[serde(default)]
    pub level: i32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RackAttributes {
    pub geometry: Geometry,
    pub levels: u32,
    pub max_load_kg: f64,
    #[serde(default)]
    pub locked: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShelfAttributes {
    pub geometry: Geometry,
    #[serde(default)]
    pub level: u32,
    pub max_load_kg: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BinAttributes {
    pub geometry: Geometry,
    pub capacity: u32,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub sku: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObstacleAttributes {
    pub geometry: Geometry,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerAttributes {
    pub position: Vec3,
    pub label: String,
}

// ============================================================================
// Attributes
// ============================================================================

/// Geometry and kind-specific fields of an entity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Attributes {
    Floor(FloorAttributes),
    Rack(RackAttributes),
    Shelf(ShelfAttributes),
    Bin(BinAttributes),
    Obstacle(ObstacleAttributes),
    Marker(MarkerAttributes),
}

impl Attributes {
    /// Registry defaults for a freshly placed fixture of `kind`
    pub fn defaults_for(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Floor => Attributes::Floor(FloorAttributes {
                geometry: Geometry::new(Dimensions::new(40.0, 30.0, 6.0)),
                level: 0,
            }),
            EntityKind::Rack => Attributes::Rack(RackAttributes {
                geometry: Geometry::new(Dimensions::new(2.7, 1.1, 4.5)),
                levels: 4,
                max_load_kg: 1000.0,
                locked: false,
            }),
            EntityKind::Shelf => Attributes::Shelf(ShelfAttributes {
                geometry: Geometry::new(Dimensions::new(2.7, 1.1, 1.0)),
                level: 0,
                max_load_kg: 250.0,
            }),
            EntityKind::Bin => Attributes::Bin(BinAttributes {
                geometry: Geometry::new(Dimensions::new(0.6, 0.4, 0.3)),
                capacity: 50,
                locked: false,
                sku: None,
            }),
            EntityKind::Obstacle => Attributes::Obstacle(ObstacleAttributes {
                geometry: Geometry::new(Dimensions::new(1.0, 1.0, 1.0)),
                label: None,
            }),
            EntityKind::Marker => Attributes::Marker(MarkerAttributes {
                position: Vec3::default(),
                label: "marker".to_string(),
            }),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Attributes::Floor(_) => EntityKind::Floor,
            Attributes::Rack(_) => EntityKind::Rack,
            Attributes::Shelf(_) => EntityKind::Shelf,
            Attributes::Bin(_) => EntityKind::Bin,
            Attributes::Obstacle(_) => EntityKind::Obstacle,
            Attributes::Marker(_) => EntityKind::Marker,
        }
    }

    pub fn geometry(&self) -> Option<&Geometry> {
        match self {
            Attributes::Floor(a) => Some(&a.geometry),
            Attributes::Rack(a) => Some(&a.geometry),
            Attributes::Shelf(a) => Some(&a.geometry),
            Attributes::Bin(a) => Some(&a.geometry),
            Attributes::Obstacle(a) => Some(&a.geometry),
            Attributes::Marker(_) => None,
        }
    }

    fn geometry_mut(&mut self) -> Option<&mut Geometry> {
        match self {
            Attributes::Floor(a) => Some(&mut a.geometry),
            Attributes::Rack(a) => Some(&mut a.geometry),
            Attributes::Shelf(a) => Some(&mut a.geometry),
            Attributes::Bin(a) => Some(&mut a.geometry),
            Attributes::Obstacle(a) => Some(&mut a.geometry),
            Attributes::Marker(_) => None,
        }
    }

    pub fn position(&self) -> Vec3 {
        match self {
            Attributes::Marker(a) => a.position,
            other => other.geometry().map(|g| g.position).unwrap_or_default(),
        }
    }

    pub fn set_position(&mut self, position: Vec3) {
        if let Attributes::Marker(a) = self {
            a.position = position;
        } else if let Some(g) = self.geometry_mut() {
            g.position = position;
        }
    }

    /// Bounding box, `None` for volume-less kinds
    pub fn bounds(&self) -> Option<Aabb> {
        self.geometry().map(Geometry::bounds)
    }

    /// Lock flag for kinds that carry one
    pub fn is_locked(&self) -> bool {
        match self {
            Attributes::Rack(a) => a.locked,
            Attributes::Bin(a) => a.locked,
            _ => false,
        }
    }

    /// Check the attribute values; an empty result means valid
    pub fn validate(&self) -> Vec<AttributeIssue> {
        let mut issues = Vec::new();
        if let Some(g) = self.geometry() {
            g.check("geometry", &mut issues);
        }

        match self {
            Attributes::Floor(_) => {}
            Attributes::Rack(a) => {
                if a.levels == 0 {
                    issues.push(AttributeIssue::new("levels", "must be at least 1"));
                }
                check_load("max_load_kg", a.max_load_kg, &mut issues);
            }
            Attributes::Shelf(a) => {
                check_load("max_load_kg", a.max_load_kg, &mut issues);
            }
            Attributes::Bin(a) => {
                if a.capacity == 0 {
                    issues.push(AttributeIssue::new("capacity", "must be at least 1"));
                }
                if a.sku.as_deref().is_some_and(|s| s.trim().is_empty()) {
                    issues.push(AttributeIssue::new("sku", "must not be blank when set"));
                }
            }
            Attributes::Obstacle(_) => {}
            Attributes::Marker(a) => {
                check_vec("position", &a.position, &mut issues);
                if a.label.trim().is_empty() {
                    issues.push(AttributeIssue::new("label", "must not be empty"));
                }
            }
        }

        issues
    }

    /// Produce a new value with `patch` merged in.
    ///
    /// Fails as a whole, leaving `self` untouched, when the patch changes the
    /// kind, names an unknown attribute, or decodes to an invalid shape.
    /// Value-level problems are reported later by [`Attributes::validate`].
    pub fn apply_patch(&self, patch: &AttributePatch) -> Result<Attributes, Vec<AttributeIssue>> {
        let mut issues = Vec::new();

        if let Some(kind) = patch.0.get("kind") {
            if kind.as_str() != Some(self.kind().as_str()) {
                issues.push(AttributeIssue::new("kind", "cannot be changed"));
                return Err(issues);
            }
        }

        let mut value = serde_json::to_value(self)
            .map_err(|e| vec![AttributeIssue::new("", format!("serialization failed: {}", e))])?;

        // Unknown keys would be silently dropped by the decoder
        collect_unknown_keys(&value, &patch.0, "", &mut issues);
        if !issues.is_empty() {
            return Err(issues);
        }

        merge_json(&mut value, &Value::Object(patch.0.clone()));

        serde_json::from_value(value)
            .map_err(|e| vec![AttributeIssue::new("", format!("invalid attributes: {}", e))])
    }
}

fn check_load(path: &str, value: f64, issues: &mut Vec<AttributeIssue>) {
    if !value.is_finite() || value < 0.0 {
        issues.push(AttributeIssue::new(path, "must be a non-negative finite number"));
    }
}

fn collect_unknown_keys(
    current: &Value,
    patch: &Map<String, Value>,
    prefix: &str,
    issues: &mut Vec<AttributeIssue>,
) {
    for (key, value) in patch {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match current.get(key) {
            None => issues.push(AttributeIssue::new(path, "unknown attribute")),
            Some(existing) => {
                if let (true, Value::Object(nested)) = (existing.is_object(), value) {
                    collect_unknown_keys(existing, nested, &path, issues);
                }
            }
        }
    }
}

/// Recursive object merge; non-object values replace
fn merge_json(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                if value.is_object() {
                    if let Some(existing) = target_map.get_mut(key) {
                        if existing.is_object() {
                            merge_json(existing, value);
                            continue;
                        }
                    }
                }
                target_map.insert(key.clone(), value.clone());
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

// ============================================================================
// AttributePatch
// ============================================================================

/// Partial attribute update, as a JSON object
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributePatch(Map<String, Value>);

impl AttributePatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON value; `None` unless it is an object
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Set a top-level attribute
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Set the position of an entity of `kind`
    pub fn position(self, kind: EntityKind, position: Vec3) -> Self {
        let pos = serde_json::json!({ "x": position.x, "y": position.y, "z": position.z });
        match kind {
            EntityKind::Marker => self.set("position", pos),
            _ => self.merge_nested("geometry", "position", pos),
        }
    }

    /// Set the dimensions of a box-shaped entity
    pub fn dimensions(self, dimensions: Dimensions) -> Self {
        let dims = serde_json::json!({
            "width": dimensions.width,
            "depth": dimensions.depth,
            "height": dimensions.height,
        });
        self.merge_nested("geometry", "dimensions", dims)
    }

    fn merge_nested(mut self, outer: &str, inner: &str, value: Value) -> Self {
        match self.0.get_mut(outer) {
            Some(Value::Object(map)) => {
                map.insert(inner.to_string(), value);
            }
            _ => {
                let mut nested = Map::new();
                nested.insert(inner.to_string(), value);
                self.0.insert(outer.to_string(), Value::Object(nested));
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for AttributePatch {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(value: Value) -> AttributePatch {
        AttributePatch::from_value(value).unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        for kind in EntityKind::ALL {
            let attrs = Attributes::defaults_for(kind);
            assert_eq!(attrs.kind(), kind);
            assert!(attrs.validate().is_empty(), "defaults for {} invalid", kind);
        }
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("Rack".parse::<EntityKind>().unwrap(), EntityKind::Rack);
        assert!("forklift".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_serialized_shape_is_tagged() {
        let value = serde_json::to_value(Attributes::defaults_for(EntityKind::Bin)).unwrap();
        assert_eq!(value["kind"], "bin");
        assert_eq!(value["capacity"], 50);
        assert_eq!(value["geometry"]["dimensions"]["width"], 0.6);
    }

    #[test]
    fn test_patch_deep_merges_geometry() {
        let rack = Attributes::defaults_for(EntityKind::Rack);
        let patched = rack
            .apply_patch(&patch(json!({
                "geometry": { "position": { "x": 5.0, "y": 0.0, "z": 2.0 } },
                "levels": 6
            })))
            .unwrap();

        let Attributes::Rack(r) = &patched else {
            panic!("kind changed");
        };
        assert_eq!(r.geometry.position, Vec3::new(5.0, 0.0, 2.0));
        // Untouched siblings survive the merge
        assert_eq!(r.geometry.dimensions.width, 2.7);
        assert_eq!(r.levels, 6);
    }

    #[test]
    fn test_patch_rejects_kind_change_and_unknown_keys() {
        let bin = Attributes::defaults_for(EntityKind::Bin);

        let err = bin.apply_patch(&patch(json!({ "kind": "rack" }))).unwrap_err();
        assert_eq!(err[0].path, "kind");

        let err = bin
            .apply_patch(&patch(json!({ "geometry": { "colour": "red" } })))
            .unwrap_err();
        assert_eq!(err[0].path, "geometry.colour");
    }

    #[test]
    fn test_patch_rejects_bad_shape() {
        let bin = Attributes::defaults_for(EntityKind::Bin);
        let err = bin.apply_patch(&patch(json!({ "capacity": "lots" }))).unwrap_err();
        assert_eq!(err.len(), 1);
        assert!(err[0].message.starts_with("invalid attributes"));
    }

    #[test]
    fn test_validate_reports_paths() {
        let rack = Attributes::defaults_for(EntityKind::Rack)
            .apply_patch(&patch(json!({ "levels": 0, "max_load_kg": -1.0 })))
            .unwrap();
        let issues = rack.validate();
        let paths: Vec<_> = issues.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(paths, vec!["levels", "max_load_kg"]);
    }

    #[test]
    fn test_patch_builders() {
        let p = AttributePatch::new()
            .position(EntityKind::Shelf, Vec3::new(1.0, 2.0, 3.0))
            .dimensions(Dimensions::new(1.0, 1.0, 0.5));
        let shelf = Attributes::defaults_for(EntityKind::Shelf).apply_patch(&p).unwrap();
        assert_eq!(shelf.position(), Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(shelf.geometry().unwrap().dimensions.height, 0.5);

        let marker = Attributes::defaults_for(EntityKind::Marker)
            .apply_patch(&AttributePatch::new().position(EntityKind::Marker, Vec3::new(4.0, 0.0, 4.0)))
            .unwrap();
        assert_eq!(marker.position().x, 4.0);
        assert!(marker.bounds().is_none());
    }
}
