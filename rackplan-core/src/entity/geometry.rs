//! Axis-aligned geometry primitives
//!
//! Coordinates are metres, y is up, and an entity's `position` is the minimum
//! corner of its box. Rotation is restricted to quarter turns around y.

use serde::{Deserialize, Serialize};

use super::attributes::AttributeIssue;

/// A point or offset in layout space
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// Box extents: `width` along x, `depth` along z, `height` along y
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: f64,
    pub depth: f64,
    pub height: f64,
}

impl Dimensions {
    pub const fn new(width: f64, depth: f64, height: f64) -> Self {
        Self { width, depth, height }
    }
}

/// Placement of a box-shaped fixture
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    pub position: Vec3,
    #[serde(default)]
    pub rotation_deg: f64,
    pub dimensions: Dimensions,
}

impl Geometry {
    pub const fn new(dimensions: Dimensions) -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 0.0),
            rotation_deg: 0.0,
            dimensions,
        }
    }

    pub fn at(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    /// Rotation normalized into `[0, 360)`
    pub fn normalized_rotation(&self) -> f64 {
        self.rotation_deg.rem_euclid(360.0)
    }

    /// Whether the footprint is turned a quarter (width and depth swap)
    fn is_quarter_turned(&self) -> bool {
        let r = self.normalized_rotation();
        (r - 90.0).abs() < 1e-9 || (r - 270.0).abs() < 1e-9
    }

    /// World-space bounding box
    pub fn bounds(&self) -> Aabb {
        let (dx, dz) = if self.is_quarter_turned() {
            (self.dimensions.depth, self.dimensions.width)
        } else {
            (self.dimensions.width, self.dimensions.depth)
        };
        let min = self.position;
        let max = Vec3::new(min.x + dx, min.y + self.dimensions.height, min.z + dz);
        Aabb { min, max }
    }

    pub(crate) fn check(&self, prefix: &str, issues: &mut Vec<AttributeIssue>) {
        check_vec(&format!("{prefix}.position"), &self.position, issues);

        let dims = [
            ("width", self.dimensions.width),
            ("depth", self.dimensions.depth),
            ("height", self.dimensions.height),
        ];
        for (name, value) in dims {
            if !value.is_finite() || value <= 0.0 {
                issues.push(AttributeIssue::new(
                    format!("{prefix}.dimensions.{name}"),
                    "must be a positive finite number",
                ));
            }
        }

        if !self.rotation_deg.is_finite() {
            issues.push(AttributeIssue::new(
                format!("{prefix}.rotation_deg"),
                "must be finite",
            ));
        } else if (self.normalized_rotation() / 90.0).fract().abs() > 1e-9 {
            issues.push(AttributeIssue::new(
                format!("{prefix}.rotation_deg"),
                "must be a multiple of 90 degrees",
            ));
        }
    }
}

pub(crate) fn check_vec(path: &str, v: &Vec3, issues: &mut Vec<AttributeIssue>) {
    for (axis, value) in [("x", v.x), ("y", v.y), ("z", v.z)] {
        if !value.is_finite() {
            issues.push(AttributeIssue::new(format!("{path}.{axis}"), "must be finite"));
        }
    }
}

// ============================================================================
// Aabb
// ============================================================================

/// Axis-aligned bounding box
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Strict overlap: boxes sharing only a face (within `tolerance`) do not overlap
    pub fn overlaps(&self, other: &Aabb, tolerance: f64) -> bool {
        self.min.x < other.max.x - tolerance
            && other.min.x < self.max.x - tolerance
            && self.min.y < other.max.y - tolerance
            && other.min.y < self.max.y - tolerance
            && self.min.z < other.max.z - tolerance
            && other.min.z < self.max.z - tolerance
    }

    /// Whether `inner` lies entirely within `self` (faces may touch)
    pub fn contains(&self, inner: &Aabb, tolerance: f64) -> bool {
        inner.min.x >= self.min.x - tolerance
            && inner.min.y >= self.min.y - tolerance
            && inner.min.z >= self.min.z - tolerance
            && inner.max.x <= self.max.x + tolerance
            && inner.max.y <= self.max.y + tolerance
            && inner.max.z <= self.max.z + tolerance
    }

    /// Whether the x/z footprint of `inner` lies within that of `self`
    pub fn contains_footprint(&self, inner: &Aabb, tolerance: f64) -> bool {
        inner.min.x >= self.min.x - tolerance
            && inner.min.z >= self.min.z - tolerance
            && inner.max.x <= self.max.x + tolerance
            && inner.max.z <= self.max.z + tolerance
    }
}
