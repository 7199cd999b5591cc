//! Rigid transforms and axis-aligned bounds.

use glam::{DQuat, DVec3};
use serde::{Deserialize, Serialize};

const IDENTITY_EPSILON: f64 = 1e-12;

/// Rotation followed by translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Rotation applied first.
    pub rotation: DQuat,
    /// Translation applied after rotation.
    pub translation: DVec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    /// The transform that leaves every point in place.
    pub const IDENTITY: Self = Self {
        rotation: DQuat::IDENTITY,
        translation: DVec3::ZERO,
    };

    /// Builds a transform from its parts.
    pub fn new(rotation: DQuat, translation: DVec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Pure translation.
    pub fn from_translation(translation: DVec3) -> Self {
        Self::new(DQuat::IDENTITY, translation)
    }

    /// Transform undoing `self`.
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.inverse();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// Composite that applies `self` first, then `next`.
    pub fn then(&self, next: &Transform) -> Self {
        Self {
            rotation: (next.rotation * self.rotation).normalize(),
            translation: next.rotation * self.translation + next.translation,
        }
    }

    /// Maps points expressed relative to `from` onto the matching points relative to `to`.
    pub fn relative(from: &Transform, to: &Transform) -> Self {
        from.inverse().then(to)
    }

    /// Exact identity leaves `point` bit-for-bit unchanged.
    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        if *self == Self::IDENTITY {
            return point;
        }
        self.rotation * point + self.translation
    }

    /// Identity within a small tolerance.
    pub fn is_identity(&self) -> bool {
        self.rotation.abs_diff_eq(DQuat::IDENTITY, IDENTITY_EPSILON)
            && self.translation.abs_diff_eq(DVec3::ZERO, IDENTITY_EPSILON)
    }
}

/// Axis-aligned bounding box; `min <= max` on every axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    /// Degenerate box around a single point.
    pub fn from_point(point: DVec3) -> Self {
        Self {
            min: point,
            max: point,
        }
    }

    /// Smallest box around every point, or `None` when there are none.
    pub fn from_points(points: impl IntoIterator<Item = DVec3>) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        let mut bounds = Self::from_point(first);
        for point in points {
            bounds.include_point(point);
        }
        Some(bounds)
    }

    /// Grows the box to contain `point`.
    pub fn include_point(&mut self, point: DVec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Smallest box containing both boxes.
    pub fn union(&self, other: &Aabb) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Grows the box by `epsilon` in every direction.
    pub fn expanded(&self, epsilon: f64) -> Self {
        let pad = DVec3::splat(epsilon);
        Self {
            min: self.min - pad,
            max: self.max + pad,
        }
    }

    /// Closed-interval overlap test; touching boxes intersect.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }
}

/// Merges optional bounds.
pub fn union_bounds(a: Option<Aabb>, b: Option<Aabb>) -> Option<Aabb> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.union(&b)),
        (a, None) => a,
        (None, b) => b,
    }
}
