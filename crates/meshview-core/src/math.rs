//! Math utilities and helpers.

use glam::Vec3;

/// Axis-Aligned Bounding Box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Aabb {
    /// An inverted box that any point expands into.
    pub const EMPTY: Self = Self {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    /// Create a new AABB from min and max corners
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Smallest box containing every point, or [`Aabb::EMPTY`] for no points.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut aabb = Self::EMPTY;
        for point in points {
            aabb.expand_to_include(point);
        }
        aabb
    }

    /// True until at least one point has been included.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Get the center of the AABB
    #[inline]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get the size of the AABB
    #[inline]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Check if a point is inside the AABB
    #[inline]
    pub fn contains_point(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Expand AABB to include a point
    #[inline]
    pub fn expand_to_include(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Merge two AABBs
    #[inline]
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn empty_box_expands_to_first_point() {
        let mut aabb = Aabb::default();
        assert!(aabb.is_empty());

        aabb.expand_to_include(Vec3::new(1.0, -2.0, 3.0));
        assert!(!aabb.is_empty());
        assert_eq!(aabb.min, aabb.max);
    }

    #[test]
    fn from_points_is_componentwise() {
        let aabb = Aabb::from_points([
            Vec3::new(-1.0, 4.0, 0.5),
            Vec3::new(2.0, -3.0, 0.0),
            Vec3::new(0.0, 0.0, 7.0),
        ]);
        assert_eq!(aabb.min, Vec3::new(-1.0, -3.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(2.0, 4.0, 7.0));

        let center = aabb.center();
        assert_relative_eq!(center.x, 0.5);
        assert_relative_eq!(center.y, 0.5);
        assert_relative_eq!(center.z, 3.5);
    }

    #[test]
    fn merge_covers_both() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::new(Vec3::splat(-2.0), Vec3::splat(0.5));
        let merged = a.merge(&b);
        assert!(merged.contains_point(Vec3::splat(-2.0)));
        assert!(merged.contains_point(Vec3::ONE));
        assert!(!merged.contains_point(Vec3::splat(1.5)));

        // Merging with the empty box is the identity
        assert_eq!(a.merge(&Aabb::EMPTY), a);
    }
}
