use glam::{Affine3A, Vec3};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box. An inverted box (min > max) is empty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl BoundingBox {
    pub const EMPTY: BoundingBox = BoundingBox {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(f32::MIN),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// The unit cube, used in place of geometry that failed to load.
    pub fn unit() -> Self {
        Self::new(Vec3::ZERO, Vec3::ONE)
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    pub fn add_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn add_box(&mut self, other: &BoundingBox) {
        if other.is_empty() {
            return;
        }
        self.add_point(other.min);
        self.add_point(other.max);
    }

    pub fn centre(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn volume(&self) -> f32 {
        if self.is_empty() {
            return 0.0;
        }
        let e = self.max - self.min;
        e.x * e.y * e.z
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.min.cmple(other.max).all()
            && other.min.cmple(self.max).all()
    }

    pub fn contains_point(&self, p: Vec3) -> bool {
        self.min.cmple(p).all() && p.cmple(self.max).all()
    }

    /// Euclidean distance from `p` to the box; zero inside.
    pub fn distance_to_point(&self, p: Vec3) -> f32 {
        let clamped = p.clamp(self.min, self.max);
        clamped.distance(p)
    }

    pub fn expanded(&self, by: f32) -> BoundingBox {
        BoundingBox::new(self.min - Vec3::splat(by), self.max + Vec3::splat(by))
    }

    /// The eight corners, indexed so bit 0 picks x, bit 1 y and bit 2 z.
    pub fn corners(&self) -> [Vec3; 8] {
        let pts = [self.min, self.max];
        std::array::from_fn(|i| {
            Vec3::new(pts[i & 1].x, pts[(i >> 1) & 1].y, pts[(i >> 2) & 1].z)
        })
    }

    /// Box enclosing this box after transformation.
    pub fn transformed(&self, m: &Affine3A) -> BoundingBox {
        if self.is_empty() {
            return *self;
        }
        let mut out = BoundingBox::EMPTY;
        for c in self.corners() {
            out.add_point(m.transform_point3(c));
        }
        out
    }

    /// Clip the segment `start + t * dir`, `t` in `[0, 1]`, to this box.
    /// Returns the entry and exit parameters when the segment touches it.
    pub fn clip_segment(&self, start: Vec3, dir: Vec3) -> Option<(f32, f32)> {
        let mut t0 = 0.0_f32;
        let mut t1 = 1.0_f32;
        for axis in 0..3 {
            let s = start[axis];
            let d = dir[axis];
            if d.abs() < f32::EPSILON {
                if s < self.min[axis] || s > self.max[axis] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut a = (self.min[axis] - s) * inv;
            let mut b = (self.max[axis] - s) * inv;
            if a > b {
                std::mem::swap(&mut a, &mut b);
            }
            t0 = t0.max(a);
            t1 = t1.min(b);
            if t0 > t1 {
                return None;
            }
        }
        Some((t0, t1))
    }
}

/// Plane equation `normal . p = d`. Points with a positive distance are on
/// the side the normal faces.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneEq {
    pub normal: Vec3,
    pub d: f32,
}

impl PlaneEq {
    pub fn new(normal: Vec3, d: f32) -> Self {
        Self { normal, d }
    }

    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        Self::new(normal, normal.dot(point))
    }

    /// Plane through three points, wound counter-clockwise around the normal.
    pub fn from_points(p0: Vec3, p1: Vec3, p2: Vec3) -> Self {
        let normal = (p1 - p0).cross(p2 - p0).normalize_or_zero();
        Self::from_point_normal(p0, normal)
    }

    pub fn distance_to(&self, p: Vec3) -> f32 {
        self.normal.dot(p) - self.d
    }

    pub fn is_degenerate(&self) -> bool {
        self.normal.length_squared() == 0.0
    }

    /// Scale the equation so the normal has unit length.
    pub fn normalized(&self) -> PlaneEq {
        let len = self.normal.length();
        if len == 0.0 {
            return *self;
        }
        PlaneEq::new(self.normal / len, self.d / len)
    }

    /// The point on the plane closest to the origin.
    pub fn origin(&self) -> Vec3 {
        let len_sq = self.normal.length_squared();
        if len_sq == 0.0 {
            return Vec3::ZERO;
        }
        self.normal * self.d / len_sq
    }

    pub fn transformed(&self, m: &Affine3A) -> PlaneEq {
        let p = m.transform_point3(self.origin());
        let n = m.transform_vector3(self.normal);
        PlaneEq::from_point_normal(p, n)
    }

    /// Parameter along `start + t * dir` where the line meets the plane.
    pub fn intersect_param(&self, start: Vec3, dir: Vec3) -> Option<f32> {
        let denom = self.normal.dot(dir);
        if denom.abs() < f32::EPSILON {
            return None;
        }
        Some((self.d - self.normal.dot(start)) / denom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_box_grows_with_points() {
        let mut bb = BoundingBox::EMPTY;
        assert!(bb.is_empty());
        bb.add_point(Vec3::new(1.0, 2.0, 3.0));
        bb.add_point(Vec3::new(-1.0, 0.0, 5.0));
        assert_eq!(bb.min, Vec3::new(-1.0, 0.0, 3.0));
        assert_eq!(bb.max, Vec3::new(1.0, 2.0, 5.0));
        assert_eq!(bb.volume(), 2.0 * 2.0 * 2.0);
    }

    #[test]
    fn box_intersection_and_distance() {
        let a = BoundingBox::new(Vec3::ZERO, Vec3::ONE);
        let b = BoundingBox::new(Vec3::splat(0.5), Vec3::splat(2.0));
        let c = BoundingBox::new(Vec3::splat(3.0), Vec3::splat(4.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(!a.intersects(&BoundingBox::EMPTY));
        assert_eq!(a.distance_to_point(Vec3::new(0.5, 0.5, 0.5)), 0.0);
        assert!((a.distance_to_point(Vec3::new(3.0, 0.5, 0.5)) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn corners_cover_both_extremes() {
        let bb = BoundingBox::new(Vec3::ZERO, Vec3::new(1.0, 2.0, 3.0));
        let corners = bb.corners();
        assert_eq!(corners[0], Vec3::ZERO);
        assert_eq!(corners[7], Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(corners[5], Vec3::new(1.0, 0.0, 3.0));
    }

    #[test]
    fn segment_clipping_reports_entry_and_exit() {
        let bb = BoundingBox::new(Vec3::new(1.0, -1.0, -1.0), Vec3::new(2.0, 1.0, 1.0));
        let (t0, t1) = bb
            .clip_segment(Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0))
            .unwrap();
        assert!((t0 - 0.25).abs() < 1e-6);
        assert!((t1 - 0.5).abs() < 1e-6);
        assert!(bb.clip_segment(Vec3::new(0.0, 5.0, 0.0), Vec3::X).is_none());
    }

    #[test]
    fn plane_normalisation_scales_distance() {
        let p = PlaneEq::new(Vec3::new(2.0, 0.0, 0.0), 4.0).normalized();
        assert_eq!(p.normal, Vec3::X);
        assert_eq!(p.d, 2.0);
        assert_eq!(p.distance_to(Vec3::new(5.0, 0.0, 0.0)), 3.0);
        assert_eq!(p.origin(), Vec3::new(2.0, 0.0, 0.0));
    }

    #[test]
    fn plane_transform_follows_translation() {
        let p = PlaneEq::new(Vec3::X, 1.0);
        let m = Affine3A::from_translation(Vec3::new(10.0, 0.0, 0.0));
        let t = p.transformed(&m);
        assert!((t.d - 11.0).abs() < 1e-5);
        assert!(t.distance_to(Vec3::new(11.0, 3.0, -2.0)).abs() < 1e-5);
    }

    #[test]
    fn degenerate_plane_detected() {
        assert!(PlaneEq::new(Vec3::ZERO, 1.0).is_degenerate());
        assert!(!PlaneEq::new(Vec3::Y, 0.0).is_degenerate());
    }
}
