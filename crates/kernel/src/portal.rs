//! Portals: planar convex polygons on a chunk boundary.
//!
//! Points are stored in the portal's own 2D basis (`u_axis`, `v_axis`,
//! `origin`) in chunk-local space. The winding always agrees with the owning
//! plane's normal.

use std::sync::Arc;

use chunkspace_common::PlaneEq;
use chunkspace_format::PortalDoc;
use glam::{Affine3A, Vec2, Vec3};

use crate::arena::ChunkId;
use crate::mapping::DirMapping;

/// Tolerance for matching portal centres and corners in world space.
pub const PORTAL_EPSILON: f32 = 0.01;

/// What a portal leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalTarget {
    /// Nothing known yet, or only a pending stub.
    Unresolved,
    Chunk(ChunkId),
    Heaven,
    Earth,
    /// Opening from inside geometry onto an outside chunk, still to be formed.
    Invasive,
    /// Leads into another mapping; retried whenever mappings change.
    Extern,
}

impl PortalTarget {
    pub fn chunk(self) -> Option<ChunkId> {
        match self {
            PortalTarget::Chunk(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_sentinel(self) -> bool {
        matches!(
            self,
            PortalTarget::Heaven | PortalTarget::Earth | PortalTarget::Invasive | PortalTarget::Extern
        )
    }

    fn keyword(self) -> Option<&'static str> {
        match self {
            PortalTarget::Heaven => Some("heaven"),
            PortalTarget::Earth => Some("earth"),
            PortalTarget::Invasive => Some("invasive"),
            PortalTarget::Extern => Some("extern"),
            _ => None,
        }
    }
}

/// A chunk named by a portal before it has been admitted into the space.
#[derive(Debug, Clone)]
pub struct StubRef {
    pub identifier: String,
    pub mapping: Arc<DirMapping>,
}

#[derive(Debug, Clone)]
pub struct Portal {
    pub label: String,
    pub internal: bool,
    pub permissive: bool,
    pub target: PortalTarget,
    /// Pending target while `target` is `Unresolved`.
    pub stub: Option<StubRef>,
    pub plane: PlaneEq,
    pub u_axis: Vec3,
    pub v_axis: Vec3,
    pub origin: Vec3,
    pub points: Vec<Vec2>,
    /// Centre in chunk-local space.
    pub lcentre: Vec3,
    /// Centre in world space; valid once the owner's transform is known.
    pub centre: Vec3,
}

impl Portal {
    /// Build a portal on `plane` with the given basis and polygon.
    pub fn new(plane: PlaneEq, u_axis: Vec3, points: Vec<Vec2>) -> Self {
        let mut portal = Self {
            label: String::new(),
            internal: false,
            permissive: true,
            target: PortalTarget::Unresolved,
            stub: None,
            plane,
            u_axis,
            v_axis: plane.normal.cross(u_axis),
            origin: plane.origin(),
            points,
            lcentre: Vec3::ZERO,
            centre: Vec3::ZERO,
        };
        portal.recompute_centre();
        portal.fix_winding();
        portal
    }

    /// Parse a portal section. Chunk names resolve to a stub in `mapping`.
    pub fn from_doc(doc: &PortalDoc, plane: PlaneEq, mapping: &Arc<DirMapping>) -> Self {
        let points = doc.points.iter().map(|p| Vec2::new(p.x, p.y)).collect();
        let mut portal = Self::new(plane, doc.u_axis, points);
        portal.label = doc.label.clone();
        portal.internal = doc.internal;
        portal.permissive = doc.permissive;
        portal.target = match doc.chunk.as_str() {
            "" => PortalTarget::Unresolved,
            "heaven" => PortalTarget::Heaven,
            "earth" => PortalTarget::Earth,
            "invasive" => PortalTarget::Invasive,
            "extern" => PortalTarget::Extern,
            name => {
                portal.stub = Some(StubRef {
                    identifier: name.to_string(),
                    mapping: Arc::clone(mapping),
                });
                PortalTarget::Unresolved
            }
        };
        portal
    }

    /// Write this portal back out. `target_name` names a concrete target
    /// chunk together with its mapping.
    pub fn to_doc(&self, own_mapping: &DirMapping, target_name: Option<(&str, &DirMapping)>) -> PortalDoc {
        let chunk = if let Some(word) = self.target.keyword() {
            word.to_string()
        } else if let Some((name, mapping)) = target_name {
            if mapping.id() != own_mapping.id() {
                "extern".to_string()
            } else {
                name.to_string()
            }
        } else if let Some(stub) = &self.stub {
            if stub.mapping.id() != own_mapping.id() {
                "extern".to_string()
            } else {
                stub.identifier.clone()
            }
        } else {
            String::new()
        };
        PortalDoc {
            label: self.label.clone(),
            internal: self.internal,
            permissive: self.permissive,
            chunk,
            u_axis: self.u_axis,
            points: self.points.iter().map(|p| Vec3::new(p.x, p.y, 0.0)).collect(),
        }
    }

    /// Whether the portal names a chunk, either resolved or pending.
    pub fn has_chunk(&self) -> bool {
        matches!(self.target, PortalTarget::Chunk(_)) || self.stub.is_some()
    }

    pub fn is_heaven(&self) -> bool {
        self.target == PortalTarget::Heaven
    }

    pub fn is_earth(&self) -> bool {
        self.target == PortalTarget::Earth
    }

    pub fn is_invasive(&self) -> bool {
        self.target == PortalTarget::Invasive
    }

    pub fn is_extern(&self) -> bool {
        self.target == PortalTarget::Extern
    }

    /// Polygon corner `i` in chunk-local space.
    pub fn object_space_point(&self, i: usize) -> Vec3 {
        let p = self.points[i];
        self.u_axis * p.x + self.v_axis * p.y + self.origin
    }

    pub fn world_points(&self, transform: &Affine3A) -> Vec<Vec3> {
        (0..self.points.len())
            .map(|i| transform.transform_point3(self.object_space_point(i)))
            .collect()
    }

    /// Project a chunk-local point into the portal basis.
    fn project(&self, point: Vec3) -> Vec2 {
        let rel = point - self.origin;
        Vec2::new(rel.dot(self.u_axis), rel.dot(self.v_axis))
    }

    fn edge_outside(&self, i: usize, p: Vec2) -> bool {
        let p1 = self.points[i];
        let p2 = self.points[(i + 1) % self.points.len()];
        let diff = Vec2::new(p1.y - p2.y, p2.x - p1.x);
        diff.dot(p - p1) < 0.0
    }

    /// Whether a chunk-local point projects inside the polygon.
    pub fn inside(&self, point: Vec3) -> bool {
        let p = self.project(point);
        (0..self.points.len()).all(|i| !self.edge_outside(i, p))
    }

    /// Bitmask of the polygon edges the point lies outside of.
    pub fn outcode(&self, point: Vec3) -> u32 {
        let p = self.project(point);
        (0..self.points.len())
            .filter(|&i| self.edge_outside(i, p))
            .fold(0, |acc, i| acc | (1 << i))
    }

    pub fn recompute_centre(&mut self) {
        if self.points.is_empty() {
            self.lcentre = self.origin;
            self.centre = self.lcentre;
            return;
        }
        let avg = self.points.iter().copied().sum::<Vec2>() / self.points.len() as f32;
        self.lcentre = self.u_axis * avg.x + self.v_axis * avg.y + self.origin;
        self.centre = self.lcentre;
    }

    /// Reverse the winding when the first three corners disagree with the
    /// plane normal. Point 0 stays in place.
    fn fix_winding(&mut self) {
        if self.points.len() < 3 {
            return;
        }
        let test = PlaneEq::from_points(
            self.object_space_point(0),
            self.object_space_point(1),
            self.object_space_point(2),
        );
        let n1 = self.plane.normal.normalize_or_zero();
        let n2 = test.normal;
        if (n1 + n2).length() < 1.0 {
            self.points[1..].reverse();
        }
    }

    /// Set the world centre from the owner's transform.
    pub fn update_centre(&mut self, transform: &Affine3A) {
        self.centre = transform.transform_point3(self.lcentre);
    }
}

/// Whether portal `a` of one chunk and portal `b` of another describe the
/// same opening from opposite sides.
pub fn can_bind(a: &Portal, ta: &Affine3A, b: &Portal, tb: &Affine3A) -> bool {
    // sentinel targets are taken; a pending or resolved chunk still matches
    if a.target.is_sentinel() || b.target.is_sentinel() {
        return false;
    }
    if a.points.len() != b.points.len() {
        return false;
    }
    if a.centre.distance_squared(b.centre) > PORTAL_EPSILON * PORTAL_EPSILON {
        return false;
    }
    let n1 = ta.transform_vector3(a.plane.normal);
    let n2 = tb.transform_vector3(b.plane.normal);
    if (n1 + n2).length() > PORTAL_EPSILON {
        return false;
    }
    let pa = a.world_points(ta);
    b.world_points(tb)
        .iter()
        .all(|v| pa.iter().any(|p| p.abs_diff_eq(*v, PORTAL_EPSILON)))
}

/// Split a convex polygon by a plane into the part in front of it
/// (distance >= 0) and the part behind it.
pub fn split_polygon(poly: &[Vec3], plane: &PlaneEq) -> (Vec<Vec3>, Vec<Vec3>) {
    let mut front = Vec::new();
    let mut back = Vec::new();
    if poly.is_empty() {
        return (front, back);
    }
    for i in 0..poly.len() {
        let a = poly[i];
        let b = poly[(i + 1) % poly.len()];
        let da = plane.distance_to(a);
        let db = plane.distance_to(b);
        if da >= 0.0 {
            front.push(a);
        } else {
            back.push(a);
        }
        if (da >= 0.0) != (db >= 0.0) {
            let t = da / (da - db);
            let cut = a + (b - a) * t;
            front.push(cut);
            back.push(cut);
        }
    }
    (front, back)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::tests::test_mapping;

    fn square() -> Vec<Vec2> {
        vec![
            Vec2::new(0.0, -1.0),
            Vec2::new(1.0, -1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.0),
        ]
    }

    fn doc(chunk: &str, points: &[Vec2]) -> PortalDoc {
        PortalDoc {
            label: String::new(),
            internal: false,
            permissive: true,
            chunk: chunk.to_string(),
            u_axis: Vec3::Y,
            points: points.iter().map(|p| Vec3::new(p.x, p.y, 0.0)).collect(),
        }
    }

    #[test]
    fn empty_chunk_name_is_unresolved() {
        let mapping = test_mapping();
        let p = Portal::from_doc(&doc("", &square()), PlaneEq::new(Vec3::X, 0.0), &mapping);
        assert_eq!(p.target, PortalTarget::Unresolved);
        assert!(!p.internal);
        assert!(p.permissive);
        assert!(!p.has_chunk());
        assert_eq!(p.v_axis, Vec3::Z);
        assert_eq!(p.points, square());
        assert!((p.lcentre - Vec3::new(0.0, 0.5, 0.0)).length() < 1e-6);
    }

    #[test]
    fn sentinel_and_stub_targets() {
        let mapping = test_mapping();
        let plane = PlaneEq::new(Vec3::X, 0.0);
        for (name, target) in [
            ("heaven", PortalTarget::Heaven),
            ("earth", PortalTarget::Earth),
            ("invasive", PortalTarget::Invasive),
            ("extern", PortalTarget::Extern),
        ] {
            let p = Portal::from_doc(&doc(name, &square()), plane, &mapping);
            assert_eq!(p.target, target);
            assert!(p.target.is_sentinel());
        }
        let p = Portal::from_doc(&doc("00010000o", &square()), plane, &mapping);
        assert_eq!(p.target, PortalTarget::Unresolved);
        assert_eq!(p.stub.as_ref().map(|s| s.identifier.as_str()), Some("00010000o"));
        assert!(p.has_chunk());
    }

    #[test]
    fn opposed_winding_swaps_middle_corners() {
        let mapping = test_mapping();
        let reversed: Vec<Vec2> = square().into_iter().rev().collect();
        let p = Portal::from_doc(&doc("", &reversed), PlaneEq::new(Vec3::X, 0.0), &mapping);
        assert_eq!(
            p.points,
            vec![reversed[0], reversed[3], reversed[2], reversed[1]]
        );
        let test = PlaneEq::from_points(
            p.object_space_point(0),
            p.object_space_point(1),
            p.object_space_point(2),
        );
        assert!(test.normal.dot(Vec3::X) > 0.99);
    }

    #[test]
    fn inside_and_outcode_agree() {
        let p = Portal::new(PlaneEq::new(Vec3::X, 0.0), Vec3::Y, square());
        assert!(p.inside(Vec3::new(0.0, 0.5, 0.0)));
        assert_eq!(p.outcode(Vec3::new(0.0, 0.5, 0.0)), 0);
        assert!(!p.inside(Vec3::new(0.0, 2.0, 0.0)));
        // beyond u = 1 only the second edge is crossed
        assert_eq!(p.outcode(Vec3::new(0.0, 2.0, 0.0)), 0b0010);
    }

    #[test]
    fn opposite_portals_can_bind() {
        let a = Portal::new(PlaneEq::new(Vec3::X, 0.0), Vec3::Y, square());
        // the same opening seen from the other side of x = 0
        let b_points = vec![
            Vec2::new(0.0, -1.0),
            Vec2::new(0.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, -1.0),
        ];
        let b = Portal::new(PlaneEq::new(Vec3::NEG_X, 0.0), Vec3::Y, b_points);
        let id = Affine3A::IDENTITY;
        assert!(can_bind(&a, &id, &b, &id));

        let moved = Affine3A::from_translation(Vec3::new(0.0, 0.0, 5.0));
        let mut c = b.clone();
        c.update_centre(&moved);
        assert!(!can_bind(&a, &id, &c, &moved));

        let mut heaven = a.clone();
        heaven.target = PortalTarget::Heaven;
        assert!(!can_bind(&heaven, &id, &b, &id));
    }

    #[test]
    fn to_doc_marks_foreign_targets_extern() {
        let mapping = test_mapping();
        let p = Portal::from_doc(&doc("00010000o", &square()), PlaneEq::new(Vec3::X, 0.0), &mapping);
        let out = p.to_doc(&mapping, None);
        assert_eq!(out.chunk, "00010000o");
        assert_eq!(out.points.len(), 4);

        let source = std::sync::Arc::new(chunkspace_format::MemorySource::new(
            "other/",
            chunkspace_format::SpaceSettings::new(chunkspace_format::GridBounds::new(0, 0, 0, 0)),
        ));
        let other = crate::mapping::DirMapping::new(
            crate::mapping::MappingId(7),
            source,
            Affine3A::IDENTITY,
        )
        .unwrap();
        assert_eq!(p.to_doc(&mapping, Some(("00000000o", &other))).chunk, "extern");
    }

    #[test]
    fn polygon_split_keeps_both_sides() {
        let poly = vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(2.0, 0.0, 0.0),
            Vec3::new(2.0, 2.0, 0.0),
            Vec3::new(0.0, 2.0, 0.0),
        ];
        let (front, back) = split_polygon(&poly, &PlaneEq::new(Vec3::NEG_X, -1.0));
        assert_eq!(front.len(), 4);
        assert_eq!(back.len(), 4);
        assert!(front.iter().all(|p| p.x <= 1.0 + 1e-6));
        assert!(back.iter().all(|p| p.x >= 1.0 - 1e-6));

        let (all, none) = split_polygon(&poly, &PlaneEq::new(Vec3::X, -5.0));
        assert_eq!(all.len(), 4);
        assert!(none.is_empty());
    }
}
