//! Boundaries: the bounding planes of a chunk and the portals on them.

use std::sync::Arc;

use chunkspace_common::PlaneEq;
use chunkspace_format::BoundaryDoc;
use glam::{Affine3A, Vec2};

use crate::mapping::DirMapping;
use crate::portal::{Portal, PortalTarget, split_polygon};

/// Two planes whose normals agree this closely are treated as parallel.
const PARALLEL_DOT: f32 = 0.99;

#[derive(Debug, Clone)]
pub struct Boundary {
    /// Plane in chunk-local space, normal pointing into the chunk.
    pub plane: PlaneEq,
    pub bound_portals: Vec<Portal>,
    pub unbound_portals: Vec<Portal>,
    /// Part of the chunk's convex hull.
    pub is_bound: bool,
}

impl Boundary {
    /// A boundary with no portals, not part of the hull.
    pub fn joint(plane: PlaneEq) -> Self {
        Self {
            plane,
            bound_portals: Vec::new(),
            unbound_portals: Vec::new(),
            is_bound: false,
        }
    }

    /// Parse a boundary section. Returns `None` for a degenerate plane.
    pub fn from_doc(doc: &BoundaryDoc, mapping: &Arc<DirMapping>) -> Option<Self> {
        let raw = PlaneEq::new(doc.normal, doc.d);
        if raw.is_degenerate() {
            return None;
        }
        let plane = raw.normalized();
        let mut boundary = Self::joint(plane);
        let mut some_internal = false;
        let mut some_external = false;
        for pdoc in &doc.portals {
            let portal = Portal::from_doc(pdoc, plane, mapping);
            if portal.internal {
                some_internal = true;
            } else {
                some_external = true;
            }
            if portal.is_heaven() || portal.is_earth() {
                boundary.bound_portals.push(portal);
            } else {
                boundary.unbound_portals.push(portal);
            }
        }
        if some_internal && some_external {
            tracing::warn!(
                normal = ?plane.normal,
                d = plane.d,
                "boundary mixes internal and external portals"
            );
        }
        boundary.is_bound = match boundary.unbound_portals.first() {
            Some(first) => !first.internal,
            None => true,
        };
        Some(boundary)
    }

    pub fn to_doc(&self) -> BoundaryDoc {
        BoundaryDoc {
            normal: self.plane.normal,
            d: self.plane.d,
            portals: Vec::new(),
        }
    }

    /// Whether the boundary carries any portal.
    pub fn is_joint(&self) -> bool {
        !self.bound_portals.is_empty() || !self.unbound_portals.is_empty()
    }

    /// Move an unbound portal to the bound list. Returns its new index.
    pub fn bind_portal(&mut self, unbound_index: usize) -> usize {
        let portal = self.unbound_portals.remove(unbound_index);
        self.bound_portals.push(portal);
        self.bound_portals.len() - 1
    }

    /// Move a bound portal back to the unbound list.
    pub fn loose_portal(&mut self, bound_index: usize) -> usize {
        let portal = self.bound_portals.remove(bound_index);
        self.unbound_portals.push(portal);
        self.unbound_portals.len() - 1
    }

    pub fn add_invasive_portal(&mut self, portal: Portal) {
        self.unbound_portals.push(portal);
    }

    pub fn portals(&self) -> impl Iterator<Item = &Portal> {
        self.bound_portals.iter().chain(self.unbound_portals.iter())
    }

    /// Clip unbound portal `index` against every non-parallel plane of the
    /// chunk it leads into. Pieces reaching past a plane become new invasive
    /// portals on this boundary. Returns how many pieces were split off.
    pub fn split_invasive_portal(
        &mut self,
        index: usize,
        own_transform: &Affine3A,
        dest_planes: &[PlaneEq],
    ) -> usize {
        let Some(portal) = self.unbound_portals.get(index) else {
            return 0;
        };
        let src_world = self.plane.transformed(own_transform).normalized();

        // portal basis (u, v, n, origin) composed with the chunk transform
        let basis = Affine3A::from_cols(
            portal.u_axis.into(),
            portal.v_axis.into(),
            portal.plane.normal.into(),
            portal.origin.into(),
        );
        let to_world = *own_transform * basis;
        let to_portal = to_world.inverse();

        let mut current: Vec<_> = portal
            .points
            .iter()
            .map(|p| to_world.transform_point3(p.extend(0.0)))
            .collect();
        let mut pieces = Vec::new();
        for dest in dest_planes {
            let dest = dest.normalized();
            if dest.normal.dot(src_world.normal).abs() > PARALLEL_DOT {
                continue;
            }
            let (inside, outside) = split_polygon(&current, &dest);
            if outside.len() < 3 || inside.len() < 3 {
                continue;
            }
            pieces.push(outside);
            current = inside;
        }
        if pieces.is_empty() {
            return 0;
        }

        let to_local = |poly: &[glam::Vec3]| -> Vec<Vec2> {
            poly.iter()
                .map(|w| to_portal.transform_point3(*w).truncate())
                .collect()
        };
        let template = self.unbound_portals[index].clone();
        {
            let portal = &mut self.unbound_portals[index];
            portal.points = to_local(&current);
            portal.recompute_centre();
            portal.update_centre(own_transform);
        }
        let count = pieces.len();
        for piece in pieces {
            let mut split = template.clone();
            split.stub = None;
            split.target = PortalTarget::Invasive;
            split.points = to_local(&piece);
            split.recompute_centre();
            split.update_centre(own_transform);
            self.unbound_portals.push(split);
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::tests::test_mapping;
    use chunkspace_format::PortalDoc;
    use glam::Vec3;

    fn portal_doc(chunk: &str, internal: bool) -> PortalDoc {
        PortalDoc {
            label: String::new(),
            internal,
            permissive: true,
            chunk: chunk.to_string(),
            u_axis: Vec3::Y,
            points: vec![
                Vec3::new(0.0, -1.0, 0.0),
                Vec3::new(1.0, -1.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
        }
    }

    #[test]
    fn plane_is_normalised_on_load() {
        let doc = BoundaryDoc {
            normal: Vec3::new(2.0, 0.0, 0.0),
            d: 4.0,
            portals: vec![],
        };
        let b = Boundary::from_doc(&doc, &test_mapping()).unwrap();
        assert_eq!(b.plane.normal, Vec3::X);
        assert_eq!(b.plane.d, 2.0);
        assert!(b.is_bound);
        assert!(!b.is_joint());
    }

    #[test]
    fn degenerate_plane_is_dropped() {
        let doc = BoundaryDoc {
            normal: Vec3::ZERO,
            d: 1.0,
            portals: vec![portal_doc("", false)],
        };
        assert!(Boundary::from_doc(&doc, &test_mapping()).is_none());
    }

    #[test]
    fn heaven_and_earth_start_bound() {
        let doc = BoundaryDoc {
            normal: Vec3::Y,
            d: 0.0,
            portals: vec![portal_doc("earth", false), portal_doc("00000000o", false)],
        };
        let b = Boundary::from_doc(&doc, &test_mapping()).unwrap();
        assert_eq!(b.bound_portals.len(), 1);
        assert_eq!(b.unbound_portals.len(), 1);
        assert!(b.is_bound);
        assert!(b.is_joint());
    }

    #[test]
    fn internal_first_portal_is_not_a_bound() {
        let doc = BoundaryDoc {
            normal: Vec3::X,
            d: 0.0,
            portals: vec![portal_doc("", true)],
        };
        let b = Boundary::from_doc(&doc, &test_mapping()).unwrap();
        assert!(!b.is_bound);
        assert!(b.is_joint());
    }

    #[test]
    fn bind_and_loose_move_between_lists() {
        let doc = BoundaryDoc {
            normal: Vec3::X,
            d: 0.0,
            portals: vec![portal_doc("", false), portal_doc("", false)],
        };
        let mut b = Boundary::from_doc(&doc, &test_mapping()).unwrap();
        assert_eq!(b.bind_portal(1), 0);
        assert_eq!((b.bound_portals.len(), b.unbound_portals.len()), (1, 1));
        b.loose_portal(0);
        assert_eq!((b.bound_portals.len(), b.unbound_portals.len()), (0, 2));
    }

    #[test]
    fn invasive_portal_is_split_at_crossing_planes() {
        // portal on the plane x = 0 spanning z in [-1, 1]
        let plane = PlaneEq::new(Vec3::X, 0.0);
        let mut b = Boundary::joint(plane);
        let points = vec![
            Vec2::new(0.0, -1.0),
            Vec2::new(1.0, -1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.0),
        ];
        let mut portal = Portal::new(plane, Vec3::Y, points);
        portal.target = PortalTarget::Invasive;
        b.add_invasive_portal(portal);

        // destination ends at z = 0.5 (normal facing inward along -z)
        let dest = [
            PlaneEq::new(Vec3::NEG_Z, -0.5),
            PlaneEq::new(Vec3::NEG_X, 0.0),
        ];
        let split = b.split_invasive_portal(0, &Affine3A::IDENTITY, &dest);
        assert_eq!(split, 1);
        assert_eq!(b.unbound_portals.len(), 2);
        let kept = &b.unbound_portals[0];
        assert!(kept.lcentre.z < 0.0);
        let piece = &b.unbound_portals[1];
        assert_eq!(piece.target, PortalTarget::Invasive);
        assert!((piece.lcentre.z - 0.75).abs() < 1e-4);
    }
}
