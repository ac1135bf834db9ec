//! Portal graph maintenance: binding chunks to their neighbours, loosing
//! them again, forming portals into outside chunks and re-resolving portals
//! that cross mapping boundaries.

use std::sync::Arc;

use chunkspace_common::PlaneEq;
use glam::{Affine3A, Vec2, Vec3};

use crate::arena::ChunkId;
use crate::body::resolve_extern_at;
use crate::boundary::Boundary;
use crate::error::GraphError;
use crate::mapping::DirMapping;
use crate::portal::{Portal, PortalTarget, can_bind};
use crate::space::Space;

/// How far behind a portal to look for the chunk that should face it.
const CONNECT_REACH: f32 = 0.001;
/// How far behind an extern portal to look for a chunk in another mapping.
const EXTERN_REACH: f32 = 0.1;

fn keep_first(slot: &mut Result<(), GraphError>, err: GraphError) {
    if slot.is_ok() {
        *slot = Err(err);
    }
}

impl Space {
    /// Resolve and bind a loaded chunk's portals and bring it online.
    ///
    /// With `form`, portals without a target look for a focused neighbour
    /// to connect to. A missing reverse portal leaves that edge unbound and
    /// is reported once the chunk is online.
    pub fn bind(&mut self, id: ChunkId, form: bool) -> Result<(), GraphError> {
        let chunk = self.chunk_ref(id)?;
        if chunk.online {
            return Err(GraphError::Online(chunk.identifier().to_string()));
        }
        if !chunk.loaded {
            return Err(GraphError::NotLoaded(chunk.identifier().to_string()));
        }
        let _span = tracing::debug_span!("bind", chunk = %chunk.identifier()).entered();

        let result = self.bind_portals(id, form);
        self.notify_bind(id);
        self.chunk_mut(id)?.online = true;
        self.notice_chunk(id);
        tracing::debug!(neighbours = self.chunk_ref(id)?.bound_neighbours().len(), "chunk online");
        result
    }

    fn bind_portals(&mut self, id: ChunkId, form: bool) -> Result<(), GraphError> {
        let mut deferred = Ok(());
        let count = self.chunk_ref(id)?.boundaries.len();
        for bi in 0..count {
            let mut pi = 0;
            while pi < self.chunk_ref(id)?.boundaries[bi].unbound_portals.len() {
                match self.bind_unbound_portal(id, bi, pi, form) {
                    Ok(true) => {}
                    Ok(false) => pi += 1,
                    Err(e) => {
                        keep_first(&mut deferred, e);
                        pi += 1;
                    }
                }
            }
        }
        deferred
    }

    fn portal_mut(&mut self, id: ChunkId, bi: usize, pi: usize) -> Result<&mut Portal, GraphError> {
        Ok(&mut self.chunk_mut(id)?.boundaries[bi].unbound_portals[pi])
    }

    /// Try to resolve and bind one unbound portal. Returns true when it
    /// moved to the bound list.
    fn bind_unbound_portal(
        &mut self,
        id: ChunkId,
        bi: usize,
        pi: usize,
        form: bool,
    ) -> Result<bool, GraphError> {
        let chunk = self.chunk_ref(id)?;
        let own = Arc::clone(chunk.mapping());
        let transform = chunk.transform;
        let portal = &chunk.boundaries[bi].unbound_portals[pi];

        // targets in a condemned mapping or already deleted are retried
        let dead_stub = portal.stub.as_ref().is_some_and(|s| s.mapping.is_condemned());
        let dead_target = portal.target.chunk().is_some_and(|t| {
            self.chunks
                .get(t)
                .is_none_or(|c| c.mapping().is_condemned())
        });
        if dead_stub || dead_target {
            let p = self.portal_mut(id, bi, pi)?;
            if let Some(stub) = p.stub.take() {
                if stub.mapping.id() != own.id() {
                    stub.mapping.dec_ref();
                }
            }
            p.target = PortalTarget::Extern;
        }

        let mappings = self.live_mappings();
        let p = self.portal_mut(id, bi, pi)?;
        if p.is_extern() {
            let behind = transform.transform_point3(p.lcentre - p.plane.normal * EXTERN_REACH);
            if let Some(stub) = resolve_extern_at(behind, &own, &mappings) {
                p.stub = Some(stub);
                p.target = PortalTarget::Unresolved;
            }
        }

        if p.target.chunk().is_none() {
            if let Some(stub) = p.stub.take() {
                let holding = stub.mapping.id() != own.id();
                let mapping = Arc::clone(&stub.mapping);
                let other = self.find_or_add_chunk(stub);
                if holding {
                    mapping.dec_ref();
                }
                self.portal_mut(id, bi, pi)?.target = PortalTarget::Chunk(other);
            } else {
                let target = p.target;
                if !form || !matches!(target, PortalTarget::Unresolved | PortalTarget::Invasive) {
                    return Ok(false);
                }
                let portal = p.clone();
                let con_pt =
                    transform.transform_point3(portal.lcentre - portal.plane.normal * CONNECT_REACH);
                let Some(found) = self
                    .column(con_pt)
                    .and_then(|c| c.find_chunk_excluding(con_pt, Some(id)))
                else {
                    return Ok(false);
                };
                if !self.form_portal(found, id, &portal, &transform)? {
                    return Ok(false);
                }
                let dest_planes = self.chunk_ref(found)?.world_border();
                let chunk = self.chunk_mut(id)?;
                let boundary = &mut chunk.boundaries[bi];
                boundary.unbound_portals[pi].target = PortalTarget::Chunk(found);
                if target == PortalTarget::Invasive {
                    let split = boundary.split_invasive_portal(pi, &transform, &dest_planes);
                    if split > 0 {
                        tracing::debug!(pieces = split, "invasive portal split");
                    }
                }
            }
        }

        let Some(other) = self.chunk_ref(id)?.boundaries[bi].unbound_portals[pi].target.chunk() else {
            return Ok(false);
        };
        if other == id || !self.chunks.get(other).is_some_and(|c| c.online) {
            return Ok(false);
        }
        self.bind_pair(id, bi, pi, other)?;
        Ok(true)
    }

    /// Bind unbound portal `(bi, pi)` of `id` together with the portal of
    /// online `other` that leads back. Nothing moves when there is none.
    fn bind_pair(&mut self, id: ChunkId, bi: usize, pi: usize, other: ChunkId) -> Result<(), GraphError> {
        let Some((obi, opi)) = self.chunk_ref(other)?.find_unbound_to(id) else {
            let err = GraphError::MissingReversePortal {
                chunk: self.chunk_ref(other)?.identifier().to_string(),
                neighbour: self.chunk_ref(id)?.identifier().to_string(),
            };
            tracing::error!(error = %err, "reverse portal not found");
            return Err(err);
        };
        self.chunk_mut(id)?.boundaries[bi].bind_portal(pi);
        self.chunk_mut(other)?.boundaries[obi].bind_portal(opi);
        self.notify_bind(other);
        Ok(())
    }

    /// Give `this` a portal facing `oportal` of chunk `other`. An unbound
    /// portal that matches is adopted; an outside chunk invaded by an inside
    /// chunk gets a new internal boundary.
    fn form_portal(
        &mut self,
        this: ChunkId,
        other: ChunkId,
        oportal: &Portal,
        other_transform: &Affine3A,
    ) -> Result<bool, GraphError> {
        let chunk = self.chunk_mut(this)?;
        let own = chunk.mapping().id();
        let transform = chunk.transform;
        for b in &mut chunk.boundaries {
            for p in &mut b.unbound_portals {
                if can_bind(oportal, other_transform, p, &transform) {
                    if let Some(stub) = p.stub.take() {
                        if stub.mapping.id() != own {
                            stub.mapping.dec_ref();
                        }
                    }
                    p.target = PortalTarget::Chunk(other);
                    return Ok(true);
                }
            }
        }

        if !oportal.is_invasive() || !chunk.is_outside() {
            return Ok(false);
        }

        let wnormal = -other_transform.transform_vector3(oportal.plane.normal);
        let lnormal = chunk.inverse.transform_vector3(wnormal).normalize();
        let lcentre = chunk.inverse.transform_point3(oportal.centre);
        let lplane = PlaneEq::from_point_normal(lcentre, lnormal);

        let cart = most_perpendicular_axis(lnormal);
        let u_axis = lnormal.cross(cart).normalize();
        let v_axis = lnormal.cross(u_axis);
        let origin = lplane.origin();
        let points: Vec<Vec2> = oportal
            .world_points(other_transform)
            .into_iter()
            .map(|w| {
                let rel = chunk.inverse.transform_point3(w) - origin;
                Vec2::new(rel.dot(u_axis), rel.dot(v_axis))
            })
            .collect();

        let mut portal = Portal::new(lplane, u_axis, points);
        portal.internal = true;
        portal.target = PortalTarget::Chunk(other);
        portal.update_centre(&transform);

        let mut joint = Boundary::joint(lplane);
        joint.add_invasive_portal(portal);
        chunk.boundaries.push(joint);
        chunk.has_internal_chunks = true;
        tracing::debug!(chunk = %chunk.identifier(), "formed internal portal");
        self.notify_bind(this);
        Ok(true)
    }

    /// Take an online chunk out of the graph. With `cut`, its portals
    /// forget their targets so the next bind derives them again. Lending
    /// ties are dropped on both sides.
    pub fn loose(&mut self, id: ChunkId, cut: bool) -> Result<(), GraphError> {
        let chunk = self.chunk_ref(id)?;
        if !chunk.online {
            return Err(GraphError::Offline(chunk.identifier().to_string()));
        }
        let _span = tracing::debug_span!("loose", chunk = %chunk.identifier(), cut).entered();
        self.ignore_chunk(id)?;

        let mut deferred = Ok(());
        let chunk = self.chunk_mut(id)?;
        chunk.focus_count = 0;
        let ident = chunk.identifier().to_string();
        let is_outside = chunk.is_outside();
        let borrowers = std::mem::take(&mut chunk.borrowers);
        let lenders = std::mem::take(&mut chunk.lenders);
        let borrowed: Vec<_> = lenders.iter().flat_map(|l| l.items.iter().copied()).collect();
        chunk.sway_items.retain(|s| !borrowed.contains(s));

        for b in borrowers {
            let Some(bc) = self.chunks.get_mut(b) else {
                continue;
            };
            match bc.lenders.iter().position(|l| l.lender == id) {
                Some(i) => {
                    let lent = bc.lenders.remove(i);
                    bc.sway_items.retain(|s| !lent.items.contains(s));
                }
                None => {
                    let err = GraphError::LendingMismatch {
                        lender: ident.clone(),
                        borrower: bc.identifier().to_string(),
                    };
                    tracing::error!(error = %err, "lender missing from borrower");
                    keep_first(&mut deferred, err);
                }
            }
        }
        for l in lenders {
            let Some(lc) = self.chunks.get_mut(l.lender) else {
                continue;
            };
            match lc.borrowers.iter().position(|b| *b == id) {
                Some(i) => {
                    lc.borrowers.remove(i);
                }
                None => {
                    let err = GraphError::LendingMismatch {
                        lender: lc.identifier().to_string(),
                        borrower: ident.clone(),
                    };
                    tracing::error!(error = %err, "borrower missing from lender");
                    keep_first(&mut deferred, err);
                }
            }
        }

        let count = self.chunk_ref(id)?.boundaries.len();
        for bi in 0..count {
            let mut pi = 0;
            loop {
                let chunk = self.chunk_ref(id)?;
                let Some(p) = chunk.boundaries[bi].bound_portals.get(pi) else {
                    break;
                };
                let Some(other) = p.target.chunk() else {
                    pi += 1;
                    continue;
                };
                let other_outside = self.chunks.get(other).map(|c| c.is_outside());

                let boundary = &mut self.chunk_mut(id)?.boundaries[bi];
                if cut {
                    boundary.bound_portals[pi].target = if !is_outside && other_outside == Some(true) {
                        PortalTarget::Invasive
                    } else {
                        PortalTarget::Unresolved
                    };
                }
                boundary.loose_portal(pi);

                let Some(other_outside) = other_outside else {
                    continue;
                };
                // an exit portal is always cut from the inside chunk's side
                let other_cut = (is_outside && !other_outside) || cut;
                if let Err(e) = self.loose_from(other, id, other_cut) {
                    keep_first(&mut deferred, e);
                }
            }
        }

        self.chunk_mut(id)?.online = false;
        tracing::debug!("chunk offline");
        deferred
    }

    /// The reverse half of [`Space::loose`]: unbind `this`'s portal to `from`.
    fn loose_from(&mut self, this: ChunkId, from: ChunkId, cut: bool) -> Result<(), GraphError> {
        let from_outside = self.chunk_ref(from)?.is_outside();
        let from_name = self.chunk_ref(from)?.identifier().to_string();
        let chunk = self.chunk_mut(this)?;
        let Some((bi, pi)) = chunk.find_bound_to(from) else {
            let err = GraphError::MissingReversePortal {
                chunk: chunk.identifier().to_string(),
                neighbour: from_name,
            };
            tracing::error!(error = %err, "reverse portal not found");
            return Err(err);
        };
        let invaded = !chunk.is_outside() && from_outside;
        let boundary = &mut chunk.boundaries[bi];
        if cut {
            let portal = &mut boundary.bound_portals[pi];
            portal.target = if invaded {
                PortalTarget::Invasive
            } else {
                PortalTarget::Unresolved
            };
            if portal.internal {
                chunk.boundaries.remove(bi);
                chunk.has_internal_chunks = chunk
                    .boundaries
                    .iter()
                    .any(|b| b.portals().any(|p| p.internal));
                return Ok(());
            }
        }
        boundary.loose_portal(pi);
        Ok(())
    }

    /// Retry portals that cross into other mappings after the set of
    /// mappings changed. With `dead`, portals leading into that mapping are
    /// reset and retried; otherwise only extern portals are.
    pub(crate) fn resolve_externs(
        &mut self,
        id: ChunkId,
        dead: Option<&Arc<DirMapping>>,
    ) -> Result<(), GraphError> {
        let chunk = self.chunk_ref(id)?;
        if !chunk.online {
            return Err(GraphError::Offline(chunk.identifier().to_string()));
        }
        let own = Arc::clone(chunk.mapping());
        let transform = chunk.transform;
        let mappings = self.live_mappings();
        let mut deferred = Ok(());

        let count = chunk.boundaries.len();
        for bi in 0..count {
            let mut pi = 0;
            while pi < self.chunk_ref(id)?.boundaries[bi].unbound_portals.len() {
                let p = &self.chunk_ref(id)?.boundaries[bi].unbound_portals[pi];
                match dead {
                    Some(dead) => {
                        let into_dead = p.target.chunk().is_some_and(|t| {
                            self.chunks
                                .get(t)
                                .is_none_or(|c| c.mapping().id() == dead.id())
                        }) || p.stub.as_ref().is_some_and(|s| s.mapping.id() == dead.id());
                        if !into_dead {
                            pi += 1;
                            continue;
                        }
                        let p = self.portal_mut(id, bi, pi)?;
                        if let Some(stub) = p.stub.take() {
                            if stub.mapping.id() != own.id() {
                                stub.mapping.dec_ref();
                            }
                        }
                        p.target = PortalTarget::Extern;
                    }
                    None if !p.is_extern() => {
                        pi += 1;
                        continue;
                    }
                    None => {}
                }

                let p = self.portal_mut(id, bi, pi)?;
                let behind = transform.transform_point3(p.lcentre - p.plane.normal * EXTERN_REACH);
                let Some(stub) = resolve_extern_at(behind, &own, &mappings) else {
                    pi += 1;
                    continue;
                };
                let mapping = Arc::clone(&stub.mapping);
                let other = self.find_or_add_chunk(stub);
                mapping.dec_ref();
                let p = self.portal_mut(id, bi, pi)?;
                p.target = PortalTarget::Chunk(other);
                tracing::debug!(neighbour = %other, "extern portal resolved");

                if self.chunks.get(other).is_some_and(|c| c.online) {
                    match self.bind_pair(id, bi, pi, other) {
                        Ok(()) => continue,
                        Err(e) => keep_first(&mut deferred, e),
                    }
                }
                pi += 1;
            }
        }
        deferred
    }

    /// Discard everything a load produced. Dynamic items and items that want
    /// to nest become homeless; other static items are dropped.
    pub fn eject(&mut self, id: ChunkId) -> Result<(), GraphError> {
        let chunk = self.chunk_ref(id)?;
        if chunk.online {
            return Err(GraphError::Online(chunk.identifier().to_string()));
        }
        if !chunk.loaded {
            return Ok(());
        }
        let dynamic: Vec<_> = chunk.dyno_items.iter().rev().copied().collect();
        let statics: Vec<_> = chunk.self_items.iter().rev().copied().collect();

        for item in dynamic {
            self.del_dynamic_item(id, item, true)?;
            self.add_homeless(item);
        }
        for item in statics {
            self.detach_static_item(id, item)?;
            let nests = self.items.get(item).is_some_and(|e| e.item.wants_nest());
            if nests {
                self.add_homeless(item);
            } else {
                self.items.remove(item);
            }
        }

        self.chunk_mut(id)?.clear_loaded();
        tracing::debug!(chunk = %self.chunk_ref(id)?.identifier(), "chunk ejected");
        Ok(())
    }

    /// Eject a loaded chunk that never went online, releasing the mapping
    /// references its pending extern targets hold.
    pub(crate) fn eject_loaded_chunk_before_binding(&mut self, id: ChunkId) -> Result<(), GraphError> {
        let chunk = self.chunk_mut(id)?;
        let own = chunk.mapping().id();
        for b in &mut chunk.boundaries {
            for p in &mut b.unbound_portals {
                if let Some(stub) = p.stub.take() {
                    if stub.mapping.id() != own {
                        stub.mapping.dec_ref();
                    }
                }
            }
        }
        self.eject(id)
    }
}

/// The cartesian axis closest to perpendicular to `n`.
fn most_perpendicular_axis(n: Vec3) -> Vec3 {
    let (x, y, z) = (n.x.abs(), n.y.abs(), n.z.abs());
    if x < y {
        if x < z { Vec3::X } else { Vec3::Z }
    } else if y < z {
        Vec3::Y
    } else {
        Vec3::Z
    }
}
