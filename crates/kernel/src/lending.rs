//! Item ownership and lending between chunks.
//!
//! Every item has at most one home chunk. An item whose influence reaches
//! past its home is lent to the neighbours it touches: the borrower records
//! the item under a [`Lender`] entry for the home chunk and the home chunk
//! lists the borrower. Both sides are always updated together.

use chunkspace_common::ItemId;
use glam::Vec3;

use crate::arena::ChunkId;
use crate::chunk::Lender;
use crate::error::GraphError;
use crate::item::{ChunkItem, ItemKind};
use crate::space::Space;

impl Space {
    // -- static items -----------------------------------------------------

    /// Give a chunk a new static item. It is lent out at once when the
    /// chunk is online.
    pub fn add_static_item(
        &mut self,
        chunk: ChunkId,
        item: Box<dyn ChunkItem>,
    ) -> Result<ItemId, GraphError> {
        self.chunk_ref(chunk)?;
        let id = self.items.insert(item, ItemKind::Static);
        self.attach_static_item(chunk, id)?;
        Ok(id)
    }

    pub(crate) fn attach_static_item(&mut self, chunk: ChunkId, item: ItemId) -> Result<(), GraphError> {
        let entry = self.items.get(item).ok_or(GraphError::UnknownItem(item))?;
        let shell = entry.item.as_bounds().and_then(|b| b.local_bounds());
        let wants_sway = entry.item.wants_sway();

        let c = self.chunk_mut(chunk)?;
        if !c.is_outside() && c.local_bb.is_empty() {
            // the first item of an empty inside chunk is its shell
            if let Some(bb) = shell {
                c.local_bb = bb;
                c.visibility_bb = bb;
                c.bounding_box = bb.transformed(&c.transform);
                c.centre = c.bounding_box.centre();
            }
        }
        c.self_items.push(item);
        if wants_sway {
            c.sway_items.push(item);
        }
        let online = c.online;
        let focused = c.focus_count > 0;

        self.update_bounding_boxes(chunk, item);
        self.items.toss(item, Some(chunk));
        if online {
            self.lend_item(item, chunk);
        }
        if focused {
            self.focus_chunk(chunk)?;
        }
        Ok(())
    }

    /// Take a static item out of its chunk, recalling its loans, and hand
    /// it back to the caller.
    pub fn remove_static_item(
        &mut self,
        chunk: ChunkId,
        item: ItemId,
    ) -> Result<Option<Box<dyn ChunkItem>>, GraphError> {
        self.detach_static_item(chunk, item)?;
        Ok(self.items.remove(item))
    }

    pub(crate) fn detach_static_item(&mut self, chunk: ChunkId, item: ItemId) -> Result<(), GraphError> {
        let c = self.chunk_ref(chunk)?;
        if !c.self_items.contains(&item) {
            return Ok(());
        }
        if c.online {
            for borrower in c.borrowers.clone() {
                self.del_loan_item(borrower, item, false);
            }
        }
        let c = self.chunk_mut(chunk)?;
        c.self_items.retain(|i| *i != item);
        c.sway_items.retain(|i| *i != item);
        let focused = c.focus_count > 0;
        self.items.toss(item, None);
        if focused {
            self.focus_chunk(chunk)?;
        }
        Ok(())
    }

    /// Grow a chunk's vertical extent to cover an item.
    fn update_bounding_boxes(&mut self, chunk: ChunkId, item: ItemId) {
        let Some(bounds) = self.items.get(item).and_then(|e| e.item.as_bounds()) else {
            return;
        };
        let Some(c) = self.chunks.get_mut(chunk) else {
            return;
        };
        if bounds.add_y_bounds(&mut c.local_bb) {
            c.bounding_box = c.local_bb.transformed(&c.transform);
        }
        bounds.add_y_bounds(&mut c.visibility_bb);
    }

    // -- dynamic items ----------------------------------------------------

    pub fn add_dynamic_item(
        &mut self,
        chunk: ChunkId,
        item: Box<dyn ChunkItem>,
    ) -> Result<ItemId, GraphError> {
        self.chunk_ref(chunk)?;
        let id = self.items.insert(item, ItemKind::Dynamic);
        self.attach_dynamic_item(chunk, id)?;
        Ok(id)
    }

    pub(crate) fn attach_dynamic_item(&mut self, chunk: ChunkId, item: ItemId) -> Result<(), GraphError> {
        if !self.items.contains(item) {
            return Err(GraphError::UnknownItem(item));
        }
        self.chunk_mut(chunk)?.dyno_items.push(item);
        self.items.toss(item, Some(chunk));
        Ok(())
    }

    /// Take a dynamic item out of its chunk. With `dynamic_lending`, its
    /// loans to the chunk's neighbours are recalled first.
    pub fn del_dynamic_item(
        &mut self,
        chunk: ChunkId,
        item: ItemId,
        dynamic_lending: bool,
    ) -> Result<(), GraphError> {
        if dynamic_lending {
            for n in self.chunk_ref(chunk)?.bound_neighbours() {
                self.del_loan_item(n, item, true);
            }
        }
        let c = self.chunk_mut(chunk)?;
        if let Some(i) = c.dyno_items.iter().position(|d| *d == item) {
            c.dyno_items.remove(i);
            self.items.toss(item, None);
        }
        Ok(())
    }

    pub fn remove_dynamic_item(
        &mut self,
        chunk: ChunkId,
        item: ItemId,
    ) -> Result<Option<Box<dyn ChunkItem>>, GraphError> {
        self.del_dynamic_item(chunk, item, true)?;
        Ok(self.items.remove(item))
    }

    /// Move a dynamic item to `new_pos`, rehoming it when it left its chunk.
    ///
    /// Sway items of the old home hear about the move. With
    /// `dynamic_lending` and a diameter over one metre the item is lent to
    /// neighbours within its radius. Returns false when no focused chunk
    /// holds the new position and the item became homeless.
    pub fn mod_dynamic_item(
        &mut self,
        item: ItemId,
        new_pos: Vec3,
        diameter: f32,
        dynamic_lending: bool,
    ) -> Result<bool, GraphError> {
        let entry = self.items.get_mut(item).ok_or(GraphError::UnknownItem(item))?;
        let old_pos = entry.item.position();
        entry.item.set_position(new_pos);
        let Some(home) = entry.home else {
            return Ok(false);
        };

        let swayers: Vec<ItemId> = self
            .chunk_ref(home)?
            .sway_items
            .iter()
            .copied()
            .filter(|s| *s != item)
            .collect();
        for s in swayers {
            if let Some(e) = self.items.get_mut(s) {
                e.item.sway(old_pos, new_pos, diameter);
            }
        }

        let radius = if diameter > 1.0 { diameter * 0.5 } else { 0.0 };
        let (column_has_inside, dest) = match self.column(new_pos) {
            Some(col) => (col.has_inside_chunks(), col.find_chunk(new_pos)),
            None => (false, None),
        };
        let c = self.chunk_ref(home)?;
        if !c.has_internal_chunks
            && (!c.is_outside() || !column_has_inside)
            && c.contains(new_pos, radius)
        {
            return Ok(true);
        }

        if dynamic_lending && radius > 0.0 {
            let mut nearby = Vec::new();
            for n in self.chunk_ref(home)?.bound_neighbours() {
                self.del_loan_item(n, item, true);
                if self.chunk_ref(n)?.bounding_box.distance_to_point(new_pos) <= radius {
                    nearby.push(n);
                }
            }

            if dest != Some(home) {
                nearby.clear();
                self.del_dynamic_item(home, item, false)?;
                match dest {
                    Some(d) => self.attach_dynamic_item(d, item)?,
                    None => {
                        self.add_homeless(item);
                        return Ok(false);
                    }
                }
            }

            if !nearby.is_empty() {
                for n in nearby {
                    if !self.add_loan_item(n, item) {
                        break;
                    }
                }
            } else if let Some(d) = dest {
                for n in self.chunk_ref(d)?.bound_neighbours() {
                    if n == d || self.chunk_ref(n)?.bounding_box.distance_to_point(new_pos) > radius {
                        continue;
                    }
                    self.add_loan_item(n, item);
                }
            }
        } else if dest != Some(home) {
            self.del_dynamic_item(home, item, false)?;
            match dest {
                Some(d) => self.attach_dynamic_item(d, item)?,
                None => {
                    self.add_homeless(item);
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    // -- loans ------------------------------------------------------------

    /// Record the bookkeeping of a loan without spreading it further.
    fn record_loan(&mut self, borrower: ChunkId, item: ItemId) -> bool {
        let Some(source) = self.items.home(item) else {
            return false;
        };
        if source == borrower {
            return false;
        }
        let wants_sway = self.items.get(item).is_some_and(|e| e.item.wants_sway());
        let Some(b) = self.chunks.get_mut(borrower) else {
            return false;
        };
        let new_lender = match b.lenders.iter_mut().find(|l| l.lender == source) {
            Some(lender) if lender.items.contains(&item) => return false,
            Some(lender) => {
                lender.items.push(item);
                false
            }
            None => {
                b.lenders.push(Lender {
                    lender: source,
                    items: vec![item],
                });
                true
            }
        };
        if wants_sway {
            b.sway_items.push(item);
        }
        if new_lender {
            if let Some(s) = self.chunks.get_mut(source) {
                s.borrowers.push(borrower);
            }
        }
        true
    }

    /// Lend an item to `borrower` and onward from there. Returns false
    /// when the borrower owns or already holds it.
    pub fn add_loan_item(&mut self, borrower: ChunkId, item: ItemId) -> bool {
        if !self.record_loan(borrower, item) {
            return false;
        }
        self.lend_item(item, borrower);
        true
    }

    /// Recall a loan. The lender relationship ends with its last item.
    /// Unless `can_fail`, a borrower without a lender entry is an error.
    pub fn del_loan_item(&mut self, borrower: ChunkId, item: ItemId, can_fail: bool) -> bool {
        let Some(source) = self.items.home(item) else {
            return false;
        };
        let Some(b) = self.chunks.get_mut(borrower) else {
            return false;
        };
        let Some(li) = b.lenders.iter().position(|l| l.lender == source) else {
            if !can_fail {
                tracing::error!(
                    borrower = %b.identifier(),
                    lender = %source,
                    "no lender entry for borrowed item"
                );
            }
            return false;
        };
        let Some(ii) = b.lenders[li].items.iter().position(|i| *i == item) else {
            return false;
        };
        b.lenders[li].items.remove(ii);
        b.sway_items.retain(|s| *s != item);
        if !b.lenders[li].items.is_empty() {
            return true;
        }

        b.lenders.remove(li);
        let borrower_name = b.identifier().to_string();
        let Some(s) = self.chunks.get_mut(source) else {
            return false;
        };
        match s.borrowers.iter().position(|c| *c == borrower) {
            Some(i) => {
                s.borrowers.remove(i);
                true
            }
            None => {
                tracing::error!(
                    lender = %s.identifier(),
                    borrower = %borrower_name,
                    "no borrower entry for lender"
                );
                false
            }
        }
    }

    pub fn is_loan_item(&self, borrower: ChunkId, item: ItemId) -> bool {
        let Some(source) = self.items.home(item) else {
            return false;
        };
        self.chunks.get(borrower).is_some_and(|b| {
            b.lenders
                .iter()
                .any(|l| l.lender == source && l.items.contains(&item))
        })
    }

    /// Neighbours of `lender` that an item's lend bounds reach into.
    fn lend_targets(&self, item: ItemId, lender: ChunkId) -> Vec<ChunkId> {
        let Some(bb) = self
            .items
            .get(item)
            .and_then(|e| e.item.as_lendable())
            .and_then(|l| l.lend_bounds())
        else {
            return Vec::new();
        };
        let (Some(home), Some(from)) = (
            self.items.home(item).and_then(|h| self.chunks.get(h)),
            self.chunks.get(lender),
        ) else {
            return Vec::new();
        };

        // only worked out for items of inside chunks, on first need
        let mut all_in_own = home.is_outside().then_some(false);
        let mut out = Vec::new();
        for consider in from.bound_neighbours() {
            let Some(c) = self.chunks.get(consider) else {
                continue;
            };
            if !bb.intersects(c.bounding_box()) {
                continue;
            }
            if c.is_outside() && all_in_own.is_none() {
                let inside = bb.corners().iter().all(|p| home.contains(*p, 0.0));
                all_in_own = Some(inside);
                if inside {
                    break;
                }
            }
            out.push(consider);
        }
        out
    }

    /// Spread an item's loans outward through bound portals, starting from
    /// the neighbours of `from`.
    pub(crate) fn lend_item(&mut self, item: ItemId, from: ChunkId) {
        let mut pending = vec![from];
        while let Some(lender) = pending.pop() {
            for consider in self.lend_targets(item, lender) {
                if self.record_loan(consider, item) {
                    self.update_bounding_boxes(consider, item);
                    pending.push(consider);
                }
            }
        }
    }

    /// Lend a newly bound chunk's own and borrowed items to its neighbours.
    pub(crate) fn notify_bind(&mut self, id: ChunkId) {
        let Some(c) = self.chunks.get(id) else {
            return;
        };
        let items: Vec<ItemId> = c
            .self_items
            .iter()
            .copied()
            .chain(c.lenders.iter().flat_map(|l| l.items.iter().copied()))
            .collect();
        for item in items {
            self.lend_item(item, id);
        }
    }

    // -- homeless items ---------------------------------------------------

    pub(crate) fn add_homeless(&mut self, item: ItemId) {
        if !self.homeless.contains(&item) {
            self.homeless.push(item);
        }
    }

    /// Hand the space an item that has no chunk yet. It is nested into the
    /// chunk holding its position once that chunk is focused.
    pub fn add_homeless_item(&mut self, item: Box<dyn ChunkItem>, kind: ItemKind) -> ItemId {
        let id = self.items.insert(item, kind);
        self.add_homeless(id);
        id
    }

    /// Offer every homeless item the focused chunk at its position.
    /// Returns how many found a home.
    pub(crate) fn nest_homeless(&mut self) -> usize {
        let homeless = std::mem::take(&mut self.homeless);
        let mut nested = 0;
        for item in homeless {
            let Some(entry) = self.items.get(item) else {
                continue;
            };
            let kind = entry.kind;
            let Some(dest) = self.find_chunk_from_point(entry.item.position()) else {
                self.homeless.push(item);
                continue;
            };
            let attached = match kind {
                ItemKind::Static => self.attach_static_item(dest, item),
                ItemKind::Dynamic => self.attach_dynamic_item(dest, item),
            };
            match attached {
                Ok(()) => nested += 1,
                Err(e) => {
                    tracing::warn!(error = %e, "homeless item could not nest");
                    self.homeless.push(item);
                }
            }
        }
        if nested > 0 {
            tracing::debug!(nested, left = self.homeless.len(), "homeless items nested");
        }
        nested
    }

    /// Move an item into the smallest focused chunk holding its position.
    pub(crate) fn nest_item(&mut self, item: ItemId) -> Result<(), GraphError> {
        let entry = self.items.get(item).ok_or(GraphError::UnknownItem(item))?;
        let (kind, home) = (entry.kind, entry.home);
        let Some(dest) = self.find_chunk_from_point(entry.item.position()) else {
            return Ok(());
        };
        if home == Some(dest) {
            return Ok(());
        }
        match kind {
            ItemKind::Static => {
                if let Some(h) = home {
                    self.detach_static_item(h, item)?;
                }
                self.attach_static_item(dest, item)
            }
            ItemKind::Dynamic => {
                if let Some(h) = home {
                    self.del_dynamic_item(h, item, true)?;
                }
                self.attach_dynamic_item(dest, item)
            }
        }
    }

    /// Re-nest a chunk's dynamic items and nest-wanting static items, after
    /// a smaller chunk appeared in its columns.
    pub(crate) fn jog_foreign_items(&mut self, chunk: ChunkId) -> Result<(), GraphError> {
        let c = self.chunk_ref(chunk)?;
        let mut items: Vec<ItemId> = c.dyno_items.clone();
        items.extend(
            c.self_items
                .iter()
                .copied()
                .filter(|i| self.items.get(*i).is_some_and(|e| e.item.wants_nest())),
        );
        for item in items {
            self.nest_item(item)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Actor, PointLight};
    use crate::space::tests::{grid_space, load};
    use chunkspace_format::GridBounds;

    #[test]
    fn light_near_a_wall_is_lent_to_the_neighbour() {
        let (mut space, mapping, _) = grid_space(GridBounds::new(0, 0, 1, 0));
        let a = load(&mut space, &mapping, "00000000o");
        let b = load(&mut space, &mapping, "00010000o");

        let lamp = space
            .add_static_item(a, Box::new(PointLight::new("lamp", Vec3::new(95.0, 1.0, 50.0), 10.0)))
            .unwrap();
        let candle = space
            .add_static_item(a, Box::new(PointLight::new("candle", Vec3::new(50.0, 1.0, 50.0), 5.0)))
            .unwrap();
        assert!(space.is_loan_item(b, lamp));
        assert!(!space.is_loan_item(b, candle));
        assert_eq!(space.chunk(a).unwrap().borrowers(), &[b]);
        assert!(space.validate().is_empty());

        assert_eq!(space.draw_chunk(b).unwrap(), 1);
        let drawn = space.items().downcast::<PointLight>(lamp).unwrap().drawn_in().to_vec();
        assert_eq!(drawn, vec![b]);

        space.remove_static_item(a, lamp).unwrap();
        assert!(space.chunk(b).unwrap().lenders().is_empty());
        assert!(space.chunk(a).unwrap().borrowers().is_empty());
    }

    #[test]
    fn binding_lends_existing_items_to_the_new_neighbour() {
        let (mut space, mapping, _) = grid_space(GridBounds::new(0, 0, 1, 0));
        let a = load(&mut space, &mapping, "00000000o");
        let lamp = space
            .add_static_item(a, Box::new(PointLight::new("lamp", Vec3::new(95.0, 1.0, 50.0), 10.0)))
            .unwrap();
        assert!(space.chunk(a).unwrap().borrowers().is_empty());

        let b = load(&mut space, &mapping, "00010000o");
        assert!(space.is_loan_item(b, lamp));

        space.loose(b, false).unwrap();
        assert!(space.chunk(a).unwrap().borrowers().is_empty());
        assert!(space.chunk(b).unwrap().lenders().is_empty());
        assert!(space.validate().is_empty());
    }

    #[test]
    fn moving_actor_changes_home_and_falls_out_of_the_world() {
        let (mut space, mapping, _) = grid_space(GridBounds::new(0, 0, 1, 0));
        let a = load(&mut space, &mapping, "00000000o");
        let b = load(&mut space, &mapping, "00010000o");
        space.focus(Vec3::new(100.0, 0.0, 50.0));

        let walker = space
            .add_dynamic_item(a, Box::new(Actor::new("walker", Vec3::new(50.0, 0.0, 50.0), 0.5)))
            .unwrap();
        assert!(space.mod_dynamic_item(walker, Vec3::new(60.0, 0.0, 50.0), 1.0, false).unwrap());
        assert_eq!(space.items().home(walker), Some(a));

        assert!(space.mod_dynamic_item(walker, Vec3::new(150.0, 0.0, 50.0), 1.0, false).unwrap());
        assert_eq!(space.items().home(walker), Some(b));
        assert_eq!(space.chunk(b).unwrap().dyno_items(), &[walker]);
        assert!(space.chunk(a).unwrap().dyno_items().is_empty());

        assert!(!space.mod_dynamic_item(walker, Vec3::new(-250.0, 0.0, 50.0), 1.0, false).unwrap());
        assert_eq!(space.items().home(walker), None);
        assert_eq!(space.homeless(), &[walker]);
    }

    #[test]
    fn wide_actor_is_lent_to_chunks_within_its_radius() {
        let (mut space, mapping, _) = grid_space(GridBounds::new(0, 0, 1, 0));
        let a = load(&mut space, &mapping, "00000000o");
        let b = load(&mut space, &mapping, "00010000o");
        space.focus(Vec3::new(100.0, 0.0, 50.0));

        let cart = space
            .add_dynamic_item(a, Box::new(Actor::new("cart", Vec3::new(50.0, 0.0, 50.0), 3.0)))
            .unwrap();
        assert!(space.mod_dynamic_item(cart, Vec3::new(98.0, 0.0, 50.0), 6.0, true).unwrap());
        assert_eq!(space.items().home(cart), Some(a));
        assert!(space.is_loan_item(b, cart));

        // crossing over recalls the loan and rehomes the cart
        assert!(space.mod_dynamic_item(cart, Vec3::new(150.0, 0.0, 50.0), 6.0, true).unwrap());
        assert_eq!(space.items().home(cart), Some(b));
        assert!(space.chunk(b).unwrap().lenders().is_empty());
        assert!(space.chunk(a).unwrap().borrowers().is_empty());

        assert!(space.mod_dynamic_item(cart, Vec3::new(102.0, 0.0, 50.0), 6.0, true).unwrap());
        assert!(space.is_loan_item(a, cart));
        assert!(space.validate().is_empty());
    }

    #[test]
    fn sway_items_hear_about_moves() {
        let (mut space, mapping, _) = grid_space(GridBounds::new(0, 0, 0, 0));
        let a = load(&mut space, &mapping, "00000000o");
        space.focus(Vec3::new(50.0, 0.0, 50.0));
        let grass = space
            .add_static_item(a, Box::new(Actor::new("grass", Vec3::new(10.0, 0.0, 10.0), 0.1)))
            .unwrap();
        let walker = space
            .add_dynamic_item(a, Box::new(Actor::new("walker", Vec3::new(50.0, 0.0, 50.0), 0.5)))
            .unwrap();
        space.mod_dynamic_item(walker, Vec3::new(51.0, 0.0, 50.0), 1.0, false).unwrap();
        assert_eq!(space.items().downcast::<Actor>(grass).unwrap().swayed(), 1);
    }

    #[test]
    fn homeless_items_nest_once_their_chunk_is_focused() {
        let (mut space, mapping, _) = grid_space(GridBounds::new(0, 0, 0, 0));
        let lost = space.add_homeless_item(
            Box::new(Actor::new("lost", Vec3::new(20.0, 0.0, 20.0), 0.5)),
            ItemKind::Dynamic,
        );
        let a = load(&mut space, &mapping, "00000000o");
        assert_eq!(space.homeless(), &[lost]);
        space.focus(Vec3::new(50.0, 0.0, 50.0));
        assert!(space.homeless().is_empty());
        assert_eq!(space.items().home(lost), Some(a));
    }
}
