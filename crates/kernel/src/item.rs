//! Chunk items and the capabilities they expose to the graph.
//!
//! An item is owned by the space's [`ItemRegistry`] and lives in one home
//! chunk at a time. What it can do is expressed through capability traits;
//! the graph only asks for the ones it needs.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use chunkspace_common::{BoundingBox, ItemId};
use glam::{Affine3A, Vec3};

use crate::arena::ChunkId;

pub trait Drawable {
    fn draw(&mut self, chunk: ChunkId);
}

pub trait Tickable {
    fn tick(&mut self, dt: f32);
}

/// Items whose influence reaches past their home chunk.
pub trait Lendable {
    /// World-space extent of the item's influence.
    fn lend_bounds(&self) -> Option<BoundingBox>;
}

pub trait BoundsContributor {
    /// Chunk-local extent, used as the shell extent of an empty inside chunk.
    fn local_bounds(&self) -> Option<BoundingBox> {
        None
    }

    /// Grow the y extent of a chunk-local box. Returns true when it changed.
    fn add_y_bounds(&self, bb: &mut BoundingBox) -> bool;

    /// World-space obstacle extent given the home chunk's transform.
    fn collision_bounds(&self, home: &Affine3A) -> Option<BoundingBox>;
}

pub trait ChunkItem: Any {
    fn label(&self) -> &str;

    /// Ownership moved to `home`, or out of every chunk.
    fn toss(&mut self, home: Option<ChunkId>);

    fn position(&self) -> Vec3;

    fn set_position(&mut self, _position: Vec3) {}

    fn wants_sway(&self) -> bool {
        false
    }

    fn wants_nest(&self) -> bool {
        false
    }

    /// Something moved from `old` to `new` through the item's chunk.
    fn sway(&mut self, _old: Vec3, _new: Vec3, _diameter: f32) {}

    fn as_drawable(&mut self) -> Option<&mut dyn Drawable> {
        None
    }

    fn as_tickable(&mut self) -> Option<&mut dyn Tickable> {
        None
    }

    fn as_lendable(&self) -> Option<&dyn Lendable> {
        None
    }

    fn as_bounds(&self) -> Option<&dyn BoundsContributor> {
        None
    }

    fn as_any(&self) -> &dyn Any;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemKind {
    Static,
    Dynamic,
}

pub struct ItemEntry {
    pub item: Box<dyn ChunkItem>,
    pub home: Option<ChunkId>,
    pub kind: ItemKind,
}

impl fmt::Debug for ItemEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemEntry")
            .field("label", &self.item.label())
            .field("home", &self.home)
            .field("kind", &self.kind)
            .finish()
    }
}

/// Owner of every item in a space.
#[derive(Debug, Default)]
pub struct ItemRegistry {
    entries: BTreeMap<ItemId, ItemEntry>,
}

impl ItemRegistry {
    pub fn insert(&mut self, item: Box<dyn ChunkItem>, kind: ItemKind) -> ItemId {
        let id = ItemId::new();
        self.entries.insert(
            id,
            ItemEntry {
                item,
                home: None,
                kind,
            },
        );
        id
    }

    pub fn remove(&mut self, id: ItemId) -> Option<Box<dyn ChunkItem>> {
        self.entries.remove(&id).map(|e| e.item)
    }

    pub fn get(&self, id: ItemId) -> Option<&ItemEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut ItemEntry> {
        self.entries.get_mut(&id)
    }

    /// Borrow an item as its concrete type.
    pub fn downcast<T: ChunkItem>(&self, id: ItemId) -> Option<&T> {
        self.entries.get(&id)?.item.as_any().downcast_ref::<T>()
    }

    pub fn home(&self, id: ItemId) -> Option<ChunkId> {
        self.entries.get(&id).and_then(|e| e.home)
    }

    /// Record the new home and tell the item.
    pub(crate) fn toss(&mut self, id: ItemId, home: Option<ChunkId>) {
        if let Some(e) = self.entries.get_mut(&id) {
            e.home = home;
            e.item.toss(home);
        }
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ItemId> + '_ {
        self.entries.keys().copied()
    }
}

/// The primary geometry of an inside chunk.
#[derive(Debug, Clone)]
pub struct ShellModel {
    resource: String,
    local_bb: BoundingBox,
    home: Option<ChunkId>,
    draws: u64,
}

impl ShellModel {
    pub fn new(resource: impl Into<String>, local_bb: BoundingBox) -> Self {
        Self {
            resource: resource.into(),
            local_bb,
            home: None,
            draws: 0,
        }
    }

    pub fn draws(&self) -> u64 {
        self.draws
    }
}

impl Drawable for ShellModel {
    fn draw(&mut self, _chunk: ChunkId) {
        self.draws += 1;
    }
}

impl BoundsContributor for ShellModel {
    fn local_bounds(&self) -> Option<BoundingBox> {
        Some(self.local_bb)
    }

    fn add_y_bounds(&self, bb: &mut BoundingBox) -> bool {
        let (lo, hi) = (bb.min.y, bb.max.y);
        bb.min.y = bb.min.y.min(self.local_bb.min.y);
        bb.max.y = bb.max.y.max(self.local_bb.max.y);
        lo != bb.min.y || hi != bb.max.y
    }

    fn collision_bounds(&self, home: &Affine3A) -> Option<BoundingBox> {
        Some(self.local_bb.transformed(home))
    }
}

impl ChunkItem for ShellModel {
    fn label(&self) -> &str {
        &self.resource
    }

    fn toss(&mut self, home: Option<ChunkId>) {
        self.home = home;
    }

    fn position(&self) -> Vec3 {
        self.local_bb.centre()
    }

    fn as_drawable(&mut self) -> Option<&mut dyn Drawable> {
        Some(self)
    }

    fn as_bounds(&self) -> Option<&dyn BoundsContributor> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A light whose radius is shared with neighbouring chunks.
#[derive(Debug, Clone)]
pub struct PointLight {
    label: String,
    position: Vec3,
    radius: f32,
    home: Option<ChunkId>,
    drawn_in: Vec<ChunkId>,
}

impl PointLight {
    pub fn new(label: impl Into<String>, position: Vec3, radius: f32) -> Self {
        Self {
            label: label.into(),
            position,
            radius,
            home: None,
            drawn_in: Vec::new(),
        }
    }

    pub fn home(&self) -> Option<ChunkId> {
        self.home
    }

    /// Chunks this light was drawn from, in order.
    pub fn drawn_in(&self) -> &[ChunkId] {
        &self.drawn_in
    }
}

impl Drawable for PointLight {
    fn draw(&mut self, chunk: ChunkId) {
        self.drawn_in.push(chunk);
    }
}

impl Lendable for PointLight {
    fn lend_bounds(&self) -> Option<BoundingBox> {
        Some(BoundingBox::new(self.position, self.position).expanded(self.radius))
    }
}

impl ChunkItem for PointLight {
    fn label(&self) -> &str {
        &self.label
    }

    fn toss(&mut self, home: Option<ChunkId>) {
        self.home = home;
    }

    fn position(&self) -> Vec3 {
        self.position
    }

    fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    fn as_drawable(&mut self) -> Option<&mut dyn Drawable> {
        Some(self)
    }

    fn as_lendable(&self) -> Option<&dyn Lendable> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A moving object with a collision radius.
#[derive(Debug, Clone)]
pub struct Actor {
    label: String,
    position: Vec3,
    radius: f32,
    home: Option<ChunkId>,
    elapsed: f32,
    swayed: u32,
}

impl Actor {
    pub fn new(label: impl Into<String>, position: Vec3, radius: f32) -> Self {
        Self {
            label: label.into(),
            position,
            radius,
            home: None,
            elapsed: 0.0,
            swayed: 0,
        }
    }

    pub fn home(&self) -> Option<ChunkId> {
        self.home
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn swayed(&self) -> u32 {
        self.swayed
    }
}

impl Tickable for Actor {
    fn tick(&mut self, dt: f32) {
        self.elapsed += dt;
    }
}

impl BoundsContributor for Actor {
    fn add_y_bounds(&self, _bb: &mut BoundingBox) -> bool {
        false
    }

    fn collision_bounds(&self, _home: &Affine3A) -> Option<BoundingBox> {
        Some(BoundingBox::new(self.position, self.position).expanded(self.radius))
    }
}

impl ChunkItem for Actor {
    fn label(&self) -> &str {
        &self.label
    }

    fn toss(&mut self, home: Option<ChunkId>) {
        self.home = home;
    }

    fn position(&self) -> Vec3 {
        self.position
    }

    fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    fn wants_sway(&self) -> bool {
        true
    }

    fn wants_nest(&self) -> bool {
        true
    }

    fn sway(&mut self, _old: Vec3, _new: Vec3, _diameter: f32) {
        self.swayed += 1;
    }

    fn as_tickable(&mut self) -> Option<&mut dyn Tickable> {
        Some(self)
    }

    fn as_bounds(&self) -> Option<&dyn BoundsContributor> {
        Some(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
